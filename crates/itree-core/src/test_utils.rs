//! Test utilities for itree-core
//!
//! Canned in-memory oracles for unit and integration tests, plus log
//! capture through `tracing-subscriber`.

use crate::constraints::{CategoricalConstraint, EventConstraints, NumericConstraint, PropertyScope};
use crate::memory::MemoryOracle;
use crate::oracle::{PropertiesInfo, UserAndEventsInfo, ALL_ACTIVE_USERS};

fn events(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Ten users over events A, B, C and Y, mined up to four events deep.
///
/// Entries are (events, per-user count, occurrence count), in catalogue
/// order. Ties in information drop keep this order.
pub const GOLDEN_PATTERNS: &[(&[&str], u64, u64)] = &[
    (&[ALL_ACTIVE_USERS], 10, 10),
    (&["A"], 9, 14),
    (&["B"], 9, 10),
    (&["C"], 9, 12),
    (&["Y"], 6, 6),
    (&["A", "B"], 7, 8),
    (&["A", "C"], 5, 5),
    (&["A", "Y"], 4, 4),
    (&["B", "A"], 3, 3),
    (&["B", "C"], 7, 8),
    (&["B", "Y"], 5, 5),
    (&["C", "A"], 4, 4),
    (&["C", "B"], 2, 2),
    (&["C", "Y"], 5, 5),
    (&["Y", "A"], 2, 2),
    (&["Y", "C"], 2, 2),
    (&["A", "C", "B"], 1, 1),
    (&["A", "B", "C"], 5, 5),
    (&["A", "Y", "C"], 1, 1),
    (&["A", "B", "Y"], 4, 4),
    (&["A", "C", "Y"], 4, 4),
    (&["B", "C", "A"], 2, 2),
    (&["B", "Y", "A"], 1, 1),
    (&["B", "A", "C"], 1, 1),
    (&["B", "Y", "C"], 2, 2),
    (&["B", "A", "Y"], 1, 1),
    (&["B", "C", "Y"], 4, 4),
    (&["C", "Y", "A"], 2, 2),
    (&["C", "A", "B"], 1, 1),
    (&["C", "B", "Y"], 1, 1),
    (&["A", "C", "B", "Y"], 1, 1),
    (&["A", "B", "C", "Y"], 4, 4),
    (&["A", "B", "Y", "C"], 1, 1),
    (&["B", "A", "C", "Y"], 1, 1),
    (&["B", "C", "Y", "A"], 1, 1),
];

/// The ten-user reference funnel, without any property data
pub fn golden_funnel() -> MemoryOracle {
    let mut oracle = MemoryOracle::new(10, 42);
    for (names, per_user, per_occurrence) in GOLDEN_PATTERNS {
        oracle.add_pattern(events(names), *per_user, *per_occurrence);
    }
    oracle
}

fn user(constraint: CategoricalConstraint) -> Vec<EventConstraints> {
    vec![EventConstraints::categorical(PropertyScope::User, constraint)]
}

fn user_range(min: f64, max: f64) -> Vec<EventConstraints> {
    vec![EventConstraints::numeric(
        PropertyScope::User,
        NumericConstraint::within("age", min, max),
    )]
}

fn source_on_first(pattern_len: usize, value: &str) -> Vec<EventConstraints> {
    let mut overlay = vec![EventConstraints::default(); pattern_len];
    overlay[0] = EventConstraints::categorical(
        PropertyScope::Event,
        CategoricalConstraint::equals("$source", value),
    );
    overlay
}

/// Ten users, six of whom convert into Y, with property data:
/// - user `plan`: 4 `pro` users (all convert), 5 `free` users (2 convert)
/// - user `age`: adaptive buckets `[18, 30)` (4 users, 3 convert) and
///   `[30, 65)` (6 users, 3 convert)
/// - event `$source` on A: 8 users did A, 5 of them then Y;
///   `ads` 5 (4 convert), `organic` 3 (1 converts)
pub fn plan_funnel() -> MemoryOracle {
    let mut oracle = MemoryOracle::new(10, 40);
    let all_users = events(&[ALL_ACTIVE_USERS]);
    let y = events(&["Y"]);
    let a = events(&["A"]);
    let ay = events(&["A", "Y"]);

    oracle.add_pattern(all_users.clone(), 10, 40);
    oracle.add_pattern(y.clone(), 6, 8);
    oracle.add_pattern(a.clone(), 8, 12);
    oracle.add_pattern(ay.clone(), 5, 6);

    let counts: [(&Vec<String>, Vec<EventConstraints>, u64); 12] = [
        (&y, user(CategoricalConstraint::equals("plan", "pro")), 4),
        (&all_users, user(CategoricalConstraint::equals("plan", "pro")), 4),
        (&y, user(CategoricalConstraint::equals("plan", "free")), 2),
        (&all_users, user(CategoricalConstraint::equals("plan", "free")), 5),
        (&y, user_range(18.0, 30.0), 3),
        (&all_users, user_range(18.0, 30.0), 4),
        (&y, user_range(30.0, 65.0), 3),
        (&all_users, user_range(30.0, 65.0), 6),
        (&ay, source_on_first(2, "ads"), 4),
        (&a, source_on_first(1, "ads"), 5),
        (&ay, source_on_first(2, "organic"), 1),
        (&a, source_on_first(1, "organic"), 3),
    ];
    for (pattern, constraints, per_user) in counts {
        oracle
            .add_constrained_count(pattern, constraints, per_user, per_user)
            .unwrap();
    }
    oracle
        .add_numeric_bins(&y, 0, PropertyScope::User, "age", vec![(18.0, 30.0), (30.0, 65.0)])
        .unwrap();

    oracle.set_user_and_events_info(UserAndEventsInfo {
        user_properties: PropertiesInfo::default()
            .with_categorical("plan", ["free", "pro"])
            .with_numeric("age"),
        event_properties: [(
            "A".to_string(),
            PropertiesInfo::default().with_categorical("$source", ["ads", "organic"]),
        )]
        .into_iter()
        .collect(),
    });
    oracle
}

/// Route `tracing` output to the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
