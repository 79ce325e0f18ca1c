//! Frequency oracle interface
//!
//! The tree builder never mines or counts raw events itself. Everything it
//! knows about frequencies comes through these traits:
//! - [`Pattern`]: one already-mined event sequence with constrained counts
//! - [`FrequencyOracle`]: lookup of arbitrary prefixes, the candidate
//!   catalogue, and property metadata

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::constraints::{CountType, EventConstraints, PropertyScope};
use crate::error::Result;

/// Synthetic pattern covering every active user
pub const ALL_ACTIVE_USERS: &str = "$AllActiveUsers";

/// Campaign-encoded session events and the label each kind renders as
const CAMPAIGN_KINDS: &[(&str, &str)] = &[
    ("$session[campaign", "Campaign"),
    ("$session[source", "Source"),
    ("$session[medium", "Medium"),
    ("$session[adgroup", "Adgroup"),
    ("$session[initial_referrer", "Initial_Referrer"),
];

/// An externally mined event sequence
pub trait Pattern {
    fn event_names(&self) -> &[String];

    /// Users seen in the window the pattern was mined from
    fn total_user_count(&self) -> u64;

    /// Frequency of the pattern under a per-event constraint overlay.
    /// An empty overlay means unconstrained.
    fn count(&self, constraints: &[EventConstraints], count_type: CountType) -> Result<u64>;

    fn per_user_count(&self, constraints: &[EventConstraints]) -> Result<u64> {
        self.count(constraints, CountType::PerUser)
    }

    /// Adaptive bucket ranges observed for a numeric property at an event
    /// position, if any were computed while mining
    fn numeric_bin_ranges(
        &self,
        event_index: usize,
        scope: PropertyScope,
        property_name: &str,
        count_type: CountType,
    ) -> Option<Vec<(f64, f64)>>;

    fn len(&self) -> usize {
        self.event_names().len()
    }

    fn is_empty(&self) -> bool {
        self.event_names().is_empty()
    }

    fn label(&self) -> String {
        self.event_names().join(",")
    }
}

/// Source of frequencies and property catalogues for one build
pub trait FrequencyOracle {
    type Pattern: Pattern;

    /// Frequency of an arbitrary event sequence. `None` when the sequence
    /// was never mined.
    fn count(
        &self,
        event_names: &[String],
        constraints: &[EventConstraints],
        count_type: CountType,
    ) -> Option<u64>;

    fn pattern(&self, event_names: &[String]) -> Option<&Self::Pattern>;

    /// Every mined pattern that ends with `end_event` (and begins with
    /// `start_event` when given)
    fn all_patterns(&self, start_event: Option<&str>, end_event: &str)
        -> Result<Vec<&Self::Pattern>>;

    fn total_event_count(&self) -> u64;

    fn user_and_events_info(&self) -> &UserAndEventsInfo;

    /// Whether an event name encodes a marketing campaign touch
    fn is_campaign_event(&self, event_name: &str) -> bool {
        is_campaign_event(event_name)
    }
}

/// Observed property keys for one event (or for users)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertiesInfo {
    #[serde(default)]
    pub numeric_property_keys: BTreeSet<String>,
    #[serde(default)]
    pub categorical_property_values: BTreeMap<String, BTreeSet<String>>,
}

impl PropertiesInfo {
    pub fn with_categorical<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categorical_property_values
            .entry(name.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn with_numeric(mut self, name: impl Into<String>) -> Self {
        self.numeric_property_keys.insert(name.into());
        self
    }

    pub fn categorical_names(&self) -> Vec<String> {
        self.categorical_property_values.keys().cloned().collect()
    }

    pub fn numeric_names(&self) -> Vec<String> {
        self.numeric_property_keys.iter().cloned().collect()
    }

    pub fn values_of(&self, name: &str) -> Vec<String> {
        self.categorical_property_values
            .get(name)
            .map(|values| values.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Property catalogue for users and for each event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserAndEventsInfo {
    #[serde(default)]
    pub user_properties: PropertiesInfo,
    #[serde(default)]
    pub event_properties: BTreeMap<String, PropertiesInfo>,
}

impl UserAndEventsInfo {
    /// Catalogue for a scope; event scope is keyed by the event name
    pub fn properties(&self, scope: PropertyScope, event_name: &str) -> Option<&PropertiesInfo> {
        match scope {
            PropertyScope::User => Some(&self.user_properties),
            PropertyScope::Event => self.event_properties.get(event_name),
        }
    }
}

pub fn is_campaign_event(event_name: &str) -> bool {
    CAMPAIGN_KINDS
        .iter()
        .any(|(prefix, _)| event_name.starts_with(prefix))
}

/// Display label for a campaign event, e.g. `$session[source:google]`
/// becomes `Source = google`. Empty when the name is not a campaign event.
pub fn campaign_label(event_name: &str) -> String {
    for (prefix, label) in CAMPAIGN_KINDS {
        if let Some(rest) = event_name.strip_prefix(prefix) {
            let Some(value) = rest.strip_prefix(':') else {
                continue;
            };
            let value = value.split(']').next().unwrap_or_default();
            return format!("{} = {}", label, value);
        }
    }
    String::new()
}
