//! Property expansion
//!
//! Children that keep the parent's sequence and add one property constraint
//! on the event right before the end event (or on the only event, for user
//! properties of a single-event funnel).
//!
//! Candidates are generated per property group, in this order:
//! 1. User categorical
//! 2. User numeric
//! 3. Event categorical
//! 4. Event numeric
//!
//! All candidates then compete in one dedup pass ranked by information
//! drop, so that a single property cannot crowd out the others.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

use crate::config::ItreeConfig;
use crate::constraints::{
    constrained_properties, CategoricalConstraint, CountType, EventConstraints, NumericConstraint,
    PropertyScope,
};
use crate::error::Result;
use crate::oracle::{FrequencyOracle, Pattern};

use super::builder::{NodeBuilder, ParentCounts};
use super::divergence::{build_graph_node, kl_summary, kl_unit, NONE_VALUE_LABEL};
use super::sequence::{parent_for_expansion, sort_by_drop};
use super::tree::Itree;
use super::types::{ItreeNode, KlDistanceUnit, NodeType};

/// Properties the caller cares about most; tried before the rest so that
/// per-group caps do not starve them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreferredProperties {
    #[serde(default)]
    pub event: BTreeSet<String>,
    #[serde(default)]
    pub user: BTreeSet<String>,
}

impl PreferredProperties {
    pub fn for_scope(&self, scope: PropertyScope) -> &BTreeSet<String> {
        match scope {
            PropertyScope::Event => &self.event,
            PropertyScope::User => &self.user,
        }
    }

    /// Stable partition: preferred names first, everything else after,
    /// each part in its original order
    pub fn order(&self, scope: PropertyScope, names: Vec<String>) -> Vec<String> {
        let preferred = self.for_scope(scope);
        let (mut first, rest): (Vec<_>, Vec<_>) =
            names.into_iter().partition(|name| preferred.contains(name));
        first.extend(rest);
        first
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PropertyKind {
    Categorical,
    Numeric,
}

/// Candidate constraints derived from one numeric bucket
#[derive(Debug, Clone, PartialEq)]
pub struct BucketConstraints {
    pub below: Option<NumericConstraint>,
    pub within: NumericConstraint,
    pub above: Option<NumericConstraint>,
}

/// Constraints for a `[min, max)` bucket. Open-ended neighbours are only
/// derived for adaptive buckets; predefined buckets already tile the range.
pub fn bucket_constraints(
    property_name: &str,
    min: f64,
    max: f64,
    predefined: bool,
) -> BucketConstraints {
    BucketConstraints {
        below: (!predefined).then(|| NumericConstraint::below(property_name, min)),
        within: NumericConstraint::within(property_name, min, max),
        above: (!predefined).then(|| NumericConstraint::above(property_name, max)),
    }
}

/// Divergence summary of one property, across every value that produced
/// a candidate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyDivergence {
    pub scope: PropertyScope,
    pub property_name: String,
    pub units: Vec<KlDistanceUnit>,
}

/// Counters of one property expansion
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PropertyStats {
    pub user_categorical_considered: usize,
    pub user_numeric_considered: usize,
    pub event_categorical_considered: usize,
    pub event_numeric_considered: usize,
    /// Candidate nodes that survived the frequency checks
    pub candidates: usize,
    /// Open-ended numeric constraints derived but not tried
    pub bound_constraints_skipped: usize,
    /// Candidates dropped for a non-positive information drop
    pub rejected_non_positive_drop: usize,
    /// Candidates dropped because their property was already used
    pub rejected_duplicate: usize,
}

impl PropertyStats {
    /// Add another expansion's counters to these
    pub fn absorb(&mut self, other: &PropertyStats) {
        self.user_categorical_considered += other.user_categorical_considered;
        self.user_numeric_considered += other.user_numeric_considered;
        self.event_categorical_considered += other.event_categorical_considered;
        self.event_numeric_considered += other.event_numeric_considered;
        self.candidates += other.candidates;
        self.bound_constraints_skipped += other.bound_constraints_skipped;
        self.rejected_non_positive_drop += other.rejected_non_positive_drop;
        self.rejected_duplicate += other.rejected_duplicate;
    }

    fn considered(&mut self, scope: PropertyScope, kind: PropertyKind) -> &mut usize {
        match (scope, kind) {
            (PropertyScope::User, PropertyKind::Categorical) => &mut self.user_categorical_considered,
            (PropertyScope::User, PropertyKind::Numeric) => &mut self.user_numeric_considered,
            (PropertyScope::Event, PropertyKind::Categorical) => {
                &mut self.event_categorical_considered
            }
            (PropertyScope::Event, PropertyKind::Numeric) => &mut self.event_numeric_considered,
        }
    }
}

/// Result of one property expansion
#[derive(Debug, Clone, Default)]
pub struct PropertyExpansion {
    /// Indices of the inserted children
    pub added: Vec<usize>,
    pub divergences: Vec<PropertyDivergence>,
    pub stats: PropertyStats,
}

struct Generator<'a, 'o, O: FrequencyOracle> {
    builder: &'a NodeBuilder<'o, O>,
    config: &'a ItreeConfig,
    parent: &'a ItreeNode<'o, O::Pattern>,
    counts: ParentCounts,
    seen: BTreeSet<String>,
    /// Overlay slot the new constraint lands on
    slot: usize,
    candidates: Vec<ItreeNode<'o, O::Pattern>>,
    divergences: Vec<PropertyDivergence>,
    stats: PropertyStats,
}

impl<'a, 'o, O: FrequencyOracle> Generator<'a, 'o, O> {
    fn skip(&self, property_name: &str, kind: PropertyKind) -> bool {
        if self.seen.contains(property_name) {
            return true;
        }
        match kind {
            PropertyKind::Categorical => self.config.properties.should_ignore(property_name),
            PropertyKind::Numeric => self.config.properties.should_ignore_numeric(property_name),
        }
    }

    fn cap(&self, kind: PropertyKind) -> usize {
        match kind {
            PropertyKind::Categorical => self.config.max_categorical_properties,
            PropertyKind::Numeric => self.config.max_numeric_properties,
        }
    }

    fn run_group(
        &mut self,
        scope: PropertyScope,
        kind: PropertyKind,
        names: Vec<String>,
        values: &dyn Fn(&str) -> Vec<String>,
    ) -> Result<()> {
        let mut tried = 0;
        for name in names {
            if tried >= self.cap(kind) {
                break;
            }
            if self.skip(&name, kind) {
                continue;
            }
            tried += 1;
            *self.stats.considered(scope, kind) += 1;

            let units = match kind {
                PropertyKind::Categorical => self.categorical(scope, &name, values(&name))?,
                PropertyKind::Numeric => self.numeric(scope, &name)?,
            };
            self.summarize(scope, &name, units);
        }
        Ok(())
    }

    fn categorical(
        &mut self,
        scope: PropertyScope,
        name: &str,
        values: Vec<String>,
    ) -> Result<Vec<KlDistanceUnit>> {
        let mut units = Vec::new();
        let usable = values
            .into_iter()
            .filter(|value| !value.is_empty() && value != NONE_VALUE_LABEL)
            .take(self.config.max_categorical_values);
        for value in usable {
            let added = EventConstraints::categorical(scope, CategoricalConstraint::equals(name, &value));
            if let Some(unit) = self.try_candidate(scope, &added, value)? {
                units.push(unit);
            }
        }
        Ok(units)
    }

    fn numeric(&mut self, scope: PropertyScope, name: &str) -> Result<Vec<KlDistanceUnit>> {
        let (ranges, predefined) = match self.config.properties.predefined_bins(name) {
            Some(ranges) => (ranges.to_vec(), true),
            None => match self.parent.pattern.numeric_bin_ranges(
                self.slot,
                scope,
                name,
                self.builder.count_type(),
            ) {
                Some(ranges) => (ranges, false),
                None => return Ok(Vec::new()),
            },
        };

        let mut units = Vec::new();
        for (min, max) in ranges {
            if min.partial_cmp(&max) != Some(std::cmp::Ordering::Less) {
                warn!(property = name, min, max, "Skipping empty numeric bucket");
                continue;
            }
            let bucket = bucket_constraints(name, min, max, predefined);
            self.stats.bound_constraints_skipped +=
                usize::from(bucket.below.is_some()) + usize::from(bucket.above.is_some());

            let added = EventConstraints::numeric(scope, bucket.within);
            if let Some(unit) = self.try_candidate(scope, &added, format!("[{}, {})", min, max))? {
                units.push(unit);
            }
        }
        Ok(units)
    }

    fn try_candidate(
        &mut self,
        scope: PropertyScope,
        added: &EventConstraints,
        label: String,
    ) -> Result<Option<KlDistanceUnit>> {
        let child = self.builder.build_child(
            self.parent,
            self.parent.pattern,
            Some(added),
            NodeType::property(scope),
            self.counts,
        )?;
        Ok(child.map(|child| {
            let unit = kl_unit(label, &child.frequencies);
            self.stats.candidates += 1;
            self.candidates.push(child);
            unit
        }))
    }

    fn summarize(&mut self, scope: PropertyScope, name: &str, units: Vec<KlDistanceUnit>) {
        if units.is_empty() {
            return;
        }
        let units = kl_summary(units, self.counts);
        if self.config.emit_graph_nodes {
            self.candidates.push(build_graph_node(
                self.parent,
                name,
                units.clone(),
                scope,
                self.counts,
                self.config.max_properties_in_graph_node,
            ));
        }
        self.divergences.push(PropertyDivergence {
            scope,
            property_name: name.to_string(),
            units,
        });
    }
}

/// Add the best property children of a node
pub fn expand_properties<'o, O: FrequencyOracle>(
    builder: &NodeBuilder<'o, O>,
    tree: &mut Itree<'o, O::Pattern>,
    parent_index: usize,
    config: &ItreeConfig,
    preferred: &PreferredProperties,
) -> Result<PropertyExpansion> {
    let (candidates, seen, divergences, mut stats) = {
        let Some((parent, counts)) = parent_for_expansion(builder, tree, parent_index)? else {
            return Ok(PropertyExpansion::default());
        };
        if !parent.node_type.can_parent() {
            return Ok(PropertyExpansion::default());
        }

        let len = parent.len();
        let slot = if len > 1 { len - 2 } else { 0 };
        let event_name = parent.event_names()[slot].as_str();
        let info = builder.oracle().user_and_events_info();

        let mut generator = Generator {
            builder,
            config,
            parent,
            counts,
            seen: constrained_properties(&parent.constraints),
            slot,
            candidates: Vec::new(),
            divergences: Vec::new(),
            stats: PropertyStats::default(),
        };

        let user_allowed = len > 1 || builder.count_type() == CountType::PerUser;
        let groups = [
            (PropertyScope::User, PropertyKind::Categorical, user_allowed),
            (PropertyScope::User, PropertyKind::Numeric, user_allowed),
            (PropertyScope::Event, PropertyKind::Categorical, len > 1),
            (PropertyScope::Event, PropertyKind::Numeric, len > 1),
        ];
        for (scope, kind, allowed) in groups {
            if !allowed {
                continue;
            }
            let Some(properties) = info.properties(scope, event_name) else {
                continue;
            };
            let names = match kind {
                PropertyKind::Categorical => properties.categorical_names(),
                PropertyKind::Numeric => properties.numeric_names(),
            };
            let names = preferred.order(scope, names);
            generator.run_group(scope, kind, names, &|name| properties.values_of(name))?;
        }

        (
            generator.candidates,
            generator.seen,
            generator.divergences,
            generator.stats,
        )
    };

    let added = accept_candidates(tree, candidates, &seen, config, &mut stats);
    debug!(
        parent = parent_index,
        candidates = stats.candidates,
        added = added.len(),
        "Expanded property children"
    );

    Ok(PropertyExpansion {
        added,
        divergences,
        stats,
    })
}

/// Dedup pass: best drop first, one accepted child per property name (or
/// as many as the repeat limits allow), never a property the parent
/// already constrains
fn accept_candidates<'o, P: Pattern>(
    tree: &mut Itree<'o, P>,
    mut candidates: Vec<ItreeNode<'o, P>>,
    seen: &BTreeSet<String>,
    config: &ItreeConfig,
    stats: &mut PropertyStats,
) -> Vec<usize> {
    sort_by_drop(&mut candidates);

    let mut accepted_by_property: HashMap<String, usize> = HashMap::new();
    let mut added = Vec::new();
    for candidate in candidates {
        if added.len() >= config.max_property_children {
            break;
        }
        if candidate.information_drop <= 0.0 {
            stats.rejected_non_positive_drop += 1;
            continue;
        }

        let limit = if candidate.added_constraint.is_categorical() {
            config.categorical_repeat_limit
        } else {
            config.numeric_repeat_limit
        };
        let names: Vec<String> = candidate
            .added_constraint
            .property_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let duplicate = names.iter().any(|name| {
            seen.contains(name) || accepted_by_property.get(name).copied().unwrap_or(0) >= limit
        });
        if duplicate {
            stats.rejected_duplicate += 1;
            continue;
        }

        for name in names {
            *accepted_by_property.entry(name).or_default() += 1;
        }
        added.push(tree.add_node(candidate));
    }
    added
}
