//! Property divergence summaries
//!
//! For every property split, how far the converting users' distribution
//! over the property's values drifts from the whole parent population's,
//! one KL term per value. Summaries can be emitted as graph nodes.

use std::cmp::Ordering;
use tracing::debug;

use crate::constraints::{EventConstraints, PropertyScope};
use crate::entropy::kl_distance_bits;
use crate::oracle::Pattern;

use super::builder::ParentCounts;
use super::types::{Frequencies, ItreeNode, KlDistanceUnit, NodeType, PropertyGraph};

/// Bucket holding the values trimmed from a graph node
pub const OTHER_VALUES_LABEL: &str = "Other";

/// Bucket holding users without the property
pub const NONE_VALUE_LABEL: &str = "None";

/// Divergence term of one property value, from its child node's counts
pub fn kl_unit(property_value: impl Into<String>, frequencies: &Frequencies) -> KlDistanceUnit {
    let pattern_prob = frequencies.fcp / frequencies.fpp;
    let rule_prob = frequencies.fcr / frequencies.fpr;
    KlDistanceUnit {
        property_value: property_value.into(),
        distance: kl_distance_bits(pattern_prob, rule_prob),
        frequencies: *frequencies,
    }
}

fn residual_unit(label: &str, units: &[KlDistanceUnit], counts: ParentCounts) -> KlDistanceUnit {
    let fcp = counts.fpp - units.iter().map(|u| u.frequencies.fcp).sum::<f64>();
    let fcr = counts.fpr - units.iter().map(|u| u.frequencies.fcr).sum::<f64>();
    kl_unit(label, &Frequencies::new(counts.fpp, counts.fpr, fcp, fcr))
}

/// Complete a property's value terms with a "None" bucket for whatever the
/// observed values do not account for
pub fn kl_summary(mut units: Vec<KlDistanceUnit>, counts: ParentCounts) -> Vec<KlDistanceUnit> {
    if units.is_empty() {
        return units;
    }
    let none = residual_unit(NONE_VALUE_LABEL, &units, counts);
    if none.frequencies.fcp > 0.0 || none.frequencies.fcr > 0.0 {
        units.push(none);
    }
    units
}

/// Turn a property's divergence summary into a graph node under `parent`.
///
/// Values are ranked by absolute divergence; beyond `max_values` the tail
/// is folded into an "Other" bucket. The node's information drop is the
/// summed divergence of everything but "Other".
pub fn build_graph_node<'o, P: Pattern>(
    parent: &ItreeNode<'o, P>,
    property_name: &str,
    mut units: Vec<KlDistanceUnit>,
    scope: PropertyScope,
    counts: ParentCounts,
    max_values: usize,
) -> ItreeNode<'o, P> {
    units.sort_by(|a, b| {
        b.distance
            .abs()
            .partial_cmp(&a.distance.abs())
            .unwrap_or(Ordering::Equal)
    });

    let mut other_fcp = 0.0;
    if units.len() > max_values {
        units.truncate(max_values.saturating_sub(1));
        let other = residual_unit(OTHER_VALUES_LABEL, &units, counts);
        other_fcp = other.frequencies.fcp;
        units.push(other);
    }

    let information_drop: f64 = units
        .iter()
        .filter(|u| u.property_value != OTHER_VALUES_LABEL)
        .map(|u| u.distance)
        .sum();

    debug!(
        parent = parent.index,
        property = property_name,
        values = units.len(),
        drop = information_drop,
        "Built graph candidate"
    );

    ItreeNode {
        pattern: parent.pattern,
        constraints: parent.constraints.clone(),
        node_type: NodeType::graph(scope),
        index: 0,
        parent_index: Some(parent.index),
        frequencies: Frequencies::new(counts.fpp, counts.fpr, 0.0, 0.0),
        right_information: 0.0,
        right_fraction: 0.0,
        overall_information: 0.0,
        information_drop,
        confidence: 0.0,
        confidence_gain: 0.0,
        added_constraint: EventConstraints::default(),
        graph: Some(PropertyGraph {
            property_name: property_name.to_string(),
            kl_distances: units,
            other_fcp,
        }),
    }
}
