//! Node builder
//!
//! Builds single candidate nodes: the root of a funnel, and children that
//! differ from their parent by one inserted event or one added property
//! constraint. Candidates that are not frequent enough, or whose counts are
//! not nested, come back as `Ok(None)`; shape mismatches are hard errors.

use tracing::debug;

use crate::constraints::{endpoint_overlay, CountType, EventConstraints};
use crate::entropy::binary_information;
use crate::error::{Error, Result};
use crate::oracle::{FrequencyOracle, Pattern};

use super::types::{Frequencies, ItreeNode, NodeType};

/// Parent-side counts shared by every candidate of one expansion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParentCounts {
    /// Parent pattern (prefix) frequency
    pub fpp: f64,
    /// Parent rule frequency
    pub fpr: f64,
}

impl ParentCounts {
    /// Whether the parent has anything to split
    pub fn is_frequent(&self) -> bool {
        self.fpp > 0.0 && self.fpr > 0.0
    }
}

/// Builds root and child nodes against one frequency oracle
pub struct NodeBuilder<'o, O: FrequencyOracle> {
    oracle: &'o O,
    all_active_users: Option<&'o O::Pattern>,
    count_type: CountType,
    start_constraints: Option<EventConstraints>,
    end_constraints: Option<EventConstraints>,
}

impl<'o, O: FrequencyOracle> NodeBuilder<'o, O> {
    pub fn new(oracle: &'o O, count_type: CountType) -> Self {
        Self {
            oracle,
            all_active_users: None,
            count_type,
            start_constraints: None,
            end_constraints: None,
        }
    }

    /// Attach the synthetic all-active-users pattern, needed for
    /// single-event funnels
    pub fn with_all_active_users(mut self, pattern: Option<&'o O::Pattern>) -> Self {
        self.all_active_users = pattern;
        self
    }

    /// Constraints the caller put on the funnel's start and end events
    pub fn with_endpoint_constraints(
        mut self,
        start: Option<EventConstraints>,
        end: Option<EventConstraints>,
    ) -> Self {
        self.start_constraints = start;
        self.end_constraints = end;
        self
    }

    pub fn oracle(&self) -> &'o O {
        self.oracle
    }

    pub fn count_type(&self) -> CountType {
        self.count_type
    }

    /// Overlay for a funnel endpoint pattern of `len` events
    pub fn endpoint_overlay(&self, len: usize) -> Vec<EventConstraints> {
        endpoint_overlay(
            len,
            self.start_constraints.as_ref(),
            self.end_constraints.as_ref(),
        )
    }

    /// Build the root node for an end-event-only or start -> end pattern
    pub fn build_root(&self, pattern: &'o O::Pattern) -> Result<ItreeNode<'o, O::Pattern>> {
        let len = pattern.len();
        let constraints = self.endpoint_overlay(len);
        let count = pattern.count(&constraints, self.count_type)? as f64;

        let (fcp, fcr) = match len {
            1 => {
                let all_users = self.all_active_users.ok_or(Error::AllActiveUsersMissing)?;
                let filter = [self.start_constraints.clone().unwrap_or_default()];
                let fcp = all_users.count(&filter, self.count_type).unwrap_or(0) as f64;
                (fcp, count)
            }
            2 => {
                let fcp = self
                    .oracle
                    .count(
                        &pattern.event_names()[..1],
                        &constraints[..1],
                        self.count_type,
                    )
                    .ok_or_else(|| Error::MissingFrequency {
                        pattern: pattern.label(),
                    })?;
                if fcp == 0 {
                    return Err(Error::MissingFrequency {
                        pattern: pattern.label(),
                    });
                }
                (fcp as f64, count)
            }
            _ => {
                return Err(Error::UnsupportedRootLength {
                    pattern: pattern.label(),
                    len,
                })
            }
        };

        let p = if len == 1 {
            let total = match self.count_type {
                CountType::PerUser => pattern.total_user_count(),
                CountType::PerOccurrence => self.oracle.total_event_count(),
            };
            count / total as f64
        } else {
            count / fcp
        };
        let info = binary_information(p);

        Ok(ItreeNode {
            pattern,
            constraints,
            node_type: NodeType::Root,
            index: 0,
            parent_index: None,
            frequencies: Frequencies::new(0.0, 0.0, fcp, fcr),
            right_information: info,
            right_fraction: 1.0,
            overall_information: info,
            information_drop: 0.0,
            confidence: p,
            confidence_gain: 0.0,
            added_constraint: EventConstraints::default(),
            graph: None,
        })
    }

    /// Counts of the parent that every child split is measured against.
    ///
    /// A single-event parent is measured against all users (or all events);
    /// otherwise against its own prefix, which must be known.
    pub fn parent_counts(&self, parent: &ItreeNode<'o, O::Pattern>) -> Result<ParentCounts> {
        let len = parent.len();
        let fpr = parent.pattern.count(&parent.constraints, self.count_type)? as f64;
        let fpp = if len == 1 {
            match self.count_type {
                CountType::PerUser => parent.pattern.total_user_count() as f64,
                CountType::PerOccurrence => self.oracle.total_event_count() as f64,
            }
        } else {
            self.oracle
                .count(
                    &parent.event_names()[..len - 1],
                    prefix(&parent.constraints, len - 1),
                    self.count_type,
                )
                .ok_or_else(|| Error::MissingFrequency {
                    pattern: parent.label(),
                })? as f64
        };
        Ok(ParentCounts { fpp, fpr })
    }

    /// Build a child of `parent`.
    ///
    /// Sequence and campaign children pass the longer pattern and no
    /// constraint; property children pass the parent's own pattern and the
    /// single constraint being added.
    pub fn build_child(
        &self,
        parent: &ItreeNode<'o, O::Pattern>,
        child_pattern: &'o O::Pattern,
        added: Option<&EventConstraints>,
        node_type: NodeType,
        counts: ParentCounts,
    ) -> Result<Option<ItreeNode<'o, O::Pattern>>> {
        if !parent.node_type.can_parent() {
            return Err(Error::UnexpectedParentType {
                index: parent.index,
                node_type: parent.node_type,
            });
        }

        let parent_len = parent.len();
        let child_len = child_pattern.len();
        let shape_ok = if node_type.extends_sequence() {
            parent_len >= 1 && parent_len + 1 == child_len
        } else if node_type.is_property() {
            parent_len == child_len
        } else {
            false
        };
        if !shape_ok {
            return Err(Error::IncompatibleShape {
                node_type,
                pattern: child_pattern.label(),
                parent: parent.label(),
            });
        }
        if parent.constraints.len() != parent_len {
            return Err(Error::ConstraintLength {
                pattern: parent.label(),
                expected: parent_len,
                actual: parent.constraints.len(),
            });
        }

        if node_type.is_property() && parent_len == 1 {
            if self.count_type == CountType::PerOccurrence {
                // All-active-users cannot be filtered when counting occurrences
                return Ok(None);
            }
            if node_type != NodeType::UserPropertyChild {
                return Err(Error::UnsupportedSingleEventSplit {
                    pattern: child_pattern.label(),
                    node_type,
                    count_type: self.count_type,
                });
            }
        }

        let added = match (node_type.is_property(), added) {
            (true, Some(added)) => added.clone(),
            (true, None) => {
                return Err(Error::InvalidData(format!(
                    "Property child of {} built without a constraint",
                    parent.label()
                )))
            }
            (false, _) => EventConstraints::default(),
        };

        let constraints = if node_type.extends_sequence() {
            let mut overlay = parent.constraints.clone();
            // The new event sits right before the end event
            overlay.insert(parent_len - 1, EventConstraints::default());
            overlay
        } else {
            let mut overlay = parent.constraints.clone();
            let at = if child_len > 1 { child_len - 2 } else { 0 };
            overlay[at].merge(&added);
            overlay
        };

        let fcr = child_pattern
            .count(&constraints, self.count_type)
            .unwrap_or(0) as f64;
        let fcp = if child_len > 1 {
            self.oracle
                .count(
                    &child_pattern.event_names()[..child_len - 1],
                    prefix(&constraints, child_len - 1),
                    self.count_type,
                )
                .unwrap_or(0) as f64
        } else {
            self.single_event_fcp(parent, &added)? as f64
        };

        if fcp <= 0.0 || fcr <= 0.0 {
            return Ok(None);
        }

        let frequencies = Frequencies::new(counts.fpp, counts.fpr, fcp, fcr);
        if !frequencies.is_nested() {
            debug!(
                child = %child_pattern.label(),
                node_type = node_type.as_str(),
                fpp = counts.fpp,
                fpr = counts.fpr,
                fcp,
                fcr,
                "Inconsistent frequencies, ignoring candidate"
            );
            return Ok(None);
        }

        let metrics = split_metrics(&frequencies, parent.right_information);
        let confidence = fcr / fcp;

        Ok(Some(ItreeNode {
            pattern: child_pattern,
            constraints,
            node_type,
            index: 0,
            parent_index: Some(parent.index),
            frequencies,
            right_information: metrics.right_information,
            right_fraction: metrics.right_fraction,
            overall_information: metrics.overall_information,
            information_drop: metrics.information_drop,
            confidence,
            confidence_gain: confidence - parent.confidence,
            added_constraint: added,
            graph: None,
        }))
    }

    /// Child-pattern count for a user property split of a single-event
    /// parent: all active users carrying the new property value, still
    /// restricted by the funnel's own start-side filters.
    fn single_event_fcp(
        &self,
        parent: &ItreeNode<'o, O::Pattern>,
        added: &EventConstraints,
    ) -> Result<u64> {
        let all_users = self.all_active_users.ok_or(Error::AllActiveUsersMissing)?;
        let mut filter = added.clone();
        let inherited = &parent.constraints[0];
        if !inherited.is_empty() {
            if let Some(start) = &self.start_constraints {
                filter.merge(start);
            }
            let non_end = match &self.end_constraints {
                Some(end) => inherited.without(end),
                None => inherited.clone(),
            };
            filter.merge(&non_end);
        }
        Ok(all_users.per_user_count(&[filter]).unwrap_or(0))
    }
}

fn prefix(constraints: &[EventConstraints], len: usize) -> &[EventConstraints] {
    &constraints[..len.min(constraints.len())]
}

/// Entropy metrics of splitting the parent's population by a candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitMetrics {
    pub right_information: f64,
    pub right_fraction: f64,
    pub left_information: f64,
    pub overall_information: f64,
    pub information_drop: f64,
}

/// Compute split metrics from a nested frequency quadruple.
///
/// The right branch is the candidate's population (`fcp`, converting `fcr`),
/// the left branch the rest of the parent's population. The left conversion
/// rate is approximated as `(fpr - fcr) / (fpp - fcp)`, capped at 1.
pub fn split_metrics(frequencies: &Frequencies, parent_right_information: f64) -> SplitMetrics {
    let Frequencies { fpp, fpr, fcp, fcr } = *frequencies;
    let right_information = binary_information(fcr / fcp);
    let right_fraction = fcp / fpp;
    let left_information = if fpp - fcp > 0.0 {
        let left_p = ((fpr - fcr) / (fpp - fcp)).min(1.0);
        binary_information(left_p)
    } else {
        0.0
    };
    let overall_information =
        right_fraction * right_information + (1.0 - right_fraction) * left_information;

    SplitMetrics {
        right_information,
        right_fraction,
        left_information,
        overall_information,
        information_drop: parent_right_information - overall_information,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::{CategoricalConstraint, PropertyScope};
    use crate::memory::MemoryOracle;
    use crate::test_utils::golden_funnel;

    fn events(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_split_metrics_reference_values() {
        let metrics = split_metrics(&Frequencies::new(500.0, 100.0, 100.0, 80.0), 0.9);

        assert!((metrics.right_fraction - 0.2).abs() < 1e-12);
        assert!((metrics.right_information - binary_information(0.8)).abs() < 1e-12);
        assert!((metrics.left_information - binary_information(0.05)).abs() < 1e-12);
        let expected =
            0.9 - (0.2 * binary_information(0.8) + 0.8 * binary_information(0.05));
        assert!((metrics.information_drop - expected).abs() < 1e-12);
    }

    #[test]
    fn test_split_metrics_full_cover_has_no_left_branch() {
        let metrics = split_metrics(&Frequencies::new(10.0, 6.0, 10.0, 6.0), 0.97);
        assert_eq!(metrics.left_information, 0.0);
        assert!((metrics.right_fraction - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_split_metrics_caps_left_probability() {
        // (fpr - fcr) / (fpp - fcp) = 3 / 2
        let metrics = split_metrics(&Frequencies::new(10.0, 8.0, 8.0, 5.0), 1.0);
        assert_eq!(metrics.left_information, 0.0);
    }

    #[test]
    fn test_root_single_event_per_user() {
        let mut oracle = MemoryOracle::new(1000, 5000);
        oracle.add_pattern(events(&["Purchase"]), 200, 260);
        oracle.add_pattern(events(&["$AllActiveUsers"]), 1000, 5000);
        let all_users = oracle.pattern(&events(&["$AllActiveUsers"]));
        let pattern = oracle.pattern(&events(&["Purchase"])).unwrap();

        let builder = NodeBuilder::new(&oracle, CountType::PerUser).with_all_active_users(all_users);
        let root = builder.build_root(pattern).unwrap();

        assert_eq!(root.node_type, NodeType::Root);
        assert_eq!(root.parent_index, None);
        assert!((root.confidence - 0.2).abs() < 1e-12);
        assert!((root.right_information - 0.7219).abs() < 1e-4);
        assert_eq!(root.right_information, root.overall_information);
        assert_eq!(root.right_fraction, 1.0);
        assert_eq!(root.frequencies, Frequencies::new(0.0, 0.0, 1000.0, 200.0));
    }

    #[test]
    fn test_root_single_event_per_occurrence_uses_event_total() {
        let mut oracle = MemoryOracle::new(1000, 5000);
        oracle.add_pattern(events(&["Purchase"]), 200, 500);
        oracle.add_pattern(events(&["$AllActiveUsers"]), 1000, 5000);
        let all_users = oracle.pattern(&events(&["$AllActiveUsers"]));
        let pattern = oracle.pattern(&events(&["Purchase"])).unwrap();

        let builder =
            NodeBuilder::new(&oracle, CountType::PerOccurrence).with_all_active_users(all_users);
        let root = builder.build_root(pattern).unwrap();

        assert!((root.confidence - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_root_two_events_divides_by_start() {
        let oracle = golden_funnel();
        let pattern = oracle.pattern(&events(&["A", "Y"])).unwrap();

        let builder = NodeBuilder::new(&oracle, CountType::PerUser);
        let root = builder.build_root(pattern).unwrap();

        assert!((root.confidence - 4.0 / 9.0).abs() < 1e-9);
        assert_eq!(root.frequencies.fcp, 9.0);
        assert_eq!(root.frequencies.fcr, 4.0);
    }

    #[test]
    fn test_root_two_events_missing_start_is_error() {
        let mut oracle = MemoryOracle::new(10, 10);
        oracle.add_pattern(events(&["A", "Y"]), 4, 4);
        let pattern = oracle.pattern(&events(&["A", "Y"])).unwrap();

        let builder = NodeBuilder::new(&oracle, CountType::PerUser);
        let result = builder.build_root(pattern);
        assert!(matches!(result, Err(Error::MissingFrequency { .. })));
    }

    #[test]
    fn test_root_rejects_long_pattern() {
        let oracle = golden_funnel();
        let pattern = oracle.pattern(&events(&["A", "B", "Y"])).unwrap();

        let builder = NodeBuilder::new(&oracle, CountType::PerUser);
        let result = builder.build_root(pattern);
        assert!(matches!(
            result,
            Err(Error::UnsupportedRootLength { len: 3, .. })
        ));
    }

    #[test]
    fn test_sequence_child_metrics() {
        let oracle = golden_funnel();
        let all_users = oracle.pattern(&events(&["$AllActiveUsers"]));
        let builder = NodeBuilder::new(&oracle, CountType::PerUser).with_all_active_users(all_users);
        let root = builder
            .build_root(oracle.pattern(&events(&["Y"])).unwrap())
            .unwrap();
        let counts = builder.parent_counts(&root).unwrap();
        assert_eq!(counts, ParentCounts { fpp: 10.0, fpr: 6.0 });

        let child = builder
            .build_child(
                &root,
                oracle.pattern(&events(&["A", "Y"])).unwrap(),
                None,
                NodeType::SequenceChild,
                counts,
            )
            .unwrap()
            .unwrap();

        assert_eq!(child.parent_index, Some(0));
        assert_eq!(child.constraints.len(), 2);
        assert_eq!(child.frequencies, Frequencies::new(10.0, 6.0, 9.0, 4.0));
        assert!((child.right_information - 0.99108).abs() < 1e-4);
        assert!((child.overall_information - 0.89197).abs() < 1e-4);
        assert!((child.information_drop - 0.07898).abs() < 1e-4);
        assert!((child.confidence_gain + 0.155556).abs() < 1e-4);
    }

    #[test]
    fn test_sequence_child_with_wrong_shape_is_error() {
        let oracle = golden_funnel();
        let builder = NodeBuilder::new(&oracle, CountType::PerUser);
        let root = builder
            .build_root(oracle.pattern(&events(&["A", "Y"])).unwrap())
            .unwrap();
        let counts = builder.parent_counts(&root).unwrap();

        let result = builder.build_child(
            &root,
            oracle.pattern(&events(&["A", "C", "B", "Y"])).unwrap(),
            None,
            NodeType::SequenceChild,
            counts,
        );
        assert!(matches!(result, Err(Error::IncompatibleShape { .. })));
    }

    #[test]
    fn test_child_of_property_node_is_error() {
        let oracle = golden_funnel();
        let builder = NodeBuilder::new(&oracle, CountType::PerUser);
        let mut parent = builder
            .build_root(oracle.pattern(&events(&["A", "Y"])).unwrap())
            .unwrap();
        let counts = builder.parent_counts(&parent).unwrap();
        parent.node_type = NodeType::UserPropertyChild;

        let result = builder.build_child(
            &parent,
            oracle.pattern(&events(&["A", "B", "Y"])).unwrap(),
            None,
            NodeType::SequenceChild,
            counts,
        );
        assert!(matches!(result, Err(Error::UnexpectedParentType { .. })));
    }

    #[test]
    fn test_unknown_prefix_is_soft_reject() {
        let mut oracle = MemoryOracle::new(10, 10);
        oracle.add_pattern(events(&["Y"]), 6, 6);
        oracle.add_pattern(events(&["$AllActiveUsers"]), 10, 10);
        // Child rule is mined but its prefix is not
        oracle.add_pattern(events(&["Z", "Y"]), 3, 3);
        let all_users = oracle.pattern(&events(&["$AllActiveUsers"]));
        let builder = NodeBuilder::new(&oracle, CountType::PerUser).with_all_active_users(all_users);
        let root = builder
            .build_root(oracle.pattern(&events(&["Y"])).unwrap())
            .unwrap();
        let counts = builder.parent_counts(&root).unwrap();

        let child = builder
            .build_child(
                &root,
                oracle.pattern(&events(&["Z", "Y"])).unwrap(),
                None,
                NodeType::SequenceChild,
                counts,
            )
            .unwrap();
        assert!(child.is_none());
    }

    #[test]
    fn test_inconsistent_counts_are_soft_reject() {
        let mut oracle = MemoryOracle::new(10, 10);
        oracle.add_pattern(events(&["Y"]), 6, 6);
        oracle.add_pattern(events(&["$AllActiveUsers"]), 10, 10);
        // More users did Z -> Y than ever did Y
        oracle.add_pattern(events(&["Z"]), 9, 9);
        oracle.add_pattern(events(&["Z", "Y"]), 8, 8);
        let all_users = oracle.pattern(&events(&["$AllActiveUsers"]));
        let builder = NodeBuilder::new(&oracle, CountType::PerUser).with_all_active_users(all_users);
        let root = builder
            .build_root(oracle.pattern(&events(&["Y"])).unwrap())
            .unwrap();
        let counts = builder.parent_counts(&root).unwrap();

        let child = builder
            .build_child(
                &root,
                oracle.pattern(&events(&["Z", "Y"])).unwrap(),
                None,
                NodeType::SequenceChild,
                counts,
            )
            .unwrap();
        assert!(child.is_none());
    }

    #[test]
    fn test_user_property_child_on_single_event_root() {
        let oracle = crate::test_utils::plan_funnel();
        let all_users = oracle.pattern(&events(&["$AllActiveUsers"]));
        let builder = NodeBuilder::new(&oracle, CountType::PerUser).with_all_active_users(all_users);
        let root_pattern = oracle.pattern(&events(&["Y"])).unwrap();
        let root = builder.build_root(root_pattern).unwrap();
        let counts = builder.parent_counts(&root).unwrap();

        let added = EventConstraints::categorical(
            PropertyScope::User,
            CategoricalConstraint::equals("plan", "pro"),
        );
        let child = builder
            .build_child(
                &root,
                root_pattern,
                Some(&added),
                NodeType::UserPropertyChild,
                counts,
            )
            .unwrap()
            .unwrap();

        assert_eq!(child.constraints[0], added);
        assert_eq!(child.added_constraint, added);
        assert_eq!(child.frequencies, Frequencies::new(10.0, 6.0, 4.0, 4.0));
        assert_eq!(child.confidence, 1.0);
    }

    #[test]
    fn test_property_child_on_single_event_per_occurrence_is_skipped() {
        let oracle = crate::test_utils::plan_funnel();
        let all_users = oracle.pattern(&events(&["$AllActiveUsers"]));
        let builder =
            NodeBuilder::new(&oracle, CountType::PerOccurrence).with_all_active_users(all_users);
        let root_pattern = oracle.pattern(&events(&["Y"])).unwrap();
        let root = builder.build_root(root_pattern).unwrap();
        let counts = builder.parent_counts(&root).unwrap();

        let added = EventConstraints::categorical(
            PropertyScope::User,
            CategoricalConstraint::equals("plan", "pro"),
        );
        let child = builder
            .build_child(
                &root,
                root_pattern,
                Some(&added),
                NodeType::UserPropertyChild,
                counts,
            )
            .unwrap();
        assert!(child.is_none());
    }

    #[test]
    fn test_event_property_on_single_event_is_error() {
        let oracle = crate::test_utils::plan_funnel();
        let all_users = oracle.pattern(&events(&["$AllActiveUsers"]));
        let builder = NodeBuilder::new(&oracle, CountType::PerUser).with_all_active_users(all_users);
        let root_pattern = oracle.pattern(&events(&["Y"])).unwrap();
        let root = builder.build_root(root_pattern).unwrap();
        let counts = builder.parent_counts(&root).unwrap();

        let added = EventConstraints::categorical(
            PropertyScope::Event,
            CategoricalConstraint::equals("$source", "ads"),
        );
        let result = builder.build_child(
            &root,
            root_pattern,
            Some(&added),
            NodeType::EventPropertyChild,
            counts,
        );
        assert!(matches!(
            result,
            Err(Error::UnsupportedSingleEventSplit { .. })
        ));
    }
}
