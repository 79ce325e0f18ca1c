//! Sequence expansion
//!
//! Children that insert one more event right before the end event of the
//! parent's sequence. Shared with campaign expansion, which only differs in
//! which inserted events it accepts.

use std::cmp::Ordering;
use tracing::debug;

use crate::config::ItreeConfig;
use crate::error::{Error, Result};
use crate::oracle::{FrequencyOracle, Pattern};

use super::builder::{NodeBuilder, ParentCounts};
use super::tree::Itree;
use super::types::{ItreeNode, NodeType};

/// Whether `child` is `parent` with exactly one event inserted right before
/// the end event.
///
/// `A,B,Y -> A,B,C,Y` is a child sequence; `A,B,Y -> A,C,B,Y` (insertion
/// too early) and `A,B,Y -> B,C,Y` (not an insertion) are not.
pub fn is_child_sequence(parent: &[String], child: &[String]) -> bool {
    // No end event to insert before
    if parent.is_empty() || child.len() != parent.len() + 1 {
        return false;
    }

    let mut parent_events = parent.iter().peekable();
    let mut mismatch = None;
    for (i, event) in child.iter().enumerate() {
        match parent_events.peek() {
            Some(expected) if *expected == event => {
                parent_events.next();
            }
            Some(_) if mismatch.is_none() => mismatch = Some(i),
            Some(_) => return false,
            None => break,
        }
    }

    mismatch == Some(child.len() - 2)
}

/// The event a child sequence inserts, if it is one
pub(crate) fn inserted_event<'p>(parent: &[String], child: &'p [String]) -> Option<&'p str> {
    if is_child_sequence(parent, child) {
        child.get(child.len() - 2).map(String::as_str)
    } else {
        None
    }
}

/// Resolve a parent node and its split counts, or `None` when it has
/// nothing to split
pub(crate) fn parent_for_expansion<'t, 'o, O: FrequencyOracle>(
    builder: &NodeBuilder<'o, O>,
    tree: &'t Itree<'o, O::Pattern>,
    parent_index: usize,
) -> Result<Option<(&'t ItreeNode<'o, O::Pattern>, ParentCounts)>> {
    let parent = tree
        .node(parent_index)
        .ok_or_else(|| Error::InvalidData(format!("No node at index {}", parent_index)))?;
    let counts = builder.parent_counts(parent)?;
    if !counts.is_frequent() {
        debug!(
            parent = %parent.label(),
            fpp = counts.fpp,
            fpr = counts.fpr,
            "Parent not frequent enough"
        );
        return Ok(None);
    }
    Ok(Some((parent, counts)))
}

/// Build a child for every candidate that extends `parent` by one event
/// that `accept` lets through
pub(crate) fn build_extensions<'o, O, F>(
    builder: &NodeBuilder<'o, O>,
    parent: &ItreeNode<'o, O::Pattern>,
    counts: ParentCounts,
    candidates: &[&'o O::Pattern],
    node_type: NodeType,
    mut accept: F,
) -> Result<Vec<ItreeNode<'o, O::Pattern>>>
where
    O: FrequencyOracle,
    F: FnMut(&str) -> bool,
{
    let mut children = Vec::new();
    for &candidate in candidates {
        let Some(inserted) = inserted_event(parent.event_names(), candidate.event_names()) else {
            continue;
        };
        if !accept(inserted) {
            continue;
        }
        if let Some(child) = builder.build_child(parent, candidate, None, node_type, counts)? {
            children.push(child);
        }
    }
    Ok(children)
}

/// Keep the `cap` best children by information drop and insert those with
/// a positive drop. Returns the inserted indices.
pub(crate) fn insert_ranked<'o, P: Pattern>(
    tree: &mut Itree<'o, P>,
    mut children: Vec<ItreeNode<'o, P>>,
    cap: usize,
) -> Vec<usize> {
    sort_by_drop(&mut children);
    children.truncate(cap);
    children
        .into_iter()
        .filter(|child| child.information_drop > 0.0)
        .map(|child| tree.add_node(child))
        .collect()
}

/// Stable sort, highest information drop first
pub(crate) fn sort_by_drop<P>(nodes: &mut [ItreeNode<'_, P>]) {
    nodes.sort_by(|a, b| {
        b.information_drop
            .partial_cmp(&a.information_drop)
            .unwrap_or(Ordering::Equal)
    });
}

/// Add the best sequence children of a node. Campaign events are left to
/// campaign expansion; blacklisted journeys are skipped.
pub fn expand_sequences<'o, O: FrequencyOracle>(
    builder: &NodeBuilder<'o, O>,
    tree: &mut Itree<'o, O::Pattern>,
    parent_index: usize,
    candidates: &[&'o O::Pattern],
    config: &ItreeConfig,
) -> Result<Vec<usize>> {
    let children = {
        let Some((parent, counts)) = parent_for_expansion(builder, tree, parent_index)? else {
            return Ok(Vec::new());
        };
        let events = parent.event_names();
        let (goal, pre_sequence) = match events.split_last() {
            Some((goal, pre)) => (goal.as_str(), pre),
            None => return Ok(Vec::new()),
        };

        build_extensions(
            builder,
            parent,
            counts,
            candidates,
            NodeType::SequenceChild,
            |inserted| {
                if builder.oracle().is_campaign_event(inserted) {
                    return false;
                }
                if config.journeys.blocks(inserted, pre_sequence, goal) {
                    debug!(inserted, goal, "Journey blacklisted, skipping candidate");
                    return false;
                }
                true
            },
        )?
    };

    let built = children.len();
    let added = insert_ranked(tree, children, config.max_sequence_children);
    debug!(
        parent = parent_index,
        built,
        added = added.len(),
        "Expanded sequence children"
    );
    Ok(added)
}
