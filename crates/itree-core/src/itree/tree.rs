//! The insight tree container

use serde::Serialize;
use tracing::info;

use crate::oracle::Pattern;

use super::types::{ItreeNode, NodeType};

/// Append-only list of nodes. Node 0 is the root; every other node points
/// at a parent with a smaller index.
#[derive(Debug, Clone, Serialize)]
#[serde(bound(serialize = "P: Pattern"))]
pub struct Itree<'a, P> {
    end_event: String,
    nodes: Vec<ItreeNode<'a, P>>,
}

impl<'a, P: Pattern> Itree<'a, P> {
    pub fn new(end_event: impl Into<String>) -> Self {
        Self {
            end_event: end_event.into(),
            nodes: Vec::new(),
        }
    }

    /// Append a node, assigning its index. Returns the index.
    pub fn add_node(&mut self, mut node: ItreeNode<'a, P>) -> usize {
        let index = self.nodes.len();
        debug_assert!(
            node.parent_index.map_or(index == 0, |parent| parent < index),
            "parent must precede child"
        );
        node.index = index;

        info!(
            index,
            parent = ?node.parent_index,
            node_type = node.node_type.as_str(),
            pattern = %node.label(),
            drop = node.information_drop,
            "Added node"
        );
        self.nodes.push(node);
        index
    }

    pub fn node(&self, index: usize) -> Option<&ItreeNode<'a, P>> {
        self.nodes.get(index)
    }

    pub fn nodes(&self) -> &[ItreeNode<'a, P>] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> Option<&ItreeNode<'a, P>> {
        self.nodes.first()
    }

    pub fn end_event(&self) -> &str {
        &self.end_event
    }

    /// Direct children of a node, in insertion order
    pub fn children(&self, index: usize) -> impl Iterator<Item = &ItreeNode<'a, P>> {
        self.nodes
            .iter()
            .filter(move |node| node.parent_index == Some(index))
    }

    /// Node indices from `index` up to the root, inclusive
    pub fn path_to_root(&self, index: usize) -> Vec<usize> {
        let mut path = Vec::new();
        let mut current = self.nodes.get(index);
        while let Some(node) = current {
            path.push(node.index);
            current = node.parent_index.and_then(|parent| self.nodes.get(parent));
        }
        path
    }

    /// Non-root, non-graph nodes ordered by weighted information drop
    pub fn ranked_insights(&self) -> Vec<&ItreeNode<'a, P>> {
        let mut ranked: Vec<_> = self
            .nodes
            .iter()
            .filter(|node| node.node_type != NodeType::Root && !node.node_type.is_graph())
            .collect();
        ranked.sort_by(|a, b| {
            b.weighted_drop()
                .partial_cmp(&a.weighted_drop())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.index.cmp(&b.index))
        });
        ranked
    }
}
