//! Campaign expansion
//!
//! Like sequence expansion, but only for inserted events that encode a
//! marketing touch (`$session[source:google]` and friends), and only below
//! the root or another campaign node.

use tracing::debug;

use crate::config::ItreeConfig;
use crate::error::Result;
use crate::oracle::{campaign_label, FrequencyOracle};

use super::builder::NodeBuilder;
use super::sequence::{build_extensions, insert_ranked, parent_for_expansion};
use super::tree::Itree;
use super::types::NodeType;

/// Node types campaign children may hang off
pub fn can_parent_campaign(node_type: NodeType) -> bool {
    matches!(node_type, NodeType::Root | NodeType::Campaign)
}

/// Add the best campaign children of a node
pub fn expand_campaigns<'o, O: FrequencyOracle>(
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
        if !can_parent_campaign(parent.node_type) {
            return Ok(Vec::new());
        }

        let events = parent.event_names();
        let (goal, pre_sequence) = match events.split_last() {
            Some((goal, pre)) => (goal.as_str(), pre),
            None => return Ok(Vec::new()),
        };

        let mut matching = 0;
        let children = build_extensions(
            builder,
            parent,
            counts,
            candidates,
            NodeType::Campaign,
            |inserted| {
                if !builder.oracle().is_campaign_event(inserted)
                    || campaign_label(inserted).is_empty()
                {
                    return false;
                }
                if config.journeys.blocks(inserted, pre_sequence, goal) {
                    debug!(inserted, goal, "Journey blacklisted, skipping campaign");
                    return false;
                }
                matching += 1;
                true
            },
        )?;

        // A touch every parent user had explains nothing
        let children: Vec<_> = children
            .into_iter()
            .filter(|child| child.frequencies.fcp != child.frequencies.fpp)
            .collect();
        debug!(
            parent = parent_index,
            matching,
            filtered = children.len(),
            "Built campaign children"
        );
        children
    };

    Ok(insert_ranked(tree, children, config.max_sequence_children))
}
