//! Insight Tree - explains why users do or don't convert in a funnel
//!
//! Starting from the funnel itself (the root), every node is split by the
//! differentiator that best separates converting from non-converting users.
//! Splits are scored by the drop in binary entropy of conversion.
//!
//! ## Node Types
//!
//! - **Sequence** - one more event inserted right before the end event
//! - **Campaign** - a marketing touch inserted right before the end event
//! - **Event/User property** - a property constraint on the event before the end event
//! - **Graph** - how a property's value distribution shifts among converters
//!
//! ## Usage
//!
//! ```rust,ignore
//! use itree_core::itree::{build_itree, BuildContext, FunnelRequest};
//!
//! let request = FunnelRequest::new("Purchase").with_start("Signup");
//! let outcome = build_itree(&oracle, &request, &ItreeConfig::load()?, &BuildContext::new())?;
//! for node in outcome.tree.ranked_insights() {
//!     println!("{} {:.3}", node.label(), node.information_drop);
//! }
//! ```

pub mod builder;
pub mod campaign;
pub mod divergence;
pub mod engine;
pub mod property;
pub mod sequence;
pub mod tree;
pub mod types;

pub use builder::{split_metrics, NodeBuilder, ParentCounts, SplitMetrics};
pub use campaign::expand_campaigns;
pub use divergence::{build_graph_node, kl_summary, kl_unit, NONE_VALUE_LABEL, OTHER_VALUES_LABEL};
pub use engine::{
    build_itree, BuildContext, BuildOutcome, DebugCounts, DepthCounts, FunnelRequest, PhaseTiming,
};
pub use property::{
    bucket_constraints, expand_properties, BucketConstraints, PreferredProperties,
    PropertyDivergence, PropertyExpansion, PropertyStats,
};
pub use sequence::{expand_sequences, is_child_sequence};
pub use tree::Itree;
pub use types::{Frequencies, ItreeNode, KlDistanceUnit, NodeType, PropertyGraph};
