//! Itree Core Library
//!
//! Builds insight trees that explain funnel conversion:
//! - Entropy and divergence primitives
//! - Per-event property constraints and counting modes
//! - Frequency oracle traits and a snapshot-backed in-memory oracle
//! - Node builder, candidate generators and the breadth-first tree driver
//! - Builder configuration with embedded defaults and per-user overrides

pub mod config;
pub mod constraints;
pub mod entropy;
pub mod error;
pub mod itree;
pub mod memory;
pub mod oracle;

/// Test utilities including canned funnel fixtures
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{ItreeConfig, JourneyBlacklist, PropertyFilter};
pub use constraints::{
    CategoricalConstraint, CountType, EventConstraints, NumericBound, NumericConstraint, Operator,
    PropertyScope,
};
pub use error::{Error, Result};
pub use itree::{
    build_itree, BuildContext, BuildOutcome, DebugCounts, FunnelRequest, Itree, ItreeNode,
    NodeType, PreferredProperties,
};
pub use memory::{MemoryOracle, MemoryPattern};
pub use oracle::{FrequencyOracle, Pattern, PropertiesInfo, UserAndEventsInfo, ALL_ACTIVE_USERS};
