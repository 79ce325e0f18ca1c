//! Error types for the insight tree builder

use thiserror::Error;

use crate::constraints::CountType;
use crate::itree::NodeType;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Missing end event")]
    MissingEndEvent,

    #[error("Root node not found or frequency 0 for {events}")]
    RootPatternNotFound { events: String },

    #[error("Unexpected root node pattern {pattern} of length {len}")]
    UnsupportedRootLength { pattern: String, len: usize },

    #[error("Frequency missing for pattern sequence {pattern}")]
    MissingFrequency { pattern: String },

    #[error("All active users pattern not found")]
    AllActiveUsersMissing,

    #[error("Parent node {index} of unexpected type: {node_type}")]
    UnexpectedParentType { index: usize, node_type: NodeType },

    #[error("Node of type {node_type} with pattern ({pattern}) not compatible with parent pattern ({parent})")]
    IncompatibleShape {
        node_type: NodeType,
        pattern: String,
        parent: String,
    },

    #[error("Unexpected length of 1 for pattern {pattern}, node type {node_type}, count type {count_type}")]
    UnsupportedSingleEventSplit {
        pattern: String,
        node_type: NodeType,
        count_type: CountType,
    },

    #[error("Pattern {pattern} expects {expected} constraint slots, got {actual}")]
    ConstraintLength {
        pattern: String,
        expected: usize,
        actual: usize,
    },

    #[error("Build cancelled after {evaluated} nodes")]
    Cancelled { evaluated: usize },

    #[error("Build deadline exceeded after {evaluated} nodes")]
    DeadlineExceeded { evaluated: usize },

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
