//! Core types for the insight tree

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::constraints::{EventConstraints, PropertyScope};
use crate::oracle::Pattern;

/// How a node differs from its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// The funnel itself, end event alone or start -> end
    Root,
    /// One extra event inserted just before the end event
    SequenceChild,
    /// An event property constraint on the event before the end event
    EventPropertyChild,
    /// A user property constraint on the event before the end event
    UserPropertyChild,
    /// Distribution shift of an event property across its values
    GraphEventProperty,
    /// Distribution shift of a user property across its values
    GraphUserProperty,
    /// A campaign touch inserted just before the end event
    Campaign,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Root => "root",
            NodeType::SequenceChild => "sequence_child",
            NodeType::EventPropertyChild => "event_property_child",
            NodeType::UserPropertyChild => "user_property_child",
            NodeType::GraphEventProperty => "graph_event_property",
            NodeType::GraphUserProperty => "graph_user_property",
            NodeType::Campaign => "campaign",
        }
    }

    /// Property split node type for a scope
    pub fn property(scope: PropertyScope) -> Self {
        match scope {
            PropertyScope::Event => NodeType::EventPropertyChild,
            PropertyScope::User => NodeType::UserPropertyChild,
        }
    }

    /// Graph node type for a scope
    pub fn graph(scope: PropertyScope) -> Self {
        match scope {
            PropertyScope::Event => NodeType::GraphEventProperty,
            PropertyScope::User => NodeType::GraphUserProperty,
        }
    }

    /// Node types that add one event to the parent sequence
    pub fn extends_sequence(&self) -> bool {
        matches!(self, NodeType::SequenceChild | NodeType::Campaign)
    }

    pub fn is_property(&self) -> bool {
        matches!(
            self,
            NodeType::EventPropertyChild | NodeType::UserPropertyChild
        )
    }

    pub fn is_graph(&self) -> bool {
        matches!(
            self,
            NodeType::GraphEventProperty | NodeType::GraphUserProperty
        )
    }

    /// Whether children may be built under a node of this type
    pub fn can_parent(&self) -> bool {
        matches!(
            self,
            NodeType::Root | NodeType::SequenceChild | NodeType::Campaign
        )
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "root" => Ok(NodeType::Root),
            "sequence_child" => Ok(NodeType::SequenceChild),
            "event_property_child" => Ok(NodeType::EventPropertyChild),
            "user_property_child" => Ok(NodeType::UserPropertyChild),
            "graph_event_property" => Ok(NodeType::GraphEventProperty),
            "graph_user_property" => Ok(NodeType::GraphUserProperty),
            "campaign" => Ok(NodeType::Campaign),
            _ => Err(format!("Unknown node type: {}", s)),
        }
    }
}

/// Parent-pattern, parent-rule, child-pattern and child-rule counts
///
/// For parent `A -> B -> Y` and child `A -> B -> C -> Y`:
/// - `fpp` = n(A -> B)
/// - `fpr` = n(A -> B -> Y)
/// - `fcp` = n(A -> B -> C)
/// - `fcr` = n(A -> B -> C -> Y)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Frequencies {
    pub fpp: f64,
    pub fpr: f64,
    pub fcp: f64,
    pub fcr: f64,
}

impl Frequencies {
    pub fn new(fpp: f64, fpr: f64, fcp: f64, fcr: f64) -> Self {
        Self { fpp, fpr, fcp, fcr }
    }

    /// Nested counts: `fpp >= fpr`, `fcp >= fcr`, `fpp >= fcp`, `fpr >= fcr`
    pub fn is_nested(&self) -> bool {
        self.fpp >= self.fpr && self.fcp >= self.fcr && self.fpp >= self.fcp && self.fpr >= self.fcr
    }
}

/// One property value's divergence contribution in a graph node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KlDistanceUnit {
    pub property_value: String,
    /// Divergence of the rule distribution from the pattern distribution, in bits
    pub distance: f64,
    #[serde(flatten)]
    pub frequencies: Frequencies,
}

/// Payload carried only by graph nodes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyGraph {
    pub property_name: String,
    pub kl_distances: Vec<KlDistanceUnit>,
    /// Child-pattern count folded into the "Other" bucket
    pub other_fcp: f64,
}

/// A node of the insight tree.
///
/// The pattern is borrowed from the frequency oracle; the constraint overlay
/// is owned and holds one slot per event of the pattern.
#[derive(Debug, Clone, Serialize)]
#[serde(bound(serialize = "P: Pattern"))]
pub struct ItreeNode<'a, P> {
    #[serde(serialize_with = "serialize_events")]
    pub pattern: &'a P,
    pub constraints: Vec<EventConstraints>,
    pub node_type: NodeType,
    /// Position in the owning tree, assigned on insertion
    pub index: usize,
    /// `None` only for the root
    pub parent_index: Option<usize>,
    #[serde(flatten)]
    pub frequencies: Frequencies,
    pub right_information: f64,
    pub right_fraction: f64,
    pub overall_information: f64,
    pub information_drop: f64,
    pub confidence: f64,
    pub confidence_gain: f64,
    pub added_constraint: EventConstraints,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<PropertyGraph>,
}

impl<'a, P: Pattern> ItreeNode<'a, P> {
    pub fn event_names(&self) -> &'a [String] {
        self.pattern.event_names()
    }

    pub fn len(&self) -> usize {
        self.pattern.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pattern.is_empty()
    }

    pub fn label(&self) -> String {
        self.pattern.label()
    }

    /// Score used to rank findings downstream
    pub fn weighted_drop(&self) -> f64 {
        self.information_drop * self.frequencies.fpp
    }
}

fn serialize_events<P: Pattern, S: Serializer>(
    pattern: &&P,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    pattern.event_names().serialize(serializer)
}
