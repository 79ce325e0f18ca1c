//! Builder configuration
//!
//! Limits, traversal switches, property ignore lists, predefined numeric
//! buckets and the journey blacklist.
//!
//! ## Configuration Resolution
//!
//! Config is loaded with a two-layer resolution:
//! 1. Check for override in data dir (~/.local/share/itree/config/itree.toml)
//! 2. Fall back to embedded defaults (compiled into binary)

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../../../config/itree.toml");

/// Which properties are never split on, and how numeric ones are bucketed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyFilter {
    /// Exact property names to skip
    pub ignored: BTreeSet<String>,
    /// Property name prefixes to skip (CRM-synced fields and the like)
    pub ignored_prefixes: Vec<String>,
    /// Numeric properties that are really identifiers
    pub ignored_numeric: BTreeSet<String>,
    /// Fixed bucket ranges that replace adaptive ones
    pub predefined_bins: BTreeMap<String, Vec<(f64, f64)>>,
}

impl PropertyFilter {
    pub fn should_ignore(&self, property_name: &str) -> bool {
        self.ignored.contains(property_name)
            || self
                .ignored_prefixes
                .iter()
                .any(|prefix| property_name.starts_with(prefix.as_str()))
    }

    pub fn should_ignore_numeric(&self, property_name: &str) -> bool {
        self.should_ignore(property_name) || self.ignored_numeric.contains(property_name)
    }

    pub fn predefined_bins(&self, property_name: &str) -> Option<&[(f64, f64)]> {
        self.predefined_bins
            .get(property_name)
            .map(|ranges| ranges.as_slice())
    }
}

/// Event insertions that make no sense as an explanation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JourneyBlacklist {
    /// Never inserted in front of any goal
    pub blocked_everywhere: BTreeSet<String>,
    /// Goal event -> events never inserted in front of it. Also read the
    /// other way: an inserted event may not follow anything in its own list.
    pub blocked_for_goal: BTreeMap<String, BTreeSet<String>>,
}

impl JourneyBlacklist {
    pub fn block_for_goal(mut self, goal: impl Into<String>, event: impl Into<String>) -> Self {
        self.blocked_for_goal
            .entry(goal.into())
            .or_default()
            .insert(event.into());
        self
    }

    /// Whether inserting `inserted` right before `goal`, after
    /// `pre_sequence`, is blocked
    pub fn blocks(&self, inserted: &str, pre_sequence: &[String], goal: &str) -> bool {
        if self.blocked_everywhere.contains(inserted) {
            return true;
        }
        if self
            .blocked_for_goal
            .get(goal)
            .is_some_and(|blocked| blocked.contains(inserted))
        {
            return true;
        }
        self.blocked_for_goal
            .get(inserted)
            .is_some_and(|blocked| pre_sequence.iter().any(|e| blocked.contains(e)))
    }
}

/// Tree builder configuration
///
/// `Default` carries the limits only: no ignored properties, no predefined
/// bins and no journey blacklist. The shipped ignore policy lives in the
/// embedded `itree.toml`; use [`ItreeConfig::load`] or
/// [`ItreeConfig::embedded`] to get it.
#[derive(Debug, Clone, PartialEq)]
pub struct ItreeConfig {
    /// Nodes dequeued and expanded before the build stops
    pub max_nodes_to_evaluate: usize,
    /// Sequence (and campaign) children kept per expansion
    pub max_sequence_children: usize,
    /// Property children kept per expansion
    pub max_property_children: usize,
    /// Values listed in a graph node, including the "Other" bucket
    pub max_properties_in_graph_node: usize,
    /// Categorical properties tried per expansion and scope
    pub max_categorical_properties: usize,
    /// Values tried per categorical property
    pub max_categorical_values: usize,
    /// Numeric properties tried per expansion and scope
    pub max_numeric_properties: usize,
    /// Depth below which children are no longer queued; `None` explores
    /// until the node budget runs out
    pub expansion_depth: Option<usize>,
    /// Emit divergence summaries as graph nodes
    pub emit_graph_nodes: bool,
    /// Accepted property children per categorical property name
    pub categorical_repeat_limit: usize,
    /// Accepted property children per numeric property name
    pub numeric_repeat_limit: usize,
    pub properties: PropertyFilter,
    pub journeys: JourneyBlacklist,
}

impl Default for ItreeConfig {
    fn default() -> Self {
        Self {
            max_nodes_to_evaluate: 150,
            max_sequence_children: 50,
            max_property_children: 50,
            max_properties_in_graph_node: 10,
            max_categorical_properties: 100,
            max_categorical_values: 100,
            max_numeric_properties: 100,
            expansion_depth: None, // unbounded
            emit_graph_nodes: false,
            categorical_repeat_limit: 1,
            numeric_repeat_limit: 1,
            properties: PropertyFilter::default(),
            journeys: JourneyBlacklist::default(),
        }
    }
}

impl ItreeConfig {
    /// Load from the override location, falling back to embedded defaults
    pub fn load() -> Result<Self> {
        load_config(None)
    }

    /// Load from a specific file, falling back to embedded defaults when
    /// it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        load_config(Some(path))
    }

    /// Parse a TOML document over the built-in defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        parse_config(content)
    }

    /// The embedded default configuration
    pub fn embedded() -> Result<Self> {
        parse_config(DEFAULT_CONFIG)
    }
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("itree").join("config").join("itree.toml"))
}

/// Load configuration (override first, then default)
fn load_config(override_path: Option<&Path>) -> Result<ItreeConfig> {
    let path = match override_path {
        Some(path) => Some(path.to_path_buf()),
        None => default_config_path(),
    };

    let content = match path {
        Some(path) if path.exists() => fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?,
        _ => DEFAULT_CONFIG.to_string(),
    };

    parse_config(&content)
}

/// Raw config structure for TOML parsing
#[derive(Debug, Deserialize)]
struct RawConfig {
    limits: Option<RawLimits>,
    traversal: Option<RawTraversal>,
    dedup: Option<RawDedup>,
    properties: Option<RawProperties>,
    journeys: Option<RawJourneys>,
}

#[derive(Debug, Deserialize)]
struct RawLimits {
    max_nodes_to_evaluate: Option<usize>,
    max_sequence_children: Option<usize>,
    max_property_children: Option<usize>,
    max_properties_in_graph_node: Option<usize>,
    max_categorical_properties: Option<usize>,
    max_categorical_values: Option<usize>,
    max_numeric_properties: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawTraversal {
    expansion_depth: Option<usize>,
    emit_graph_nodes: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawDedup {
    categorical_repeat_limit: Option<usize>,
    numeric_repeat_limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawProperties {
    ignored: Option<Vec<String>>,
    ignored_prefixes: Option<Vec<String>>,
    ignored_numeric: Option<Vec<String>>,
    predefined_bins: Option<BTreeMap<String, Vec<[f64; 2]>>>,
}

#[derive(Debug, Deserialize)]
struct RawJourneys {
    blocked_everywhere: Option<Vec<String>>,
    blocked_for_goal: Option<BTreeMap<String, Vec<String>>>,
}

/// Parse config from TOML content
fn parse_config(content: &str) -> Result<ItreeConfig> {
    let raw: RawConfig = toml::from_str(content)
        .map_err(|e| Error::Config(format!("Invalid config TOML: {}", e)))?;

    let mut config = ItreeConfig::default();

    if let Some(limits) = raw.limits {
        let targets = [
            (limits.max_nodes_to_evaluate, &mut config.max_nodes_to_evaluate),
            (limits.max_sequence_children, &mut config.max_sequence_children),
            (limits.max_property_children, &mut config.max_property_children),
            (
                limits.max_properties_in_graph_node,
                &mut config.max_properties_in_graph_node,
            ),
            (
                limits.max_categorical_properties,
                &mut config.max_categorical_properties,
            ),
            (limits.max_categorical_values, &mut config.max_categorical_values),
            (limits.max_numeric_properties, &mut config.max_numeric_properties),
        ];
        for (value, target) in targets {
            if let Some(value) = value {
                *target = value;
            }
        }
    }

    if let Some(traversal) = raw.traversal {
        if traversal.expansion_depth.is_some() {
            config.expansion_depth = traversal.expansion_depth;
        }
        if let Some(emit) = traversal.emit_graph_nodes {
            config.emit_graph_nodes = emit;
        }
    }

    if let Some(dedup) = raw.dedup {
        if let Some(limit) = dedup.categorical_repeat_limit {
            config.categorical_repeat_limit = limit;
        }
        if let Some(limit) = dedup.numeric_repeat_limit {
            config.numeric_repeat_limit = limit;
        }
    }

    if let Some(properties) = raw.properties {
        if let Some(ignored) = properties.ignored {
            config.properties.ignored = ignored.into_iter().collect();
        }
        if let Some(prefixes) = properties.ignored_prefixes {
            config.properties.ignored_prefixes = prefixes;
        }
        if let Some(ignored) = properties.ignored_numeric {
            config.properties.ignored_numeric = ignored.into_iter().collect();
        }
        if let Some(bins) = properties.predefined_bins {
            for (name, ranges) in bins {
                if let Some([min, max]) = ranges.iter().find(|[min, max]| min >= max) {
                    return Err(Error::Config(format!(
                        "Empty bucket [{}, {}] for {}",
                        min, max, name
                    )));
                }
                config.properties.predefined_bins.insert(
                    name,
                    ranges.into_iter().map(|[min, max]| (min, max)).collect(),
                );
            }
        }
    }

    if let Some(journeys) = raw.journeys {
        if let Some(blocked) = journeys.blocked_everywhere {
            config.journeys.blocked_everywhere = blocked.into_iter().collect();
        }
        if let Some(by_goal) = journeys.blocked_for_goal {
            for (goal, events) in by_goal {
                config
                    .journeys
                    .blocked_for_goal
                    .insert(goal, events.into_iter().collect());
            }
        }
    }

    if config.max_properties_in_graph_node < 2 {
        return Err(Error::Config(
            "max_properties_in_graph_node must leave room for an Other bucket".to_string(),
        ));
    }

    Ok(config)
}
