//! Tree driver - resolves the funnel root and expands nodes breadth first
//! until the queue drains or the node budget runs out

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::ItreeConfig;
use crate::constraints::{CountType, EventConstraints, PropertyScope};
use crate::error::{Error, Result};
use crate::oracle::{FrequencyOracle, Pattern, ALL_ACTIVE_USERS};

use super::builder::NodeBuilder;
use super::campaign::{can_parent_campaign, expand_campaigns};
use super::property::{expand_properties, PreferredProperties, PropertyStats};
use super::sequence::expand_sequences;
use super::tree::Itree;

/// What to explain: conversion into `end_event`, optionally only for users
/// who did `start_event` first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunnelRequest {
    #[serde(default)]
    pub start_event: Option<String>,
    #[serde(default)]
    pub start_constraints: Option<EventConstraints>,
    pub end_event: String,
    #[serde(default)]
    pub end_constraints: Option<EventConstraints>,
    #[serde(default)]
    pub count_type: CountType,
    #[serde(default)]
    pub preferred: PreferredProperties,
}

impl FunnelRequest {
    pub fn new(end_event: impl Into<String>) -> Self {
        Self {
            end_event: end_event.into(),
            ..Self::default()
        }
    }

    pub fn with_start(mut self, start_event: impl Into<String>) -> Self {
        self.start_event = Some(start_event.into());
        self
    }

    pub fn with_start_constraints(mut self, constraints: EventConstraints) -> Self {
        self.start_constraints = Some(constraints);
        self
    }

    pub fn with_end_constraints(mut self, constraints: EventConstraints) -> Self {
        self.end_constraints = Some(constraints);
        self
    }

    pub fn with_count_type(mut self, count_type: CountType) -> Self {
        self.count_type = count_type;
        self
    }

    pub fn with_preferred_property(mut self, scope: PropertyScope, name: impl Into<String>) -> Self {
        match scope {
            PropertyScope::Event => self.preferred.event.insert(name.into()),
            PropertyScope::User => self.preferred.user.insert(name.into()),
        };
        self
    }

    /// Event names of the root pattern
    fn root_events(&self) -> Vec<String> {
        self.start_event
            .iter()
            .cloned()
            .chain(std::iter::once(self.end_event.clone()))
            .collect()
    }
}

/// Cancellation and deadline for one build
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    deadline: Option<Instant>,
    cancel: Option<Arc<AtomicBool>>,
}

impl BuildContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Flag another thread may set to stop the build
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Fail if the build was cancelled or ran out of time
    pub fn check(&self, evaluated: usize) -> Result<()> {
        if self
            .cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
        {
            return Err(Error::Cancelled { evaluated });
        }
        if self
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
        {
            return Err(Error::DeadlineExceeded { evaluated });
        }
        Ok(())
    }
}

/// Accepted children and property counters at one depth
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DepthCounts {
    pub sequence_children: usize,
    pub campaign_children: usize,
    pub property_children: usize,
    pub properties: PropertyStats,
}

/// Calls and wall time spent in one expansion phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PhaseTiming {
    pub calls: usize,
    pub elapsed_ms: u64,
}

impl PhaseTiming {
    fn record(&mut self, started: Instant) {
        self.calls += 1;
        self.elapsed_ms += started.elapsed().as_millis() as u64;
    }
}

/// Diagnostics of one build, returned next to the tree
#[derive(Debug, Clone, Serialize)]
pub struct DebugCounts {
    pub built_at: DateTime<Utc>,
    /// Candidate patterns ending in the end event
    pub total_patterns: usize,
    /// Candidate patterns by number of events
    pub patterns_by_length: BTreeMap<usize, usize>,
    pub nodes_evaluated: usize,
    pub by_depth: BTreeMap<usize, DepthCounts>,
    pub catalogue_ms: u64,
    pub sequence: PhaseTiming,
    pub property: PhaseTiming,
    pub campaign: PhaseTiming,
    pub total_ms: u64,
}

impl DebugCounts {
    fn new() -> Self {
        Self {
            built_at: Utc::now(),
            total_patterns: 0,
            patterns_by_length: BTreeMap::new(),
            nodes_evaluated: 0,
            by_depth: BTreeMap::new(),
            catalogue_ms: 0,
            sequence: PhaseTiming::default(),
            property: PhaseTiming::default(),
            campaign: PhaseTiming::default(),
            total_ms: 0,
        }
    }

    fn record_patterns<P: Pattern>(&mut self, patterns: &[&P]) {
        self.total_patterns = patterns.len();
        for pattern in patterns {
            *self.patterns_by_length.entry(pattern.len()).or_default() += 1;
        }
    }

    fn depth(&mut self, depth: usize) -> &mut DepthCounts {
        self.by_depth.entry(depth).or_default()
    }
}

/// A finished tree and how it was built
#[derive(Debug, Clone, Serialize)]
#[serde(bound(serialize = "P: Pattern"))]
pub struct BuildOutcome<'o, P> {
    pub tree: Itree<'o, P>,
    pub debug: DebugCounts,
}

/// Build the insight tree for a funnel.
///
/// The root is the end event alone, or start -> end when a start event is
/// given. Nodes are dequeued breadth first; each gets property children
/// (never expanded further), sequence children, and below the root or a
/// campaign node also campaign children. Sequence and campaign children are
/// queued unless `expansion_depth` says otherwise.
pub fn build_itree<'o, O: FrequencyOracle>(
    oracle: &'o O,
    request: &FunnelRequest,
    config: &ItreeConfig,
    context: &BuildContext,
) -> Result<BuildOutcome<'o, O::Pattern>> {
    if request.end_event.is_empty() {
        return Err(Error::MissingEndEvent);
    }

    let started = Instant::now();
    let mut stats = DebugCounts::new();

    let candidates = oracle.all_patterns(request.start_event.as_deref(), &request.end_event)?;
    stats.record_patterns(&candidates);
    stats.catalogue_ms = started.elapsed().as_millis() as u64;

    let all_active_users = oracle
        .pattern(&[ALL_ACTIVE_USERS.to_string()])
        .ok_or(Error::AllActiveUsersMissing)?;

    let builder = NodeBuilder::new(oracle, request.count_type)
        .with_all_active_users(Some(all_active_users))
        .with_endpoint_constraints(
            request.start_constraints.clone(),
            request.end_constraints.clone(),
        );

    let root_events = request.root_events();
    let root_overlay = builder.endpoint_overlay(root_events.len());
    let mut root_pattern = None;
    for &pattern in candidates.iter().filter(|p| p.event_names() == root_events.as_slice()) {
        if pattern.count(&root_overlay, request.count_type)? > 0 {
            root_pattern = Some(pattern);
        }
    }
    let root_pattern = root_pattern.ok_or_else(|| Error::RootPatternNotFound {
        events: root_events.join(","),
    })?;

    let mut tree = Itree::new(request.end_event.clone());
    let root = tree.add_node(builder.build_root(root_pattern)?);

    let mut queue = VecDeque::from([(root, 0usize)]);
    let mut evaluated = 0;
    while evaluated < config.max_nodes_to_evaluate {
        let Some((index, depth)) = queue.pop_front() else {
            break;
        };
        context.check(evaluated)?;
        evaluated += 1;

        let node_type = match tree.node(index) {
            Some(node) => node.node_type,
            None => continue,
        };
        let queue_children = config.expansion_depth.map_or(true, |max| depth < max);
        let mut queued = Vec::new();

        if node_type.can_parent() {
            let phase = Instant::now();
            let expansion =
                expand_properties(&builder, &mut tree, index, config, &request.preferred)?;
            stats.property.record(phase);
            let counts = stats.depth(depth);
            counts.property_children += expansion.added.len();
            counts.properties.absorb(&expansion.stats);

            let phase = Instant::now();
            let added = expand_sequences(&builder, &mut tree, index, &candidates, config)?;
            stats.sequence.record(phase);
            stats.depth(depth).sequence_children += added.len();
            queued.extend(added);
        }

        if can_parent_campaign(node_type) {
            let phase = Instant::now();
            let added = expand_campaigns(&builder, &mut tree, index, &candidates, config)?;
            stats.campaign.record(phase);
            stats.depth(depth).campaign_children += added.len();
            queued.extend(added);
        }

        if queue_children {
            queue.extend(queued.into_iter().map(|child| (child, depth + 1)));
        }
        debug!(
            index,
            depth,
            queued = queue.len(),
            nodes = tree.len(),
            "Evaluated node"
        );
    }

    stats.nodes_evaluated = evaluated;
    stats.total_ms = started.elapsed().as_millis() as u64;
    info!(
        end_event = %request.end_event,
        nodes = tree.len(),
        evaluated,
        elapsed_ms = stats.total_ms,
        "Built insight tree"
    );

    Ok(BuildOutcome { tree, debug: stats })
}
