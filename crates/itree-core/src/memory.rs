//! In-memory frequency oracle
//!
//! Serves a snapshot of already-mined patterns: base counts per pattern,
//! exact counts for specific constraint overlays, numeric bucket ranges, and
//! the property catalogue. Snapshots load from JSON.
//!
//! Lookups follow the usual oracle contract:
//! - an event sequence that was never mined is "not found"
//! - a mined sequence under an overlay nobody registered counts as zero

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::constraints::{overlay_is_empty, CountType, EventConstraints, PropertyScope};
use crate::error::{Error, Result};
use crate::oracle::{FrequencyOracle, Pattern, UserAndEventsInfo, ALL_ACTIVE_USERS};

/// Count of a pattern under one specific constraint overlay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstrainedCount {
    pub constraints: Vec<EventConstraints>,
    pub per_user: u64,
    pub per_occurrence: u64,
}

/// Bucket ranges for a numeric property at one event position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericBins {
    pub event_index: usize,
    pub scope: PropertyScope,
    pub property_name: String,
    pub ranges: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryPattern {
    pub event_names: Vec<String>,
    pub per_user_count: u64,
    pub per_occurrence_count: u64,
    /// Filled from the snapshot total when left out
    #[serde(default)]
    pub total_user_count: u64,
    #[serde(default)]
    pub constrained: Vec<ConstrainedCount>,
    #[serde(default)]
    pub numeric_bins: Vec<NumericBins>,
}

impl MemoryPattern {
    pub fn new(event_names: Vec<String>, per_user_count: u64, per_occurrence_count: u64) -> Self {
        Self {
            event_names,
            per_user_count,
            per_occurrence_count,
            total_user_count: 0,
            constrained: Vec::new(),
            numeric_bins: Vec::new(),
        }
    }

    fn base_count(&self, count_type: CountType) -> u64 {
        match count_type {
            CountType::PerUser => self.per_user_count,
            CountType::PerOccurrence => self.per_occurrence_count,
        }
    }
}

impl Pattern for MemoryPattern {
    fn event_names(&self) -> &[String] {
        &self.event_names
    }

    fn total_user_count(&self) -> u64 {
        self.total_user_count
    }

    fn count(&self, constraints: &[EventConstraints], count_type: CountType) -> Result<u64> {
        if overlay_is_empty(constraints) {
            return Ok(self.base_count(count_type));
        }
        if constraints.len() != self.event_names.len() {
            return Err(Error::ConstraintLength {
                pattern: self.label(),
                expected: self.event_names.len(),
                actual: constraints.len(),
            });
        }

        let wanted = normalize(constraints);
        let count = self
            .constrained
            .iter()
            .find(|entry| normalize(&entry.constraints) == wanted)
            .map(|entry| match count_type {
                CountType::PerUser => entry.per_user,
                CountType::PerOccurrence => entry.per_occurrence,
            })
            .unwrap_or(0);
        Ok(count)
    }

    fn numeric_bin_ranges(
        &self,
        event_index: usize,
        scope: PropertyScope,
        property_name: &str,
        _count_type: CountType,
    ) -> Option<Vec<(f64, f64)>> {
        self.numeric_bins
            .iter()
            .find(|bins| {
                bins.event_index == event_index
                    && bins.scope == scope
                    && bins.property_name == property_name
            })
            .map(|bins| bins.ranges.clone())
    }
}

fn normalize(constraints: &[EventConstraints]) -> Vec<EventConstraints> {
    constraints.iter().map(EventConstraints::normalized).collect()
}

/// Snapshot-backed [`FrequencyOracle`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryOracle {
    pub total_user_count: u64,
    pub total_event_count: u64,
    #[serde(default)]
    patterns: Vec<MemoryPattern>,
    #[serde(default)]
    info: UserAndEventsInfo,
    #[serde(skip)]
    index: HashMap<Vec<String>, usize>,
}

impl MemoryOracle {
    pub fn new(total_user_count: u64, total_event_count: u64) -> Self {
        Self {
            total_user_count,
            total_event_count,
            ..Default::default()
        }
    }

    /// Load a snapshot from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let mut oracle: MemoryOracle = serde_json::from_str(json)?;
        oracle.reindex()?;
        Ok(oracle)
    }

    /// Load a snapshot from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn reindex(&mut self) -> Result<()> {
        self.index.clear();
        for (i, pattern) in self.patterns.iter_mut().enumerate() {
            if pattern.total_user_count == 0 {
                pattern.total_user_count = self.total_user_count;
            }
            if self.index.insert(pattern.event_names.clone(), i).is_some() {
                return Err(Error::InvalidData(format!(
                    "Duplicate pattern in snapshot: {}",
                    pattern.event_names.join(",")
                )));
            }
        }
        Ok(())
    }

    /// Register a mined pattern, replacing any earlier entry for the same
    /// sequence
    pub fn add_pattern(
        &mut self,
        event_names: Vec<String>,
        per_user_count: u64,
        per_occurrence_count: u64,
    ) -> &mut MemoryPattern {
        let mut pattern = MemoryPattern::new(event_names, per_user_count, per_occurrence_count);
        pattern.total_user_count = self.total_user_count;

        let existing = self.index.get(&pattern.event_names).copied();
        let i = match existing {
            Some(i) => {
                self.patterns[i] = pattern;
                i
            }
            None => {
                self.index
                    .insert(pattern.event_names.clone(), self.patterns.len());
                self.patterns.push(pattern);
                self.patterns.len() - 1
            }
        };
        &mut self.patterns[i]
    }

    /// Register the count of a mined pattern under a constraint overlay
    pub fn add_constrained_count(
        &mut self,
        event_names: &[String],
        constraints: Vec<EventConstraints>,
        per_user: u64,
        per_occurrence: u64,
    ) -> Result<()> {
        let pattern = self.pattern_mut(event_names)?;
        if constraints.len() != pattern.event_names.len() {
            return Err(Error::ConstraintLength {
                pattern: pattern.label(),
                expected: pattern.event_names.len(),
                actual: constraints.len(),
            });
        }
        pattern.constrained.push(ConstrainedCount {
            constraints,
            per_user,
            per_occurrence,
        });
        Ok(())
    }

    /// Register adaptive bucket ranges for a numeric property
    pub fn add_numeric_bins(
        &mut self,
        event_names: &[String],
        event_index: usize,
        scope: PropertyScope,
        property_name: &str,
        ranges: Vec<(f64, f64)>,
    ) -> Result<()> {
        let pattern = self.pattern_mut(event_names)?;
        pattern.numeric_bins.push(NumericBins {
            event_index,
            scope,
            property_name: property_name.to_string(),
            ranges,
        });
        Ok(())
    }

    pub fn set_user_and_events_info(&mut self, info: UserAndEventsInfo) {
        self.info = info;
    }

    pub fn patterns(&self) -> &[MemoryPattern] {
        &self.patterns
    }

    fn pattern_mut(&mut self, event_names: &[String]) -> Result<&mut MemoryPattern> {
        let i = *self.index.get(event_names).ok_or_else(|| {
            Error::InvalidData(format!("Unknown pattern: {}", event_names.join(",")))
        })?;
        Ok(&mut self.patterns[i])
    }
}

impl FrequencyOracle for MemoryOracle {
    type Pattern = MemoryPattern;

    fn count(
        &self,
        event_names: &[String],
        constraints: &[EventConstraints],
        count_type: CountType,
    ) -> Option<u64> {
        self.pattern(event_names)?
            .count(constraints, count_type)
            .ok()
    }

    fn pattern(&self, event_names: &[String]) -> Option<&MemoryPattern> {
        self.index.get(event_names).map(|&i| &self.patterns[i])
    }

    fn all_patterns(&self, start_event: Option<&str>, end_event: &str) -> Result<Vec<&MemoryPattern>> {
        let matches = self
            .patterns
            .iter()
            .filter(|p| p.event_names.last().map(String::as_str) == Some(end_event))
            .filter(|p| match start_event {
                Some(start) => p.event_names.first().map(String::as_str) == Some(start),
                None => true,
            })
            .filter(|p| p.event_names.iter().all(|e| e != ALL_ACTIVE_USERS))
            .collect();
        Ok(matches)
    }

    fn total_event_count(&self) -> u64 {
        self.total_event_count
    }

    fn user_and_events_info(&self) -> &UserAndEventsInfo {
        &self.info
    }
}
