//! Per-event property constraints and counting modes
//!
//! A pattern carries one [`EventConstraints`] slot per event position. Each
//! slot filters on event-level or user-level properties, either by exact
//! categorical value or by a numeric range.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// How frequencies are counted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountType {
    /// Distinct users that performed the sequence
    #[default]
    PerUser,
    /// Every occurrence of the sequence
    PerOccurrence,
}

impl CountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CountType::PerUser => "per_user",
            CountType::PerOccurrence => "per_occurrence",
        }
    }
}

impl fmt::Display for CountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per_user" => Ok(CountType::PerUser),
            "per_occurrence" => Ok(CountType::PerOccurrence),
            _ => Err(format!("Unknown count type: {}", s)),
        }
    }
}

/// Whether a property belongs to the event or to the user who fired it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyScope {
    Event,
    User,
}

impl PropertyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyScope::Event => "event",
            PropertyScope::User => "user",
        }
    }
}

impl fmt::Display for PropertyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which ends of a numeric range are enforced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericBound {
    #[default]
    Both,
    OnlyLower,
    OnlyUpper,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[default]
    Equals,
    NotEquals,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericConstraint {
    pub property_name: String,
    pub lower_bound: f64,
    pub upper_bound: f64,
    #[serde(default)]
    pub bound: NumericBound,
}

impl NumericConstraint {
    /// `min <= v < max`
    pub fn within(property_name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            property_name: property_name.into(),
            lower_bound: min,
            upper_bound: max,
            bound: NumericBound::Both,
        }
    }

    /// `v < min`
    pub fn below(property_name: impl Into<String>, min: f64) -> Self {
        Self {
            property_name: property_name.into(),
            lower_bound: -f64::MAX,
            upper_bound: min,
            bound: NumericBound::OnlyUpper,
        }
    }

    /// `v >= max`
    pub fn above(property_name: impl Into<String>, max: f64) -> Self {
        Self {
            property_name: property_name.into(),
            lower_bound: max,
            upper_bound: f64::MAX,
            bound: NumericBound::OnlyLower,
        }
    }

    pub fn matches(&self, value: f64) -> bool {
        match self.bound {
            NumericBound::Both => value >= self.lower_bound && value < self.upper_bound,
            NumericBound::OnlyLower => value >= self.lower_bound,
            NumericBound::OnlyUpper => value < self.upper_bound,
        }
    }

    fn cmp_key(&self, other: &Self) -> Ordering {
        self.property_name
            .cmp(&other.property_name)
            .then(
                self.lower_bound
                    .partial_cmp(&other.lower_bound)
                    .unwrap_or(Ordering::Equal),
            )
            .then(
                self.upper_bound
                    .partial_cmp(&other.upper_bound)
                    .unwrap_or(Ordering::Equal),
            )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoricalConstraint {
    pub property_name: String,
    pub property_value: String,
    #[serde(default)]
    pub operator: Operator,
}

impl CategoricalConstraint {
    pub fn equals(property_name: impl Into<String>, property_value: impl Into<String>) -> Self {
        Self {
            property_name: property_name.into(),
            property_value: property_value.into(),
            operator: Operator::Equals,
        }
    }
}

/// Constraints attached to a single event position of a pattern
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventConstraints {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_numeric: Vec<NumericConstraint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_categorical: Vec<CategoricalConstraint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_numeric: Vec<NumericConstraint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_categorical: Vec<CategoricalConstraint>,
}

impl EventConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single categorical constraint in the given scope
    pub fn categorical(scope: PropertyScope, constraint: CategoricalConstraint) -> Self {
        match scope {
            PropertyScope::Event => Self::new().with_event_categorical(constraint),
            PropertyScope::User => Self::new().with_user_categorical(constraint),
        }
    }

    /// A single numeric constraint in the given scope
    pub fn numeric(scope: PropertyScope, constraint: NumericConstraint) -> Self {
        match scope {
            PropertyScope::Event => Self::new().with_event_numeric(constraint),
            PropertyScope::User => Self::new().with_user_numeric(constraint),
        }
    }

    pub fn with_event_numeric(mut self, constraint: NumericConstraint) -> Self {
        self.event_numeric.push(constraint);
        self
    }

    pub fn with_event_categorical(mut self, constraint: CategoricalConstraint) -> Self {
        self.event_categorical.push(constraint);
        self
    }

    pub fn with_user_numeric(mut self, constraint: NumericConstraint) -> Self {
        self.user_numeric.push(constraint);
        self
    }

    pub fn with_user_categorical(mut self, constraint: CategoricalConstraint) -> Self {
        self.user_categorical.push(constraint);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.event_numeric.is_empty()
            && self.event_categorical.is_empty()
            && self.user_numeric.is_empty()
            && self.user_categorical.is_empty()
    }

    /// Names of every property this slot constrains, in either scope
    pub fn property_names(&self) -> BTreeSet<&str> {
        self.event_numeric
            .iter()
            .chain(self.user_numeric.iter())
            .map(|c| c.property_name.as_str())
            .chain(
                self.event_categorical
                    .iter()
                    .chain(self.user_categorical.iter())
                    .map(|c| c.property_name.as_str()),
            )
            .collect()
    }

    /// True when the slot holds categorical filters only
    pub fn is_categorical(&self) -> bool {
        self.event_numeric.is_empty() && self.user_numeric.is_empty()
    }

    /// Append every constraint of `other` to this slot
    pub fn merge(&mut self, other: &EventConstraints) {
        self.event_numeric.extend(other.event_numeric.iter().cloned());
        self.event_categorical
            .extend(other.event_categorical.iter().cloned());
        self.user_numeric.extend(other.user_numeric.iter().cloned());
        self.user_categorical
            .extend(other.user_categorical.iter().cloned());
    }

    /// Copy of this slot minus every constraint that also appears in `other`
    pub fn without(&self, other: &EventConstraints) -> EventConstraints {
        EventConstraints {
            event_numeric: retain_missing(&self.event_numeric, &other.event_numeric),
            event_categorical: retain_missing(&self.event_categorical, &other.event_categorical),
            user_numeric: retain_missing(&self.user_numeric, &other.user_numeric),
            user_categorical: retain_missing(&self.user_categorical, &other.user_categorical),
        }
    }

    /// Order-independent form used for equality lookups
    pub fn normalized(&self) -> EventConstraints {
        let mut out = self.clone();
        out.event_numeric.sort_by(NumericConstraint::cmp_key);
        out.user_numeric.sort_by(NumericConstraint::cmp_key);
        out.event_categorical.sort_by(|a, b| {
            (&a.property_name, &a.property_value).cmp(&(&b.property_name, &b.property_value))
        });
        out.user_categorical.sort_by(|a, b| {
            (&a.property_name, &a.property_value).cmp(&(&b.property_name, &b.property_value))
        });
        out
    }
}

fn retain_missing<T: Clone + PartialEq>(items: &[T], exclude: &[T]) -> Vec<T> {
    items
        .iter()
        .filter(|item| !exclude.contains(item))
        .cloned()
        .collect()
}

/// Property names constrained anywhere along an overlay
pub fn constrained_properties(overlay: &[EventConstraints]) -> BTreeSet<String> {
    overlay
        .iter()
        .flat_map(|slot| slot.property_names())
        .map(str::to_string)
        .collect()
}

/// True when no slot of the overlay carries a constraint
pub fn overlay_is_empty(overlay: &[EventConstraints]) -> bool {
    overlay.iter().all(EventConstraints::is_empty)
}

/// Initial overlay for a funnel endpoint pattern.
///
/// Start constraints land on the first event, end constraints on the last.
/// For a single-event pattern the end constraints win.
pub fn endpoint_overlay(
    len: usize,
    start: Option<&EventConstraints>,
    end: Option<&EventConstraints>,
) -> Vec<EventConstraints> {
    let mut overlay = vec![EventConstraints::default(); len];
    if len == 0 {
        return overlay;
    }
    if let Some(start) = start {
        overlay[0] = start.clone();
    }
    if let Some(end) = end {
        overlay[len - 1] = end.clone();
    }
    overlay
}
