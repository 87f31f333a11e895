//! Alert rule conditions
//!
//! A rule's condition set is a conjunction of closed predicate variants. An
//! absent predicate is the neutral element: an empty set matches everything.

use crate::models::{AnalysisResult, DetectionEvent};
use chrono::{Datelike, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One predicate over a finished, correlated event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// Any of these object types was detected (OR within)
    ObjectTypes { any_of: HashSet<String> },
    /// Result confidence is at least this value
    MinConfidence { threshold: f32 },
    /// Event occurred inside this time-of-day range (UTC); start > end spans
    /// midnight
    TimeOfDay { start: NaiveTime, end: NaiveTime },
    /// Event occurred on one of these weekdays (UTC)
    DaysOfWeek { days: HashSet<Weekday> },
    /// Event came from one of these cameras
    Cameras { allow: HashSet<String> },
    /// Description contains this keyword (case-insensitive)
    DescriptionKeyword { keyword: String },
}

impl Condition {
    /// Pure predicate over `(result, event)`
    pub fn matches(&self, result: &AnalysisResult, event: &DetectionEvent) -> bool {
        match self {
            Condition::ObjectTypes { any_of } => {
                any_of.is_empty() || !any_of.is_disjoint(&result.detected_object_types)
            }
            Condition::MinConfidence { threshold } => result.confidence >= *threshold,
            Condition::TimeOfDay { start, end } => {
                let t = event.occurred_at.time();
                // Strip sub-second noise so boundaries compare cleanly
                let t = NaiveTime::from_hms_opt(t.hour(), t.minute(), t.second())
                    .unwrap_or(t);
                if start <= end {
                    t >= *start && t <= *end
                } else {
                    t >= *start || t <= *end
                }
            }
            Condition::DaysOfWeek { days } => {
                days.is_empty() || days.contains(&event.occurred_at.weekday())
            }
            Condition::Cameras { allow } => {
                allow.is_empty() || allow.contains(&event.camera_id)
            }
            Condition::DescriptionKeyword { keyword } => result
                .description
                .to_lowercase()
                .contains(&keyword.to_lowercase()),
        }
    }
}

/// Conjunction of predicates; empty = always true
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionSet {
    #[serde(default)]
    pub all: Vec<Condition>,
}

impl ConditionSet {
    pub fn matches(&self, result: &AnalysisResult, event: &DetectionEvent) -> bool {
        self.all.iter().all(|c| c.matches(result, event))
    }
}
