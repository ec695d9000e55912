//! Quantum summaries and their classification.

use crate::config::QuantumConfig;
use crate::core::activity::ActivityAggregate;
use crate::core::focus::FocusQuantumAggregate;
use crate::transparency::Metadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Overall tracking state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    #[default]
    Stopped,
    Tracking,
    PausedBySystem,
}

impl TrackingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingStatus::Stopped => "stopped",
            TrackingStatus::Tracking => "tracking",
            TrackingStatus::PausedBySystem => "paused_by_system",
        }
    }
}

impl fmt::Display for TrackingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a quantum closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    QuantumComplete,
    UserStop,
    SystemPause,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::QuantumComplete => "quantum_complete",
            EndReason::UserStop => "user_stop",
            EndReason::SystemPause => "system_pause",
        }
    }
}

/// The OS condition that paused tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    SystemSleep,
    ScreensSleep,
    ScreenLocked,
}

impl PauseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PauseReason::SystemSleep => "system_sleep",
            PauseReason::ScreensSleep => "screens_sleep",
            PauseReason::ScreenLocked => "screen_locked",
        }
    }
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Project and task labels attached to every quantum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingContext {
    pub project: String,
    pub task: String,
}

impl Default for TrackingContext {
    fn default() -> Self {
        Self {
            project: "Unassigned".to_string(),
            task: "Unassigned".to_string(),
        }
    }
}

/// Length-based classification of a closing quantum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantumClassification {
    /// Effective duration in seconds
    pub duration_seconds: u64,
    pub is_partial: bool,
    pub is_too_short: bool,
    pub is_dropped: bool,
}

impl QuantumClassification {
    /// Classify a quantum that ran `elapsed_seconds` and closed for `end_reason`.
    ///
    /// A completed quantum always counts as the configured length, whatever
    /// the wall clock measured.
    pub fn classify(end_reason: EndReason, elapsed_seconds: u64, config: &QuantumConfig) -> Self {
        let is_partial = end_reason != EndReason::QuantumComplete;
        let duration_seconds = if is_partial {
            elapsed_seconds
        } else {
            config.quantum_seconds
        };

        let is_dropped = is_partial && duration_seconds < config.min_partial_seconds_drop;
        let is_too_short =
            is_partial && !is_dropped && duration_seconds < config.min_partial_seconds_too_short;

        Self {
            duration_seconds,
            is_partial,
            is_too_short,
            is_dropped,
        }
    }

    /// Full quanta and substantial partial ones get a screenshot.
    pub fn wants_capture(&self) -> bool {
        !self.is_dropped && !self.is_too_short
    }
}

/// Whole seconds between two instants, rounded to nearest, never negative.
pub fn elapsed_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    let ms = (end - start).num_milliseconds().max(0);
    (ms as f64 / 1000.0).round() as u64
}

/// The durable output of one quantum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantumSummary {
    pub id: Uuid,
    /// Monotonic per-process sequence number
    pub sequence: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: u64,
    pub is_partial: bool,
    pub is_too_short: bool,
    pub is_dropped: bool,
    pub end_reason: EndReason,
    pub pause_reason: Option<PauseReason>,
    pub activity: ActivityAggregate,
    /// Absent for dropped quanta
    pub focus: Option<FocusQuantumAggregate>,
    pub context: TrackingContext,
    pub host: String,
}

impl QuantumSummary {
    pub fn classification(&self) -> QuantumClassification {
        QuantumClassification {
            duration_seconds: self.duration_seconds,
            is_partial: self.is_partial,
            is_too_short: self.is_too_short,
            is_dropped: self.is_dropped,
        }
    }

    /// Flatten into log metadata, one key per summary field.
    pub fn to_metadata(&self) -> Metadata {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
            _ => Metadata::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn config() -> QuantumConfig {
        QuantumConfig {
            quantum_seconds: 180,
            min_partial_seconds_drop: 30,
            min_partial_seconds_too_short: 120,
            ..QuantumConfig::default()
        }
    }

    #[test]
    fn test_user_stop_at_25s_is_dropped() {
        let c = QuantumClassification::classify(EndReason::UserStop, 25, &config());
        assert!(c.is_partial);
        assert!(c.is_dropped);
        assert!(!c.is_too_short);
        assert!(!c.wants_capture());
    }

    #[test]
    fn test_partial_between_thresholds_is_too_short() {
        let c = QuantumClassification::classify(EndReason::SystemPause, 90, &config());
        assert!(!c.is_dropped);
        assert!(c.is_too_short);
        assert!(!c.wants_capture());

        let c = QuantumClassification::classify(EndReason::SystemPause, 120, &config());
        assert!(!c.is_too_short);
        assert!(c.wants_capture());
        assert_eq!(c.duration_seconds, 120);
    }

    #[test]
    fn test_complete_quantum_uses_configured_length() {
        for measured in [0, 1, 179, 181, 4000] {
            let c = QuantumClassification::classify(EndReason::QuantumComplete, measured, &config());
            assert_eq!(c.duration_seconds, 180);
            assert!(!c.is_partial);
            assert!(!c.is_dropped);
            assert!(c.wants_capture());
        }
    }

    #[test]
    fn test_elapsed_rounds_to_nearest_second() {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        assert_eq!(elapsed_seconds(start, start + Duration::milliseconds(29_499)), 29);
        assert_eq!(elapsed_seconds(start, start + Duration::milliseconds(29_500)), 30);
        assert_eq!(elapsed_seconds(start, start - Duration::seconds(5)), 0);
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_string(&EndReason::UserStop).unwrap(), "\"user_stop\"");
        assert_eq!(TrackingStatus::PausedBySystem.to_string(), "paused_by_system");
    }
}
