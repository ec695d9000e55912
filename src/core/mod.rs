//! Core tracking logic.
//!
//! This module contains:
//! - The activity sampler and its score
//! - The focus tracker with dwell, switch and streak statistics
//! - Quantum classification and summaries
//! - The orchestrator state machine and the loop that drives it

pub mod activity;
pub mod agent;
pub mod focus;
pub mod orchestrator;
pub mod quantum;
pub mod system_events;

pub use activity::{activity_score, ActivityAggregate, ActivityCounter, ActivityCounts, ActivitySampler};
pub use agent::{AgentOptions, Command};
pub use focus::{FocusQuantumAggregate, FocusSample, FocusTracker};
pub use orchestrator::{Orchestrator, Sources, TrackerEvent};
pub use quantum::{
    EndReason, PauseReason, QuantumClassification, QuantumSummary, TrackingContext, TrackingStatus,
};
pub use system_events::{SystemEventAdapter, SystemEventEffect};
