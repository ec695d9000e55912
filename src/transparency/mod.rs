//! Transparency module for the Quantum Activity Agent.
//!
//! Structured audit records for every quantum and capture, plus counters
//! that summarise what the agent has collected.

pub mod log;
pub mod stats;

pub use log::{AuditLog, EventLog, LogLevel, LogRecord, MemoryLog, Metadata, SharedEventLog};
pub use stats::{
    create_shared_log, create_shared_log_with_persistence, SharedTransparencyLog, TransparencyLog,
    TransparencyStats,
};
