//! Quantum Activity Agent - local activity telemetry in fixed time quanta.
//!
//! The agent samples input activity and the frontmost application, cuts
//! time into fixed-length quanta (three minutes by default) and closes each
//! one into a structured summary with an activity score, focus and switching
//! statistics and anomaly flags. Full quanta also get a screenshot of every
//! display, written and hashed on a worker thread.
//!
//! # Privacy Guarantees
//!
//! - **No key content**: only the number of key presses is counted
//! - **No pointer trail**: positions only feed a running distance total
//! - **Local only**: summaries, screenshots and the audit log stay on disk
//! - **Transparency**: every quantum and capture is logged and auditable
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Quantum Activity Agent                    │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌──────────────┐        │
//! │  │  Collector  │──▶│  Activity   │──▶│              │        │
//! │  │ (platform)  │   │  Sampler    │   │ Orchestrator │──▶ log │
//! │  └─────────────┘   ├─────────────┤   │  (quantum    │        │
//! │         │          │   Focus     │──▶│   state      │        │
//! │         └─────────▶│  Tracker    │   │   machine)   │        │
//! │                    └─────────────┘   └──────┬───────┘        │
//! │  ┌─────────────┐                            │                │
//! │  │System events│───────────────────────────▶│                │
//! │  └─────────────┘                     ┌──────▼───────┐        │
//! │                                      │   Capture    │        │
//! │                                      │  Dispatcher  │        │
//! │                                      └──────────────┘        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use quantum_activity_agent::{
//!     clock::SystemClock,
//!     collector::{Collector, FrontmostApp, ScreenSource},
//!     config::{Config, StaticConfigStore},
//!     core::{Orchestrator, Sources},
//!     transparency::{create_shared_log, AuditLog, LogLevel},
//! };
//!
//! let mut orchestrator = Orchestrator::new(
//!     Arc::new(StaticConfigStore::new(Config::default())),
//!     Arc::new(SystemClock),
//!     Arc::new(AuditLog::tracing_only(LogLevel::Info)),
//!     create_shared_log(),
//!     Sources {
//!         input: Box::new(Collector::new()),
//!         frontmost: Box::new(FrontmostApp::default()),
//!         screens: Arc::new(ScreenSource::new()),
//!     },
//! );
//!
//! orchestrator.start().expect("tracking starts from stopped");
//! // Call `orchestrator.tick()` periodically, or hand it to `core::agent::run`.
//! ```

pub mod capture;
pub mod clock;
pub mod collector;
pub mod config;
pub mod core;
pub mod error;
pub mod transparency;

// Re-export key types at crate root for convenience
pub use capture::{CapturedScreenshot, ScreenshotCaptureResult, ScreenshotFormat};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{Config, ConfigStore, FileConfigStore, StaticConfigStore};
pub use core::{
    ActivityAggregate, FocusQuantumAggregate, Orchestrator, QuantumSummary, TrackerEvent,
    TrackingStatus,
};
pub use error::{CaptureError, CollectorError, ConfigError, TransitionError};
pub use transparency::{AuditLog, EventLog, LogLevel, SharedTransparencyLog, TransparencyLog, TransparencyStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Privacy declaration that can be displayed to users.
pub const PRIVACY_DECLARATION: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║        QUANTUM ACTIVITY AGENT - PRIVACY DECLARATION              ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This agent summarises your work in three-minute quanta.         ║
║                                                                  ║
║  ✓ WHAT WE CAPTURE:                                              ║
║    • How many keys, clicks and scrolls occur (counts only)       ║
║    • How far the mouse travels (distance only)                   ║
║    • Which application is in front, and for how long             ║
║    • One screenshot per display for each full quantum            ║
║                                                                  ║
║  ✗ WHAT WE NEVER CAPTURE:                                        ║
║    • Which keys you press (no passwords, messages, etc.)         ║
║    • A trail of cursor positions                                 ║
║    • Window titles or document contents as text                  ║
║                                                                  ║
║  Everything stays on this machine. Quanta shorter than the       ║
║  drop threshold are discarded without a screenshot.              ║
║                                                                  ║
║  You can view collection statistics anytime with:                ║
║    quantum-agent status                                          ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privacy_declaration_contents() {
        assert!(PRIVACY_DECLARATION.contains("PRIVACY"));
        assert!(PRIVACY_DECLARATION.contains("NEVER CAPTURE"));
        assert!(PRIVACY_DECLARATION.contains("keys you press"));
        assert!(PRIVACY_DECLARATION.contains("screenshot"));
    }
}
