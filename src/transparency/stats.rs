//! Session statistics about what the agent has collected.
//!
//! Counters only; no content is kept here. Stats can be persisted so that
//! `quantum-agent status` can show the numbers of the last session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Collection statistics for the current process.
#[derive(Debug)]
pub struct TransparencyLog {
    input_events: AtomicU64,
    quanta_finalized: AtomicU64,
    quanta_dropped: AtomicU64,
    quanta_too_short: AtomicU64,
    captures_requested: AtomicU64,
    screenshots_saved: AtomicU64,
    capture_errors: AtomicU64,
    session_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl TransparencyLog {
    pub fn new() -> Self {
        Self {
            input_events: AtomicU64::new(0),
            quanta_finalized: AtomicU64::new(0),
            quanta_dropped: AtomicU64::new(0),
            quanta_too_short: AtomicU64::new(0),
            captures_requested: AtomicU64::new(0),
            screenshots_saved: AtomicU64::new(0),
            capture_errors: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a log that continues from, and saves back to, `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::info!("could not load previous session stats: {e}");
        }

        log
    }

    pub fn record_input_event(&self) {
        self.input_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finalized quantum and its classification.
    pub fn record_quantum(&self, is_dropped: bool, is_too_short: bool) {
        self.quanta_finalized.fetch_add(1, Ordering::Relaxed);
        if is_dropped {
            self.quanta_dropped.fetch_add(1, Ordering::Relaxed);
        }
        if is_too_short {
            self.quanta_too_short.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_capture_requested(&self) {
        self.captures_requested.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one capture job.
    pub fn record_capture_outcome(&self, saved: usize, errors: usize) {
        self.screenshots_saved
            .fetch_add(saved as u64, Ordering::Relaxed);
        self.capture_errors
            .fetch_add(errors as u64, Ordering::Relaxed);
    }

    pub fn stats(&self) -> TransparencyStats {
        TransparencyStats {
            input_events: self.input_events.load(Ordering::Relaxed),
            quanta_finalized: self.quanta_finalized.load(Ordering::Relaxed),
            quanta_dropped: self.quanta_dropped.load(Ordering::Relaxed),
            quanta_too_short: self.quanta_too_short.load(Ordering::Relaxed),
            captures_requested: self.captures_requested.load(Ordering::Relaxed),
            screenshots_saved: self.screenshots_saved.load(Ordering::Relaxed),
            capture_errors: self.capture_errors.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Statistics:\n\
             - Input events counted: {}\n\
             - Quanta finalized: {} ({} dropped, {} too short)\n\
             - Screenshot captures requested: {}\n\
             - Screenshots saved: {}\n\
             - Capture errors: {}\n\
             - Session duration: {} seconds\n\
             \n\
             Privacy Guarantee:\n\
             - No key content captured\n\
             - Pointer positions used only for travel distance\n\
             - Screenshots stay on this machine",
            stats.input_events,
            stats.quanta_finalized,
            stats.quanta_dropped,
            stats.quanta_too_short,
            stats.captures_requested,
            stats.screenshots_saved,
            stats.capture_errors,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                input_events: stats.input_events,
                quanta_finalized: stats.quanta_finalized,
                quanta_dropped: stats.quanta_dropped,
                quanta_too_short: stats.quanta_too_short,
                captures_requested: stats.captures_requested,
                screenshots_saved: stats.screenshots_saved,
                capture_errors: stats.capture_errors,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.input_events
                    .store(persisted.input_events, Ordering::Relaxed);
                self.quanta_finalized
                    .store(persisted.quanta_finalized, Ordering::Relaxed);
                self.quanta_dropped
                    .store(persisted.quanta_dropped, Ordering::Relaxed);
                self.quanta_too_short
                    .store(persisted.quanta_too_short, Ordering::Relaxed);
                self.captures_requested
                    .store(persisted.captures_requested, Ordering::Relaxed);
                self.screenshots_saved
                    .store(persisted.screenshots_saved, Ordering::Relaxed);
                self.capture_errors
                    .store(persisted.capture_errors, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.input_events.store(0, Ordering::Relaxed);
        self.quanta_finalized.store(0, Ordering::Relaxed);
        self.quanta_dropped.store(0, Ordering::Relaxed);
        self.quanta_too_short.store(0, Ordering::Relaxed);
        self.captures_requested.store(0, Ordering::Relaxed);
        self.screenshots_saved.store(0, Ordering::Relaxed);
        self.capture_errors.store(0, Ordering::Relaxed);
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of collection statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransparencyStats {
    pub input_events: u64,
    pub quanta_finalized: u64,
    pub quanta_dropped: u64,
    pub quanta_too_short: u64,
    pub captures_requested: u64,
    pub screenshots_saved: u64,
    pub capture_errors: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    input_events: u64,
    quanta_finalized: u64,
    quanta_dropped: u64,
    quanta_too_short: u64,
    captures_requested: u64,
    screenshots_saved: u64,
    capture_errors: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared statistics.
pub type SharedTransparencyLog = Arc<TransparencyLog>;

pub fn create_shared_log() -> SharedTransparencyLog {
    Arc::new(TransparencyLog::new())
}

pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTransparencyLog {
    Arc::new(TransparencyLog::with_persistence(path))
}
