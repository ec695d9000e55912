//! Structured audit log.
//!
//! Every record is `{timestamp, level, component, message, metadata}`. The
//! [`AuditLog`] sink appends records as JSON Lines and mirrors them to
//! `tracing`, so a single call both persists the event and shows it in the
//! diagnostic output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Key-value context attached to a record.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Severity of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// The equivalent `tracing` filter directive.
    pub fn as_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// One structured log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl LogRecord {
    pub fn new(level: LogLevel, component: &str, message: &str, metadata: Metadata) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component: component.to_string(),
            message: message.to_string(),
            metadata,
        }
    }
}

/// Destination for structured events.
pub trait EventLog: Send + Sync {
    fn log(&self, level: LogLevel, component: &str, message: &str, metadata: Metadata);
}

/// Thread-safe shared event log.
pub type SharedEventLog = Arc<dyn EventLog>;

/// JSON Lines audit log mirrored to `tracing`.
#[derive(Debug)]
pub struct AuditLog {
    min_level: LogLevel,
    path: Option<PathBuf>,
    file: Mutex<Option<File>>,
    write_failed: AtomicBool,
}

impl AuditLog {
    /// Open (or create) the log file for appending.
    ///
    /// If the file cannot be opened the log still mirrors to `tracing`.
    pub fn open(path: PathBuf, min_level: LogLevel) -> Self {
        let file = open_append(&path)
            .map_err(|e| tracing::warn!(path = %path.display(), "audit log unavailable: {e}"))
            .ok();

        Self {
            min_level,
            path: Some(path),
            file: Mutex::new(file),
            write_failed: AtomicBool::new(false),
        }
    }

    /// A log that only mirrors to `tracing`.
    pub fn tracing_only(min_level: LogLevel) -> Self {
        Self {
            min_level,
            path: None,
            file: Mutex::new(None),
            write_failed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read every record back from a log file, skipping unparseable lines.
    pub fn read_records(path: &Path) -> Result<Vec<LogRecord>, std::io::Error> {
        let reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(record) = serde_json::from_str::<LogRecord>(&line) {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn write(&self, record: &LogRecord) {
        let Ok(mut guard) = self.file.lock() else {
            return;
        };
        let Some(file) = guard.as_mut() else {
            return;
        };

        let result = serde_json::to_string(record)
            .map_err(std::io::Error::other)
            .and_then(|line| writeln!(file, "{line}"));

        if let Err(e) = result {
            // Report the first failure only; the sink keeps trying.
            if !self.write_failed.swap(true, Ordering::Relaxed) {
                tracing::warn!("audit log write failed: {e}");
            }
        }
    }
}

impl EventLog for AuditLog {
    fn log(&self, level: LogLevel, component: &str, message: &str, metadata: Metadata) {
        if level < self.min_level {
            return;
        }
        mirror_to_tracing(level, component, message, &metadata);
        self.write(&LogRecord::new(level, component, message, metadata));
    }
}

fn open_append(path: &Path) -> Result<File, std::io::Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn mirror_to_tracing(level: LogLevel, component: &str, message: &str, metadata: &Metadata) {
    let fields = if metadata.is_empty() {
        String::new()
    } else {
        serde_json::to_string(metadata).unwrap_or_default()
    };
    match level {
        LogLevel::Debug => tracing::debug!(component, metadata = %fields, "{message}"),
        LogLevel::Info => tracing::info!(component, metadata = %fields, "{message}"),
        LogLevel::Warning => tracing::warn!(component, metadata = %fields, "{message}"),
        LogLevel::Error => tracing::error!(component, metadata = %fields, "{message}"),
    }
}

/// In-memory event log, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryLog {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Records emitted by one component.
    pub fn records_for(&self, component: &str) -> Vec<LogRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.component == component)
            .collect()
    }
}

impl EventLog for MemoryLog {
    fn log(&self, level: LogLevel, component: &str, message: &str, metadata: Metadata) {
        if let Ok(mut records) = self.records.lock() {
            records.push(LogRecord::new(level, component, message, metadata));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_log_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("qaa-audit-{}", uuid::Uuid::new_v4()))
            .join("Logs")
            .join("agent.log")
    }

    #[test]
    fn test_audit_log_writes_json_lines() {
        let path = temp_log_path();
        let log = AuditLog::open(path.clone(), LogLevel::Info);

        let mut metadata = Metadata::new();
        metadata.insert("display_id".to_string(), "1".into());
        log.log(LogLevel::Warning, "screenshots", "frame looks black", metadata);
        log.log(LogLevel::Info, "quantum", "Quantum finalized", Metadata::new());

        let records = AuditLog::read_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].component, "screenshots");
        assert_eq!(records[0].level, LogLevel::Warning);
        assert_eq!(records[0].metadata["display_id"], "1");
        assert!(records[1].metadata.is_empty());
    }

    #[test]
    fn test_audit_log_filters_by_level() {
        let path = temp_log_path();
        let log = AuditLog::open(path.clone(), LogLevel::Warning);

        log.log(LogLevel::Debug, "activity", "noise", Metadata::new());
        log.log(LogLevel::Info, "activity", "started", Metadata::new());
        log.log(LogLevel::Error, "screenshots", "dir failed", Metadata::new());

        let records = AuditLog::read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, LogLevel::Error);
    }

    #[test]
    fn test_level_ordering_and_wire_format() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Warning < LogLevel::Error);
        assert_eq!(serde_json::to_string(&LogLevel::Warning).unwrap(), "\"warning\"");
        assert_eq!(LogLevel::Warning.as_filter_directive(), "warn");
    }

    #[test]
    fn test_memory_log_filters_component() {
        let log = MemoryLog::new();
        log.log(LogLevel::Info, "focus", "Focus monitor started", Metadata::new());
        log.log(LogLevel::Info, "activity", "Activity monitor started", Metadata::new());
        assert_eq!(log.records_for("focus").len(), 1);
    }
}
