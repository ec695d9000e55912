//! Error types for the Quantum Activity Agent.

use thiserror::Error;

/// Configuration loading and saving errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}

/// Errors that can occur while attaching to a platform event source.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Collector is already running")]
    AlreadyRunning,

    #[error("Input Monitoring permission not granted")]
    PermissionDenied,

    #[error("Failed to create CGEvent tap")]
    TapCreationFailed,

    #[error("Failed to create run loop source")]
    RunLoopSourceFailed,

    #[error("Event source unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised inside one screenshot capture attempt.
///
/// These never leave the capture pipeline; they are rendered into the
/// result's per-screen error strings.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Failed to create screenshot directory: {0}")]
    CreateDirectory(#[source] std::io::Error),

    #[error("No displays to capture")]
    NoScreens,

    #[error("Screen image unavailable: {0}")]
    ScreenUnavailable(String),

    #[error("Captured frame looks black (possible missing Screen Recording permission)")]
    BlackFrame,

    #[error("Encode failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("Failed to read file for hash: {0}")]
    HashRead(#[source] std::io::Error),
}

/// Rejected tracking state transitions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("cannot {action} while {status}")]
    InvalidState {
        action: &'static str,
        status: crate::core::TrackingStatus,
    },
}
