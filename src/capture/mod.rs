//! Screenshot capture for closed quanta.
//!
//! Capture runs on worker threads; the coordinating thread only dispatches
//! jobs and later drains their outcomes.

pub mod dispatcher;
pub mod imaging;
mod types;

pub use dispatcher::{capture_and_save, quantum_directory, CaptureDispatcher, CaptureOutcome};
pub use types::{CapturedScreenshot, ScreenshotCaptureResult, ScreenshotFormat};
