use crate::collector::ScreenId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Encoded screenshot format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenshotFormat {
    Jpeg,
    Png,
}

impl ScreenshotFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ScreenshotFormat::Jpeg => "jpg",
            ScreenshotFormat::Png => "png",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScreenshotFormat::Jpeg => "jpeg",
            ScreenshotFormat::Png => "png",
        }
    }
}

/// One screenshot written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedScreenshot {
    pub id: Uuid,
    pub screen_id: ScreenId,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub format: ScreenshotFormat,
    pub file_size_bytes: u64,
    /// Hex SHA-256 of the file as read back; empty if the read failed
    pub sha256_hex: String,
    pub captured_at: DateTime<Utc>,
}

/// Outcome of capturing every target screen for one quantum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotCaptureResult {
    pub quantum_started_at: DateTime<Utc>,
    pub quantum_ended_at: DateTime<Utc>,
    pub output_directory: PathBuf,
    pub primary_screenshot_id: Option<Uuid>,
    pub screenshots: Vec<CapturedScreenshot>,
    /// One `display=<id>: <reason>` entry per failed screen
    pub errors: Vec<String>,
}

impl ScreenshotCaptureResult {
    pub fn empty(
        quantum_started_at: DateTime<Utc>,
        quantum_ended_at: DateTime<Utc>,
        output_directory: PathBuf,
        error: String,
    ) -> Self {
        Self {
            quantum_started_at,
            quantum_ended_at,
            output_directory,
            primary_screenshot_id: None,
            screenshots: Vec::new(),
            errors: vec![error],
        }
    }

    pub fn primary(&self) -> Option<&CapturedScreenshot> {
        let id = self.primary_screenshot_id?;
        self.screenshots.iter().find(|shot| shot.id == id)
    }
}
