//! Typed events produced by the platform sources.
//!
//! Input events carry no key content. Pointer positions exist only so the
//! sampler can accumulate travel distance; they are never stored.

use serde::{Deserialize, Serialize};

/// Identifier of a physical display.
pub type ScreenId = u32;

/// A pointer position in global screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another position.
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Mouse button classification for clicks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MouseButton {
    Left,
    Right,
    Other,
}

/// One raw input observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum InputEvent {
    KeyDown,
    Click(MouseButton),
    Scroll,
    PointerMove(Position),
}

/// Identity of the foreground application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppIdentity {
    /// Bundle or package identifier
    pub bundle_id: String,
    /// Display name; falls back to the bundle id when the OS has none
    pub name: String,
}

impl AppIdentity {
    pub fn new(bundle_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            name: name.into(),
        }
    }
}

/// Power and session notifications from the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemEvent {
    WillSleep,
    DidWake,
    ScreensDidSleep,
    ScreensDidWake,
    ScreenLocked,
    ScreenUnlocked,
}

impl SystemEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemEvent::WillSleep => "will_sleep",
            SystemEvent::DidWake => "did_wake",
            SystemEvent::ScreensDidSleep => "screens_did_sleep",
            SystemEvent::ScreensDidWake => "screens_did_wake",
            SystemEvent::ScreenLocked => "screen_locked",
            SystemEvent::ScreenUnlocked => "screen_unlocked",
        }
    }
}
