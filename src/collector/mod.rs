//! Platform boundary for the Quantum Activity Agent.
//!
//! The core never registers OS callbacks itself. Each platform facility is a
//! source trait that hands typed events over a channel or answers a direct
//! query; the concrete sources live in the platform modules.

pub mod scripted;
pub mod session;
pub mod types;

#[cfg(target_os = "macos")]
pub mod macos;

pub mod noop;

use crate::error::CollectorError;
use crossbeam_channel::Receiver;
use image::RgbaImage;

pub use types::{AppIdentity, InputEvent, MouseButton, Position, ScreenId, SystemEvent};

#[cfg(target_os = "macos")]
pub use macos::{check_permission, MacOSCollector, MacOSFrontmostApp, MacOSScreenSource, MacOSSystemEvents};

#[cfg(not(target_os = "macos"))]
pub use noop::check_permission;

/// Platform-agnostic input collector type alias
#[cfg(target_os = "macos")]
pub type Collector = MacOSCollector;

/// Platform-agnostic input collector type alias
#[cfg(not(target_os = "macos"))]
pub type Collector = noop::NoopCollector;

/// Platform-agnostic screen source type alias
#[cfg(target_os = "macos")]
pub type ScreenSource = MacOSScreenSource;

/// Platform-agnostic screen source type alias
#[cfg(not(target_os = "macos"))]
pub type ScreenSource = noop::NoopScreenSource;

/// Platform-agnostic frontmost-app source type alias
#[cfg(target_os = "macos")]
pub type FrontmostApp = MacOSFrontmostApp;

/// Platform-agnostic frontmost-app source type alias
#[cfg(not(target_os = "macos"))]
pub type FrontmostApp = noop::NoopFrontmostApp;

/// Platform-agnostic sleep/lock source type alias
#[cfg(target_os = "macos")]
pub type SessionMonitor = MacOSSystemEvents;

/// Platform-agnostic sleep/lock source type alias
#[cfg(not(target_os = "macos"))]
pub type SessionMonitor = noop::NoopSystemEvents;

/// Raw keyboard and pointer callbacks, delivered as a channel.
pub trait InputEventSource: Send {
    /// Attach to the OS event source and return the event stream.
    fn start(&mut self) -> Result<Receiver<InputEvent>, CollectorError>;

    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Foreground application queries.
pub trait FrontmostAppSource: Send {
    /// The application currently in front, if it can be identified.
    fn frontmost(&self) -> Option<AppIdentity>;

    /// Activation notifications, when the platform pushes them.
    fn activations(&self) -> Option<Receiver<()>> {
        None
    }
}

/// Full-resolution screen images.
pub trait ScreenCaptureSource: Send + Sync {
    fn active_screens(&self) -> Vec<ScreenId>;

    /// The main display, preferred when choosing a primary screenshot.
    fn primary_screen(&self) -> Option<ScreenId>;

    fn capture(&self, screen: ScreenId) -> Option<RgbaImage>;
}

/// Sleep, wake, lock and unlock notifications.
pub trait SystemEventSource: Send {
    fn start(&mut self) -> Result<Receiver<SystemEvent>, CollectorError>;

    fn stop(&mut self);
}
