//! Inert sources.
//!
//! These exist so the crate (and binary) builds and runs where no native
//! source is available. They never emit events, so tracking proceeds with
//! zero activity, no focus data and no system pauses.

use crate::collector::types::{AppIdentity, InputEvent, ScreenId, SystemEvent};
use crate::collector::{FrontmostAppSource, InputEventSource, ScreenCaptureSource, SystemEventSource};
use crate::error::CollectorError;
use crossbeam_channel::{bounded, Receiver, Sender};
use image::RgbaImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An input collector that never emits events.
pub struct NoopCollector {
    _sender: Sender<InputEvent>,
    receiver: Receiver<InputEvent>,
    running: Arc<AtomicBool>,
}

impl NoopCollector {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(1);
        Self {
            _sender: sender,
            receiver,
            running: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for NoopCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl InputEventSource for NoopCollector {
    fn start(&mut self) -> Result<Receiver<InputEvent>, CollectorError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CollectorError::AlreadyRunning);
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(self.receiver.clone())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// A frontmost-app source that never knows the answer.
#[derive(Debug, Default)]
pub struct NoopFrontmostApp;

impl FrontmostAppSource for NoopFrontmostApp {
    fn frontmost(&self) -> Option<AppIdentity> {
        None
    }
}

/// A screen source with no screens.
#[derive(Debug, Default)]
pub struct NoopScreenSource;

impl NoopScreenSource {
    pub fn new() -> Self {
        Self
    }
}

impl ScreenCaptureSource for NoopScreenSource {
    fn active_screens(&self) -> Vec<ScreenId> {
        Vec::new()
    }

    fn primary_screen(&self) -> Option<ScreenId> {
        None
    }

    fn capture(&self, _screen: ScreenId) -> Option<RgbaImage> {
        None
    }
}

/// A system event source that never fires.
pub struct NoopSystemEvents {
    _sender: Sender<SystemEvent>,
    receiver: Receiver<SystemEvent>,
}

impl NoopSystemEvents {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(1);
        Self {
            _sender: sender,
            receiver,
        }
    }
}

impl Default for NoopSystemEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemEventSource for NoopSystemEvents {
    fn start(&mut self) -> Result<Receiver<SystemEvent>, CollectorError> {
        Ok(self.receiver.clone())
    }

    fn stop(&mut self) {}
}

/// No Input Monitoring permission gate outside macOS.
pub fn check_permission() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_collector_lifecycle() {
        let mut collector = NoopCollector::new();
        assert!(!collector.is_running());

        let receiver = collector.start().unwrap();
        assert!(collector.is_running());
        assert!(receiver.try_recv().is_err());
        assert!(matches!(collector.start(), Err(CollectorError::AlreadyRunning)));

        collector.stop();
        assert!(!collector.is_running());
    }

    #[test]
    fn test_noop_screen_source_is_empty() {
        let source = NoopScreenSource::new();
        assert!(source.active_screens().is_empty());
        assert!(source.primary_screen().is_none());
    }
}
