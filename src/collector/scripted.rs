//! Scripted sources driven from code.
//!
//! Used by the test suite and by dry runs: events are injected through
//! handles instead of coming from the OS.

use crate::collector::types::{AppIdentity, InputEvent, ScreenId, SystemEvent};
use crate::collector::{FrontmostAppSource, InputEventSource, ScreenCaptureSource, SystemEventSource};
use crate::error::CollectorError;
use crossbeam_channel::{unbounded, Receiver, Sender};
use image::RgbaImage;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Input source fed through [`ChannelInputSource::sender`].
pub struct ChannelInputSource {
    sender: Sender<InputEvent>,
    receiver: Receiver<InputEvent>,
    running: bool,
    unavailable: Option<String>,
}

impl ChannelInputSource {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            running: false,
            unavailable: None,
        }
    }

    /// A source whose `start` always fails with `reason`.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            unavailable: Some(reason.into()),
            ..Self::new()
        }
    }

    pub fn sender(&self) -> Sender<InputEvent> {
        self.sender.clone()
    }
}

impl Default for ChannelInputSource {
    fn default() -> Self {
        Self::new()
    }
}

impl InputEventSource for ChannelInputSource {
    fn start(&mut self) -> Result<Receiver<InputEvent>, CollectorError> {
        if let Some(reason) = &self.unavailable {
            return Err(CollectorError::Unavailable(reason.clone()));
        }
        if self.running {
            return Err(CollectorError::AlreadyRunning);
        }
        self.running = true;
        Ok(self.receiver.clone())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

/// Frontmost-app source whose answer is set by the test.
#[derive(Clone)]
pub struct ScriptedFrontmostApp {
    current: Arc<Mutex<Option<AppIdentity>>>,
    activation_tx: Sender<()>,
    activation_rx: Receiver<()>,
}

impl ScriptedFrontmostApp {
    pub fn new() -> Self {
        let (activation_tx, activation_rx) = unbounded();
        Self {
            current: Arc::new(Mutex::new(None)),
            activation_tx,
            activation_rx,
        }
    }

    /// Change the frontmost app without a notification (seen on next poll).
    pub fn set(&self, app: Option<AppIdentity>) {
        if let Ok(mut current) = self.current.lock() {
            *current = app;
        }
    }

    pub fn set_app(&self, bundle_id: &str, name: &str) {
        self.set(Some(AppIdentity::new(bundle_id, name)));
    }

    /// Change the frontmost app and push an activation notification.
    pub fn activate(&self, bundle_id: &str, name: &str) {
        self.set_app(bundle_id, name);
        let _ = self.activation_tx.send(());
    }
}

impl Default for ScriptedFrontmostApp {
    fn default() -> Self {
        Self::new()
    }
}

impl FrontmostAppSource for ScriptedFrontmostApp {
    fn frontmost(&self) -> Option<AppIdentity> {
        self.current.lock().ok().and_then(|current| current.clone())
    }

    fn activations(&self) -> Option<Receiver<()>> {
        Some(self.activation_rx.clone())
    }
}

/// Screen source serving fixed in-memory images.
///
/// A screen registered with `None` is listed as active but fails to capture.
#[derive(Debug, Clone, Default)]
pub struct StaticScreenSource {
    screens: BTreeMap<ScreenId, Option<RgbaImage>>,
    primary: Option<ScreenId>,
    delay: Option<Duration>,
}

impl StaticScreenSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_screen(mut self, id: ScreenId, image: Option<RgbaImage>) -> Self {
        self.screens.insert(id, image);
        self
    }

    pub fn with_primary(mut self, id: ScreenId) -> Self {
        self.primary = Some(id);
        self
    }

    /// Sleep for `delay` inside every capture, like a slow display grab.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// A uniformly coloured test image.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, image::Rgba([rgb[0], rgb[1], rgb[2], 255]))
    }

    /// A horizontal gradient, useful as a "real" frame.
    pub fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            let r = (x * 255 / width.max(1)) as u8;
            let g = (y * 255 / height.max(1)) as u8;
            image::Rgba([r, g, 128, 255])
        })
    }
}

impl ScreenCaptureSource for StaticScreenSource {
    fn active_screens(&self) -> Vec<ScreenId> {
        self.screens.keys().copied().collect()
    }

    fn primary_screen(&self) -> Option<ScreenId> {
        self.primary
    }

    fn capture(&self, screen: ScreenId) -> Option<RgbaImage> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.screens.get(&screen).cloned().flatten()
    }
}

/// System event source fed through [`ChannelSystemEvents::sender`].
pub struct ChannelSystemEvents {
    sender: Sender<SystemEvent>,
    receiver: Receiver<SystemEvent>,
}

impl ChannelSystemEvents {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    pub fn sender(&self) -> Sender<SystemEvent> {
        self.sender.clone()
    }
}

impl Default for ChannelSystemEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemEventSource for ChannelSystemEvents {
    fn start(&mut self) -> Result<Receiver<SystemEvent>, CollectorError> {
        Ok(self.receiver.clone())
    }

    fn stop(&mut self) {}
}
