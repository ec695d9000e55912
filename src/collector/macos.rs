//! macOS sources: CGEvent tap for input, CGDisplay for screen images, the
//! window list for the frontmost app and the session dictionary for lock
//! state.
//!
//! The event tap requires Input Monitoring permission; display capture
//! returns black frames without Screen Recording permission.

use crate::collector::session::{PollingSystemEvents, SessionProbe, SessionSnapshot};
use crate::collector::types::{AppIdentity, InputEvent, MouseButton, Position, ScreenId};
use crate::collector::{FrontmostAppSource, InputEventSource, ScreenCaptureSource};
use crate::error::CollectorError;
use core_foundation::array::CFArray;
use core_foundation::base::TCFType;
use core_foundation::boolean::{CFBoolean, CFBooleanRef};
use core_foundation::dictionary::{CFDictionary, CFDictionaryRef};
use core_foundation::number::{CFNumber, CFNumberRef};
use core_foundation::runloop::{kCFRunLoopCommonModes, CFRunLoop};
use core_foundation::string::{CFString, CFStringRef};
use core_graphics::display::CGDisplay;
use core_graphics::event::{
    CGEvent, CGEventTap, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement, CGEventType,
    CallbackResult,
};
use core_graphics::window::{
    kCGNullWindowID, kCGWindowListExcludeDesktopElements, kCGWindowListOptionOnScreenOnly,
    CGWindowListCopyWindowInfo,
};
use crossbeam_channel::{bounded, Receiver, Sender};
use image::RgbaImage;
use objc::runtime::{Class, Object};
use objc::{msg_send, sel, sel_impl};
use std::ffi::{c_void, CStr};
use std::os::raw::c_char;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// The macOS input collector using a listen-only CGEvent tap.
pub struct MacOSCollector {
    sender: Sender<InputEvent>,
    receiver: Receiver<InputEvent>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl MacOSCollector {
    pub fn new() -> Self {
        // Bounded so a stalled consumer cannot grow memory without limit
        let (sender, receiver) = bounded(10_000);

        Self {
            sender,
            receiver,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }
}

impl Default for MacOSCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl InputEventSource for MacOSCollector {
    /// Start the tap on its own run-loop thread.
    ///
    /// Permission problems only surface once the tap is created, so a quick
    /// probe runs first to report them synchronously.
    fn start(&mut self) -> Result<Receiver<InputEvent>, CollectorError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CollectorError::AlreadyRunning);
        }
        if !check_permission() {
            return Err(CollectorError::PermissionDenied);
        }

        self.running.store(true, Ordering::SeqCst);

        let sender = self.sender.clone();
        let running = self.running.clone();

        let handle = thread::spawn(move || {
            if let Err(e) = run_event_loop(sender, running.clone()) {
                tracing::warn!("input event loop error: {e}");
            }
            running.store(false, Ordering::SeqCst);
        });

        self.thread_handle = Some(handle);
        Ok(self.receiver.clone())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for MacOSCollector {
    fn drop(&mut self) {
        self.stop();
    }
}

fn event_types() -> Vec<CGEventType> {
    vec![
        CGEventType::KeyDown,
        CGEventType::LeftMouseDown,
        CGEventType::RightMouseDown,
        CGEventType::OtherMouseDown,
        CGEventType::ScrollWheel,
        CGEventType::MouseMoved,
        CGEventType::LeftMouseDragged,
        CGEventType::RightMouseDragged,
        CGEventType::OtherMouseDragged,
    ]
}

fn run_event_loop(sender: Sender<InputEvent>, running: Arc<AtomicBool>) -> Result<(), CollectorError> {
    let tap = CGEventTap::new(
        CGEventTapLocation::HID,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        event_types(),
        move |_proxy, event_type, event| {
            if let Some(input) = process_cg_event(event_type, event) {
                // Never block the tap; drop events if the consumer lags
                let _ = sender.try_send(input);
            }
            CallbackResult::Keep
        },
    )
    .map_err(|_| CollectorError::TapCreationFailed)?;

    let source = tap
        .mach_port()
        .create_runloop_source(0)
        .map_err(|_| CollectorError::RunLoopSourceFailed)?;

    let run_loop = CFRunLoop::get_current();
    unsafe {
        run_loop.add_source(&source, kCFRunLoopCommonModes);
    }

    tap.enable();

    while running.load(Ordering::SeqCst) {
        CFRunLoop::run_in_mode(
            unsafe { kCFRunLoopCommonModes },
            std::time::Duration::from_millis(100),
            false,
        );
    }

    Ok(())
}

/// Classify a CGEvent. Key codes are never read.
fn process_cg_event(event_type: CGEventType, event: &CGEvent) -> Option<InputEvent> {
    use core_graphics::event::CGEventType::*;

    match event_type {
        KeyDown => Some(InputEvent::KeyDown),
        LeftMouseDown => Some(InputEvent::Click(MouseButton::Left)),
        RightMouseDown => Some(InputEvent::Click(MouseButton::Right)),
        OtherMouseDown => Some(InputEvent::Click(MouseButton::Other)),
        ScrollWheel => Some(InputEvent::Scroll),
        MouseMoved | LeftMouseDragged | RightMouseDragged | OtherMouseDragged => {
            let location = event.location();
            Some(InputEvent::PointerMove(Position::new(location.x, location.y)))
        }
        _ => None,
    }
}

/// Check whether a listen-only tap can be created (Input Monitoring granted).
pub fn check_permission() -> bool {
    let result = CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        vec![CGEventType::KeyDown],
        |_proxy, _type, _event| CallbackResult::Keep,
    );

    result.is_ok()
}

/// Screen images via `CGDisplayCreateImage`.
#[derive(Debug, Default)]
pub struct MacOSScreenSource;

impl MacOSScreenSource {
    pub fn new() -> Self {
        Self
    }
}

impl ScreenCaptureSource for MacOSScreenSource {
    fn active_screens(&self) -> Vec<ScreenId> {
        CGDisplay::active_displays().unwrap_or_else(|_| vec![CGDisplay::main().id])
    }

    fn primary_screen(&self) -> Option<ScreenId> {
        Some(CGDisplay::main().id)
    }

    fn capture(&self, screen: ScreenId) -> Option<RgbaImage> {
        let image = CGDisplay::new(screen).image()?;
        let width = image.width();
        let height = image.height();
        let bytes_per_row = image.bytes_per_row();
        if image.bits_per_pixel() != 32 || width == 0 || height == 0 {
            return None;
        }

        let data = image.data();
        let bytes = data.bytes();
        let mut rgba = RgbaImage::new(width as u32, height as u32);
        // Display images are BGRA, rows may be padded
        for (y, row) in bytes.chunks(bytes_per_row).take(height).enumerate() {
            for (x, px) in row.chunks_exact(4).take(width).enumerate() {
                rgba.put_pixel(x as u32, y as u32, image::Rgba([px[2], px[1], px[0], 255]));
            }
        }
        Some(rgba)
    }
}

#[link(name = "AppKit", kind = "framework")]
extern "C" {}

#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGSessionCopyCurrentDictionary() -> CFDictionaryRef;
}

type RawDictionary = CFDictionary<*const c_void, *const c_void>;

fn dictionary_value(dict: &RawDictionary, key: &'static str) -> Option<*const c_void> {
    let key = CFString::from_static_string(key);
    dict.find(key.as_CFTypeRef() as *const c_void).map(|value| *value)
}

fn dictionary_i64(dict: &RawDictionary, key: &'static str) -> Option<i64> {
    let value = dictionary_value(dict, key)?;
    unsafe { CFNumber::wrap_under_get_rule(value as CFNumberRef) }.to_i64()
}

fn dictionary_string(dict: &RawDictionary, key: &'static str) -> Option<String> {
    let value = dictionary_value(dict, key)?;
    Some(unsafe { CFString::wrap_under_get_rule(value as CFStringRef) }.to_string())
}

/// Owner pid and name of the front-most normal window.
///
/// The on-screen window list is ordered front to back; layer 0 holds
/// application windows, above it sit menus, the dock and overlays.
fn frontmost_window_owner() -> Option<(i32, String)> {
    let raw = unsafe {
        CGWindowListCopyWindowInfo(
            kCGWindowListOptionOnScreenOnly | kCGWindowListExcludeDesktopElements,
            kCGNullWindowID,
        )
    };
    if raw.is_null() {
        return None;
    }
    let windows: CFArray = unsafe { CFArray::wrap_under_create_rule(raw) };

    for info in windows.get_all_values() {
        if info.is_null() {
            continue;
        }
        let dict: RawDictionary = unsafe { CFDictionary::wrap_under_get_rule(info as CFDictionaryRef) };
        if dictionary_i64(&dict, "kCGWindowLayer") != Some(0) {
            continue;
        }
        let Some(pid) = dictionary_i64(&dict, "kCGWindowOwnerPID") else {
            continue;
        };
        let owner = dictionary_string(&dict, "kCGWindowOwnerName").unwrap_or_default();
        return Some((pid as i32, owner));
    }
    None
}

unsafe fn nsstring_to_string(ns_str: *mut Object) -> Option<String> {
    if ns_str.is_null() {
        return None;
    }
    let chars: *const c_char = msg_send![ns_str, UTF8String];
    if chars.is_null() {
        return None;
    }
    Some(CStr::from_ptr(chars).to_string_lossy().into_owned())
}

/// Bundle identifier and localized name of a running process.
fn running_application(pid: i32) -> Option<(Option<String>, Option<String>)> {
    let class = Class::get("NSRunningApplication")?;
    objc::rc::autoreleasepool(|| unsafe {
        let app: *mut Object = msg_send![class, runningApplicationWithProcessIdentifier: pid];
        if app.is_null() {
            return None;
        }
        let bundle_id: *mut Object = msg_send![app, bundleIdentifier];
        let name: *mut Object = msg_send![app, localizedName];
        Some((nsstring_to_string(bundle_id), nsstring_to_string(name)))
    })
}

/// Frontmost application from the window server.
///
/// Works without an AppKit run loop, so it stays current in a CLI process.
/// Activation notifications are not available; the tracker's 1 s poll
/// picks up changes.
#[derive(Debug, Default)]
pub struct MacOSFrontmostApp;

impl MacOSFrontmostApp {
    pub fn new() -> Self {
        Self
    }
}

impl FrontmostAppSource for MacOSFrontmostApp {
    fn frontmost(&self) -> Option<AppIdentity> {
        let (pid, owner) = frontmost_window_owner()?;
        let (bundle_id, name) = running_application(pid).unwrap_or((None, None));
        let name = name.filter(|n| !n.is_empty()).unwrap_or(owner);
        let bundle_id = bundle_id.filter(|b| !b.is_empty()).unwrap_or_else(|| name.clone());
        if bundle_id.is_empty() {
            return None;
        }
        Some(AppIdentity::new(bundle_id, name))
    }
}

/// Lock state from the login session dictionary, display sleep from the
/// main display.
#[derive(Debug, Default)]
pub struct MacOSSessionProbe;

impl SessionProbe for MacOSSessionProbe {
    fn snapshot(&self) -> Option<SessionSnapshot> {
        let raw = unsafe { CGSessionCopyCurrentDictionary() };
        if raw.is_null() {
            return None;
        }
        let session: RawDictionary = unsafe { CFDictionary::wrap_under_create_rule(raw) };
        let screen_locked = dictionary_value(&session, "CGSSessionScreenIsLocked")
            .map(|value| bool::from(unsafe { CFBoolean::wrap_under_get_rule(value as CFBooleanRef) }))
            .unwrap_or(false);

        Some(SessionSnapshot {
            screen_locked,
            screens_asleep: CGDisplay::main().is_asleep(),
        })
    }
}

/// Sleep, wake, lock and unlock events for macOS.
pub type MacOSSystemEvents = PollingSystemEvents<MacOSSessionProbe>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_creation() {
        let collector = MacOSCollector::new();
        assert!(!collector.is_running());
    }

    #[test]
    fn test_session_probe_reads_without_panicking() {
        // Headless CI runners have no window server session.
        let _ = MacOSSessionProbe.snapshot();
        let _ = MacOSFrontmostApp::new().frontmost();
    }

    #[test]
    fn test_event_type_list() {
        assert_eq!(event_types().len(), 9);
    }
}
