//! Polled session state turned into system events.
//!
//! Lock and display-sleep state are sampled on a timer and every change is
//! reported as a [`SystemEvent`]. A machine sleep cannot be seen before it
//! happens; it shows up afterwards as a wall-clock jump the monotonic clock
//! did not see, and is reported as [`SystemEvent::DidWake`].

use crate::collector::types::SystemEvent;
use crate::collector::SystemEventSource;
use crate::error::CollectorError;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

/// Default sampling interval.
pub const SESSION_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Wall-clock time beyond the monotonic time that counts as a sleep.
const SLEEP_GAP: Duration = Duration::from_secs(5);

/// One reading of the session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub screen_locked: bool,
    pub screens_asleep: bool,
}

/// Reads the current session state; `None` when it cannot be determined.
pub trait SessionProbe: Send + Sync + 'static {
    fn snapshot(&self) -> Option<SessionSnapshot>;
}

/// Events for the change from `previous` to `current`. Downward changes
/// come first, then wake-ups.
pub fn session_transitions(previous: SessionSnapshot, current: SessionSnapshot, slept: bool) -> Vec<SystemEvent> {
    let mut events = Vec::new();
    if !previous.screens_asleep && current.screens_asleep {
        events.push(SystemEvent::ScreensDidSleep);
    }
    if !previous.screen_locked && current.screen_locked {
        events.push(SystemEvent::ScreenLocked);
    }
    if slept {
        events.push(SystemEvent::DidWake);
    }
    if previous.screens_asleep && !current.screens_asleep {
        events.push(SystemEvent::ScreensDidWake);
    }
    if previous.screen_locked && !current.screen_locked {
        events.push(SystemEvent::ScreenUnlocked);
    }
    events
}

/// Whether the gap between two samples contains a machine sleep.
pub fn slept_between(wall_elapsed: Duration, monotonic_elapsed: Duration) -> bool {
    wall_elapsed.saturating_sub(monotonic_elapsed) >= SLEEP_GAP
}

/// A [`SystemEventSource`] that samples a [`SessionProbe`] on its own thread.
pub struct PollingSystemEvents<P: SessionProbe> {
    probe: Arc<P>,
    interval: Duration,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl<P: SessionProbe> PollingSystemEvents<P> {
    pub fn new(probe: P, interval: Duration) -> Self {
        Self {
            probe: Arc::new(probe),
            interval,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }
}

impl<P: SessionProbe + Default> Default for PollingSystemEvents<P> {
    fn default() -> Self {
        Self::new(P::default(), SESSION_POLL_INTERVAL)
    }
}

impl<P: SessionProbe> SystemEventSource for PollingSystemEvents<P> {
    fn start(&mut self) -> Result<Receiver<SystemEvent>, CollectorError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CollectorError::AlreadyRunning);
        }
        self.running.store(true, Ordering::SeqCst);

        let (sender, receiver) = unbounded();
        let probe = self.probe.clone();
        let running = self.running.clone();
        let interval = self.interval;
        let baseline = self.probe.snapshot().unwrap_or_default();

        let handle = thread::Builder::new()
            .name("session-monitor".to_string())
            .spawn(move || poll_loop(probe.as_ref(), baseline, interval, &running, &sender))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                CollectorError::Unavailable(format!("session monitor thread: {e}"))
            })?;

        self.thread_handle = Some(handle);
        Ok(receiver)
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl<P: SessionProbe> Drop for PollingSystemEvents<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_loop<P: SessionProbe + ?Sized>(
    probe: &P,
    baseline: SessionSnapshot,
    interval: Duration,
    running: &AtomicBool,
    sender: &Sender<SystemEvent>,
) {
    let mut previous = baseline;
    let mut last_wall = SystemTime::now();
    let mut last_mono = Instant::now();

    while running.load(Ordering::SeqCst) {
        thread::sleep(interval);

        let wall_now = SystemTime::now();
        let mono_now = Instant::now();
        let wall_elapsed = wall_now.duration_since(last_wall).unwrap_or_default();
        let slept = slept_between(wall_elapsed, mono_now.duration_since(last_mono));
        last_wall = wall_now;
        last_mono = mono_now;

        let Some(current) = probe.snapshot() else {
            continue;
        };
        for event in session_transitions(previous, current, slept) {
            tracing::debug!(event = event.as_str(), "session change");
            if sender.send(event).is_err() {
                return;
            }
        }
        previous = current;
    }
}
