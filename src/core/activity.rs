//! Activity sampler: per-quantum input counters and the activity score.
//!
//! Counters are written from the input pump thread and read by the
//! coordinating thread, so every access goes through one mutex.

use crate::collector::{InputEvent, InputEventSource, Position};
use crate::config::ActivityConfig;
use crate::transparency::{LogLevel, Metadata, SharedEventLog, SharedTransparencyLog};
use crossbeam_channel::RecvTimeoutError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const COMPONENT: &str = "activity";

/// Raw per-quantum counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityCounts {
    pub keypress_count: u64,
    pub click_count: u64,
    pub scroll_count: u64,
    /// Cumulative pointer travel in pixels
    pub mouse_distance_px: f64,
}

impl ActivityCounts {
    pub fn has_any_events(&self) -> bool {
        self.keypress_count > 0
            || self.click_count > 0
            || self.scroll_count > 0
            || self.mouse_distance_px > 0.0
    }
}

/// Derived activity summary for one quantum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActivityAggregate {
    pub counts: ActivityCounts,
    /// Weighted, normalised score in 0..=100
    pub activity_percent: u32,
    pub is_idle: bool,
    pub is_low_activity: bool,
}

impl ActivityAggregate {
    pub fn from_counts(counts: ActivityCounts, config: &ActivityConfig) -> Self {
        let activity_percent = activity_score(&counts, config);
        Self {
            counts,
            activity_percent,
            is_idle: config.inactive_when_no_events && !counts.has_any_events(),
            is_low_activity: activity_percent < config.low_activity_threshold,
        }
    }
}

fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        return 0.0;
    }
    x.clamp(0.0, 1.0)
}

fn norm(value: f64, max: u32) -> f64 {
    if max > 0 {
        clamp01(value / f64::from(max))
    } else {
        0.0
    }
}

/// Weighted activity score in 0..=100.
pub fn activity_score(counts: &ActivityCounts, config: &ActivityConfig) -> u32 {
    let w = &config.weights;
    let weighted = norm(counts.keypress_count as f64, config.k_max) * w.keypress
        + norm(counts.click_count as f64, config.c_max) * w.click
        + norm(counts.scroll_count as f64, config.s_max) * w.scroll
        + norm(counts.mouse_distance_px, config.m_max) * w.mouse_distance;

    (clamp01(weighted) * 100.0).round() as u32
}

#[derive(Debug, Default)]
struct CounterState {
    counts: ActivityCounts,
    last_position: Option<Position>,
}

/// Lock-protected counters shared between the producer and the sampler.
#[derive(Debug, Clone, Default)]
pub struct ActivityCounter {
    state: Arc<Mutex<CounterState>>,
}

impl ActivityCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state(&self, f: impl FnOnce(&mut CounterState)) {
        // A poisoned lock still holds plain counters; keep counting.
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard);
    }

    /// Zero the counters and forget the last pointer position.
    pub fn reset(&self) {
        self.with_state(|s| *s = CounterState::default());
    }

    pub fn record_key_down(&self) {
        self.with_state(|s| s.counts.keypress_count += 1);
    }

    pub fn record_click(&self) {
        self.with_state(|s| s.counts.click_count += 1);
    }

    pub fn record_scroll(&self) {
        self.with_state(|s| s.counts.scroll_count += 1);
    }

    /// Travel is only counted from the previous position in this quantum.
    pub fn record_pointer_move(&self, to: Position) {
        self.with_state(|s| {
            if let Some(prev) = s.last_position {
                s.counts.mouse_distance_px += prev.distance_to(&to);
            }
            s.last_position = Some(to);
        });
    }

    pub fn record(&self, event: InputEvent) {
        match event {
            InputEvent::KeyDown => self.record_key_down(),
            InputEvent::Click(_) => self.record_click(),
            InputEvent::Scroll => self.record_scroll(),
            InputEvent::PointerMove(position) => self.record_pointer_move(position),
        }
    }

    pub fn snapshot(&self) -> ActivityCounts {
        let mut counts = ActivityCounts::default();
        self.with_state(|s| counts = s.counts);
        counts
    }
}

/// Counts input events from an [`InputEventSource`] for the current quantum.
pub struct ActivitySampler {
    counter: ActivityCounter,
    source: Box<dyn InputEventSource>,
    pumping: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
    last_start_error: Option<String>,
    log: SharedEventLog,
    stats: Option<SharedTransparencyLog>,
}

impl ActivitySampler {
    pub fn new(source: Box<dyn InputEventSource>, log: SharedEventLog) -> Self {
        Self {
            counter: ActivityCounter::new(),
            source,
            pumping: Arc::new(AtomicBool::new(false)),
            pump: None,
            last_start_error: None,
            log,
            stats: None,
        }
    }

    /// Count every consumed input event in `stats`.
    pub fn with_stats(mut self, stats: SharedTransparencyLog) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Producer handle onto the same counters.
    pub fn counter(&self) -> ActivityCounter {
        self.counter.clone()
    }

    pub fn reset(&self) {
        self.counter.reset();
    }

    pub fn record_key_down(&self) {
        self.counter.record_key_down();
    }

    pub fn record_click(&self) {
        self.counter.record_click();
    }

    pub fn record_scroll(&self) {
        self.counter.record_scroll();
    }

    pub fn record_pointer_move(&self, to: Position) {
        self.counter.record_pointer_move(to);
    }

    pub fn snapshot(&self) -> ActivityCounts {
        self.counter.snapshot()
    }

    pub fn aggregate(&self, config: &ActivityConfig) -> ActivityAggregate {
        ActivityAggregate::from_counts(self.snapshot(), config)
    }

    pub fn is_running(&self) -> bool {
        self.pump.is_some()
    }

    /// Why the last `start` failed, if it did.
    pub fn last_start_error(&self) -> Option<&str> {
        self.last_start_error.as_deref()
    }

    /// Attach to the input source and start counting.
    ///
    /// Returns false when the source is unavailable; the reason is logged and
    /// kept in [`last_start_error`](Self::last_start_error). Counters stay at
    /// zero in that case.
    pub fn start(&mut self) -> bool {
        if self.pump.is_some() {
            return true;
        }

        let receiver = match self.source.start() {
            Ok(receiver) => receiver,
            Err(e) => {
                let message = format!(
                    "Activity monitor unavailable ({e}). Check Input Monitoring permission."
                );
                self.fail_start(message);
                return false;
            }
        };

        self.pumping.store(true, Ordering::SeqCst);
        let pumping = self.pumping.clone();
        let counter = self.counter.clone();
        let stats = self.stats.clone();

        let spawned = thread::Builder::new()
            .name("activity-pump".to_string())
            .spawn(move || {
                while pumping.load(Ordering::SeqCst) {
                    match receiver.recv_timeout(Duration::from_millis(100)) {
                        Ok(event) => {
                            counter.record(event);
                            if let Some(stats) = &stats {
                                stats.record_input_event();
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            });

        match spawned {
            Ok(handle) => {
                self.pump = Some(handle);
                self.last_start_error = None;
                self.log
                    .log(LogLevel::Info, COMPONENT, "Activity monitor started", Metadata::new());
                true
            }
            Err(e) => {
                self.pumping.store(false, Ordering::SeqCst);
                self.source.stop();
                self.fail_start(format!("Activity monitor unavailable (pump thread: {e})"));
                false
            }
        }
    }

    fn fail_start(&mut self, message: String) {
        self.log
            .log(LogLevel::Warning, COMPONENT, &message, Metadata::new());
        self.last_start_error = Some(message);
    }

    /// Detach from the input source. Counters are left as they are.
    pub fn stop(&mut self) {
        let Some(handle) = self.pump.take() else {
            return;
        };
        self.source.stop();
        self.pumping.store(false, Ordering::SeqCst);
        let _ = handle.join();
        self.log
            .log(LogLevel::Info, COMPONENT, "Activity monitor stopped", Metadata::new());
    }
}

impl Drop for ActivitySampler {
    fn drop(&mut self) {
        self.pumping.store(false, Ordering::SeqCst);
        if let Some(handle) = self.pump.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::scripted::ChannelInputSource;
    use crate::collector::MouseButton;
    use crate::transparency::MemoryLog;
    use std::time::Instant;

    fn counts(k: u64, c: u64, s: u64, m: f64) -> ActivityCounts {
        ActivityCounts {
            keypress_count: k,
            click_count: c,
            scroll_count: s,
            mouse_distance_px: m,
        }
    }

    #[test]
    fn test_six_keypresses_score_two() {
        let config = ActivityConfig::default();
        // 0.4 * 6/150 = 0.016 -> 1.6 -> 2
        assert_eq!(activity_score(&counts(6, 0, 0, 0.0), &config), 2);
    }

    #[test]
    fn test_score_saturates_at_hundred() {
        let config = ActivityConfig::default();
        let score = activity_score(&counts(10_000, 10_000, 10_000, 1e9), &config);
        assert_eq!(score, 100);
        assert_eq!(activity_score(&ActivityCounts::default(), &config), 0);
    }

    #[test]
    fn test_zero_max_contributes_nothing() {
        let mut config = ActivityConfig::default();
        config.k_max = 0;
        assert_eq!(activity_score(&counts(500, 0, 0, 0.0), &config), 0);
    }

    #[test]
    fn test_score_monotonic_in_each_input() {
        let config = ActivityConfig::default();
        let mut previous = 0;
        for k in 0..200 {
            let score = activity_score(&counts(k, 10, 5, 800.0), &config);
            assert!(score >= previous);
            assert!(score <= 100);
            previous = score;
        }

        let mut previous = 0;
        for step in 0..100 {
            let score = activity_score(&counts(3, 1, 1, f64::from(step) * 100.0), &config);
            assert!(score >= previous);
            previous = score;
        }
    }

    #[test]
    fn test_idle_only_without_any_event() {
        let config = ActivityConfig::default();
        let idle = ActivityAggregate::from_counts(ActivityCounts::default(), &config);
        assert!(idle.is_idle);
        assert!(idle.is_low_activity);

        let scrolled = ActivityAggregate::from_counts(counts(0, 0, 1, 0.0), &config);
        assert!(!scrolled.is_idle);

        let mut lenient = config.clone();
        lenient.inactive_when_no_events = false;
        assert!(!ActivityAggregate::from_counts(ActivityCounts::default(), &lenient).is_idle);
    }

    #[test]
    fn test_low_activity_threshold() {
        let config = ActivityConfig::default();
        // 0.4 * 75/150 = 0.2 -> 20, not below the threshold of 20
        let aggregate = ActivityAggregate::from_counts(counts(75, 0, 0, 0.0), &config);
        assert_eq!(aggregate.activity_percent, 20);
        assert!(!aggregate.is_low_activity);
    }

    #[test]
    fn test_pointer_distance_needs_consecutive_positions() {
        let counter = ActivityCounter::new();
        counter.record_pointer_move(Position::new(100.0, 100.0));
        assert_eq!(counter.snapshot().mouse_distance_px, 0.0);

        counter.record_pointer_move(Position::new(103.0, 104.0));
        assert!((counter.snapshot().mouse_distance_px - 5.0).abs() < 1e-9);

        // A reset starts a new quantum: the first position adds nothing.
        counter.reset();
        counter.record_pointer_move(Position::new(500.0, 500.0));
        assert_eq!(counter.snapshot().mouse_distance_px, 0.0);
    }

    #[test]
    fn test_record_dispatch() {
        let counter = ActivityCounter::new();
        counter.record(InputEvent::KeyDown);
        counter.record(InputEvent::Click(MouseButton::Right));
        counter.record(InputEvent::Scroll);
        counter.record(InputEvent::Scroll);

        let snapshot = counter.snapshot();
        assert_eq!(snapshot.keypress_count, 1);
        assert_eq!(snapshot.click_count, 1);
        assert_eq!(snapshot.scroll_count, 2);
    }

    #[test]
    fn test_sampler_pumps_source_events() {
        let source = ChannelInputSource::new();
        let sender = source.sender();
        let log = Arc::new(MemoryLog::new());
        let mut sampler = ActivitySampler::new(Box::new(source), log.clone());

        assert!(sampler.start());
        for _ in 0..6 {
            sender.send(InputEvent::KeyDown).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(2);
        while sampler.snapshot().keypress_count < 6 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(sampler.snapshot().keypress_count, 6);
        assert_eq!(sampler.aggregate(&ActivityConfig::default()).activity_percent, 2);

        sampler.stop();
        assert!(!sampler.is_running());
        assert_eq!(log.records_for("activity").len(), 2);
    }

    #[test]
    fn test_sampler_start_failure_is_reported_not_raised() {
        let log = Arc::new(MemoryLog::new());
        let mut sampler =
            ActivitySampler::new(Box::new(ChannelInputSource::unavailable("no tap")), log.clone());

        assert!(!sampler.start());
        assert!(sampler.last_start_error().unwrap().contains("no tap"));
        assert_eq!(log.records()[0].level, LogLevel::Warning);

        // Producer calls still work; counts are simply never fed by the source.
        assert!(sampler.aggregate(&ActivityConfig::default()).is_idle);
    }
}
