//! Focus tracker: frontmost-application sampling, dwell and switch statistics.
//!
//! The tracker is driven from the coordinating thread. It samples the
//! frontmost app whenever the source reports an activation and on a one
//! second fallback poll, so a missed notification costs at most a second of
//! dwell attribution.

use crate::clock::local_naive;
use crate::collector::FrontmostAppSource;
use crate::config::{category_for, Config};
use crate::core::quantum::QuantumClassification;
use crate::transparency::{LogLevel, Metadata, SharedEventLog};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

const COMPONENT: &str = "focus";

/// Fallback polling interval.
pub const POLL_INTERVAL_MS: i64 = 1_000;

const MAX_HOUR_BUCKETS: usize = 96;
const MAX_DAY_BUCKETS: usize = 8;
const HOUR_BUCKET_RETENTION_HOURS: i64 = 72;
const DAY_BUCKET_RETENTION_DAYS: i64 = 7;

/// One observation of the frontmost application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusSample {
    pub timestamp: DateTime<Utc>,
    pub app_name: String,
    pub bundle_id: String,
    pub category: String,
}

/// Focus statistics for one quantum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusQuantumAggregate {
    pub primary_app_name: Option<String>,
    pub primary_bundle_id: Option<String>,
    pub primary_category: Option<String>,
    pub primary_app_dwell_ms: u64,

    pub app_switch_count: u32,
    pub category_switch_count: u32,
    pub switches_this_hour: u32,
    pub switches_today: u32,

    pub focus_mode_streak: u32,
    pub focus_mode_flag: bool,
    pub anomaly_switching_flag: bool,
}

/// Tracks which application holds focus and for how long.
pub struct FocusTracker {
    source: Box<dyn FrontmostAppSource>,
    log: SharedEventLog,
    running: bool,
    categories: BTreeMap<String, String>,
    time_zone: Option<Tz>,
    on_sample: Option<Sender<FocusSample>>,
    last_poll: Option<DateTime<Utc>>,

    quantum_start: Option<DateTime<Utc>>,
    last_sample: Option<FocusSample>,
    /// Insertion ordered, so ties for primary go to the app seen first
    dwell_ms: Vec<(String, u64)>,
    last_app_name: HashMap<String, String>,
    app_switch_count: u32,
    category_switch_count: u32,

    switches_by_hour: HashMap<NaiveDateTime, u32>,
    switches_by_day: HashMap<NaiveDate, u32>,

    streak_bundle_id: Option<String>,
    streak_count: u32,
}

impl FocusTracker {
    pub fn new(source: Box<dyn FrontmostAppSource>, log: SharedEventLog) -> Self {
        Self {
            source,
            log,
            running: false,
            categories: BTreeMap::new(),
            time_zone: None,
            on_sample: None,
            last_poll: None,
            quantum_start: None,
            last_sample: None,
            dwell_ms: Vec::new(),
            last_app_name: HashMap::new(),
            app_switch_count: 0,
            category_switch_count: 0,
            switches_by_hour: HashMap::new(),
            switches_by_day: HashMap::new(),
            streak_bundle_id: None,
            streak_count: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Activation notifications from the source, if it has any.
    pub fn activations(&self) -> Option<Receiver<()>> {
        self.source.activations()
    }

    /// Begin sampling. Every ingested sample is also sent to `on_sample`.
    pub fn start(&mut self, config: &Config, on_sample: Option<Sender<FocusSample>>) {
        if self.running {
            return;
        }
        self.apply_config(config);
        self.on_sample = on_sample;
        self.running = true;
        self.last_poll = None;
        self.log
            .log(LogLevel::Info, COMPONENT, "Focus monitor started", Metadata::new());
    }

    /// Stop sampling and forget all per-quantum state and the focus streak.
    ///
    /// Hour and day switch buckets survive a stop.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.on_sample = None;
        self.last_poll = None;
        self.clear_quantum_state();
        self.streak_bundle_id = None;
        self.streak_count = 0;
        self.log
            .log(LogLevel::Info, COMPONENT, "Focus monitor stopped", Metadata::new());
    }

    /// Clear the accumulators and take the quantum's opening sample.
    ///
    /// The opening sample never counts as a switch.
    pub fn reset_for_new_quantum(&mut self, started_at: DateTime<Utc>, config: &Config) {
        self.apply_config(config);
        self.clear_quantum_state();
        self.quantum_start = Some(started_at);
        self.sample_frontmost(started_at, false);
    }

    /// Sample the frontmost app now.
    pub fn poll(&mut self, now: DateTime<Utc>) {
        if !self.running {
            return;
        }
        self.sample_frontmost(now, true);
    }

    /// Fallback poll, at most once per [`POLL_INTERVAL_MS`].
    pub fn poll_if_due(&mut self, now: DateTime<Utc>) {
        let due = match self.last_poll {
            Some(last) => now - last >= Duration::milliseconds(POLL_INTERVAL_MS),
            None => true,
        };
        if due {
            self.poll(now);
        }
    }

    /// Close the quantum and build its focus aggregate.
    ///
    /// Returns `None` for a dropped quantum. Per-quantum state is cleared in
    /// every case.
    pub fn finalize_quantum(
        &mut self,
        ended_at: DateTime<Utc>,
        config: &Config,
        classification: QuantumClassification,
    ) -> Option<FocusQuantumAggregate> {
        self.apply_config(config);
        self.close_dwell(ended_at);

        let mut primary: Option<(&str, u64)> = None;
        for (bundle_id, dwell) in &self.dwell_ms {
            if primary.map_or(true, |(_, best)| *dwell > best) {
                primary = Some((bundle_id.as_str(), *dwell));
            }
        }
        let primary_bundle_id = primary.map(|(id, _)| id.to_string());
        let primary_app_dwell_ms = primary.map_or(0, |(_, dwell)| dwell);
        let primary_app_name = primary_bundle_id
            .as_ref()
            .and_then(|id| self.last_app_name.get(id).cloned());
        let primary_category = primary_bundle_id
            .as_ref()
            .map(|id| category_for(&self.categories, id));

        let local = local_naive(ended_at, self.time_zone);
        let switches_this_hour = self
            .switches_by_hour
            .get(&hour_key(local))
            .copied()
            .unwrap_or(0);
        let switches_today = self
            .switches_by_day
            .get(&local.date())
            .copied()
            .unwrap_or(0);

        let thresholds = &config.anomalies;
        let anomaly_switching_flag = self.app_switch_count > thresholds.switching_per_quantum
            || switches_this_hour > thresholds.switching_per_hour;

        let degenerate = classification.is_dropped
            || classification.is_partial
            || classification.is_too_short
            || primary_bundle_id.is_none();
        let focus_mode_flag = if degenerate {
            self.streak_bundle_id = None;
            self.streak_count = 0;
            false
        } else {
            if self.streak_bundle_id == primary_bundle_id {
                self.streak_count += 1;
            } else {
                self.streak_bundle_id = primary_bundle_id.clone();
                self.streak_count = 1;
            }
            self.streak_count >= thresholds.focus_mode_min_consecutive_quanta
        };

        let aggregate = FocusQuantumAggregate {
            primary_app_name,
            primary_bundle_id,
            primary_category,
            primary_app_dwell_ms,
            app_switch_count: self.app_switch_count,
            category_switch_count: self.category_switch_count,
            switches_this_hour,
            switches_today,
            focus_mode_streak: self.streak_count,
            focus_mode_flag,
            anomaly_switching_flag,
        };

        self.clear_quantum_state();

        if classification.is_dropped {
            None
        } else {
            Some(aggregate)
        }
    }

    fn apply_config(&mut self, config: &Config) {
        self.categories = config.categories.clone();
        self.time_zone = config.time_zone();
    }

    fn clear_quantum_state(&mut self) {
        self.quantum_start = None;
        self.last_sample = None;
        self.dwell_ms.clear();
        self.last_app_name.clear();
        self.app_switch_count = 0;
        self.category_switch_count = 0;
    }

    fn sample_frontmost(&mut self, now: DateTime<Utc>, allow_switch_counting: bool) {
        self.last_poll = Some(now);
        let Some(app) = self.source.frontmost() else {
            return;
        };
        if app.bundle_id.is_empty() {
            return;
        }
        let app_name = if app.name.is_empty() {
            app.bundle_id.clone()
        } else {
            app.name
        };
        let sample = FocusSample {
            timestamp: now,
            category: category_for(&self.categories, &app.bundle_id),
            app_name,
            bundle_id: app.bundle_id,
        };
        self.ingest(sample, allow_switch_counting);
    }

    fn ingest(&mut self, sample: FocusSample, allow_switch_counting: bool) {
        if self.quantum_start.is_none() {
            self.emit(sample);
            return;
        }

        let Some(previous) = self.last_sample.take() else {
            self.last_app_name
                .insert(sample.bundle_id.clone(), sample.app_name.clone());
            self.last_sample = Some(sample.clone());
            self.emit(sample);
            return;
        };

        if previous.bundle_id == sample.bundle_id {
            self.last_sample = Some(previous);
            return;
        }

        add_dwell(&mut self.dwell_ms, &previous, sample.timestamp);

        if allow_switch_counting {
            self.app_switch_count += 1;
            if previous.category != sample.category {
                self.category_switch_count += 1;
            }
            self.increment_switch_buckets(sample.timestamp);
        }

        self.last_app_name
            .insert(sample.bundle_id.clone(), sample.app_name.clone());
        self.last_sample = Some(sample.clone());
        self.emit(sample);
    }

    fn emit(&self, sample: FocusSample) {
        if let Some(sender) = &self.on_sample {
            let _ = sender.try_send(sample);
        }
    }

    fn close_dwell(&mut self, until: DateTime<Utc>) {
        if let Some(last) = &self.last_sample {
            add_dwell(&mut self.dwell_ms, last, until);
        }
    }

    fn increment_switch_buckets(&mut self, at: DateTime<Utc>) {
        let local = local_naive(at, self.time_zone);
        *self.switches_by_hour.entry(hour_key(local)).or_insert(0) += 1;
        *self.switches_by_day.entry(local.date()).or_insert(0) += 1;

        if self.switches_by_hour.len() > MAX_HOUR_BUCKETS {
            let cutoff = local - Duration::hours(HOUR_BUCKET_RETENTION_HOURS);
            self.switches_by_hour.retain(|hour, _| *hour >= cutoff);
        }
        if self.switches_by_day.len() > MAX_DAY_BUCKETS {
            let cutoff = local - Duration::days(DAY_BUCKET_RETENTION_DAYS);
            self.switches_by_day
                .retain(|day, _| day.and_time(NaiveTime::MIN) >= cutoff);
        }
    }

    /// Number of live hourly switch buckets.
    pub fn hour_bucket_count(&self) -> usize {
        self.switches_by_hour.len()
    }

    /// Number of live daily switch buckets.
    pub fn day_bucket_count(&self) -> usize {
        self.switches_by_day.len()
    }
}

fn add_dwell(dwell_ms: &mut Vec<(String, u64)>, from: &FocusSample, until: DateTime<Utc>) {
    let ms = (until - from.timestamp).num_milliseconds().max(0) as u64;
    match dwell_ms.iter_mut().find(|(id, _)| *id == from.bundle_id) {
        Some((_, total)) => *total += ms,
        None => dwell_ms.push((from.bundle_id.clone(), ms)),
    }
}

fn hour_key(local: NaiveDateTime) -> NaiveDateTime {
    local
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::scripted::ScriptedFrontmostApp;
    use crate::core::quantum::EndReason;
    use crate::transparency::MemoryLog;
    use chrono::TimeZone;
    use crossbeam_channel::unbounded;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn config() -> Config {
        Config {
            timezone: Some("UTC".to_string()),
            ..Config::default()
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 3, 10, 0, 0).unwrap()
    }

    fn complete() -> QuantumClassification {
        QuantumClassification::classify(EndReason::QuantumComplete, 180, &config().quantum)
    }

    fn tracker() -> (FocusTracker, ScriptedFrontmostApp) {
        let app = ScriptedFrontmostApp::new();
        let mut tracker = FocusTracker::new(Box::new(app.clone()), Arc::new(MemoryLog::new()));
        tracker.start(&config(), None);
        (tracker, app)
    }

    #[test]
    fn test_two_apps_two_seconds_apart() {
        let (mut tracker, app) = tracker();
        let config = config();

        app.set_app("com.a", "A");
        tracker.reset_for_new_quantum(t0(), &config);
        app.set_app("com.b", "B");
        tracker.poll(t0() + Duration::milliseconds(2000));

        let aggregate = tracker
            .finalize_quantum(t0() + Duration::milliseconds(2000), &config, complete())
            .unwrap();
        assert_eq!(aggregate.primary_bundle_id.as_deref(), Some("com.a"));
        assert_eq!(aggregate.primary_app_dwell_ms, 2000);
        assert_eq!(aggregate.app_switch_count, 1);
    }

    #[test]
    fn test_opening_sample_is_not_a_switch() {
        let (mut tracker, app) = tracker();
        let config = config();

        app.set_app("com.a", "A");
        tracker.reset_for_new_quantum(t0(), &config);
        tracker.poll(t0() + Duration::seconds(1));
        tracker.poll(t0() + Duration::seconds(2));

        let aggregate = tracker
            .finalize_quantum(t0() + Duration::seconds(180), &config, complete())
            .unwrap();
        assert_eq!(aggregate.app_switch_count, 0);
        assert_eq!(aggregate.switches_this_hour, 0);
        assert_eq!(aggregate.primary_app_dwell_ms, 180_000);
        assert_eq!(aggregate.primary_app_name.as_deref(), Some("A"));
    }

    #[test]
    fn test_dwell_sums_to_elapsed() {
        let (mut tracker, app) = tracker();
        let config = config();

        app.set_app("com.a", "A");
        tracker.reset_for_new_quantum(t0(), &config);
        let script = [
            (1_250, "com.b"),
            (4_900, "com.c"),
            (5_001, "com.a"),
            (77_777, "com.b"),
            (120_000, "com.a"),
        ];
        for (at_ms, id) in script {
            app.set_app(id, id);
            tracker.poll(t0() + Duration::milliseconds(at_ms));
        }

        let end = t0() + Duration::seconds(180);
        let before_close: u64 = 180_000;
        tracker.close_dwell(end);
        let total: u64 = tracker.dwell_ms.iter().map(|(_, ms)| ms).sum();
        assert_eq!(total, before_close);
        assert_eq!(tracker.app_switch_count, 5);
    }

    #[test]
    fn test_category_switches_only_on_category_change() {
        let (mut tracker, app) = tracker();
        let config = config();

        app.set_app("com.google.Chrome", "Chrome");
        tracker.reset_for_new_quantum(t0(), &config);
        app.set_app("com.apple.Safari", "Safari");
        tracker.poll(t0() + Duration::seconds(10));
        app.set_app("com.microsoft.VSCode", "Code");
        tracker.poll(t0() + Duration::seconds(20));

        let aggregate = tracker
            .finalize_quantum(t0() + Duration::seconds(180), &config, complete())
            .unwrap();
        assert_eq!(aggregate.app_switch_count, 2);
        assert_eq!(aggregate.category_switch_count, 1);
        assert_eq!(aggregate.primary_category.as_deref(), Some("IDE"));
    }

    #[test]
    fn test_focus_streak_builds_and_resets() {
        let (mut tracker, app) = tracker();
        let config = config();
        app.set_app("com.a", "A");

        let mut start = t0();
        let mut run_quantum = |tracker: &mut FocusTracker, class: QuantumClassification| {
            tracker.reset_for_new_quantum(start, &config);
            start += Duration::seconds(180);
            tracker.finalize_quantum(start, &config, class)
        };

        let first = run_quantum(&mut tracker, complete()).unwrap();
        assert_eq!(first.focus_mode_streak, 1);
        assert!(!first.focus_mode_flag);

        let second = run_quantum(&mut tracker, complete()).unwrap();
        assert_eq!(second.focus_mode_streak, 2);
        assert!(second.focus_mode_flag);

        let partial = QuantumClassification::classify(EndReason::UserStop, 150, &config.quantum);
        let third = run_quantum(&mut tracker, partial).unwrap();
        assert_eq!(third.focus_mode_streak, 0);
        assert!(!third.focus_mode_flag);

        let fourth = run_quantum(&mut tracker, complete()).unwrap();
        assert_eq!(fourth.focus_mode_streak, 1);

        app.set_app("com.b", "B");
        let fifth = run_quantum(&mut tracker, complete()).unwrap();
        assert_eq!(fifth.focus_mode_streak, 1);
        assert_eq!(fifth.primary_bundle_id.as_deref(), Some("com.b"));
    }

    #[test]
    fn test_no_primary_resets_streak_to_zero() {
        let (mut tracker, _app) = tracker();
        let config = config();

        tracker.reset_for_new_quantum(t0(), &config);
        let aggregate = tracker
            .finalize_quantum(t0() + Duration::seconds(180), &config, complete())
            .unwrap();
        assert_eq!(aggregate.primary_bundle_id, None);
        assert_eq!(aggregate.primary_app_dwell_ms, 0);
        assert_eq!(aggregate.focus_mode_streak, 0);
    }

    #[test]
    fn test_switching_anomaly_per_quantum() {
        let (mut tracker, app) = tracker();
        let config = config();

        app.set_app("com.a", "A");
        tracker.reset_for_new_quantum(t0(), &config);
        for i in 1..=9 {
            let id = if i % 2 == 0 { "com.a" } else { "com.b" };
            app.set_app(id, id);
            tracker.poll(t0() + Duration::seconds(i));
        }

        let aggregate = tracker
            .finalize_quantum(t0() + Duration::seconds(180), &config, complete())
            .unwrap();
        assert_eq!(aggregate.app_switch_count, 9);
        assert!(aggregate.anomaly_switching_flag);
    }

    #[test]
    fn test_switching_anomaly_per_hour() {
        let (mut tracker, app) = tracker();
        let mut config = config();
        config.anomalies.switching_per_hour = 10;

        app.set_app("com.a", "A");
        let mut start = t0();
        let mut last = None;
        for _ in 0..3 {
            tracker.reset_for_new_quantum(start, &config);
            for i in 1..=4 {
                let id = if i % 2 == 0 { "com.a" } else { "com.b" };
                app.set_app(id, id);
                tracker.poll(start + Duration::seconds(i));
            }
            start += Duration::seconds(180);
            last = tracker.finalize_quantum(start, &config, complete());
        }

        let aggregate = last.unwrap();
        assert_eq!(aggregate.app_switch_count, 4);
        assert_eq!(aggregate.switches_this_hour, 12);
        assert_eq!(aggregate.switches_today, 12);
        assert!(aggregate.anomaly_switching_flag);
    }

    #[test]
    fn test_equal_dwell_prefers_first_seen() {
        let (mut tracker, app) = tracker();
        let config = config();

        app.set_app("com.a", "A");
        tracker.reset_for_new_quantum(t0(), &config);
        app.set_app("com.b", "B");
        tracker.poll(t0() + Duration::seconds(90));

        let aggregate = tracker
            .finalize_quantum(t0() + Duration::seconds(180), &config, complete())
            .unwrap();
        assert_eq!(aggregate.primary_bundle_id.as_deref(), Some("com.a"));
        assert_eq!(aggregate.primary_app_dwell_ms, 90_000);
    }

    #[test]
    fn test_dropped_quantum_yields_none_and_clears_state() {
        let (mut tracker, app) = tracker();
        let config = config();

        app.set_app("com.a", "A");
        tracker.reset_for_new_quantum(t0(), &config);
        app.set_app("com.b", "B");
        tracker.poll(t0() + Duration::seconds(5));

        let dropped = QuantumClassification::classify(EndReason::UserStop, 25, &config.quantum);
        assert!(tracker
            .finalize_quantum(t0() + Duration::seconds(25), &config, dropped)
            .is_none());
        assert!(tracker.dwell_ms.is_empty());
        assert!(tracker.last_sample.is_none());
        assert_eq!(tracker.app_switch_count, 0);
    }

    #[test]
    fn test_hour_buckets_are_pruned() {
        let (mut tracker, app) = tracker();
        let config = config();

        app.set_app("com.a", "A");
        tracker.reset_for_new_quantum(t0(), &config);
        for hour in 1..=97 {
            let id = if hour % 2 == 0 { "com.a" } else { "com.b" };
            app.set_app(id, id);
            tracker.poll(t0() + Duration::hours(hour));
        }

        // 97 buckets trigger a prune that keeps the trailing 72 hours.
        assert_eq!(tracker.hour_bucket_count(), 73);
        assert!(tracker.day_bucket_count() <= MAX_DAY_BUCKETS);
    }

    #[test]
    fn test_day_buckets_are_pruned() {
        let (mut tracker, app) = tracker();
        let config = config();
        let day = |n: i64| (t0() + Duration::days(n)).date_naive();

        app.set_app("com.a", "A");
        tracker.reset_for_new_quantum(t0(), &config);
        for n in 1..=20 {
            let id = if n % 2 == 0 { "com.a" } else { "com.b" };
            app.set_app(id, id);
            tracker.poll(t0() + Duration::days(n));
            assert!(tracker.day_bucket_count() <= MAX_DAY_BUCKETS);
        }

        // The 19th day overflowed to 9 buckets and kept the trailing 7 days.
        assert_eq!(tracker.app_switch_count, 20);
        assert_eq!(tracker.day_bucket_count(), MAX_DAY_BUCKETS);
        assert!(!tracker.switches_by_day.contains_key(&day(1)));
        assert!(!tracker.switches_by_day.contains_key(&day(12)));
        assert!(tracker.switches_by_day.contains_key(&day(13)));
        assert!(tracker.switches_by_day.contains_key(&day(20)));
    }

    #[test]
    fn test_samples_are_forwarded() {
        let app = ScriptedFrontmostApp::new();
        let mut tracker = FocusTracker::new(Box::new(app.clone()), Arc::new(MemoryLog::new()));
        let (tx, rx) = unbounded();
        tracker.start(&config(), Some(tx));

        app.set_app("com.a", "A");
        tracker.poll(t0());
        tracker.reset_for_new_quantum(t0(), &config());
        tracker.poll(t0() + Duration::seconds(1));

        // Outside a quantum every sample is forwarded; inside, only changes.
        let received: Vec<FocusSample> = rx.try_iter().collect();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].category, "Other");
    }

    #[test]
    fn test_poll_is_inert_when_stopped() {
        let (mut tracker, app) = tracker();
        tracker.stop();
        app.set_app("com.a", "A");
        tracker.poll(t0());
        assert!(tracker.last_sample.is_none());
        assert!(!tracker.is_running());
    }

    #[test]
    fn test_poll_if_due_respects_interval() {
        let (mut tracker, app) = tracker();
        let config = config();
        app.set_app("com.a", "A");
        tracker.reset_for_new_quantum(t0(), &config);

        app.set_app("com.b", "B");
        tracker.poll_if_due(t0() + Duration::milliseconds(400));
        assert_eq!(tracker.app_switch_count, 0);
        tracker.poll_if_due(t0() + Duration::milliseconds(1000));
        assert_eq!(tracker.app_switch_count, 1);
    }
}
