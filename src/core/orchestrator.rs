//! Quantum orchestrator: tracking status, quantum timing and the finalize
//! protocol.
//!
//! The orchestrator is owned by a single coordinating thread. Timers are
//! deadlines compared against the injected [`Clock`](crate::clock::Clock) in
//! [`Orchestrator::tick`], so virtual time in tests drives the same code path
//! as wall-clock time in the agent loop.

use crate::capture::{CaptureDispatcher, CaptureOutcome, ScreenshotCaptureResult};
use crate::clock::SharedClock;
use crate::collector::{FrontmostAppSource, InputEventSource, ScreenCaptureSource};
use crate::config::{Config, ConfigStore};
use crate::core::activity::{ActivityAggregate, ActivityCounter, ActivitySampler};
use crate::core::focus::{FocusSample, FocusTracker};
use crate::core::quantum::{
    elapsed_seconds, EndReason, PauseReason, QuantumClassification, QuantumSummary,
    TrackingContext, TrackingStatus,
};
use crate::error::TransitionError;
use crate::transparency::{LogLevel, Metadata, SharedEventLog, SharedTransparencyLog};
use chrono::{DateTime, Duration, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Arc;
use uuid::Uuid;

const COMPONENT: &str = "quantum";

/// Events published to subscribers.
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    StatusChanged(TrackingStatus),
    /// Every finalized quantum, dropped ones included
    QuantumFinalized(QuantumSummary),
    CaptureCompleted(ScreenshotCaptureResult),
    FocusSampled(FocusSample),
    /// Tracking may resume; the user has to confirm
    ResumePrompt(PauseReason),
}

/// Platform collaborators the orchestrator drives.
pub struct Sources {
    pub input: Box<dyn InputEventSource>,
    pub frontmost: Box<dyn FrontmostAppSource>,
    pub screens: Arc<dyn ScreenCaptureSource>,
}

#[derive(Debug, Clone, Copy)]
struct OpenQuantum {
    sequence: u64,
    id: Uuid,
    started_at: DateTime<Utc>,
    deadline: DateTime<Utc>,
}

pub struct Orchestrator {
    config: Arc<dyn ConfigStore>,
    clock: SharedClock,
    log: SharedEventLog,
    stats: SharedTransparencyLog,
    host: String,

    sampler: ActivitySampler,
    tracker: FocusTracker,
    dispatcher: CaptureDispatcher,
    capture_results: Receiver<CaptureOutcome>,
    focus_tx: Sender<FocusSample>,
    focus_rx: Receiver<FocusSample>,
    subscribers: Vec<Sender<TrackerEvent>>,

    status: TrackingStatus,
    pause_reason: Option<PauseReason>,
    resume_prompt_pending: bool,
    context: TrackingContext,
    quantum: Option<OpenQuantum>,
    next_sequence: u64,
    pending_capture: Option<u64>,
    last_quantum: Option<QuantumSummary>,
    last_capture: Option<ScreenshotCaptureResult>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<dyn ConfigStore>,
        clock: SharedClock,
        log: SharedEventLog,
        stats: SharedTransparencyLog,
        sources: Sources,
    ) -> Self {
        let sampler = ActivitySampler::new(sources.input, log.clone()).with_stats(stats.clone());
        let tracker = FocusTracker::new(sources.frontmost, log.clone());
        let dispatcher = CaptureDispatcher::new(sources.screens, log.clone());
        let capture_results = dispatcher.results();
        let (focus_tx, focus_rx) = unbounded();
        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        Self {
            config,
            clock,
            log,
            stats,
            host,
            sampler,
            tracker,
            dispatcher,
            capture_results,
            focus_tx,
            focus_rx,
            subscribers: Vec::new(),
            status: TrackingStatus::Stopped,
            pause_reason: None,
            resume_prompt_pending: false,
            context: TrackingContext::default(),
            quantum: None,
            next_sequence: 0,
            pending_capture: None,
            last_quantum: None,
            last_capture: None,
        }
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Config {
        self.config.current()
    }

    pub fn status(&self) -> TrackingStatus {
        self.status
    }

    pub fn pause_reason(&self) -> Option<PauseReason> {
        self.pause_reason
    }

    pub fn resume_prompt_pending(&self) -> bool {
        self.resume_prompt_pending
    }

    pub fn context(&self) -> &TrackingContext {
        &self.context
    }

    /// Latest non-dropped quantum.
    pub fn last_quantum(&self) -> Option<&QuantumSummary> {
        self.last_quantum.as_ref()
    }

    pub fn last_capture(&self) -> Option<&ScreenshotCaptureResult> {
        self.last_capture.as_ref()
    }

    pub fn stats(&self) -> &SharedTransparencyLog {
        &self.stats
    }

    /// Start of the open quantum, if one is open.
    pub fn quantum_started_at(&self) -> Option<DateTime<Utc>> {
        self.quantum.map(|q| q.started_at)
    }

    /// Producer handle onto the activity counters.
    pub fn activity_counter(&self) -> ActivityCounter {
        self.sampler.counter()
    }

    /// Activity so far in the open quantum.
    pub fn live_activity(&self) -> ActivityAggregate {
        self.sampler.aggregate(&self.config.current().activity)
    }

    /// Why the activity monitor could not attach, if it could not.
    pub fn activity_start_error(&self) -> Option<&str> {
        self.sampler.last_start_error()
    }

    pub fn capture_results(&self) -> Receiver<CaptureOutcome> {
        self.capture_results.clone()
    }

    pub fn app_activations(&self) -> Option<Receiver<()>> {
        self.tracker.activations()
    }

    pub fn subscribe(&mut self) -> Receiver<TrackerEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    fn publish(&mut self, event: TrackerEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_status(&mut self, status: TrackingStatus) {
        if self.status != status {
            self.status = status;
            self.publish(TrackerEvent::StatusChanged(status));
        }
    }

    pub fn set_context(&mut self, project: impl Into<String>, task: impl Into<String>) {
        self.context = TrackingContext {
            project: project.into(),
            task: task.into(),
        };
    }

    /// Begin tracking from `stopped`. Session counters start over.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.require(TrackingStatus::Stopped, "start")?;
        self.stats.reset();
        self.begin_tracking();
        self.log
            .log(LogLevel::Info, COMPONENT, "Tracking started", self.context_metadata());
        Ok(())
    }

    /// Resume after a system pause. Session counters are kept.
    pub fn resume(&mut self) -> Result<(), TransitionError> {
        self.require(TrackingStatus::PausedBySystem, "resume")?;
        self.begin_tracking();
        self.log
            .log(LogLevel::Info, COMPONENT, "Tracking resumed", self.context_metadata());
        Ok(())
    }

    /// User stop from `tracking` or `paused_by_system`.
    pub fn stop(&mut self) -> Result<(), TransitionError> {
        if self.status == TrackingStatus::Stopped {
            return Err(TransitionError::InvalidState {
                action: "stop",
                status: self.status,
            });
        }
        let now = self.clock.now();
        self.finalize(EndReason::UserStop, None, now);
        self.halt_collection();
        self.pause_reason = None;
        self.resume_prompt_pending = false;
        self.set_status(TrackingStatus::Stopped);
        self.log
            .log(LogLevel::Info, COMPONENT, "Tracking stopped", Metadata::new());
        Ok(())
    }

    /// Pause because the machine is going to sleep, the screens slept or
    /// the session locked.
    pub fn pause_by_system(&mut self, reason: PauseReason) -> Result<(), TransitionError> {
        self.require(TrackingStatus::Tracking, "pause")?;
        let now = self.clock.now();
        self.finalize(EndReason::SystemPause, Some(reason), now);
        self.halt_collection();
        self.pause_reason = Some(reason);
        self.resume_prompt_pending = false;
        self.set_status(TrackingStatus::PausedBySystem);

        let mut metadata = Metadata::new();
        metadata.insert("pause_reason".to_string(), reason.as_str().into());
        self.log
            .log(LogLevel::Info, COMPONENT, "Tracking paused by system", metadata);
        Ok(())
    }

    /// Wake or unlock. Raises a resume prompt when allowed; never resumes
    /// by itself. Returns whether a prompt was raised.
    pub fn handle_wake(&mut self) -> bool {
        if self.status != TrackingStatus::PausedBySystem || self.resume_prompt_pending {
            return false;
        }
        if !self.config.current().quantum.allow_resume_after_sleep {
            return false;
        }
        let Some(reason) = self.pause_reason else {
            return false;
        };
        self.resume_prompt_pending = true;
        self.publish(TrackerEvent::ResumePrompt(reason));
        self.log
            .log(LogLevel::Info, COMPONENT, "Resume prompt raised", Metadata::new());
        true
    }

    /// Advance timers: close the quantum when its deadline has passed, run
    /// the fallback focus poll and apply finished captures.
    pub fn tick(&mut self) {
        let now = self.clock.now();

        if self.status == TrackingStatus::Tracking {
            if let Some(open) = self.quantum {
                if now >= open.deadline {
                    self.finalize(EndReason::QuantumComplete, None, now);
                    let config = self.config.current();
                    self.begin_quantum(now, &config);
                }
            }
            self.tracker.poll_if_due(now);
        }

        self.forward_focus_samples();
        self.drain_capture_results();
    }

    /// The frontmost app changed.
    pub fn on_app_activated(&mut self) {
        if self.status != TrackingStatus::Tracking {
            return;
        }
        let now = self.clock.now();
        self.tracker.poll(now);
        self.forward_focus_samples();
    }

    /// Give running capture jobs up to `timeout` to finish writing, then
    /// apply whatever arrived. Returns `true` when no job is left running.
    pub fn wait_for_captures(&mut self, timeout: std::time::Duration) -> bool {
        let idle = self.dispatcher.wait_idle(timeout);
        self.drain_capture_results();
        idle
    }

    /// Apply finished capture jobs. Results for a quantum other than the
    /// pending one, or arriving after a stop, are discarded.
    pub fn drain_capture_results(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(outcome) = self.capture_results.try_recv() {
            if self.apply_capture(outcome) {
                applied += 1;
            }
        }
        applied
    }

    /// Apply one capture outcome. Returns whether it became the last capture.
    pub fn apply_capture(&mut self, outcome: CaptureOutcome) -> bool {
        self.stats
            .record_capture_outcome(outcome.result.screenshots.len(), outcome.result.errors.len());

        let current = self.pending_capture == Some(outcome.quantum_id)
            && self.status != TrackingStatus::Stopped;
        if !current {
            let mut metadata = Metadata::new();
            metadata.insert("quantum_sequence".to_string(), outcome.quantum_id.into());
            self.log
                .log(LogLevel::Debug, COMPONENT, "Discarding stale capture result", metadata);
            return false;
        }

        self.pending_capture = None;
        self.last_capture = Some(outcome.result.clone());
        self.publish(TrackerEvent::CaptureCompleted(outcome.result));
        true
    }

    fn require(&self, expected: TrackingStatus, action: &'static str) -> Result<(), TransitionError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(TransitionError::InvalidState {
                action,
                status: self.status,
            })
        }
    }

    fn begin_tracking(&mut self) {
        let config = self.config.current();
        let now = self.clock.now();

        self.sampler.reset();
        self.sampler.start();
        self.tracker.start(&config, Some(self.focus_tx.clone()));

        self.pause_reason = None;
        self.resume_prompt_pending = false;
        self.set_status(TrackingStatus::Tracking);
        self.begin_quantum(now, &config);
    }

    fn halt_collection(&mut self) {
        self.sampler.stop();
        self.tracker.stop();
        self.quantum = None;
    }

    fn begin_quantum(&mut self, now: DateTime<Utc>, config: &Config) {
        self.next_sequence += 1;
        let seconds = config.quantum.quantum_seconds.clamp(1, u64::from(u32::MAX));
        let deadline = now + Duration::seconds(seconds as i64);

        self.sampler.reset();
        self.tracker.reset_for_new_quantum(now, config);
        self.quantum = Some(OpenQuantum {
            sequence: self.next_sequence,
            id: Uuid::new_v4(),
            started_at: now,
            deadline,
        });
        self.forward_focus_samples();
    }

    /// Close the open quantum. A no-op when none is open.
    fn finalize(
        &mut self,
        end_reason: EndReason,
        pause_reason: Option<PauseReason>,
        ended_at: DateTime<Utc>,
    ) -> Option<QuantumSummary> {
        let open = self.quantum.take()?;
        let config = self.config.current();

        let elapsed = elapsed_seconds(open.started_at, ended_at);
        let classification = QuantumClassification::classify(end_reason, elapsed, &config.quantum);

        let activity = self.sampler.aggregate(&config.activity);
        let focus = self
            .tracker
            .finalize_quantum(ended_at, &config, classification);
        self.sampler.reset();

        let summary = QuantumSummary {
            id: open.id,
            sequence: open.sequence,
            started_at: open.started_at,
            ended_at,
            duration_seconds: classification.duration_seconds,
            is_partial: classification.is_partial,
            is_too_short: classification.is_too_short,
            is_dropped: classification.is_dropped,
            end_reason,
            pause_reason,
            activity,
            focus,
            context: self.context.clone(),
            host: self.host.clone(),
        };

        self.stats
            .record_quantum(classification.is_dropped, classification.is_too_short);
        if !classification.is_dropped {
            self.last_quantum = Some(summary.clone());
        }

        if classification.wants_capture() && config.screenshots.enabled {
            self.pending_capture = Some(open.sequence);
            self.stats.record_capture_requested();
            self.dispatcher
                .dispatch(open.sequence, open.started_at, ended_at, &config);
        } else {
            self.pending_capture = None;
        }

        let message = if classification.is_dropped {
            "Quantum dropped"
        } else {
            "Quantum finalized"
        };
        self.log
            .log(LogLevel::Info, COMPONENT, message, summary.to_metadata());

        self.publish(TrackerEvent::QuantumFinalized(summary.clone()));
        Some(summary)
    }

    fn forward_focus_samples(&mut self) {
        while let Ok(sample) = self.focus_rx.try_recv() {
            self.publish(TrackerEvent::FocusSampled(sample));
        }
    }

    fn context_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("project".to_string(), self.context.project.clone().into());
        metadata.insert("task".to_string(), self.context.task.clone().into());
        metadata
    }
}
