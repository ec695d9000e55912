//! Capture dispatcher: per-quantum screenshot jobs off the coordinating thread.

use crate::capture::imaging::{downscale, encode, is_likely_black_frame, sha256_hex};
use crate::capture::{CapturedScreenshot, ScreenshotCaptureResult, ScreenshotFormat};
use crate::clock::local_naive;
use crate::collector::{ScreenCaptureSource, ScreenId};
use crate::config::{Config, ScreenshotConfig};
use crate::error::CaptureError;
use crate::transparency::{LogLevel, Metadata, SharedEventLog};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use uuid::Uuid;

const COMPONENT: &str = "screenshots";

/// A finished capture job, tagged with the quantum that requested it.
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub quantum_id: u64,
    pub result: ScreenshotCaptureResult,
}

/// `<root>/<yyyy-MM-dd>/quantum-<start>-<end>` in local time.
pub fn quantum_directory(root: &Path, started_at: DateTime<Utc>, ended_at: DateTime<Utc>, tz: Option<Tz>) -> PathBuf {
    let start = local_naive(started_at, tz);
    let end = local_naive(ended_at, tz);
    root.join(start.format("%Y-%m-%d").to_string()).join(format!(
        "quantum-{}-{}",
        start.format("%Y%m%dT%H%M%S"),
        end.format("%Y%m%dT%H%M%S")
    ))
}

fn screen_metadata(screen: ScreenId) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("display_id".to_string(), screen.into());
    metadata
}

fn target_screens(source: &dyn ScreenCaptureSource, config: &ScreenshotConfig) -> Vec<ScreenId> {
    if !config.capture_all_displays {
        return source.primary_screen().into_iter().collect();
    }
    let screens = source.active_screens();
    if screens.is_empty() {
        return source.primary_screen().into_iter().collect();
    }
    screens
}

/// Capture, encode and store one image per target screen.
///
/// Never fails: every problem ends up in the result's error list and the log.
pub fn capture_and_save(
    source: &dyn ScreenCaptureSource,
    root: &Path,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    config: &ScreenshotConfig,
    tz: Option<Tz>,
    log: &SharedEventLog,
) -> ScreenshotCaptureResult {
    let output_directory = quantum_directory(root, started_at, ended_at, tz);

    if let Err(e) = std::fs::create_dir_all(&output_directory) {
        let message = CaptureError::CreateDirectory(e).to_string();
        let mut metadata = Metadata::new();
        metadata.insert("path".to_string(), output_directory.display().to_string().into());
        log.log(LogLevel::Error, COMPONENT, &message, metadata);
        return ScreenshotCaptureResult::empty(started_at, ended_at, output_directory, message);
    }

    let screens = target_screens(source, config);
    if screens.is_empty() {
        let message = CaptureError::NoScreens.to_string();
        log.log(LogLevel::Warning, COMPONENT, &message, Metadata::new());
        return ScreenshotCaptureResult::empty(started_at, ended_at, output_directory, message);
    }

    let format = config.resolved_format();
    let quality = config.clamped_quality();
    if config.substitutes_format() {
        let mut metadata = Metadata::new();
        metadata.insert("requested_format".to_string(), config.format.clone().into());
        metadata.insert("format".to_string(), format.name().into());
        log.log(
            LogLevel::Warning,
            COMPONENT,
            &format!("Cannot encode '{}'; writing {}", config.format, format.name()),
            metadata,
        );
    }
    let mut screenshots = Vec::new();
    let mut errors = Vec::new();

    for screen in screens {
        let Some(image) = source.capture(screen) else {
            let e = CaptureError::ScreenUnavailable("display returned no image".to_string());
            log.log(LogLevel::Warning, COMPONENT, &e.to_string(), screen_metadata(screen));
            errors.push(format!("display={screen}: {e}"));
            continue;
        };

        let scaled = downscale(image, config.downscale_width);
        if is_likely_black_frame(&scaled) {
            let e = CaptureError::BlackFrame;
            log.log(LogLevel::Warning, COMPONENT, &e.to_string(), screen_metadata(screen));
            errors.push(format!("display={screen}: {e}"));
            continue;
        }

        let path = output_directory.join(format!("display-{screen}.{}", format.extension()));
        let written = encode(&scaled, format, quality)
            .and_then(|bytes| std::fs::write(&path, bytes).map_err(CaptureError::Write));
        if let Err(e) = written {
            log.log(LogLevel::Error, COMPONENT, &e.to_string(), screen_metadata(screen));
            errors.push(format!("display={screen}: {e}"));
            continue;
        }

        let (file_size_bytes, sha256_hex) = match std::fs::read(&path) {
            Ok(bytes) => (bytes.len() as u64, sha256_hex(&bytes)),
            Err(e) => {
                errors.push(format!("display={screen}: {}", CaptureError::HashRead(e)));
                let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                (size, String::new())
            }
        };

        screenshots.push(CapturedScreenshot {
            id: Uuid::new_v4(),
            screen_id: screen,
            path,
            width: scaled.width(),
            height: scaled.height(),
            format,
            file_size_bytes,
            sha256_hex,
            captured_at: ended_at,
        });
    }

    let primary_screenshot_id = choose_primary(&screenshots, source.primary_screen());
    let result = ScreenshotCaptureResult {
        quantum_started_at: started_at,
        quantum_ended_at: ended_at,
        output_directory,
        primary_screenshot_id,
        screenshots,
        errors,
    };
    log_outcome(&result, format, log);
    result
}

/// The shot of the preferred screen, else the first success.
pub fn choose_primary(screenshots: &[CapturedScreenshot], preferred: Option<ScreenId>) -> Option<Uuid> {
    preferred
        .and_then(|screen| screenshots.iter().find(|shot| shot.screen_id == screen))
        .or_else(|| screenshots.first())
        .map(|shot| shot.id)
}

fn log_outcome(result: &ScreenshotCaptureResult, format: ScreenshotFormat, log: &SharedEventLog) {
    let mut metadata = Metadata::new();
    metadata.insert("directory".to_string(), result.output_directory.display().to_string().into());
    metadata.insert("format".to_string(), format.name().into());
    metadata.insert("saved".to_string(), result.screenshots.len().into());
    metadata.insert("errors".to_string(), result.errors.clone().into());
    if let Some(id) = result.primary_screenshot_id {
        metadata.insert("primary_screenshot_id".to_string(), id.to_string().into());
    }

    if result.screenshots.is_empty() {
        log.log(LogLevel::Warning, COMPONENT, "No screenshots saved", metadata);
    } else {
        log.log(LogLevel::Info, COMPONENT, "Screenshots saved", metadata);
    }
}

/// Runs capture jobs on worker threads and queues their outcomes.
pub struct CaptureDispatcher {
    source: Arc<dyn ScreenCaptureSource>,
    log: SharedEventLog,
    sender: Sender<CaptureOutcome>,
    receiver: Receiver<CaptureOutcome>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl CaptureDispatcher {
    pub fn new(source: Arc<dyn ScreenCaptureSource>, log: SharedEventLog) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            source,
            log,
            sender,
            receiver,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Outcomes of finished jobs, in completion order.
    pub fn results(&self) -> Receiver<CaptureOutcome> {
        self.receiver.clone()
    }

    /// Start a capture job for a closed quantum. Returns immediately.
    pub fn dispatch(&self, quantum_id: u64, started_at: DateTime<Utc>, ended_at: DateTime<Utc>, config: &Config) {
        let source = self.source.clone();
        let log = self.log.clone();
        let sender = self.sender.clone();
        let screenshots = config.screenshots.clone();
        let tz = config.time_zone();

        let spawned = thread::Builder::new()
            .name("screenshot-capture".to_string())
            .spawn(move || {
                let root = screenshots.output_dir();
                let result = capture_and_save(source.as_ref(), &root, started_at, ended_at, &screenshots, tz, &log);
                let _ = sender.send(CaptureOutcome { quantum_id, result });
            });

        match spawned {
            Ok(handle) => {
                if let Ok(mut workers) = self.workers.lock() {
                    workers.retain(|worker| !worker.is_finished());
                    workers.push(handle);
                }
            }
            Err(e) => {
                let message = format!("Failed to start capture job: {e}");
                self.log.log(LogLevel::Error, COMPONENT, &message, Metadata::new());
                let directory = quantum_directory(&config.screenshots.output_dir(), started_at, ended_at, tz);
                let _ = self.sender.send(CaptureOutcome {
                    quantum_id,
                    result: ScreenshotCaptureResult::empty(started_at, ended_at, directory, message),
                });
            }
        }
    }

    /// Number of capture jobs still running.
    pub fn in_flight(&self) -> usize {
        match self.workers.lock() {
            Ok(mut workers) => {
                workers.retain(|worker| !worker.is_finished());
                workers.len()
            }
            Err(_) => 0,
        }
    }

    /// Block until every running job has finished or `timeout` passes.
    ///
    /// Returns `true` when no job is left running.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.in_flight() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Capture on the calling thread.
    pub fn capture_now(&self, started_at: DateTime<Utc>, ended_at: DateTime<Utc>, config: &Config) -> ScreenshotCaptureResult {
        capture_and_save(
            self.source.as_ref(),
            &config.screenshots.output_dir(),
            started_at,
            ended_at,
            &config.screenshots,
            config.time_zone(),
            &self.log,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::scripted::StaticScreenSource;
    use crate::transparency::MemoryLog;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("qaa-capture-{}", Uuid::new_v4()))
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let start = Utc.with_ymd_and_hms(2025, 3, 3, 10, 0, 0).unwrap();
        (start, start + Duration::seconds(180))
    }

    fn utc() -> Option<Tz> {
        Some(chrono_tz::UTC)
    }

    #[test]
    fn test_quantum_directory_layout() {
        let (start, end) = window();
        let dir = quantum_directory(Path::new("/shots"), start, end, utc());
        assert_eq!(
            dir,
            PathBuf::from("/shots/2025-03-03/quantum-20250303T100000-20250303T100300")
        );
    }

    #[test]
    fn test_black_and_valid_screen() {
        let source = StaticScreenSource::new()
            .with_screen(1, Some(StaticScreenSource::solid(64, 48, [0, 0, 0])))
            .with_screen(2, Some(StaticScreenSource::gradient(64, 48)))
            .with_primary(1);
        let memory = Arc::new(MemoryLog::new());
        let log: SharedEventLog = memory.clone();
        let root = temp_root();
        let (start, end) = window();

        let result = capture_and_save(&source, &root, start, end, &ScreenshotConfig::default(), utc(), &log);

        assert_eq!(result.screenshots.len(), 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("display=1: "));
        let shot = &result.screenshots[0];
        assert_eq!(result.primary_screenshot_id, Some(shot.id));
        assert_eq!(shot.screen_id, 2);
        assert_eq!(shot.captured_at, end);
        assert!(shot.path.ends_with("display-2.jpg"));
        assert_eq!(shot.sha256_hex, sha256_hex(&std::fs::read(&shot.path).unwrap()));
        assert_eq!(shot.file_size_bytes, std::fs::metadata(&shot.path).unwrap().len());
        assert!(!root.join("2025-03-03").join("quantum-20250303T100000-20250303T100300").join("display-1.jpg").exists());
    }

    #[test]
    fn test_primary_prefers_main_screen() {
        let source = StaticScreenSource::new()
            .with_screen(1, Some(StaticScreenSource::gradient(32, 32)))
            .with_screen(2, Some(StaticScreenSource::gradient(32, 32)))
            .with_primary(2);
        let log: SharedEventLog = Arc::new(MemoryLog::new());
        let (start, end) = window();

        let result = capture_and_save(&source, &temp_root(), start, end, &ScreenshotConfig::default(), utc(), &log);

        assert_eq!(result.screenshots.len(), 2);
        assert_eq!(result.primary().unwrap().screen_id, 2);
    }

    #[test]
    fn test_missing_image_does_not_abort_other_screens() {
        let source = StaticScreenSource::new()
            .with_screen(1, None)
            .with_screen(2, Some(StaticScreenSource::gradient(32, 32)));
        let log: SharedEventLog = Arc::new(MemoryLog::new());
        let (start, end) = window();
        let mut config = ScreenshotConfig::default();
        config.format = "png".to_string();

        let result = capture_and_save(&source, &temp_root(), start, end, &config, utc(), &log);

        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.screenshots.len(), 1);
        assert!(result.screenshots[0].path.ends_with("display-2.png"));
    }

    #[test]
    fn test_heic_substitution_is_recorded() {
        let source = StaticScreenSource::new().with_screen(1, Some(StaticScreenSource::gradient(32, 32)));
        let memory = Arc::new(MemoryLog::new());
        let log: SharedEventLog = memory.clone();
        let (start, end) = window();
        let mut config = ScreenshotConfig::default();
        config.format = "heic".to_string();

        let result = capture_and_save(&source, &temp_root(), start, end, &config, utc(), &log);

        assert!(result.screenshots[0].path.ends_with("display-1.jpg"));
        let records = memory.records_for("screenshots");
        assert_eq!(records[0].level, LogLevel::Warning);
        assert_eq!(records[0].message, "Cannot encode 'heic'; writing jpeg");
        let saved = records.iter().find(|r| r.message == "Screenshots saved").unwrap();
        assert_eq!(saved.metadata.get("format"), Some(&serde_json::Value::from("jpeg")));
    }

    #[test]
    fn test_primary_only_mode() {
        let source = StaticScreenSource::new()
            .with_screen(1, Some(StaticScreenSource::gradient(32, 32)))
            .with_screen(2, Some(StaticScreenSource::gradient(32, 32)))
            .with_primary(1);
        let log: SharedEventLog = Arc::new(MemoryLog::new());
        let (start, end) = window();
        let mut config = ScreenshotConfig::default();
        config.capture_all_displays = false;

        let result = capture_and_save(&source, &temp_root(), start, end, &config, utc(), &log);
        assert_eq!(result.screenshots.len(), 1);
        assert_eq!(result.screenshots[0].screen_id, 1);
    }

    #[test]
    fn test_no_screens_is_an_empty_result() {
        let memory = Arc::new(MemoryLog::new());
        let log: SharedEventLog = memory.clone();
        let (start, end) = window();

        let result = capture_and_save(
            &StaticScreenSource::new(),
            &temp_root(),
            start,
            end,
            &ScreenshotConfig::default(),
            utc(),
            &log,
        );

        assert!(result.screenshots.is_empty());
        assert_eq!(result.errors, vec!["No displays to capture".to_string()]);
        assert_eq!(memory.records_for("screenshots")[0].level, LogLevel::Warning);
    }

    #[test]
    fn test_directory_failure_is_logged_as_error() {
        let blocker = temp_root();
        std::fs::create_dir_all(blocker.parent().unwrap()).unwrap();
        std::fs::write(&blocker, b"not a directory").unwrap();

        let memory = Arc::new(MemoryLog::new());
        let log: SharedEventLog = memory.clone();
        let source = StaticScreenSource::new().with_screen(1, Some(StaticScreenSource::gradient(8, 8)));
        let (start, end) = window();

        let result = capture_and_save(&source, &blocker, start, end, &ScreenshotConfig::default(), utc(), &log);

        assert!(result.screenshots.is_empty());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(memory.records()[0].level, LogLevel::Error);
    }

    #[test]
    fn test_dispatch_delivers_outcome() {
        let source = Arc::new(StaticScreenSource::new().with_screen(7, Some(StaticScreenSource::gradient(16, 16))));
        let dispatcher = CaptureDispatcher::new(source, Arc::new(MemoryLog::new()));
        let results = dispatcher.results();
        let mut config = Config::default();
        config.timezone = Some("UTC".to_string());
        config.screenshots.output_dir = Some(temp_root());
        let (start, end) = window();

        dispatcher.dispatch(42, start, end, &config);
        let outcome = results.recv_timeout(std::time::Duration::from_secs(10)).unwrap();

        assert_eq!(outcome.quantum_id, 42);
        assert_eq!(outcome.result.screenshots.len(), 1);
        assert_eq!(outcome.result.screenshots[0].screen_id, 7);
    }

    #[test]
    fn test_wait_idle_lets_slow_job_finish() {
        let source = Arc::new(
            StaticScreenSource::new()
                .with_screen(1, Some(StaticScreenSource::gradient(16, 16)))
                .with_delay(std::time::Duration::from_millis(300)),
        );
        let dispatcher = CaptureDispatcher::new(source, Arc::new(MemoryLog::new()));
        let results = dispatcher.results();
        let mut config = Config::default();
        config.timezone = Some("UTC".to_string());
        let root = temp_root();
        config.screenshots.output_dir = Some(root.clone());
        let (start, end) = window();

        dispatcher.dispatch(9, start, end, &config);
        assert_eq!(dispatcher.in_flight(), 1);
        assert!(dispatcher.wait_idle(std::time::Duration::from_secs(10)));
        assert_eq!(dispatcher.in_flight(), 0);

        let outcome = results.try_recv().unwrap();
        assert_eq!(outcome.quantum_id, 9);
        assert!(outcome.result.screenshots[0].path.exists());
    }

    #[test]
    fn test_wait_idle_times_out() {
        let source = Arc::new(
            StaticScreenSource::new()
                .with_screen(1, Some(StaticScreenSource::gradient(16, 16)))
                .with_delay(std::time::Duration::from_millis(500)),
        );
        let dispatcher = CaptureDispatcher::new(source, Arc::new(MemoryLog::new()));
        let mut config = Config::default();
        config.screenshots.output_dir = Some(temp_root());
        let (start, end) = window();

        assert!(dispatcher.wait_idle(std::time::Duration::ZERO));
        dispatcher.dispatch(1, start, end, &config);
        assert!(!dispatcher.wait_idle(std::time::Duration::from_millis(20)));
        assert!(dispatcher.wait_idle(std::time::Duration::from_secs(10)));
    }
}
