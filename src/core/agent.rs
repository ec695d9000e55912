//! The coordinating loop.
//!
//! One thread owns the [`Orchestrator`] and serializes every state change:
//! user commands, system notifications, app activations, capture outcomes
//! and the periodic tick all arrive here.

use crate::config::FileConfigStore;
use crate::core::orchestrator::Orchestrator;
use crate::core::quantum::TrackingStatus;
use crate::core::system_events::SystemEventAdapter;
use crate::collector::SystemEvent;
use crossbeam_channel::{never, select, tick, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const CONFIG_RELOAD_INTERVAL: Duration = Duration::from_secs(1);

/// User commands accepted by the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Resume,
    SetContext { project: String, task: String },
}

pub struct AgentOptions {
    pub tick_interval: Duration,
    /// Re-read this file when it changes
    pub config_reload: Option<Arc<FileConfigStore>>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(200),
            config_reload: None,
        }
    }
}

impl Command {
    /// Parse a typed command line: `start`, `stop` or `resume` (first letter
    /// is enough). Anything else is `None`.
    pub fn parse(line: &str) -> Option<Command> {
        match line.trim().to_ascii_lowercase().as_str() {
            "start" => Some(Command::Start),
            "stop" | "s" => Some(Command::Stop),
            "resume" | "r" => Some(Command::Resume),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Closed {
    commands: bool,
    system_events: bool,
    activations: bool,
    captures: bool,
}

fn handle_command(orchestrator: &mut Orchestrator, command: Command) {
    let result = match command {
        Command::Start => orchestrator.start(),
        Command::Stop => orchestrator.stop(),
        Command::Resume => orchestrator.resume(),
        Command::SetContext { project, task } => {
            orchestrator.set_context(project, task);
            Ok(())
        }
    };
    if let Err(e) = result {
        tracing::warn!("command rejected: {e}");
    }
}

/// Drive `orchestrator` until `running` clears, then stop tracking.
pub fn run(
    orchestrator: &mut Orchestrator,
    commands: Receiver<Command>,
    system_events: Receiver<SystemEvent>,
    options: AgentOptions,
    running: Arc<AtomicBool>,
) {
    let ticker = tick(options.tick_interval);
    let mut commands = commands;
    let mut system_events = system_events;
    let mut activations = orchestrator.app_activations().unwrap_or_else(never);
    let mut captures = orchestrator.capture_results();
    let mut last_reload = Instant::now();

    tracing::info!(tick_ms = options.tick_interval.as_millis() as u64, "agent loop started");

    while running.load(Ordering::SeqCst) {
        let mut closed = Closed::default();
        select! {
            recv(commands) -> msg => match msg {
                Ok(command) => handle_command(orchestrator, command),
                Err(_) => closed.commands = true,
            },
            recv(system_events) -> msg => match msg {
                Ok(event) => {
                    SystemEventAdapter::apply(event, orchestrator);
                }
                Err(_) => closed.system_events = true,
            },
            recv(activations) -> msg => match msg {
                Ok(()) => orchestrator.on_app_activated(),
                Err(_) => closed.activations = true,
            },
            recv(captures) -> msg => match msg {
                Ok(outcome) => {
                    orchestrator.apply_capture(outcome);
                }
                Err(_) => closed.captures = true,
            },
            recv(ticker) -> _ => {},
        }

        // A disconnected channel would otherwise be ready on every select.
        if closed.commands {
            commands = never();
        }
        if closed.system_events {
            system_events = never();
        }
        if closed.activations {
            activations = never();
        }
        if closed.captures {
            captures = never();
        }

        orchestrator.tick();

        if let Some(store) = &options.config_reload {
            if last_reload.elapsed() >= CONFIG_RELOAD_INTERVAL {
                last_reload = Instant::now();
                store.reload();
            }
        }
    }

    if orchestrator.status() != TrackingStatus::Stopped {
        let _ = orchestrator.stop();
    }
    tracing::info!("agent loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::collector::noop::{NoopFrontmostApp, NoopScreenSource};
    use crate::collector::scripted::ChannelInputSource;
    use crate::config::{Config, StaticConfigStore};
    use crate::core::orchestrator::{Sources, TrackerEvent};
    use crate::transparency::{create_shared_log, MemoryLog};
    use chrono::{TimeZone, Utc};
    use crossbeam_channel::unbounded;
    use std::thread;

    fn wait_for_status(events: &Receiver<TrackerEvent>, wanted: TrackingStatus) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Ok(TrackerEvent::StatusChanged(status)) = events.recv_timeout(Duration::from_millis(50)) {
                if status == wanted {
                    return true;
                }
            }
        }
        false
    }

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse("resume\n"), Some(Command::Resume));
        assert_eq!(Command::parse("  R "), Some(Command::Resume));
        assert_eq!(Command::parse("stop"), Some(Command::Stop));
        assert_eq!(Command::parse("Start"), Some(Command::Start));
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse("restart"), None);
    }

    #[test]
    fn test_loop_drives_lifecycle() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap());
        let mut config = Config::default();
        config.screenshots.enabled = false;
        let mut orchestrator = Orchestrator::new(
            Arc::new(StaticConfigStore::new(config)),
            Arc::new(clock.clone()),
            Arc::new(MemoryLog::new()),
            create_shared_log(),
            Sources {
                input: Box::new(ChannelInputSource::new()),
                frontmost: Box::new(NoopFrontmostApp),
                screens: Arc::new(NoopScreenSource::new()),
            },
        );
        let events = orchestrator.subscribe();

        let (command_tx, command_rx) = unbounded();
        let (system_tx, system_rx) = unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let loop_running = running.clone();

        let handle = thread::spawn(move || {
            let options = AgentOptions {
                tick_interval: Duration::from_millis(10),
                config_reload: None,
            };
            run(&mut orchestrator, command_rx, system_rx, options, loop_running);
            orchestrator
        });

        command_tx.send(Command::Start).unwrap();
        assert!(wait_for_status(&events, TrackingStatus::Tracking));

        clock.advance_secs(60);
        system_tx.send(SystemEvent::ScreenLocked).unwrap();
        assert!(wait_for_status(&events, TrackingStatus::PausedBySystem));

        command_tx.send(Command::Resume).unwrap();
        assert!(wait_for_status(&events, TrackingStatus::Tracking));

        running.store(false, Ordering::SeqCst);
        let orchestrator = handle.join().unwrap();

        assert_eq!(orchestrator.status(), TrackingStatus::Stopped);
        let stats = orchestrator.stats().stats();
        assert_eq!(stats.quanta_finalized, 2);
    }
}
