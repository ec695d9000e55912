//! Quantum Activity Agent CLI
//!
//! Local activity telemetry in fixed-length quanta.

use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use crossbeam_channel::{unbounded, Sender};
use std::io::BufRead;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use quantum_activity_agent::{
    capture::CaptureDispatcher,
    clock::SystemClock,
    collector::{check_permission, Collector, FrontmostApp, ScreenSource, SessionMonitor, SystemEventSource},
    config::{Config, ConfigStore, FileConfigStore, StaticConfigStore},
    core::{agent, AgentOptions, Command, Orchestrator, Sources, TrackerEvent},
    transparency::{
        create_shared_log_with_persistence, AuditLog, LogLevel, LogRecord, Metadata, SharedEventLog,
    },
    PRIVACY_DECLARATION, VERSION,
};

const SHUTDOWN_CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "quantum-agent")]
#[command(version = VERSION)]
#[command(about = "Local activity telemetry in fixed-length quanta", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start tracking in the foreground (Ctrl+C exits; type resume/stop/start on stdin)
    Start {
        /// Project label attached to every quantum
        #[arg(long, default_value = "Unassigned")]
        project: String,

        /// Task label attached to every quantum
        #[arg(long, default_value = "Unassigned")]
        task: String,

        /// Skip screenshot capture for this run
        #[arg(long)]
        no_screenshots: bool,
    },

    /// Show permissions, configuration and last session statistics
    Status,

    /// Show configuration
    Config {
        /// Write the default configuration file if none exists
        #[arg(long)]
        init: bool,
    },

    /// Display privacy declaration
    Privacy,

    /// Capture every display once into the screenshot tree
    CaptureOnce,

    /// Print recent quantum summaries from the audit log
    Summaries {
        /// Number of most recent quanta to print
        #[arg(long, default_value = "10")]
        limit: usize,

        /// Output format (json or jsonl)
        #[arg(long, default_value = "json")]
        format: String,
    },
}

fn main() {
    let cli = Cli::parse();
    let config = Config::load().unwrap_or_default();
    init_tracing(&config);

    match cli.command {
        Commands::Start {
            project,
            task,
            no_screenshots,
        } => {
            cmd_start(project, task, no_screenshots);
        }
        Commands::Status => {
            cmd_status();
        }
        Commands::Config { init } => {
            cmd_config(init);
        }
        Commands::Privacy => {
            cmd_privacy();
        }
        Commands::CaptureOnce => {
            cmd_capture_once();
        }
        Commands::Summaries { limit, format } => {
            cmd_summaries(limit, &format);
        }
    }
}

fn init_tracing(config: &Config) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_filter_directive().into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Load the config file; a malformed file is reported and replaced by defaults.
fn load_config() -> Config {
    let log: SharedEventLog = Arc::new(AuditLog::tracing_only(LogLevel::Warning));
    Config::load_or_default(&log)
}

fn open_audit_log(config: &Config) -> SharedEventLog {
    Arc::new(AuditLog::open(
        config.logging.file_path.clone(),
        config.logging.level,
    ))
}

fn cmd_start(project: String, task: String, no_screenshots: bool) {
    println!("Quantum Activity Agent v{VERSION}");
    println!();

    if !check_permission() {
        eprintln!("Warning: Input Monitoring permission not granted.");
        eprintln!("Activity will be recorded as zero until it is granted:");
        eprintln!("1. Open System Settings > Privacy & Security");
        eprintln!("2. Select 'Input Monitoring'");
        eprintln!("3. Add this application to the allowed list");
        eprintln!("4. Restart the application");
        eprintln!();
    }

    let bootstrap = load_config();
    let log = open_audit_log(&bootstrap);
    let file_store = Arc::new(FileConfigStore::open(Config::config_path(), &log));

    // A CLI override pins the configuration for this run.
    let (store, reload): (Arc<dyn ConfigStore>, Option<Arc<FileConfigStore>>) = if no_screenshots {
        let mut pinned = file_store.current();
        pinned.screenshots.enabled = false;
        (Arc::new(StaticConfigStore::new(pinned)), None)
    } else {
        (file_store.clone(), Some(file_store))
    };

    let config = store.current();
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    println!("Starting tracking...");
    println!("  Quantum length: {}s", config.quantum.quantum_seconds);
    println!(
        "  Screenshots: {}",
        if config.screenshots.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!("  Project: {project}");
    println!("  Task: {task}");
    println!("  Audit log: {:?}", config.logging.file_path);
    println!();
    println!("Press Ctrl+C to stop; type 'resume', 'stop' or 'start' and Enter to control tracking");
    println!();

    let stats = create_shared_log_with_persistence(config.data_path.join("transparency.json"));
    let mut orchestrator = Orchestrator::new(
        store,
        Arc::new(SystemClock),
        log,
        stats.clone(),
        Sources {
            input: Box::new(Collector::new()),
            frontmost: Box::new(FrontmostApp::default()),
            screens: Arc::new(ScreenSource::new()),
        },
    );

    let events = orchestrator.subscribe();
    let printer = thread::spawn(move || {
        for event in events {
            print_event(&event);
        }
    });

    let mut system_source = SessionMonitor::default();
    let system_events = match system_source.start() {
        Ok(receiver) => receiver,
        Err(e) => {
            eprintln!("Warning: System events unavailable: {e}");
            crossbeam_channel::never()
        }
    };

    let (command_tx, command_rx) = unbounded();
    spawn_command_reader(command_tx);

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    orchestrator.set_context(project, task);
    if let Err(e) = orchestrator.start() {
        eprintln!("Error starting tracking: {e}");
        std::process::exit(1);
    }
    if let Some(reason) = orchestrator.activity_start_error() {
        eprintln!("Warning: {reason}");
    }

    agent::run(
        &mut orchestrator,
        command_rx,
        system_events,
        AgentOptions {
            config_reload: reload,
            ..AgentOptions::default()
        },
        running,
    );
    system_source.stop();

    println!();
    println!("Stopping tracking...");
    if !orchestrator.wait_for_captures(SHUTDOWN_CAPTURE_TIMEOUT) {
        eprintln!("Warning: A screenshot was still being written at exit");
    }
    drop(orchestrator);
    let _ = printer.join();

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save transparency log: {e}");
    }

    println!();
    println!("{}", stats.summary());
}

/// Forward typed commands from stdin to the agent loop.
fn spawn_command_reader(commands: Sender<Command>) {
    let spawned = thread::Builder::new()
        .name("stdin-commands".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                match Command::parse(&line) {
                    Some(command) => {
                        if commands.send(command).is_err() {
                            break;
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => eprintln!("Unknown command: {} (use start, stop or resume)", line.trim()),
                }
            }
        });
    if let Err(e) = spawned {
        eprintln!("Warning: Typed commands unavailable: {e}");
    }
}

fn print_event(event: &TrackerEvent) {
    match event {
        TrackerEvent::QuantumFinalized(summary) => {
            let ended = summary.ended_at.with_timezone(&Local).format("%H:%M:%S");
            if summary.is_dropped {
                println!("[{ended}] Quantum dropped ({}s)", summary.duration_seconds);
                return;
            }
            let app = summary
                .focus
                .as_ref()
                .and_then(|focus| focus.primary_app_name.clone())
                .unwrap_or_else(|| "-".to_string());
            let switches = summary.focus.as_ref().map_or(0, |focus| focus.app_switch_count);
            println!(
                "[{ended}] Quantum {}s: activity {}%{}, primary app {app}, {switches} switches{}",
                summary.duration_seconds,
                summary.activity.activity_percent,
                if summary.activity.is_idle { " (idle)" } else { "" },
                if summary.is_too_short { ", too short for screenshot" } else { "" },
            );
        }
        TrackerEvent::CaptureCompleted(result) => {
            println!(
                "  Screenshots: {} saved, {} errors in {:?}",
                result.screenshots.len(),
                result.errors.len(),
                result.output_directory
            );
        }
        TrackerEvent::ResumePrompt(reason) => {
            println!("Tracking paused ({reason}). Type 'resume' and press Enter to continue.");
        }
        TrackerEvent::StatusChanged(status) => {
            println!("Status: {status}");
        }
        TrackerEvent::FocusSampled(_) => {}
    }
}

fn cmd_status() {
    let config = load_config();

    println!("Quantum Activity Agent Status");
    println!("=============================");
    println!();

    let has_permission = check_permission();
    println!(
        "Input Monitoring Permission: {}",
        if has_permission {
            "Granted ✓"
        } else {
            "Not Granted ✗"
        }
    );
    println!();

    println!("Configuration:");
    println!("  Quantum length: {}s", config.quantum.quantum_seconds);
    println!(
        "  Drop / too-short thresholds: {}s / {}s",
        config.quantum.min_partial_seconds_drop, config.quantum.min_partial_seconds_too_short
    );
    println!(
        "  Screenshots: {} ({}, width {})",
        if config.screenshots.enabled {
            "enabled"
        } else {
            "disabled"
        },
        config.screenshots.resolved_format().name(),
        config.screenshots.downscale_width
    );
    println!("  Screenshot directory: {:?}", config.screenshots.output_dir());
    println!();

    let stats_path = config.data_path.join("transparency.json");
    if stats_path.exists() {
        if let Ok(content) = std::fs::read_to_string(&stats_path) {
            if let Ok(stats) = serde_json::from_str::<serde_json::Value>(&content) {
                println!("Last Session Statistics:");
                for key in [
                    "input_events",
                    "quanta_finalized",
                    "quanta_dropped",
                    "quanta_too_short",
                    "captures_requested",
                    "screenshots_saved",
                    "capture_errors",
                ] {
                    if let Some(value) = stats.get(key) {
                        println!("  {}: {value}", key.replace('_', " "));
                    }
                }
            }
        }
    } else {
        println!("No previous session data found.");
    }
}

fn cmd_config(init: bool) {
    let config = load_config();
    let path = Config::config_path();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {path:?}");
    if init {
        if path.exists() {
            println!("Config file already exists; leaving it unchanged.");
        } else {
            match config.save() {
                Ok(()) => println!("Wrote default configuration."),
                Err(e) => eprintln!("Error writing config: {e}"),
            }
        }
    }
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

fn cmd_privacy() {
    println!("{PRIVACY_DECLARATION}");
}

fn cmd_capture_once() {
    let config = load_config();
    let log = open_audit_log(&config);
    let dispatcher = CaptureDispatcher::new(Arc::new(ScreenSource::new()), log);

    let now = Utc::now();
    let result = dispatcher.capture_now(now, now, &config);

    println!(
        "Screenshots dir={:?} files={} errors={}",
        result.output_directory,
        result.screenshots.len(),
        result.errors.len()
    );
    for shot in &result.screenshots {
        println!(
            "  display={} path={:?} {}x{} size={} sha256={}",
            shot.screen_id,
            shot.path,
            shot.width,
            shot.height,
            shot.file_size_bytes,
            &shot.sha256_hex[..shot.sha256_hex.len().min(16)]
        );
    }
    for error in &result.errors {
        println!("  error: {error}");
    }
}

fn quantum_records(path: &Path, limit: usize) -> std::io::Result<Vec<LogRecord>> {
    let mut records: Vec<LogRecord> = AuditLog::read_records(path)?
        .into_iter()
        .filter(|record| record.component == "quantum" && record.metadata.contains_key("end_reason"))
        .collect();
    let skip = records.len().saturating_sub(limit);
    Ok(records.split_off(skip))
}

fn cmd_summaries(limit: usize, format: &str) {
    let config = load_config();
    let path = &config.logging.file_path;

    let records = match quantum_records(path, limit) {
        Ok(records) => records,
        Err(e) => {
            eprintln!("Could not read audit log {path:?}: {e}");
            println!("Run 'quantum-agent start' to begin tracking.");
            return;
        }
    };

    if records.is_empty() {
        println!("No quantum summaries found in {path:?}");
        return;
    }

    let summaries: Vec<&Metadata> =
        records.iter().map(|record| &record.metadata).collect();

    if format == "jsonl" {
        for summary in summaries {
            if let Ok(line) = serde_json::to_string(summary) {
                println!("{line}");
            }
        }
    } else {
        match serde_json::to_string_pretty(&summaries) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Error serializing: {e}"),
        }
    }
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");
}
