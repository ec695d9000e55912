//! Configuration for the Quantum Activity Agent.

use crate::capture::ScreenshotFormat;
use crate::error::ConfigError;
use crate::transparency::{LogLevel, SharedEventLog};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

const APP_DIR: &str = "quantum-activity-agent";

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Main configuration for the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub quantum: QuantumConfig,
    pub activity: ActivityConfig,
    pub screenshots: ScreenshotConfig,
    pub anomalies: AnomalyThresholds,

    /// Bundle identifier to category name
    pub categories: BTreeMap<String, String>,

    pub logging: LoggingConfig,

    /// IANA timezone used for day and hour keys; local time when unset
    pub timezone: Option<String>,

    /// Path for storing session statistics
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            quantum: QuantumConfig::default(),
            activity: ActivityConfig::default(),
            screenshots: ScreenshotConfig::default(),
            anomalies: AnomalyThresholds::default(),
            categories: default_categories(),
            logging: LoggingConfig::default(),
            timezone: None,
            data_path: default_data_dir(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load configuration, falling back to defaults when the file is unreadable
    /// or malformed.
    pub fn load_or_default(log: &SharedEventLog) -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                let mut metadata = BTreeMap::new();
                metadata.insert(
                    "path".to_string(),
                    Self::config_path().display().to_string().into(),
                );
                log.log(
                    LogLevel::Warning,
                    "config",
                    &format!("Config unusable, using defaults: {e}"),
                    metadata,
                );
                Self::default()
            }
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        std::fs::create_dir_all(self.screenshots.output_dir())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// The configured timezone, if set and valid.
    pub fn time_zone(&self) -> Option<Tz> {
        self.timezone.as_deref()?.parse::<Tz>().ok()
    }

    /// Settings that are accepted but cannot be honored as written.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Some(name) = self.timezone.as_deref() {
            if name.parse::<Tz>().is_err() {
                warnings.push(format!("Unknown timezone '{name}'; using local time"));
            }
        }
        if self.screenshots.substitutes_format() {
            warnings.push(format!(
                "Screenshot format '{}' cannot be encoded; writing {}",
                self.screenshots.format,
                self.screenshots.resolved_format().name()
            ));
        }
        warnings
    }

    /// Category for a bundle identifier, with the vendor fallback rules.
    pub fn category_for(&self, bundle_id: &str) -> String {
        category_for(&self.categories, bundle_id)
    }
}

/// Map a bundle identifier through `categories`; unmapped Apple identifiers
/// are "System", everything else "Other".
pub fn category_for(categories: &BTreeMap<String, String>, bundle_id: &str) -> String {
    if let Some(mapped) = categories.get(bundle_id) {
        return mapped.clone();
    }
    if bundle_id.starts_with("com.apple.") {
        return "System".to_string();
    }
    "Other".to_string()
}

/// Quantum timing and pause policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantumConfig {
    pub quantum_seconds: u64,
    /// Partial quanta shorter than this are dropped
    pub min_partial_seconds_drop: u64,
    /// Partial quanta shorter than this are kept but get no screenshot
    pub min_partial_seconds_too_short: u64,
    pub allow_resume_after_sleep: bool,
    pub auto_pause_on_sleep: bool,
}

impl Default for QuantumConfig {
    fn default() -> Self {
        Self {
            quantum_seconds: 180,
            min_partial_seconds_drop: 30,
            min_partial_seconds_too_short: 120,
            allow_resume_after_sleep: true,
            auto_pause_on_sleep: true,
        }
    }
}

/// Activity score normalisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    pub k_max: u32,
    pub c_max: u32,
    pub s_max: u32,
    pub m_max: u32,
    pub weights: ActivityWeights,
    pub low_activity_threshold: u32,
    pub inactive_when_no_events: bool,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            k_max: 150,
            c_max: 90,
            s_max: 120,
            m_max: 5000,
            weights: ActivityWeights::default(),
            low_activity_threshold: 20,
            inactive_when_no_events: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityWeights {
    pub keypress: f64,
    pub click: f64,
    pub scroll: f64,
    pub mouse_distance: f64,
}

impl Default for ActivityWeights {
    fn default() -> Self {
        Self {
            keypress: 0.4,
            click: 0.25,
            scroll: 0.2,
            mouse_distance: 0.15,
        }
    }
}

/// Screenshot capture settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenshotConfig {
    pub enabled: bool,
    pub downscale_width: u32,
    /// "jpeg" (default), "png" or "heic"
    pub format: String,
    /// Lossy quality in [0, 1]
    pub quality: f64,
    pub capture_all_displays: bool,
    /// Root of the day/quantum screenshot tree; `<data>/Screenshots` when unset
    pub output_dir: Option<PathBuf>,
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            downscale_width: 1280,
            format: "jpeg".to_string(),
            quality: 0.75,
            capture_all_displays: true,
            output_dir: None,
        }
    }
}

impl ScreenshotConfig {
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| default_data_dir().join("Screenshots"))
    }

    /// Parse the configured format. HEIC has no encoder here, so it resolves to JPEG.
    pub fn resolved_format(&self) -> ScreenshotFormat {
        match self.format.to_lowercase().as_str() {
            "png" => ScreenshotFormat::Png,
            _ => ScreenshotFormat::Jpeg,
        }
    }

    /// Whether the configured format is written as a different one.
    pub fn substitutes_format(&self) -> bool {
        matches!(self.format.to_lowercase().as_str(), "heic" | "heif")
    }

    pub fn clamped_quality(&self) -> f64 {
        if self.quality.is_nan() {
            return 0.75;
        }
        self.quality.clamp(0.0, 1.0)
    }
}

/// Switching anomaly and focus-mode thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyThresholds {
    pub switching_per_quantum: u32,
    pub switching_per_hour: u32,
    pub focus_mode_min_consecutive_quanta: u32,
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            switching_per_quantum: 8,
            switching_per_hour: 60,
            focus_mode_min_consecutive_quanta: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum level written to the audit log
    pub level: LogLevel,
    pub file_path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file_path: default_data_dir().join("Logs").join("agent.log"),
        }
    }
}

fn default_categories() -> BTreeMap<String, String> {
    const TABLE: &[(&str, &str)] = &[
        // Browsers
        ("com.apple.Safari", "Browser"),
        ("com.google.Chrome", "Browser"),
        ("org.mozilla.firefox", "Browser"),
        ("com.microsoft.edgemac", "Browser"),
        ("com.brave.Browser", "Browser"),
        ("com.operasoftware.Opera", "Browser"),
        ("company.thebrowser.Browser", "Browser"),
        ("com.vivaldi.Vivaldi", "Browser"),
        // IDEs
        ("com.apple.dt.Xcode", "IDE"),
        ("com.microsoft.VSCode", "IDE"),
        ("com.jetbrains.intellij", "IDE"),
        ("com.jetbrains.pycharm", "IDE"),
        ("com.jetbrains.clion", "IDE"),
        ("com.jetbrains.rider", "IDE"),
        ("com.jetbrains.goland", "IDE"),
        ("com.jetbrains.WebStorm", "IDE"),
        ("com.jetbrains.datagrip", "IDE"),
        ("com.jetbrains.rubymine", "IDE"),
        ("com.jetbrains.phpstorm", "IDE"),
        ("com.google.android.studio", "IDE"),
        // Office
        ("com.microsoft.Word", "Office"),
        ("com.microsoft.Excel", "Office"),
        ("com.microsoft.Powerpoint", "Office"),
        ("com.apple.iWork.Pages", "Office"),
        ("com.apple.iWork.Numbers", "Office"),
        ("com.apple.iWork.Keynote", "Office"),
        // Messengers
        ("com.tinyspeck.slackmacgap", "Messengers"),
        ("com.hnc.Discord", "Messengers"),
        ("com.apple.iChat", "Messengers"),
        ("com.microsoft.teams", "Messengers"),
        ("com.telegram.desktop", "Messengers"),
        // Terminals
        ("com.apple.Terminal", "Terminal"),
        ("com.googlecode.iterm2", "Terminal"),
        // Design / media
        ("com.adobe.Photoshop", "Design"),
        ("com.adobe.Illustrator", "Design"),
        ("com.bohemiancoding.sketch3", "Design"),
        ("com.figma.Desktop", "Design"),
        ("com.adobe.AfterEffects", "Media"),
        ("com.adobe.PremierePro", "Media"),
    ];

    TABLE
        .iter()
        .map(|(id, category)| (id.to_string(), category.to_string()))
        .collect()
}

/// Read access to the current configuration snapshot.
pub trait ConfigStore: Send + Sync {
    fn current(&self) -> Config;
}

/// A config store that always returns the same value.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigStore {
    config: Config,
}

impl StaticConfigStore {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigStore for StaticConfigStore {
    fn current(&self) -> Config {
        self.config.clone()
    }
}

/// A config store backed by a JSON file that can be re-read while running.
pub struct FileConfigStore {
    path: PathBuf,
    state: RwLock<FileState>,
    log: SharedEventLog,
}

#[derive(Debug)]
struct FileState {
    config: Config,
    modified: Option<SystemTime>,
}

impl FileConfigStore {
    /// Open the store. A missing or malformed file yields defaults.
    pub fn open(path: PathBuf, log: &SharedEventLog) -> Self {
        let modified = modified_time(&path);
        let config = if path.exists() {
            match Config::load_from(&path) {
                Ok(config) => config,
                Err(e) => {
                    log.log(
                        LogLevel::Warning,
                        "config",
                        &format!("Failed to decode config at {}: {e}; using defaults", path.display()),
                        BTreeMap::new(),
                    );
                    Config::default()
                }
            }
        } else {
            log.log(
                LogLevel::Warning,
                "config",
                "Config not found; using defaults",
                BTreeMap::new(),
            );
            Config::default()
        };
        report_warnings(&config, log);

        Self {
            path,
            state: RwLock::new(FileState { config, modified }),
            log: log.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file if its modification time changed.
    ///
    /// Returns true when a new configuration was applied. A file that fails to
    /// parse keeps the previous configuration.
    pub fn reload(&self) -> bool {
        let modified = modified_time(&self.path);
        {
            let Ok(state) = self.state.read() else {
                return false;
            };
            if modified.is_none() || state.modified == modified {
                return false;
            }
        }

        match Config::load_from(&self.path) {
            Ok(config) => {
                report_warnings(&config, &self.log);
                if let Ok(mut state) = self.state.write() {
                    state.config = config;
                    state.modified = modified;
                    tracing::info!(path = %self.path.display(), "configuration reloaded");
                    return true;
                }
                false
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "ignoring config change: {e}");
                if let Ok(mut state) = self.state.write() {
                    state.modified = modified;
                }
                false
            }
        }
    }
}

impl ConfigStore for FileConfigStore {
    fn current(&self) -> Config {
        self.state
            .read()
            .map(|state| state.config.clone())
            .unwrap_or_default()
    }
}

fn report_warnings(config: &Config, log: &SharedEventLog) {
    for warning in config.warnings() {
        log.log(LogLevel::Warning, "config", &warning, BTreeMap::new());
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
