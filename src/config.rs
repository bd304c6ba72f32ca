//! System configuration parameters
//!
//! All tunable parameters for the filter controller.  Every component
//! receives its own section at construction; nothing reads ambient globals.
//! Values come from a JSON file and can be overridden by `AIRGUARD_*`
//! environment variables.

use core::fmt;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::records::Source;

/// Core system configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub baseline: BaselineConfig,
    pub detector: DetectorConfig,
    pub combinator: CombinatorConfig,
    pub delivery: DeliveryConfig,
    pub mqtt: MqttConfig,
    pub storage: StorageConfig,
}

// --- Baseline estimator ---

/// What to do with a candidate baseline that jumps too far from the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierPolicy {
    /// Drop the candidate and keep the previous baseline.
    Discard,
    /// Adopt the candidate clipped to the edge of the deviation bound.
    Clamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// Which sensor population feeds the baseline.
    pub source: Source,
    /// Length of the reading window (seconds).
    pub window_secs: u32,
    /// Minimum plausible samples required before a baseline is computed.
    pub min_samples: usize,
    /// Number of previous baselines used for the deviation statistic.
    pub history_len: usize,
    /// Candidate may move at most `outlier_sigma * stddev(history)`.
    pub outlier_sigma: f64,
    /// Floor for the history standard deviation (µg/m³).
    pub min_stddev: f64,
    /// Samples or candidates above this are implausible (µg/m³).
    pub max_plausible_pm25: f64,
    pub outlier_policy: OutlierPolicy,
    /// Discarded candidates in a row, all within one deviation bound of
    /// each other, needed to accept a lasting level change.  0 disables.
    pub shift_confirm_runs: usize,
    /// Skip estimation while the filter has been ON within this many
    /// seconds.  0 disables the freeze.
    pub freeze_after_filter_on_secs: u32,
    /// Estimation cadence (seconds).
    pub interval_secs: u32,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            source: Source::Outdoor,
            window_secs: 24 * 3600,
            min_samples: 20,
            history_len: 24,
            outlier_sigma: 3.0,
            min_stddev: 1.0,
            max_plausible_pm25: 1000.0,
            outlier_policy: OutlierPolicy::Discard,
            shift_confirm_runs: 6,
            freeze_after_filter_on_secs: 3600,
            interval_secs: 3600,
        }
    }
}

// --- Event detector ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub source: Source,
    /// Rising edge when PM2.5 >= baseline + rise_threshold (µg/m³).
    pub rise_threshold: f64,
    /// Return when PM2.5 <= baseline + return_threshold (µg/m³).
    pub return_threshold: f64,
    /// Consecutive qualifying samples needed to enter ALERT (K).
    pub rise_confirm_samples: u32,
    /// Consecutive qualifying samples needed to return to QUIET (M).
    pub return_confirm_samples: u32,
    /// Debounce counters reset across a sample gap longer than this.
    pub max_gap_secs: u32,
    /// Evaluation cadence (seconds).
    pub interval_secs: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            source: Source::Outdoor,
            rise_threshold: 10.0,
            return_threshold: 2.0,
            rise_confirm_samples: 3,
            return_confirm_samples: 3,
            max_gap_secs: 300,
            interval_secs: 60,
        }
    }
}

// --- Control combinator ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CombinatorConfig {
    /// Recompute cadence (seconds).
    pub interval_secs: u32,
    /// Re-publish the current command this often even without a change.
    /// 0 disables the heartbeat.
    pub republish_interval_secs: u32,
}

impl Default for CombinatorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            republish_interval_secs: 60,
        }
    }
}

// --- Command delivery ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// First reconnect delay (milliseconds).
    pub reconnect_initial_ms: u64,
    /// Reconnect delay ceiling (milliseconds).
    pub reconnect_max_ms: u64,
    /// How long one transport poll may block (milliseconds).
    pub poll_timeout_ms: u64,
    /// BCM GPIO number driving the relay.
    pub relay_gpio: u32,
    /// `true` if the relay energises on a high level.
    pub relay_active_high: bool,
    /// Where the last applied state is kept across restarts.
    pub relay_state_path: PathBuf,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            reconnect_initial_ms: 500,
            reconnect_max_ms: 30_000,
            poll_timeout_ms: 1000,
            relay_gpio: 18,
            relay_active_high: true,
            relay_state_path: PathBuf::from("relay_state.bin"),
        }
    }
}

// --- Transport ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Topic carrying `ON` / `OFF` filter commands.
    pub topic: String,
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 1883,
            client_id: "airguard".into(),
            username: None,
            password: None,
            topic: "filter_signal".into(),
            keep_alive_secs: 30,
        }
    }
}

// --- Storage ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("airguard.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading + validation
// ---------------------------------------------------------------------------

/// Errors from loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    Io(String),
    /// The file is not valid JSON for [`SystemConfig`].
    Corrupted(String),
    /// A field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "config I/O error: {msg}"),
            Self::Corrupted(msg) => write!(f, "config corrupted: {msg}"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl SystemConfig {
    /// Load from a JSON file.  A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let cfg = match std::fs::read_to_string(path) {
            Ok(text) => {
                let cfg: SystemConfig =
                    serde_json::from_str(&text).map_err(|e| ConfigError::Corrupted(e.to_string()))?;
                info!("config: loaded {}", path.display());
                cfg
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("config: {} not found, using defaults", path.display());
                SystemConfig::default()
            }
            Err(e) => return Err(ConfigError::Io(e.to_string())),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `AIRGUARD_*` overrides.  `lookup` is `std::env::var` in
    /// production and a map in tests.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("AIRGUARD_MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("AIRGUARD_MQTT_PORT").and_then(|p| p.parse().ok()) {
            self.mqtt.port = port;
        }
        if let Some(user) = lookup("AIRGUARD_MQTT_USERNAME") {
            self.mqtt.username = Some(user);
        }
        if let Some(pass) = lookup("AIRGUARD_MQTT_PASSWORD") {
            self.mqtt.password = Some(pass);
        }
        if let Some(id) = lookup("AIRGUARD_CLIENT_ID") {
            self.mqtt.client_id = id;
        }
        if let Some(path) = lookup("AIRGUARD_DB_PATH") {
            self.storage.db_path = PathBuf::from(path);
        }
        if let Some(pin) = lookup("AIRGUARD_RELAY_GPIO").and_then(|p| p.parse().ok()) {
            self.delivery.relay_gpio = pin;
        }
    }

    /// Range-check every field.  Invalid values are rejected, never clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let b = &self.baseline;
        if b.min_samples == 0 {
            return Err(ConfigError::ValidationFailed("baseline.min_samples must be >= 1"));
        }
        if b.window_secs == 0 || b.interval_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "baseline.window_secs and baseline.interval_secs must be > 0",
            ));
        }
        if !(b.outlier_sigma > 0.0) {
            return Err(ConfigError::ValidationFailed("baseline.outlier_sigma must be > 0"));
        }
        if !(b.min_stddev >= 0.0) {
            return Err(ConfigError::ValidationFailed("baseline.min_stddev must be >= 0"));
        }
        if !(b.max_plausible_pm25 > 0.0) {
            return Err(ConfigError::ValidationFailed("baseline.max_plausible_pm25 must be > 0"));
        }

        let d = &self.detector;
        if !(d.rise_threshold >= 0.0) {
            return Err(ConfigError::ValidationFailed("detector.rise_threshold must be >= 0"));
        }
        if !(d.return_threshold <= d.rise_threshold) {
            return Err(ConfigError::ValidationFailed(
                "detector.return_threshold must be <= detector.rise_threshold",
            ));
        }
        if d.rise_confirm_samples == 0 || d.return_confirm_samples == 0 {
            return Err(ConfigError::ValidationFailed(
                "detector confirm sample counts must be >= 1",
            ));
        }
        if d.max_gap_secs == 0 || d.interval_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "detector.max_gap_secs and detector.interval_secs must be > 0",
            ));
        }

        if self.combinator.interval_secs == 0 {
            return Err(ConfigError::ValidationFailed("combinator.interval_secs must be > 0"));
        }

        let r = &self.delivery;
        if r.reconnect_initial_ms == 0 || r.reconnect_max_ms < r.reconnect_initial_ms {
            return Err(ConfigError::ValidationFailed(
                "delivery.reconnect_initial_ms must be > 0 and <= reconnect_max_ms",
            ));
        }
        if r.poll_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed("delivery.poll_timeout_ms must be > 0"));
        }

        if self.mqtt.topic.is_empty() || self.mqtt.topic.contains(['+', '#']) {
            return Err(ConfigError::ValidationFailed(
                "mqtt.topic must be a non-empty topic name without wildcards",
            ));
        }
        if self.mqtt.client_id.is_empty() {
            return Err(ConfigError::ValidationFailed("mqtt.client_id must not be empty"));
        }
        Ok(())
    }
}
