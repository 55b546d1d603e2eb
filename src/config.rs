//! Configuration for the usage agent.
//!
//! Two documents live in the config directory: `config.json` for the
//! sampling side and `transmission_config.json` for the collector endpoint.
//! Transmission settings resolve with precedence file > environment > defaults.

use crate::core::Calendar;
use crate::transmission::Endpoint;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Directory name under the platform config/data directories.
pub const APP_DIR_NAME: &str = "usage-agent";

pub const ENV_ENDPOINT: &str = "USAGE_AGENT_ENDPOINT";
pub const ENV_API_KEY: &str = "USAGE_AGENT_API_KEY";
pub const ENV_DEVICE_ID: &str = "USAGE_AGENT_DEVICE_ID";
pub const ENV_ENABLED: &str = "USAGE_AGENT_ENABLED";
pub const ENV_INTERVAL_MINUTES: &str = "USAGE_AGENT_INTERVAL_MINUTES";

/// Accepted range for the transmission interval.
pub const MIN_INTERVAL_MINUTES: u32 = 1;
pub const MAX_INTERVAL_MINUTES: u32 = 1440;

/// Main configuration for the agent's sampling side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Duration of one sampling tick
    #[serde(with = "duration_serde")]
    pub tick_interval: Duration,

    /// Seconds without re-observation before a record is marked inactive
    pub inactivity_threshold_secs: u64,

    /// Seconds without re-observation before a record leaves the live table
    pub retention_window_secs: u64,

    /// Root for day documents, audit copies and the transmission log
    pub data_path: PathBuf,

    /// IANA timezone for calendar-day boundaries (local time when unset)
    pub timezone: Option<String>,

    /// Whether to run the background DNS query capture
    pub capture_dns: bool,

    /// Age in days after which `cleanup` removes day documents and audit copies
    pub cleanup_after_days: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR_NAME);

        Self {
            tick_interval: Duration::from_secs(15),
            inactivity_threshold_secs: 30,
            retention_window_secs: 120,
            data_path: data_dir,
            timezone: None,
            capture_dns: true,
            cleanup_after_days: 7,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific file, defaulting when it is absent.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        write_json(&Self::config_path(), self)
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        config_dir().join("config.json")
    }

    /// Locations of everything the agent persists.
    pub fn paths(&self) -> StoragePaths {
        StoragePaths::under(&self.data_path)
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        let paths = self.paths();
        for dir in [&paths.daily_dir, &paths.audit_dir] {
            std::fs::create_dir_all(dir).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }
        Ok(())
    }

    /// The tick and threshold settings shared by both aggregators.
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            tick_secs: self.tick_interval.as_secs().max(1),
            inactivity_secs: self.inactivity_threshold_secs,
            retention_secs: self.retention_window_secs,
        }
    }

    /// Calendar used to decide which day a timestamp belongs to.
    pub fn calendar(&self) -> Result<Calendar, ConfigError> {
        match &self.timezone {
            Some(name) => name
                .parse::<chrono_tz::Tz>()
                .map(Calendar::Zone)
                .map_err(|_| ConfigError::InvalidTimezone(name.clone())),
            None => Ok(Calendar::Local),
        }
    }
}

/// On-disk layout under the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    /// One document per calendar date
    pub daily_dir: PathBuf,
    /// Audit copies of every built payload
    pub audit_dir: PathBuf,
    /// The append-only transmission log
    pub log_path: PathBuf,
}

impl StoragePaths {
    pub fn under(root: &Path) -> Self {
        Self {
            daily_dir: root.join("data"),
            audit_dir: root.join("transmission"),
            log_path: root.join("transmission_log.json"),
        }
    }
}

/// Tick length and thresholds, shared by the app and connection aggregators.
///
/// A record missed for up to `inactivity_secs` stays active; after that it is
/// marked inactive, and after `retention_secs` it leaves the live table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub tick_secs: u64,
    pub inactivity_secs: u64,
    pub retention_secs: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            tick_secs: 15,
            inactivity_secs: 30,
            retention_secs: 120,
        }
    }
}

impl RetentionPolicy {
    /// Whether a record last seen `age_secs` ago should be inactive.
    pub fn is_inactive(&self, age_secs: i64) -> bool {
        age_secs > self.inactivity_secs as i64
    }

    /// Whether a record last seen `age_secs` ago should stay in the live table.
    pub fn is_retained(&self, age_secs: i64) -> bool {
        age_secs <= self.retention_secs as i64
    }
}

/// Resolved transmission configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransmissionConfig {
    pub endpoint_url: String,
    pub api_key: String,
    pub device_id: String,
    pub enabled: bool,
    /// Length of one transmission interval
    pub interval_minutes: u32,
    /// Total POST attempts per interval
    pub max_attempts: u32,
    /// Backoff before attempt `n + 1` is `n * backoff_unit_secs`
    pub backoff_unit_secs: u64,
    /// HTTP request timeout
    pub timeout_secs: u64,
}

impl Default for TransmissionConfig {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            api_key: String::new(),
            device_id: String::new(),
            enabled: false,
            interval_minutes: 10,
            max_attempts: 3,
            backoff_unit_secs: 2,
            timeout_secs: 30,
        }
    }
}

impl TransmissionConfig {
    /// Load from the default file and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from a specific file and the process environment.
    ///
    /// A device ID generated here is written back to the file so it stays
    /// stable across restarts.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut file = TransmissionConfigFile::load(path)?;
        let env = |key: &str| std::env::var(key).ok();

        if file.device_id.is_none() && env_device_id(&env).is_none() {
            file.device_id = Some(generate_device_id());
            if let Err(e) = file.save(path) {
                tracing::warn!(error = %e, "could not persist generated device ID");
            }
        }

        Ok(Self::resolve(Some(&file), env))
    }

    /// Merge defaults, environment and file values (file wins).
    pub fn resolve<F>(file: Option<&TransmissionConfigFile>, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let env_endpoint = non_empty(env(ENV_ENDPOINT));
        let env_api_key = non_empty(env(ENV_API_KEY));
        config.enabled = env_endpoint.is_some() && env_api_key.is_some();

        if let Some(endpoint) = env_endpoint {
            config.endpoint_url = endpoint;
        }
        if let Some(api_key) = env_api_key {
            config.api_key = api_key;
        }
        if let Some(device_id) = env_device_id(&env) {
            config.device_id = device_id;
        }
        if let Some(enabled) = env(ENV_ENABLED) {
            match parse_bool(&enabled) {
                Some(enabled) => config.enabled = enabled,
                None => tracing::warn!(value = %enabled, "ignoring invalid {ENV_ENABLED}"),
            }
        }
        if let Some(interval) = env(ENV_INTERVAL_MINUTES) {
            match interval.trim().parse::<u32>().ok().filter(|m| valid_interval(*m)) {
                Some(minutes) => config.interval_minutes = minutes,
                None => tracing::warn!(value = %interval, "ignoring invalid {ENV_INTERVAL_MINUTES}"),
            }
        }

        if let Some(file) = file {
            file.apply(&mut config);
        }

        if config.device_id.is_empty() {
            config.device_id = generate_device_id();
        }
        config
    }

    /// Get the path to the transmission configuration file.
    pub fn file_path() -> PathBuf {
        config_dir().join("transmission_config.json")
    }

    /// The collector endpoint, if both URL and key are configured.
    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        if self.endpoint_url.trim().is_empty() {
            return Err(ConfigError::MissingEndpoint);
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        Ok(Endpoint::new(&self.endpoint_url, &self.api_key))
    }

    /// Interval length as a chrono duration.
    pub fn interval(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.interval_minutes.max(MIN_INTERVAL_MINUTES)))
    }

    /// API key truncated for display.
    pub fn masked_api_key(&self) -> String {
        mask_secret(&self.api_key)
    }
}

/// Transmission settings as stored on disk. Only present fields override.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmissionConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_unit_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl TransmissionConfigFile {
    /// Read the file, returning an empty document when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        write_json(path, self)
    }

    /// Set the interval after range validation.
    pub fn set_interval_minutes(&mut self, minutes: u32) -> Result<(), ConfigError> {
        if !valid_interval(minutes) {
            return Err(ConfigError::InvalidInterval(minutes));
        }
        self.interval_minutes = Some(minutes);
        Ok(())
    }

    fn apply(&self, config: &mut TransmissionConfig) {
        if let Some(endpoint) = non_empty(self.endpoint_url.clone()) {
            config.endpoint_url = endpoint;
        }
        if let Some(api_key) = non_empty(self.api_key.clone()) {
            config.api_key = api_key;
        }
        if let Some(device_id) = non_empty(self.device_id.clone()) {
            config.device_id = device_id;
        }
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        if let Some(minutes) = self.interval_minutes.filter(|m| valid_interval(*m)) {
            config.interval_minutes = minutes;
        }
        if let Some(attempts) = self.max_attempts.filter(|a| *a > 0) {
            config.max_attempts = attempts;
        }
        if let Some(unit) = self.backoff_unit_secs {
            config.backoff_unit_secs = unit;
        }
        if let Some(timeout) = self.timeout_secs.filter(|t| *t > 0) {
            config.timeout_secs = timeout;
        }
    }
}

/// Generate a device identifier from the hostname and a random suffix.
pub fn generate_device_id() -> String {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{}-{}", hostname, &uuid::Uuid::new_v4().simple().to_string()[..8])
}

/// Show at most the first 8 characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    if secret.chars().count() > 8 {
        format!("{}...", secret.chars().take(8).collect::<String>())
    } else {
        "***".to_string()
    }
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

fn env_device_id<F: Fn(&str) -> Option<String>>(env: &F) -> Option<String> {
    non_empty(env(ENV_DEVICE_ID)).filter(|id| id != "auto-generated")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "on" => Some(true),
        "0" | "false" | "f" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn valid_interval(minutes: u32) -> bool {
    (MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&minutes)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| ConfigError::SerializeError(e.to_string()))?;
    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Serialize error: {0}")]
    SerializeError(String),
    #[error("Unknown timezone: {0}")]
    InvalidTimezone(String),
    #[error("Invalid interval {0} minutes (must be 1-1440)")]
    InvalidInterval(u32),
    #[error("Collector endpoint URL is not configured")]
    MissingEndpoint,
    #[error("API key is not configured")]
    MissingApiKey,
}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
