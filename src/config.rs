use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    #[serde(default = "default_data_file")]
    pub data_file: String,

    /// Daily-rolling log files are written here when set.
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Interface to sample traffic from. Auto-detected when unset.
    #[serde(default)]
    pub interface: Option<String>,

    #[serde(default)]
    pub liveness: LivenessConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub traffic: TrafficConfig,

    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LivenessConfig {
    #[serde(default = "default_liveness_interval")]
    pub interval_seconds: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_seconds: u64,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_interval")]
    pub interval_seconds: u64,

    #[serde(default = "default_probes_per_cycle")]
    pub probes_per_cycle: usize,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    #[serde(default = "default_degraded_latency")]
    pub degraded_latency_ms: f64,

    #[serde(default = "default_degraded_loss")]
    pub degraded_loss_percent: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrafficConfig {
    #[serde(default = "default_sample_interval")]
    pub sample_interval_seconds: u64,

    #[serde(default = "default_history_granularity")]
    pub history_granularity_seconds: u64,

    #[serde(default = "default_history_duration")]
    pub history_duration_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

fn default_listen_address() -> String {
    "0.0.0.0:8420".to_string()
}

fn default_data_file() -> String {
    "data/lanpulse.json".to_string()
}

fn default_liveness_interval() -> u64 {
    30
}

fn default_max_backoff() -> u64 {
    300
}

fn default_probe_timeout() -> u64 {
    2000
}

fn default_max_concurrent_probes() -> usize {
    10
}

fn default_health_interval() -> u64 {
    60
}

fn default_probes_per_cycle() -> usize {
    10
}

fn default_degraded_latency() -> f64 {
    100.0
}

fn default_degraded_loss() -> f64 {
    5.0
}

fn default_sample_interval() -> u64 {
    1
}

fn default_history_granularity() -> u64 {
    60
}

fn default_history_duration() -> u64 {
    3600
}

fn default_retention_hours() -> u64 {
    24
}

fn default_cleanup_interval() -> u64 {
    3600
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            data_file: default_data_file(),
            log_dir: None,
            interface: None,
            liveness: LivenessConfig::default(),
            health: HealthConfig::default(),
            traffic: TrafficConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_liveness_interval(),
            max_backoff_seconds: default_max_backoff(),
            probe_timeout_ms: default_probe_timeout(),
            max_concurrent_probes: default_max_concurrent_probes(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_health_interval(),
            probes_per_cycle: default_probes_per_cycle(),
            probe_timeout_ms: default_probe_timeout(),
            degraded_latency_ms: default_degraded_latency(),
            degraded_loss_percent: default_degraded_loss(),
        }
    }
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            sample_interval_seconds: default_sample_interval(),
            history_granularity_seconds: default_history_granularity(),
            history_duration_seconds: default_history_duration(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_hours: default_retention_hours(),
            cleanup_interval_seconds: default_cleanup_interval(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file. A missing file yields the
    /// defaults; an unreadable or unparseable file is an error.
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let Some(path_str) = config_path else {
            return Ok(Self::default());
        };

        let path = Path::new(path_str);
        if !path.exists() {
            warn!(path = %path_str, "Config file not found, using defaults.");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path_str.to_string(),
            source: e,
        })?;
        let config: AppConfig = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path_str.to_string(),
            source: e,
        })?;

        info!(path = %path_str, "Loaded config.");
        Ok(config)
    }
}
