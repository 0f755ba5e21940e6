//! fleetmend.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while validating a loaded configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid duration for {key}: {value:?}")]
    InvalidDuration { key: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("health.period ({period:?}) must not exceed health.window ({window:?})")]
    PeriodExceedsWindow { period: Duration, window: Duration },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FleetConfig {
    pub controller: ControllerConfig,
    pub sweep: SweepConfig,
    pub health: HealthConfig,
    pub store: StoreConfig,
    pub api: ApiConfig,
    pub provider: ProviderConfig,
}

/// Remediation state machine limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    /// Maximum instances simultaneously pending restart on the automatic path.
    pub max_reboot_instance_num: usize,
    /// Age after which a pending-restart record is treated as orphaned.
    pub pending_ttl: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_reboot_instance_num: 2,
            pending_ttl: "2h".to_string(),
        }
    }
}

/// Periodic fleet sweep parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SweepConfig {
    pub interval: String,
    /// Tag key selecting in-scope instances (e.g. "Environment").
    pub tag_key: String,
    pub tag_value: String,
    /// Maximum metric evaluations in flight at once.
    pub concurrency: usize,
    pub page_size: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: "5m".to_string(),
            tag_key: "Environment".to_string(),
            tag_value: "production".to_string(),
            concurrency: 8,
            page_size: 100,
        }
    }
}

/// Health classification inputs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    /// Trailing window queried on every evaluation.
    pub window: String,
    /// Aggregation period of each sample.
    pub period: String,
    pub max_points: u32,
    pub utilization_metric: String,
    pub status_check_metric: String,
    /// Status-check sample value that means "failed".
    pub failure_value: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window: "6m".to_string(),
            period: "5m".to_string(),
            max_points: 10,
            utilization_metric: "CPUUtilization".to_string(),
            status_check_metric: "StatusCheckFailed".to_string(),
            failure_value: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "/var/lib/fleetmend/records.redb".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// Addresses of the compute and metrics gateways.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub compute_address: String,
    pub metrics_address: String,
    pub timeout: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            compute_address: "127.0.0.1:9100".to_string(),
            metrics_address: "127.0.0.1:9200".to_string(),
            timeout: "10s".to_string(),
        }
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FleetConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every duration parses and every limit is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controller.max_reboot_instance_num == 0 {
            return Err(ConfigError::Zero("controller.max_reboot_instance_num"));
        }
        if self.sweep.concurrency == 0 {
            return Err(ConfigError::Zero("sweep.concurrency"));
        }
        if self.sweep.page_size == 0 {
            return Err(ConfigError::Zero("sweep.page_size"));
        }
        if self.health.max_points == 0 {
            return Err(ConfigError::Zero("health.max_points"));
        }

        if self.controller.pending_ttl()?.is_zero() {
            return Err(ConfigError::Zero("controller.pending_ttl"));
        }
        if self.sweep.interval()?.is_zero() {
            return Err(ConfigError::Zero("sweep.interval"));
        }
        self.provider.timeout()?;
        let window = self.health.window()?;
        let period = self.health.period()?;
        if period > window {
            return Err(ConfigError::PeriodExceedsWindow { period, window });
        }
        Ok(())
    }
}

impl ControllerConfig {
    pub fn pending_ttl(&self) -> Result<Duration, ConfigError> {
        duration_field("controller.pending_ttl", &self.pending_ttl)
    }
}

impl SweepConfig {
    pub fn interval(&self) -> Result<Duration, ConfigError> {
        duration_field("sweep.interval", &self.interval)
    }
}

impl HealthConfig {
    pub fn window(&self) -> Result<Duration, ConfigError> {
        duration_field("health.window", &self.window)
    }

    pub fn period(&self) -> Result<Duration, ConfigError> {
        duration_field("health.period", &self.period)
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("provider.timeout", &self.timeout)
    }
}

fn duration_field(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        key,
        value: value.to_string(),
    })
}

/// Parse a duration string like "500ms", "30s", "5m", "2h".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok()?.checked_mul(60).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok()?.checked_mul(3600).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
