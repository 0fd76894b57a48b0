//! Application configuration loading and validation.
//!
//! Configuration is loaded from a TOML file. Every numeric policy knob the
//! workflow depends on (severity cutoffs, retry limits, worker retirement,
//! dedup retention) lives here rather than in code.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

use crate::error::{ConfigError, Result};

/// Main application configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database path. Unset runs on the in-memory store (local mode).
    pub database: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub triage: TriageConfig,
    pub billing: BillingConfig,
    pub dispatcher: DispatcherConfig,
    pub collaborators: CollaboratorsConfig,
    pub health: HealthConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

/// Severity policy. An incident is EMERGENCY priority when the upstream
/// triage status says so or when vitals breach these cutoffs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    pub spo2_emergency_below: f64,
    pub heart_rate_emergency_above: f64,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            spo2_emergency_below: 90.0,
            heart_rate_emergency_above: 130.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    /// Default charge amount when no covered amount is known.
    pub default_amount: Decimal,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            default_amount: Decimal::new(100, 0),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Upper bound on incidents processed concurrently.
    pub pool_size: usize,
    /// Queue depth of one per-incident worker.
    pub worker_queue_capacity: usize,
    /// Idle period after which a per-incident worker retires.
    pub worker_idle_secs: u64,
    /// Dedup ledger retention window.
    pub dedup_retention_hours: u64,
    /// Interval between dedup GC sweeps.
    pub dedup_gc_interval_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            pool_size: num_cpus::get().max(2),
            worker_queue_capacity: 64,
            worker_idle_secs: 300,
            dedup_retention_hours: 24,
            dedup_gc_interval_secs: 600,
        }
    }
}

impl DispatcherConfig {
    pub fn worker_idle(&self) -> Duration {
        Duration::from_secs(self.worker_idle_secs)
    }

    pub fn dedup_retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.dedup_retention_hours as i64)
    }

    pub fn dedup_gc_interval(&self) -> Duration {
        Duration::from_secs(self.dedup_gc_interval_secs)
    }
}

/// Synchronous collaborator endpoints and their retry policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollaboratorsConfig {
    pub insurance_url: String,
    pub payments_url: String,
    pub retry: RetryConfig,
}

impl Default for CollaboratorsConfig {
    fn default() -> Self {
        Self {
            insurance_url: "http://insurance:5200".into(),
            payments_url: "http://payments:5300".into(),
            retry: RetryConfig::default(),
        }
    }
}

/// Bounded exponential backoff for collaborator calls. Exhaustion drives the
/// saga into its failure branch, never a crash.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    /// Overall deadline for one logical call, retries included.
    pub deadline_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 200,
            deadline_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub bind: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8011".into(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        let config: Self = toml::from_str(&content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.collaborators.insurance_url.is_empty() {
            return Err(ConfigError::MissingField {
                field: "collaborators.insurance_url",
            }
            .into());
        }
        if self.collaborators.payments_url.is_empty() {
            return Err(ConfigError::MissingField {
                field: "collaborators.payments_url",
            }
            .into());
        }
        url::Url::parse(&self.collaborators.insurance_url).map_err(|e| {
            ConfigError::InvalidValue {
                field: "collaborators.insurance_url",
                reason: e.to_string(),
            }
        })?;
        url::Url::parse(&self.collaborators.payments_url).map_err(|e| {
            ConfigError::InvalidValue {
                field: "collaborators.payments_url",
                reason: e.to_string(),
            }
        })?;
        if self.dispatcher.pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "dispatcher.pool_size",
                reason: "must be at least 1".into(),
            }
            .into());
        }
        if self.dispatcher.worker_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "dispatcher.worker_queue_capacity",
                reason: "must be at least 1".into(),
            }
            .into());
        }
        if self.dispatcher.dedup_gc_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "dispatcher.dedup_gc_interval_secs",
                reason: "must be at least 1".into(),
            }
            .into());
        }
        if self.collaborators.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "collaborators.retry.max_attempts",
                reason: "must be at least 1".into(),
            }
            .into());
        }
        Ok(())
    }

    /// Initialize logging with the configured settings.
    pub fn init_logging(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.logging.level));

        match self.logging.format.as_str() {
            "json" => {
                fmt().json().with_env_filter(filter).init();
            }
            _ => {
                fmt().with_env_filter(filter).init();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let toml = r#"
            [triage]
            spo2_emergency_below = 92.0

            [collaborators]
            insurance_url = "http://localhost:5200"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.triage.spo2_emergency_below, 92.0);
        assert_eq!(config.triage.heart_rate_emergency_above, 130.0);
        assert_eq!(config.collaborators.insurance_url, "http://localhost:5200");
        assert_eq!(config.collaborators.retry.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_collaborator_url() {
        let mut config = Config::default();
        config.collaborators.payments_url = "not a url".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_pool_size() {
        let mut config = Config::default();
        config.dispatcher.pool_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn retention_window_converts_to_chrono() {
        let config = DispatcherConfig::default();
        assert_eq!(config.dedup_retention(), chrono::Duration::hours(24));
    }
}
