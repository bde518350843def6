//! Configuration management.
//!
//! Section structs deserialize from an optional TOML file plus
//! `BILLRUN_`-prefixed environment overrides (`BILLRUN_DATABASE__URL`,
//! `BILLRUN_ORCHESTRATION__WORKER_COUNT`, ...). Every section carries
//! defaults so the crate is usable with no configuration at all.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{DEFAULT_SYNC_PAGE_SIZE, DEFAULT_WORKER_COUNT};

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read configuration: {0}")]
    Read(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration for the scheduling/orchestration core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillrunConfig {
    pub database: DatabaseConfig,
    pub executor: ExecutorConfig,
    pub retry: RetryConfig,
    pub orchestration: OrchestrationConfig,
    pub recovery: RecoveryConfig,
    pub archival: ArchivalConfig,
    pub provider: ProviderClientConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
    /// Statement timeout applied to long batch operations (sweeps, archival).
    pub command_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/billrun_development".to_string(),
            max_connections: 10,
            acquire_timeout_seconds: 10,
            command_timeout_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Whether `Timeout` outcomes are eligible for retry scheduling.
    pub retry_on_timeout: bool,
    pub process_timeout_seconds: u64,
    pub http_timeout_seconds: u64,
    pub procedure_timeout_seconds: u64,
    pub archival_timeout_seconds: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        use crate::constants::default_timeouts;
        Self {
            retry_on_timeout: true,
            process_timeout_seconds: default_timeouts::PROCESS_LAUNCH.as_secs(),
            http_timeout_seconds: default_timeouts::HTTP_CALL.as_secs(),
            procedure_timeout_seconds: default_timeouts::STORED_PROCEDURE.as_secs(),
            archival_timeout_seconds: default_timeouts::ARCHIVAL.as_secs(),
        }
    }
}

/// Defaults for schedules that do not carry their own retry settings.
///
/// Delays are exact (`base * 2^n`, no jitter). Simultaneous failures can
/// therefore synchronize their retries; the provider client applies its own
/// transient backoff where that matters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub default_max_retries: i32,
    pub default_base_delay_seconds: i64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            default_base_delay_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    pub worker_count: usize,
    pub sync_page_size: u32,
    /// Accounts whose current period ends within this many days are `DueSoon`.
    pub due_soon_days_before_end: u32,
    /// Items still in a pre-call state after this window are finalized stale.
    pub processing_window_hours: i64,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            sync_page_size: DEFAULT_SYNC_PAGE_SIZE,
            due_soon_days_before_end: 5,
            processing_window_hours: 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Runs left non-terminal for longer than this are eligible for recovery.
    pub grace_period_seconds: i64,
    /// Resume interrupted runs from their recorded phase instead of
    /// force-finalizing them as failed.
    pub resume_interrupted: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            grace_period_seconds: 600,
            resume_interrupted: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchivalConfig {
    pub archive_after_days: i64,
    pub purge_after_days: i64,
    pub batch_size: i64,
}

impl Default for ArchivalConfig {
    fn default() -> Self {
        Self {
            archive_after_days: 90,
            purge_after_days: 365,
            batch_size: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderClientConfig {
    pub base_url: String,
    pub request_timeout_seconds: u64,
    /// Attempts per request, including the first (transient 429/5xx only).
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for ProviderClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout_seconds: 60,
            max_attempts: 4,
            backoff_base_ms: 500,
        }
    }
}

impl BillrunConfig {
    /// Load configuration from environment overrides only.
    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::load_from(None::<&Path>)
    }

    /// Load configuration from an optional file merged with environment
    /// overrides. Environment values win.
    pub fn load_from(path: Option<impl AsRef<Path>>) -> Result<Self, ConfigLoadError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path.as_ref()).required(false),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("BILLRUN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: BillrunConfig = settings.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.orchestration.worker_count == 0 {
            return Err(ConfigLoadError::Invalid(
                "orchestration.worker_count must be at least 1".to_string(),
            ));
        }
        if self.orchestration.sync_page_size == 0 {
            return Err(ConfigLoadError::Invalid(
                "orchestration.sync_page_size must be at least 1".to_string(),
            ));
        }
        if self.retry.default_max_retries < 0 {
            return Err(ConfigLoadError::Invalid(
                "retry.default_max_retries must not be negative".to_string(),
            ));
        }
        if self.retry.default_base_delay_seconds <= 0 {
            return Err(ConfigLoadError::Invalid(
                "retry.default_base_delay_seconds must be positive".to_string(),
            ));
        }
        if self.provider.max_attempts == 0 {
            return Err(ConfigLoadError::Invalid(
                "provider.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.database.acquire_timeout_seconds)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.database.command_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = BillrunConfig::default();
        assert_eq!(config.orchestration.worker_count, 15);
        assert_eq!(config.retry.default_max_retries, 3);
        assert_eq!(config.retry.default_base_delay_seconds, 300);
        assert!(config.executor.retry_on_timeout);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_worker_count_is_rejected() {
        let mut config = BillrunConfig::default();
        config.orchestration.worker_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn negative_base_delay_is_rejected() {
        let mut config = BillrunConfig::default();
        config.retry.default_base_delay_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let config = BillrunConfig::load().expect("load should succeed");
        assert_eq!(
            config.database.max_connections,
            DatabaseConfig::default().max_connections
        );
    }
}
