//! Configuration Module Tests
//!
//! Tests for BillrunConfig defaults, validation, and loading.

use billrun_core::config::{BillrunConfig, OrchestrationConfig};

#[test]
fn config_loads_successfully() {
    let config = BillrunConfig::default();
    assert_eq!(config.orchestration.worker_count, 15);
    assert_eq!(config.retry.default_max_retries, 3);
}

#[test]
fn config_has_expected_defaults() {
    let config = BillrunConfig::default();

    assert_eq!(
        config.database.url,
        "postgresql://localhost/billrun_development"
    );
    assert_eq!(config.database.max_connections, 10);
    assert_eq!(config.database.command_timeout_seconds, 300);
    assert_eq!(config.retry.default_base_delay_seconds, 300);
    assert_eq!(config.orchestration.sync_page_size, 500);
    assert_eq!(config.orchestration.processing_window_hours, 24);
    assert_eq!(config.recovery.grace_period_seconds, 600);
    assert!(!config.recovery.resume_interrupted);
    assert_eq!(config.archival.archive_after_days, 90);
    assert_eq!(config.provider.max_attempts, 4);
}

#[test]
fn load_without_file_or_env_matches_defaults() {
    let loaded = BillrunConfig::load().expect("load should succeed");
    assert_eq!(
        loaded.orchestration.worker_count,
        OrchestrationConfig::default().worker_count
    );
    assert_eq!(loaded.executor.retry_on_timeout, true);
}

#[test]
fn validation_rejects_broken_sections() {
    let mut config = BillrunConfig::default();
    config.orchestration.sync_page_size = 0;
    assert!(config.validate().is_err());

    let mut config = BillrunConfig::default();
    config.provider.max_attempts = 0;
    assert!(config.validate().is_err());

    let mut config = BillrunConfig::default();
    config.retry.default_max_retries = -1;
    assert!(config.validate().is_err());
}

#[test]
fn timeouts_convert_to_durations() {
    let config = BillrunConfig::default();
    assert_eq!(config.acquire_timeout().as_secs(), 10);
    assert_eq!(config.command_timeout().as_secs(), 300);
}
