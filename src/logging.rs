//! Structured logging initialization.
//!
//! Console output is human-readable; setting `BILLRUN_LOG_JSON=1` switches
//! to JSON lines for log shippers. Repeat initialization is a no-op so tests
//! and embedding processes can call this freely.

use std::sync::OnceLock;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise from the detected
/// environment (`debug` outside production, `info` in production).
pub fn init_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_log_level(&environment())));

        let json_output = std::env::var("BILLRUN_LOG_JSON")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let init_result = if json_output {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_target(true))
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_target(true))
                .try_init()
        };

        if init_result.is_err() {
            // A subscriber was already installed by the embedding process.
            tracing::debug!("global tracing subscriber already initialized");
        }
    });
}

fn environment() -> String {
    std::env::var("BILLRUN_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn default_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_mapping() {
        assert_eq!(default_log_level("production"), "info");
        assert_eq!(default_log_level("development"), "debug");
        assert_eq!(default_log_level("test"), "debug");
    }

    #[test]
    fn init_is_idempotent() {
        init_logging();
        init_logging();
    }
}
