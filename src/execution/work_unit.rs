//! Job-kind dispatch.
//!
//! A schedule's `job_kind` discriminant plus JSON payload parse into a
//! [`JobSpec`] — a tagged variant with one work-unit implementation per
//! kind. The payload is validated against the kind before execution, so a
//! misconfigured schedule fails fast with a readable error instead of deep
//! inside the unit.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::http_unit::HttpUnit;
use super::outcome::Outcome;
use super::procedure_unit::ProcedureUnit;
use super::process_unit::ProcessUnit;
use crate::config::ArchivalConfig;
use crate::services::archival::ArchivalUnit;

#[derive(Debug, Error)]
pub enum JobConfigError {
    #[error("unknown job kind: {0}")]
    UnknownKind(String),

    #[error("invalid {kind} configuration: {message}")]
    InvalidPayload { kind: &'static str, message: String },
}

/// Everything a work unit may touch while running.
pub struct UnitContext {
    pub pool: PgPool,
    pub http: reqwest::Client,
    pub cancel: CancellationToken,
}

/// A single unit of work with a terminal outcome. Implementations observe
/// `ctx.cancel` cooperatively between major steps; only process launches may
/// be force-terminated.
#[async_trait]
pub trait WorkUnit: Send + Sync {
    async fn run(&self, ctx: &UnitContext) -> Outcome;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessJobConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpJobConfig {
    pub url: String,
    #[serde(default = "default_http_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

fn default_http_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureJobConfig {
    pub procedure: String,
    #[serde(default)]
    pub params: Vec<String>,
}

/// Validated job specification, one variant per job kind.
#[derive(Debug, Clone, PartialEq)]
pub enum JobSpec {
    ProcessLaunch(ProcessJobConfig),
    HttpCall(HttpJobConfig),
    StoredProcedure(ProcedureJobConfig),
    Archival(ArchivalConfig),
}

impl JobSpec {
    /// Parse and validate a schedule's kind/payload pair.
    pub fn parse(kind: &str, payload: &serde_json::Value) -> Result<JobSpec, JobConfigError> {
        match kind {
            "process_launch" => {
                let config: ProcessJobConfig = parse_payload("process_launch", payload)?;
                if config.command.trim().is_empty() {
                    return Err(JobConfigError::InvalidPayload {
                        kind: "process_launch",
                        message: "command must not be empty".to_string(),
                    });
                }
                Ok(JobSpec::ProcessLaunch(config))
            }
            "http_call" => {
                let config: HttpJobConfig = parse_payload("http_call", payload)?;
                if reqwest::Method::from_bytes(config.method.as_bytes()).is_err() {
                    return Err(JobConfigError::InvalidPayload {
                        kind: "http_call",
                        message: format!("invalid HTTP method: {}", config.method),
                    });
                }
                if config.url.trim().is_empty() {
                    return Err(JobConfigError::InvalidPayload {
                        kind: "http_call",
                        message: "url must not be empty".to_string(),
                    });
                }
                Ok(JobSpec::HttpCall(config))
            }
            "stored_procedure" => {
                let config: ProcedureJobConfig = parse_payload("stored_procedure", payload)?;
                if !is_valid_procedure_name(&config.procedure) {
                    return Err(JobConfigError::InvalidPayload {
                        kind: "stored_procedure",
                        message: format!("invalid procedure name: {}", config.procedure),
                    });
                }
                Ok(JobSpec::StoredProcedure(config))
            }
            "archival" => {
                let config: ArchivalConfig = parse_payload("archival", payload)?;
                Ok(JobSpec::Archival(config))
            }
            other => Err(JobConfigError::UnknownKind(other.to_string())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProcessLaunch(_) => "process_launch",
            Self::HttpCall(_) => "http_call",
            Self::StoredProcedure(_) => "stored_procedure",
            Self::Archival(_) => "archival",
        }
    }

    /// Build the runnable unit for this spec.
    pub fn into_unit(self) -> Box<dyn WorkUnit> {
        match self {
            Self::ProcessLaunch(config) => Box::new(ProcessUnit::new(config)),
            Self::HttpCall(config) => Box::new(HttpUnit::new(config)),
            Self::StoredProcedure(config) => Box::new(ProcedureUnit::new(config)),
            Self::Archival(config) => Box::new(ArchivalUnit::new(config)),
        }
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(
    kind: &'static str,
    payload: &serde_json::Value,
) -> Result<T, JobConfigError> {
    serde_json::from_value(payload.clone()).map_err(|e| JobConfigError::InvalidPayload {
        kind,
        message: e.to_string(),
    })
}

/// Schema-qualified identifiers only; anything else is rejected before it
/// reaches SQL.
fn is_valid_procedure_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').count() <= 2
        && name.split('.').all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !part.chars().next().unwrap_or('0').is_ascii_digit()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_process_launch_payload() {
        let spec = JobSpec::parse(
            "process_launch",
            &json!({"command": "/usr/local/bin/export", "args": ["--full"]}),
        )
        .unwrap();
        assert_eq!(spec.kind(), "process_launch");
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = JobSpec::parse("ftp_upload", &json!({})).unwrap_err();
        assert!(matches!(err, JobConfigError::UnknownKind(_)));
    }

    #[test]
    fn rejects_payload_not_matching_kind() {
        // An HTTP payload handed to a process kind is missing `command`.
        let err = JobSpec::parse("process_launch", &json!({"url": "https://x.test"})).unwrap_err();
        assert!(matches!(err, JobConfigError::InvalidPayload { .. }));
    }

    #[test]
    fn rejects_invalid_http_method() {
        let err = JobSpec::parse(
            "http_call",
            &json!({"url": "https://x.test", "method": "FETCH ME"}),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            JobConfigError::InvalidPayload {
                kind: "http_call",
                ..
            }
        ));
    }

    #[test]
    fn procedure_names_are_validated() {
        assert!(is_valid_procedure_name("refresh_balances"));
        assert!(is_valid_procedure_name("billing.refresh_balances"));
        assert!(!is_valid_procedure_name("1bad"));
        assert!(!is_valid_procedure_name("drop table; --"));
        assert!(!is_valid_procedure_name(""));
        assert!(!is_valid_procedure_name("a.b.c"));
    }

    #[test]
    fn archival_payload_defaults_apply() {
        let spec = JobSpec::parse("archival", &json!({})).unwrap();
        match spec {
            JobSpec::Archival(config) => assert_eq!(config.archive_after_days, 90),
            other => panic!("unexpected spec: {other:?}"),
        }
    }
}
