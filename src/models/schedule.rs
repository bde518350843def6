use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::time::Duration;

use crate::config::ExecutorConfig;

/// A recurring or on-demand job definition owned by a client (tenant).
/// Maps to the `billrun_schedules` table.
///
/// Soft-deleted or disabled schedules must never be loaded for firing;
/// [`JobSchedule::is_fireable`] is the single place that rule lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct JobSchedule {
    pub schedule_id: i64,
    pub client_id: i64,
    pub name: String,
    pub cron_expression: String,
    pub time_zone: String,
    pub enabled: bool,
    pub max_retries: i32,
    pub retry_base_delay_seconds: i64,
    pub timeout_seconds: Option<i64>,
    pub job_kind: String,
    pub job_config: serde_json::Value,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJobSchedule {
    pub client_id: i64,
    pub name: String,
    pub cron_expression: String,
    pub time_zone: String,
    pub max_retries: i32,
    pub retry_base_delay_seconds: i64,
    pub timeout_seconds: Option<i64>,
    pub job_kind: String,
    pub job_config: serde_json::Value,
}

const SCHEDULE_COLUMNS: &str = "schedule_id, client_id, name, cron_expression, time_zone, enabled, \
     max_retries, retry_base_delay_seconds, timeout_seconds, job_kind, job_config, \
     deleted_at, created_at, updated_at";

impl JobSchedule {
    pub async fn create(pool: &PgPool, new: NewJobSchedule) -> Result<JobSchedule, sqlx::Error> {
        let sql = format!(
            "INSERT INTO billrun_schedules \
             (client_id, name, cron_expression, time_zone, enabled, max_retries, \
              retry_base_delay_seconds, timeout_seconds, job_kind, job_config) \
             VALUES ($1, $2, $3, $4, TRUE, $5, $6, $7, $8, $9) \
             RETURNING {SCHEDULE_COLUMNS}"
        );
        sqlx::query_as::<_, JobSchedule>(&sql)
            .bind(new.client_id)
            .bind(&new.name)
            .bind(&new.cron_expression)
            .bind(&new.time_zone)
            .bind(new.max_retries)
            .bind(new.retry_base_delay_seconds)
            .bind(new.timeout_seconds)
            .bind(&new.job_kind)
            .bind(&new.job_config)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<JobSchedule>, sqlx::Error> {
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM billrun_schedules WHERE schedule_id = $1");
        sqlx::query_as::<_, JobSchedule>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// All schedules eligible for trigger registration at bootstrap.
    pub async fn list_fireable(pool: &PgPool) -> Result<Vec<JobSchedule>, sqlx::Error> {
        let sql = format!(
            "SELECT {SCHEDULE_COLUMNS} FROM billrun_schedules \
             WHERE enabled = TRUE AND deleted_at IS NULL \
             ORDER BY schedule_id"
        );
        sqlx::query_as::<_, JobSchedule>(&sql).fetch_all(pool).await
    }

    pub async fn set_enabled(
        pool: &PgPool,
        id: i64,
        enabled: bool,
    ) -> Result<Option<JobSchedule>, sqlx::Error> {
        let sql = format!(
            "UPDATE billrun_schedules \
             SET enabled = $2, updated_at = NOW() \
             WHERE schedule_id = $1 AND deleted_at IS NULL \
             RETURNING {SCHEDULE_COLUMNS}"
        );
        sqlx::query_as::<_, JobSchedule>(&sql)
            .bind(id)
            .bind(enabled)
            .fetch_optional(pool)
            .await
    }

    pub async fn soft_delete(pool: &PgPool, id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE billrun_schedules SET deleted_at = NOW(), updated_at = NOW() \
             WHERE schedule_id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Disabled and soft-deleted schedules are rejected with a no-op by the
    /// executor.
    pub fn is_fireable(&self) -> bool {
        self.enabled && self.deleted_at.is_none()
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.retry_base_delay_seconds.max(0) as u64)
    }

    /// Schedule timeout, falling back to the job-kind default.
    pub fn effective_timeout(&self, executor: &ExecutorConfig) -> Duration {
        match self.timeout_seconds {
            Some(seconds) if seconds > 0 => Duration::from_secs(seconds as u64),
            _ => match self.job_kind.as_str() {
                "process_launch" => Duration::from_secs(executor.process_timeout_seconds),
                "http_call" => Duration::from_secs(executor.http_timeout_seconds),
                "stored_procedure" => Duration::from_secs(executor.procedure_timeout_seconds),
                "archival" => Duration::from_secs(executor.archival_timeout_seconds),
                _ => Duration::from_secs(executor.http_timeout_seconds),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(enabled: bool, deleted: bool, timeout: Option<i64>) -> JobSchedule {
        JobSchedule {
            schedule_id: 1,
            client_id: 7,
            name: "nightly-invoice-pull".to_string(),
            cron_expression: "0 2 * * *".to_string(),
            time_zone: "America/Chicago".to_string(),
            enabled,
            max_retries: 3,
            retry_base_delay_seconds: 300,
            timeout_seconds: timeout,
            job_kind: "http_call".to_string(),
            job_config: serde_json::json!({"url": "https://example.test/pull"}),
            deleted_at: deleted.then(Utc::now),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn fireable_requires_enabled_and_not_deleted() {
        assert!(schedule(true, false, None).is_fireable());
        assert!(!schedule(false, false, None).is_fireable());
        assert!(!schedule(true, true, None).is_fireable());
        assert!(!schedule(false, true, None).is_fireable());
    }

    #[test]
    fn effective_timeout_prefers_schedule_value() {
        let executor = ExecutorConfig::default();
        let with_own = schedule(true, false, Some(42));
        assert_eq!(
            with_own.effective_timeout(&executor),
            Duration::from_secs(42)
        );

        let fallback = schedule(true, false, None);
        assert_eq!(
            fallback.effective_timeout(&executor),
            Duration::from_secs(executor.http_timeout_seconds)
        );
    }

    #[test]
    fn non_positive_timeout_falls_back_to_kind_default() {
        let executor = ExecutorConfig::default();
        let zero = schedule(true, false, Some(0));
        assert_eq!(
            zero.effective_timeout(&executor),
            Duration::from_secs(executor.http_timeout_seconds)
        );
    }
}
