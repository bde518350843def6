use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

/// A provider account tracked for billing-data retrieval.
/// Maps to the `billrun_accounts` table, unique on `(provider_id, account_number)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub account_id: i64,
    pub provider_id: i64,
    pub account_number: String,
    pub display_name: Option<String>,
    pub credential_ref: Option<String>,
    /// Last billing period (`YYYY-MM`) with a completed retrieval.
    pub last_successful_period: Option<String>,
    /// True when the provider reports no retrievable history for the
    /// account; such accounts are skipped by work-item creation.
    pub history_missing: bool,
    pub last_touched_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One account record as returned by the provider listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAccountRecord {
    pub provider_id: i64,
    pub account_number: String,
    pub display_name: Option<String>,
    pub credential_ref: Option<String>,
    pub history_missing: bool,
}

const ACCOUNT_COLUMNS: &str = "account_id, provider_id, account_number, display_name, credential_ref, \
     last_successful_period, history_missing, last_touched_at, deleted_at, created_at, updated_at";

impl Account {
    /// Upsert one page of provider records. Touched rows get
    /// `last_touched_at = NOW()` and are revived if previously soft-deleted,
    /// which is what makes the post-sync deletion sweep safe.
    pub async fn upsert_batch(
        pool: &PgPool,
        records: &[ProviderAccountRecord],
    ) -> Result<u64, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let mut touched = 0u64;
        for record in records {
            let result = sqlx::query(
                "INSERT INTO billrun_accounts \
                 (provider_id, account_number, display_name, credential_ref, history_missing, last_touched_at) \
                 VALUES ($1, $2, $3, $4, $5, NOW()) \
                 ON CONFLICT (provider_id, account_number) DO UPDATE SET \
                     display_name = EXCLUDED.display_name, \
                     credential_ref = EXCLUDED.credential_ref, \
                     history_missing = EXCLUDED.history_missing, \
                     last_touched_at = NOW(), \
                     deleted_at = NULL, \
                     updated_at = NOW()",
            )
            .bind(record.provider_id)
            .bind(&record.account_number)
            .bind(&record.display_name)
            .bind(&record.credential_ref)
            .bind(record.history_missing)
            .execute(&mut *tx)
            .await?;
            touched += result.rows_affected();
        }
        tx.commit().await?;
        Ok(touched)
    }

    /// Soft-delete accounts not touched since `since`. Only called when the
    /// sync counts reconcile; otherwise the sweep is skipped entirely.
    pub async fn soft_delete_untouched(
        pool: &PgPool,
        since: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE billrun_accounts \
             SET deleted_at = NOW(), updated_at = NOW() \
             WHERE last_touched_at < $1 AND deleted_at IS NULL",
        )
        .bind(since)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_active(pool: &PgPool) -> Result<Vec<Account>, sqlx::Error> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM billrun_accounts \
             WHERE deleted_at IS NULL \
             ORDER BY account_id"
        );
        sqlx::query_as::<_, Account>(&sql).fetch_all(pool).await
    }

    pub async fn find_by_number(
        pool: &PgPool,
        provider_id: i64,
        account_number: &str,
    ) -> Result<Option<Account>, sqlx::Error> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM billrun_accounts \
             WHERE provider_id = $1 AND account_number = $2 AND deleted_at IS NULL"
        );
        sqlx::query_as::<_, Account>(&sql)
            .bind(provider_id)
            .bind(account_number)
            .fetch_optional(pool)
            .await
    }

    /// Record a completed retrieval for a period. Periods only move forward.
    pub async fn record_successful_period(
        pool: &PgPool,
        provider_id: i64,
        account_number: &str,
        period: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE billrun_accounts \
             SET last_successful_period = GREATEST(COALESCE(last_successful_period, ''), $3), \
                 updated_at = NOW() \
             WHERE provider_id = $1 AND account_number = $2",
        )
        .bind(provider_id)
        .bind(account_number)
        .bind(period)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
