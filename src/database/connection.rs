//! Connection pool construction and health checks.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::DatabaseConfig;

/// Build the shared connection pool.
///
/// Every connection gets a session-level `statement_timeout` so the batched
/// sweeps (account soft-delete, stale-item finalization, archival) cannot
/// hold the pool hostage.
pub async fn init_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let statement_timeout_ms = config.command_timeout_seconds * 1_000;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(std::time::Duration::from_secs(
            config.acquire_timeout_seconds,
        ))
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                sqlx::query(&format!(
                    "SET statement_timeout = {statement_timeout_ms}"
                ))
                .execute(conn)
                .await?;
                Ok(())
            })
        })
        .connect(&config.url)
        .await?;

    info!(
        max_connections = config.max_connections,
        statement_timeout_ms, "database pool initialized"
    );

    Ok(pool)
}

/// Cheap connectivity probe used by bootstrap and recovery.
pub async fn health_check(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1 AS health").execute(pool).await?;
    Ok(())
}
