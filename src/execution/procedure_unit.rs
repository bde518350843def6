//! Stored-procedure invocation work unit.

use async_trait::async_trait;
use tracing::debug;

use super::outcome::Outcome;
use super::work_unit::{ProcedureJobConfig, UnitContext, WorkUnit};

pub struct ProcedureUnit {
    config: ProcedureJobConfig,
}

impl ProcedureUnit {
    pub fn new(config: ProcedureJobConfig) -> Self {
        Self { config }
    }

    /// `CALL name($1, $2, ...)`. The procedure name was validated as an
    /// identifier at parse time; parameters are always bound, never spliced.
    fn call_sql(&self) -> String {
        let placeholders: Vec<String> = (1..=self.config.params.len())
            .map(|i| format!("${i}"))
            .collect();
        format!("CALL {}({})", self.config.procedure, placeholders.join(", "))
    }
}

#[async_trait]
impl WorkUnit for ProcedureUnit {
    async fn run(&self, ctx: &UnitContext) -> Outcome {
        let sql = self.call_sql();
        debug!(procedure = %self.config.procedure, "invoking stored procedure");

        let mut query = sqlx::query(&sql);
        for param in &self.config.params {
            query = query.bind(param);
        }

        let executed = tokio::select! {
            _ = ctx.cancel.cancelled() => return Outcome::Cancelled,
            executed = query.execute(&ctx.pool) => executed,
        };

        match executed {
            Ok(result) => Outcome::Success {
                output: format!(
                    "procedure {} completed ({} rows affected)",
                    self.config.procedure,
                    result.rows_affected()
                ),
            },
            Err(e) => Outcome::failure(format!(
                "procedure {} failed: {e}",
                self.config.procedure
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_sql_binds_every_parameter() {
        let unit = ProcedureUnit::new(ProcedureJobConfig {
            procedure: "billing.refresh_balances".to_string(),
            params: vec!["2026-07".to_string(), "full".to_string()],
        });
        assert_eq!(unit.call_sql(), "CALL billing.refresh_balances($1, $2)");
    }

    #[test]
    fn call_sql_with_no_parameters() {
        let unit = ProcedureUnit::new(ProcedureJobConfig {
            procedure: "refresh_balances".to_string(),
            params: vec![],
        });
        assert_eq!(unit.call_sql(), "CALL refresh_balances()");
    }
}
