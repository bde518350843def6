//! External process launch work unit.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::outcome::Outcome;
use super::work_unit::{ProcessJobConfig, UnitContext, WorkUnit};

/// Output captured from either stream is capped so a chatty job cannot bloat
/// the execution row.
const MAX_CAPTURED_OUTPUT: usize = 64 * 1024;

pub struct ProcessUnit {
    config: ProcessJobConfig,
}

impl ProcessUnit {
    pub fn new(config: ProcessJobConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl WorkUnit for ProcessUnit {
    async fn run(&self, ctx: &UnitContext) -> Outcome {
        let mut command = Command::new(&self.config.command);
        command.args(&self.config.args);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }
        for (key, value) in &self.config.env {
            command.env(key, value);
        }
        // Process jobs are the one kind that may be force-terminated: when
        // the executor's timeout drops this future, the child goes with it.
        command.kill_on_drop(true);

        debug!(command = %self.config.command, "launching process");

        let waited = tokio::select! {
            _ = ctx.cancel.cancelled() => return Outcome::Cancelled,
            waited = command.output() => waited,
        };

        match waited {
            Ok(output) => {
                let stdout = truncate(&String::from_utf8_lossy(&output.stdout));
                let stderr = truncate(&String::from_utf8_lossy(&output.stderr));
                if output.status.success() {
                    Outcome::Success { output: stdout }
                } else {
                    Outcome::Failure {
                        error: format!(
                            "process exited with {}: {}",
                            output.status,
                            if stderr.is_empty() { &stdout } else { &stderr }
                        ),
                        stack: None,
                    }
                }
            }
            Err(e) => Outcome::Failure {
                error: format!("failed to launch {}: {e}", self.config.command),
                stack: None,
            },
        }
    }
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_CAPTURED_OUTPUT {
        text.to_string()
    } else {
        let mut end = MAX_CAPTURED_OUTPUT;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated]", &text[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tokio_util::sync::CancellationToken;

    fn context() -> UnitContext {
        UnitContext {
            pool: sqlx::postgres::PgPoolOptions::new()
                .connect_lazy("postgresql://localhost/billrun_test")
                .expect("lazy pool"),
            http: reqwest::Client::new(),
            cancel: CancellationToken::new(),
        }
    }

    fn unit(command: &str, args: &[&str]) -> ProcessUnit {
        ProcessUnit::new(ProcessJobConfig {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            working_dir: None,
            env: HashMap::new(),
        })
    }

    #[tokio::test]
    async fn successful_process_captures_stdout() {
        let outcome = unit("/bin/sh", &["-c", "echo captured"]).run(&context()).await;
        match outcome {
            Outcome::Success { output } => assert_eq!(output.trim(), "captured"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failing_process_reports_stderr() {
        let outcome = unit("/bin/sh", &["-c", "echo broken >&2; exit 3"])
            .run(&context())
            .await;
        match outcome {
            Outcome::Failure { error, .. } => assert!(error.contains("broken")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_a_failure_not_a_panic() {
        let outcome = unit("/nonexistent/billrun-job", &[]).run(&context()).await;
        assert!(matches!(outcome, Outcome::Failure { .. }));
    }

    #[tokio::test]
    async fn cancellation_wins_over_a_slow_process() {
        let ctx = context();
        ctx.cancel.cancel();
        let outcome = unit("/bin/sh", &["-c", "sleep 30"]).run(&ctx).await;
        assert_eq!(outcome, Outcome::Cancelled);
    }

    #[tokio::test]
    async fn script_from_tempfile_runs() {
        let mut script = tempfile::NamedTempFile::new().unwrap();
        writeln!(script, "#!/bin/sh\necho from-script").unwrap();
        let path = script.path().to_string_lossy().to_string();
        let outcome = unit("/bin/sh", &[&path]).run(&context()).await;
        match outcome {
            Outcome::Success { output } => assert_eq!(output.trim(), "from-script"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = "é".repeat(MAX_CAPTURED_OUTPUT);
        let truncated = truncate(&long);
        assert!(truncated.ends_with("[truncated]"));
        assert!(truncated.len() <= MAX_CAPTURED_OUTPUT + 16);
    }
}
