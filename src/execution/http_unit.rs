//! HTTP call work unit.

use async_trait::async_trait;
use tracing::debug;

use super::outcome::Outcome;
use super::work_unit::{HttpJobConfig, UnitContext, WorkUnit};

const MAX_CAPTURED_BODY: usize = 64 * 1024;

pub struct HttpUnit {
    config: HttpJobConfig,
}

impl HttpUnit {
    pub fn new(config: HttpJobConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl WorkUnit for HttpUnit {
    async fn run(&self, ctx: &UnitContext) -> Outcome {
        // Validated at parse time; a bad method slipping through is a
        // configuration bug surfaced as a failure, not a panic.
        let method = match reqwest::Method::from_bytes(self.config.method.as_bytes()) {
            Ok(method) => method,
            Err(_) => return Outcome::failure(format!("invalid HTTP method: {}", self.config.method)),
        };

        let mut request = ctx.http.request(method, &self.config.url);
        for (name, value) in &self.config.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &self.config.body {
            request = request.json(body);
        }

        debug!(url = %self.config.url, method = %self.config.method, "issuing HTTP job call");

        let sent = tokio::select! {
            _ = ctx.cancel.cancelled() => return Outcome::Cancelled,
            sent = request.send() => sent,
        };

        match sent {
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let body = if body.len() > MAX_CAPTURED_BODY {
                    let mut end = MAX_CAPTURED_BODY;
                    while !body.is_char_boundary(end) {
                        end -= 1;
                    }
                    format!("{}... [truncated]", &body[..end])
                } else {
                    body
                };

                if status.is_success() {
                    Outcome::Success { output: body }
                } else {
                    Outcome::Failure {
                        error: format!("HTTP {status}: {body}"),
                        stack: None,
                    }
                }
            }
            Err(e) => Outcome::failure(format!("request to {} failed: {e}", self.config.url)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
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

    #[tokio::test]
    async fn cancellation_short_circuits_the_call() {
        let ctx = context();
        ctx.cancel.cancel();
        let unit = HttpUnit::new(HttpJobConfig {
            url: "http://127.0.0.1:1/never".to_string(),
            method: "GET".to_string(),
            headers: HashMap::new(),
            body: None,
        });
        assert_eq!(unit.run(&ctx).await, Outcome::Cancelled);
    }

    #[tokio::test]
    async fn unreachable_host_is_a_failure() {
        let unit = HttpUnit::new(HttpJobConfig {
            // Port 1 on loopback: connection refused immediately.
            url: "http://127.0.0.1:1/health".to_string(),
            method: "GET".to_string(),
            headers: HashMap::new(),
            body: None,
        });
        match unit.run(&context()).await {
            Outcome::Failure { error, .. } => assert!(error.contains("failed")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
