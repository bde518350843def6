//! reqwest-backed provider client.
//!
//! Applies its own bounded exponential backoff to transient responses
//! (429 and 5xx) and network errors. This retry loop is independent of the
//! executor-level retry scheduler: it smooths over blips within one call,
//! while the scheduler re-runs whole work units.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{
    AccountPage, ClientError, CredentialCheck, ProviderClient, ScrapeReceipt, ScrapeStatus,
};
use crate::config::ProviderClientConfig;
use crate::models::ProviderAccountRecord;

/// 429 and 5xx responses are worth retrying; everything else 4xx is a
/// permanent application error.
pub fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

pub struct HttpProviderClient {
    http: reqwest::Client,
    base_url: String,
    max_attempts: u32,
    backoff_base: Duration,
}

impl HttpProviderClient {
    pub fn new(config: &ProviderClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| ClientError::Permanent {
                status: None,
                message: format!("client construction failed: {e}"),
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
        })
    }

    async fn send_with_retry<T: DeserializeOwned>(
        &self,
        build: impl Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        let mut delay = self.backoff_base;
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }

            let outcome = match build(&self.http).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<T>().await.map_err(|e| {
                            ClientError::Permanent {
                                status: Some(status.as_u16()),
                                message: format!("malformed provider response: {e}"),
                            }
                        });
                    }
                    let body = response.text().await.unwrap_or_default();
                    classify_response(status, body)
                }
                Err(e) => ClientError::Transient {
                    status: None,
                    message: format!("request failed: {e}"),
                },
            };

            if !outcome.is_transient() {
                return Err(outcome);
            }
            debug!(attempt, max_attempts = self.max_attempts, error = %outcome, "transient provider error");
            last_error = Some(outcome);
        }

        let exhausted = last_error.unwrap_or_else(|| ClientError::Transient {
            status: None,
            message: "retries exhausted".to_string(),
        });
        warn!(error = %exhausted, "provider call exhausted transient retries");
        Err(exhausted)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

fn classify_response(status: StatusCode, body: String) -> ClientError {
    let code = status.as_u16();
    let message = if body.is_empty() {
        status.to_string()
    } else {
        body
    };
    if is_transient_status(code) {
        ClientError::Transient {
            status: Some(code),
            message,
        }
    } else {
        ClientError::Permanent {
            status: Some(code),
            message,
        }
    }
}

#[derive(Deserialize)]
struct AccountListingResponse {
    accounts: Vec<AccountListingRecord>,
    total: Option<u64>,
}

#[derive(Deserialize)]
struct AccountListingRecord {
    account_number: String,
    provider_id: i64,
    display_name: Option<String>,
    credential_ref: Option<String>,
    #[serde(default)]
    history_missing: bool,
}

#[derive(Deserialize)]
struct CredentialVerifyResponse {
    valid: bool,
    reason: Option<String>,
}

#[derive(Deserialize)]
struct ScrapeSubmitResponse {
    remote_ref: String,
    accepted_at: DateTime<Utc>,
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn fetch_accounts(&self, page: u32, page_size: u32) -> Result<AccountPage, ClientError> {
        let url = self.url("/v1/accounts");
        let listing: AccountListingResponse = self
            .send_with_retry(|http| {
                http.get(&url)
                    .query(&[("page", page), ("page_size", page_size)])
            })
            .await?;

        Ok(AccountPage {
            records: listing
                .accounts
                .into_iter()
                .map(|a| ProviderAccountRecord {
                    provider_id: a.provider_id,
                    account_number: a.account_number,
                    display_name: a.display_name,
                    credential_ref: a.credential_ref,
                    history_missing: a.history_missing,
                })
                .collect(),
            total_reported: listing.total,
        })
    }

    async fn verify_credentials(
        &self,
        account_number: &str,
        credential_ref: &str,
    ) -> Result<CredentialCheck, ClientError> {
        let url = self.url("/v1/credentials/verify");
        let body = json!({
            "account_number": account_number,
            "credential_ref": credential_ref,
        });
        let verdict: CredentialVerifyResponse = self
            .send_with_retry(|http| http.post(&url).json(&body))
            .await?;

        Ok(if verdict.valid {
            CredentialCheck::Valid
        } else {
            CredentialCheck::Invalid {
                reason: verdict
                    .reason
                    .unwrap_or_else(|| "credentials rejected".to_string()),
            }
        })
    }

    async fn submit_scrape(
        &self,
        account_number: &str,
        period: &str,
    ) -> Result<ScrapeReceipt, ClientError> {
        let url = self.url("/v1/scrapes");
        let body = json!({
            "account_number": account_number,
            "period": period,
        });
        let receipt: ScrapeSubmitResponse = self
            .send_with_retry(|http| http.post(&url).json(&body))
            .await?;

        Ok(ScrapeReceipt {
            remote_ref: receipt.remote_ref,
            accepted_at: receipt.accepted_at,
        })
    }

    async fn scrape_status(&self, remote_ref: &str) -> Result<ScrapeStatus, ClientError> {
        let url = self.url(&format!("/v1/scrapes/{remote_ref}/status"));
        self.send_with_retry(|http| http.get(&url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_status_classification() {
        assert!(is_transient_status(429));
        assert!(is_transient_status(500));
        assert!(is_transient_status(503));
        assert!(!is_transient_status(400));
        assert!(!is_transient_status(401));
        assert!(!is_transient_status(404));
        assert!(!is_transient_status(200));
    }

    #[test]
    fn classify_response_splits_taxonomy() {
        let transient = classify_response(StatusCode::SERVICE_UNAVAILABLE, String::new());
        assert!(transient.is_transient());

        let permanent = classify_response(StatusCode::UNPROCESSABLE_ENTITY, "bad period".into());
        assert!(!permanent.is_transient());
    }

    #[test]
    fn scrape_status_deserializes_tagged_variants() {
        let complete: ScrapeStatus =
            serde_json::from_str(r#"{"status":"complete","document_ref":"doc-9"}"#).unwrap();
        assert_eq!(
            complete,
            ScrapeStatus::Complete {
                document_ref: "doc-9".to_string()
            }
        );

        let in_progress: ScrapeStatus = serde_json::from_str(r#"{"status":"in_progress"}"#).unwrap();
        assert_eq!(in_progress, ScrapeStatus::InProgress);
    }
}
