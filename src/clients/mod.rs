//! Outbound interfaces to the external account/scraping/status systems.
//!
//! Consumed as traits so orchestration phases are testable against fakes;
//! the reqwest-backed implementation lives in [`http`].

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::ProviderAccountRecord;

pub use http::HttpProviderClient;

/// Transport/application errors from the provider, split along the retry
/// taxonomy: transient errors are retried inside the client, permanent ones
/// surface immediately.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transient provider error (status {status:?}): {message}")]
    Transient {
        status: Option<u16>,
        message: String,
    },

    #[error("provider error (status {status:?}): {message}")]
    Permanent {
        status: Option<u16>,
        message: String,
    },
}

impl ClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// One page of the provider's account listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountPage {
    pub records: Vec<ProviderAccountRecord>,
    /// Total count the provider reports for the listing; used for the
    /// fetched-vs-expected reconciliation before the deletion sweep.
    pub total_reported: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CredentialCheck {
    Valid,
    Invalid { reason: String },
}

/// Receipt for an accepted (billable) scrape submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeReceipt {
    pub remote_ref: String,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScrapeStatus {
    InProgress,
    Complete { document_ref: String },
    Failed { reason: String },
}

#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Page through the provider's account listing. Pages are 1-based.
    async fn fetch_accounts(&self, page: u32, page_size: u32) -> Result<AccountPage, ClientError>;

    async fn verify_credentials(
        &self,
        account_number: &str,
        credential_ref: &str,
    ) -> Result<CredentialCheck, ClientError>;

    /// Submit the charge-incurring retrieval call for one account/period.
    /// Callers must consult the execution ledger before invoking this.
    async fn submit_scrape(
        &self,
        account_number: &str,
        period: &str,
    ) -> Result<ScrapeReceipt, ClientError>;

    async fn scrape_status(&self, remote_ref: &str) -> Result<ScrapeStatus, ClientError>;
}
