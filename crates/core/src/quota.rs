//! Usage quota enforcement around a voice bridge.
//!
//! The credits ledger lives in an external service. A bridge start is
//! prechecked synchronously against the estimated session cost; settlement
//! happens once, after teardown, and is best-effort: the conversation has
//! already ended, so a failed settlement is logged by the caller and never
//! re-opens or retries the bridge.

use crate::auth::Identity;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait QuotaGuard: Send + Sync {
    /// Fast, read-only check that the user can afford `estimated_cost`.
    async fn precheck(&self, identity: &Identity, estimated_cost: u32) -> Result<bool>;

    /// Records `actual_cost` against the user's ledger after the work is done.
    async fn settle(&self, identity: &Identity, actual_cost: u32, operation: &str) -> Result<()>;
}

/// Credits-service client backed by HTTP.
pub struct HttpQuotaGuard {
    http: reqwest::Client,
    base_url: String,
}

impl HttpQuotaGuard {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[derive(Deserialize)]
struct BalanceResponse {
    balance: u32,
}

#[derive(Serialize)]
struct UsageReport<'a> {
    cost: u32,
    operation: &'a str,
}

#[async_trait]
impl QuotaGuard for HttpQuotaGuard {
    async fn precheck(&self, identity: &Identity, estimated_cost: u32) -> Result<bool> {
        let response = self
            .http
            .get(format!(
                "{}/v1/credits/{}",
                self.base_url, identity.user_id
            ))
            .send()
            .await?;

        // A user without a ledger entry has nothing to spend.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }

        let body: BalanceResponse = response.error_for_status()?.json().await?;
        Ok(body.balance >= estimated_cost)
    }

    async fn settle(&self, identity: &Identity, actual_cost: u32, operation: &str) -> Result<()> {
        self.http
            .post(format!(
                "{}/v1/credits/{}/usage",
                self.base_url, identity.user_id
            ))
            .json(&UsageReport {
                cost: actual_cost,
                operation,
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
