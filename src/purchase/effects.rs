//! Outbound Collaborators
//!
//! Settlement (release or refund of held funds) and product file cleanup.
//! Both are fire-and-forget from the lifecycle's point of view: they run only
//! after the status write succeeded, each call is bounded by a timeout, and a
//! failure is logged and reported but never undoes the transition or retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use super::error::PurchaseError;
use super::machine::{SettlementOutcome, SideEffect};
use super::types::{Purchase, PurchaseId};

/// Collaborator call failure
#[derive(Error, Debug, Clone)]
pub enum EffectError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("collaborator rejected request with HTTP {0}")]
    Rejected(u16),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for EffectError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => EffectError::Rejected(status.as_u16()),
            None => EffectError::Transport(e.to_string()),
        }
    }
}

/// Payment collaborator that moves held funds
#[async_trait]
pub trait SettlementClient: Send + Sync {
    /// Get client name for logging
    fn name(&self) -> &'static str;

    async fn settle(
        &self,
        purchase: &Purchase,
        outcome: SettlementOutcome,
    ) -> Result<(), EffectError>;
}

/// File storage collaborator that removes product assets
#[async_trait]
pub trait AssetJanitor: Send + Sync {
    /// Get janitor name for logging
    fn name(&self) -> &'static str;

    async fn delete_asset(&self, asset_ref: &str) -> Result<(), EffectError>;
}

#[derive(Serialize)]
struct SettlementRequest<'a> {
    purchase_id: PurchaseId,
    order_ref: &'a str,
    outcome: SettlementOutcome,
    amount: Decimal,
}

#[derive(Serialize)]
struct AssetDeletionRequest<'a> {
    asset_ref: &'a str,
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, EffectError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| EffectError::Transport(format!("Failed to create HTTP client: {}", e)))
}

/// Settlement over HTTP: `POST {url}` with a JSON body
pub struct HttpSettlementClient {
    client: reqwest::Client,
    url: String,
}

impl HttpSettlementClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, EffectError> {
        Ok(Self {
            client: http_client(timeout)?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl SettlementClient for HttpSettlementClient {
    fn name(&self) -> &'static str {
        "http-settlement"
    }

    async fn settle(
        &self,
        purchase: &Purchase,
        outcome: SettlementOutcome,
    ) -> Result<(), EffectError> {
        let request = SettlementRequest {
            purchase_id: purchase.id,
            order_ref: purchase.order_ref.as_str(),
            outcome,
            amount: purchase.price,
        };
        self.client
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Asset deletion over HTTP: `POST {url}` with the object key
pub struct HttpAssetJanitor {
    client: reqwest::Client,
    url: String,
}

impl HttpAssetJanitor {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, EffectError> {
        Ok(Self {
            client: http_client(timeout)?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AssetJanitor for HttpAssetJanitor {
    fn name(&self) -> &'static str {
        "http-asset-janitor"
    }

    async fn delete_asset(&self, asset_ref: &str) -> Result<(), EffectError> {
        self.client
            .post(&self.url)
            .json(&AssetDeletionRequest { asset_ref })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Settlement sink for local development: logs and succeeds
#[derive(Debug, Default)]
pub struct LoggingSettlementClient;

#[async_trait]
impl SettlementClient for LoggingSettlementClient {
    fn name(&self) -> &'static str {
        "log-settlement"
    }

    async fn settle(
        &self,
        purchase: &Purchase,
        outcome: SettlementOutcome,
    ) -> Result<(), EffectError> {
        info!(
            purchase_id = %purchase.id,
            order_ref = %purchase.order_ref,
            amount = %purchase.price,
            ?outcome,
            "Settlement requested (no settlement collaborator configured)"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct LoggingAssetJanitor;

#[async_trait]
impl AssetJanitor for LoggingAssetJanitor {
    fn name(&self) -> &'static str {
        "log-asset-janitor"
    }

    async fn delete_asset(&self, asset_ref: &str) -> Result<(), EffectError> {
        info!(
            asset_ref,
            "Asset deletion requested (no asset collaborator configured)"
        );
        Ok(())
    }
}

/// Runs the side effects of an accepted transition
#[derive(Clone)]
pub struct EffectDispatcher {
    settlement: Arc<dyn SettlementClient>,
    janitor: Arc<dyn AssetJanitor>,
    timeout: Duration,
}

impl EffectDispatcher {
    pub fn new(
        settlement: Arc<dyn SettlementClient>,
        janitor: Arc<dyn AssetJanitor>,
        timeout: Duration,
    ) -> Self {
        Self {
            settlement,
            janitor,
            timeout,
        }
    }

    /// Dispatcher backed by the logging-only collaborators
    pub fn logging(timeout: Duration) -> Self {
        Self::new(
            Arc::new(LoggingSettlementClient),
            Arc::new(LoggingAssetJanitor),
            timeout,
        )
    }

    /// Run the effects on their own task and wait for the result. Dropping
    /// the returned future does not cancel the task, so an accepted
    /// transition always gets its effects even if the caller goes away.
    pub async fn dispatch_detached(
        &self,
        purchase: Purchase,
        effects: Vec<SideEffect>,
    ) -> Vec<PurchaseError> {
        if effects.is_empty() {
            return Vec::new();
        }

        let purchase_id = purchase.id;
        let dispatcher = self.clone();
        let task = tokio::spawn(async move { dispatcher.dispatch(&purchase, &effects).await });

        match task.await {
            Ok(failures) => failures,
            Err(e) => {
                warn!(purchase_id = %purchase_id, error = %e, "Side effect task aborted");
                vec![PurchaseError::SideEffectFailure {
                    purchase_id,
                    effect: "dispatch",
                    message: e.to_string(),
                }]
            }
        }
    }

    /// Run every effect once, in order. Returns one
    /// [`PurchaseError::SideEffectFailure`] per failed effect.
    pub async fn dispatch(&self, purchase: &Purchase, effects: &[SideEffect]) -> Vec<PurchaseError> {
        let mut failures = Vec::new();

        for effect in effects {
            let call = async {
                match effect {
                    SideEffect::Settle(outcome) => self.settlement.settle(purchase, *outcome).await,
                    SideEffect::DeleteAsset { asset_ref } => {
                        self.janitor.delete_asset(asset_ref).await
                    }
                }
            };

            let result = match tokio::time::timeout(self.timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(EffectError::Timeout(self.timeout)),
            };

            match result {
                Ok(()) => {
                    info!(
                        purchase_id = %purchase.id,
                        effect = effect.name(),
                        "Side effect dispatched"
                    );
                }
                Err(e) => {
                    warn!(
                        purchase_id = %purchase.id,
                        effect = effect.name(),
                        error = %e,
                        "Side effect failed; transition stands"
                    );
                    failures.push(PurchaseError::SideEffectFailure {
                        purchase_id: purchase.id,
                        effect: effect.name(),
                        message: e.to_string(),
                    });
                }
            }
        }

        failures
    }
}
