//! Read-only views for buyers and admins
//!
//! Derived flags (`can_request_dispute`, `should_platform_intervene`, ...)
//! are computed against the coordinator's clock at read time and never
//! stored.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

use super::coordinator::PurchaseCoordinator;
use super::error::PurchaseError;
use super::state::PurchaseStatus;
use super::store::{BuyerStats, Page};
use super::types::{ProductId, Purchase, UserId};

/// Dispute details attached to a purchase view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct DisputeView {
    pub reason: String,
    pub requested_at: DateTime<Utc>,
    pub platform_intervention_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// Purchase as returned by the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PurchaseView {
    #[schema(example = "01J0Z8YB4Q5H6C3N2M1K0PQRST")]
    pub purchase_id: String,
    #[schema(example = "ORD-1764583200-9f86d081")]
    pub order_ref: String,
    pub buyer_id: u64,
    pub product_id: u64,
    #[schema(value_type = String, example = "19.99")]
    pub price: Decimal,
    pub status: PurchaseStatus,
    #[schema(example = "Purchase completed")]
    pub display_status: String,
    pub auto_confirm_at: Option<DateTime<Utc>>,
    pub days_until_auto_confirm: Option<i64>,
    pub can_request_dispute: bool,
    pub should_platform_intervene: bool,
    pub can_download: bool,
    pub download_count: i32,
    pub max_downloads: i32,
    pub dispute: Option<DisputeView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PurchaseView {
    pub fn at(purchase: &Purchase, now: DateTime<Utc>) -> Self {
        let dispute = purchase.lifecycle.dispute().map(|d| {
            let resolution = purchase.lifecycle.resolution();
            DisputeView {
                reason: d.reason.clone(),
                requested_at: d.requested_at,
                platform_intervention_at: d.platform_intervention_at,
                resolved_at: resolution.map(|r| r.resolved_at),
                notes: resolution.map(|r| r.notes.clone()),
            }
        });

        Self {
            purchase_id: purchase.id.to_string(),
            order_ref: purchase.order_ref.to_string(),
            buyer_id: purchase.buyer_id,
            product_id: purchase.product_id,
            price: purchase.price,
            status: purchase.status(),
            display_status: purchase.display_status().to_string(),
            auto_confirm_at: purchase.lifecycle.auto_confirm_at(),
            days_until_auto_confirm: purchase.days_until_auto_confirm(now),
            can_request_dispute: purchase.can_request_dispute(now),
            should_platform_intervene: purchase.should_platform_intervene(now),
            can_download: purchase.can_download(),
            download_count: purchase.download_count,
            max_downloads: purchase.max_downloads,
            dispute,
            created_at: purchase.created_at,
            updated_at: purchase.updated_at,
        }
    }
}

/// One page of purchases
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PurchasePage {
    pub items: Vec<PurchaseView>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Whether a buyer holds a paid purchase of a product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ProductOwnership {
    pub product_id: u64,
    pub purchased: bool,
    pub purchase_id: Option<String>,
    pub status: Option<PurchaseStatus>,
}

/// Admin and buyer query surface
pub struct PurchaseQueries {
    coordinator: Arc<PurchaseCoordinator>,
}

impl PurchaseQueries {
    pub fn new(coordinator: Arc<PurchaseCoordinator>) -> Self {
        Self { coordinator }
    }

    fn views(&self, purchases: &[Purchase]) -> Vec<PurchaseView> {
        let now = self.coordinator.now();
        purchases.iter().map(|p| PurchaseView::at(p, now)).collect()
    }

    fn page(&self, (rows, total): (Vec<Purchase>, u64), page: Page) -> PurchasePage {
        PurchasePage {
            items: self.views(&rows),
            total,
            page: page.page.max(1),
            page_size: page.limit(),
        }
    }

    /// Completed purchases still awaiting auto-confirm, nearest deadline first
    pub async fn pending_confirmations(&self) -> Result<Vec<PurchaseView>, PurchaseError> {
        let now = self.coordinator.now();
        let rows = self
            .coordinator
            .store()
            .list_pending_confirmations(now)
            .await?;
        Ok(self.views(&rows))
    }

    /// Disputes waiting on the seller, nearest escalation deadline first
    pub async fn pending_interventions(&self) -> Result<Vec<PurchaseView>, PurchaseError> {
        let rows = self.coordinator.store().list_pending_interventions().await?;
        Ok(self.views(&rows))
    }

    /// Open disputes, most recently opened first
    pub async fn disputes(&self, page: Page) -> Result<PurchasePage, PurchaseError> {
        let result = self.coordinator.store().list_disputes(page).await?;
        Ok(self.page(result, page))
    }

    /// A buyer's purchase history, newest first
    pub async fn history(&self, buyer_id: UserId, page: Page) -> Result<PurchasePage, PurchaseError> {
        let result = self.coordinator.store().list_for_buyer(buyer_id, page).await?;
        Ok(self.page(result, page))
    }

    pub async fn stats(&self, buyer_id: UserId) -> Result<BuyerStats, PurchaseError> {
        self.coordinator.store().buyer_stats(buyer_id).await
    }

    /// Refunded, failed and cancelled purchases do not count
    pub async fn ownership(
        &self,
        buyer_id: UserId,
        product_id: ProductId,
    ) -> Result<ProductOwnership, PurchaseError> {
        let found = self
            .coordinator
            .store()
            .find_paid(buyer_id, product_id)
            .await?;
        Ok(ProductOwnership {
            product_id,
            purchased: found.is_some(),
            purchase_id: found.as_ref().map(|p| p.id.to_string()),
            status: found.map(|p| p.status()),
        })
    }
}
