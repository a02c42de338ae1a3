//! Purchase Record Store
//!
//! One row per purchase. Both drivers mutate records exclusively through
//! [`PurchaseStore::compare_and_swap`], which only writes when the stored
//! status still equals the status the caller read.

pub mod memory;
pub mod postgres;

pub use memory::MemoryPurchaseStore;
pub use postgres::PgPurchaseStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::error::PurchaseError;
use super::state::PurchaseStatus;
use super::types::{ProductId, Purchase, PurchaseId, UserId};

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

/// 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct Page {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

impl Page {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self { page, page_size }
    }

    /// Rows per page, clamped to `1..=100`
    pub fn limit(&self) -> u32 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.limit())
    }
}

/// Per-buyer totals. `paid_purchases` and `total_spent` cover records whose
/// payment was captured and not refunded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct BuyerStats {
    pub total_purchases: u64,
    pub paid_purchases: u64,
    #[schema(value_type = String, example = "59.97")]
    pub total_spent: Decimal,
}

/// Persistence seam for purchase records
#[async_trait]
pub trait PurchaseStore: Send + Sync {
    /// Persist a freshly created record
    async fn insert(&self, purchase: &Purchase) -> Result<(), PurchaseError>;

    async fn get(&self, id: PurchaseId) -> Result<Option<Purchase>, PurchaseError>;

    /// Replace the stored record with `next` only if its status still equals
    /// `expected`. Returns false when another writer got there first.
    async fn compare_and_swap(
        &self,
        expected: PurchaseStatus,
        next: &Purchase,
    ) -> Result<bool, PurchaseError>;

    /// `completed` records whose auto-confirm deadline is at or before `now`
    async fn find_due_auto_confirm(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Purchase>, PurchaseError>;

    /// `dispute_requested` records whose escalation deadline is at or before `now`
    async fn find_due_escalation(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Purchase>, PurchaseError>;

    /// `completed` records still inside the dispute window, nearest deadline first
    async fn list_pending_confirmations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Purchase>, PurchaseError>;

    /// `dispute_requested` records, nearest escalation deadline first
    async fn list_pending_interventions(&self) -> Result<Vec<Purchase>, PurchaseError>;

    /// Open disputes, most recently opened first, with the total count
    async fn list_disputes(&self, page: Page) -> Result<(Vec<Purchase>, u64), PurchaseError>;

    /// A buyer's purchases, newest first, with the total count
    async fn list_for_buyer(
        &self,
        buyer_id: UserId,
        page: Page,
    ) -> Result<(Vec<Purchase>, u64), PurchaseError>;

    /// Count one download if the record is `completed` and under its limit.
    /// The check and the increment are a single atomic step; `None` means
    /// the download was refused.
    async fn record_download(&self, id: PurchaseId) -> Result<Option<Purchase>, PurchaseError>;

    async fn buyer_stats(&self, buyer_id: UserId) -> Result<BuyerStats, PurchaseError>;

    /// The buyer's most recent paid purchase of `product_id`
    async fn find_paid(
        &self,
        buyer_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<Purchase>, PurchaseError>;
}
