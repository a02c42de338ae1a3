//! In-memory purchase store
//!
//! Used for local development when no `postgres_url` is configured and as
//! the backing store of the test suites. CAS semantics match
//! [`PgPurchaseStore`](super::PgPurchaseStore): the swap happens under the
//! shard lock of the record being replaced.

use std::cmp::Reverse;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{BuyerStats, Page, PurchaseStore};
use crate::purchase::error::PurchaseError;
use crate::purchase::state::PurchaseStatus;
use crate::purchase::types::{ProductId, Purchase, PurchaseId, UserId};

#[derive(Debug, Default)]
pub struct MemoryPurchaseStore {
    records: DashMap<PurchaseId, Purchase>,
}

impl MemoryPurchaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn collect<F>(&self, keep: F) -> Vec<Purchase>
    where
        F: Fn(&Purchase) -> bool,
    {
        self.records
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

fn paginate(rows: Vec<Purchase>, page: Page) -> (Vec<Purchase>, u64) {
    let total = rows.len() as u64;
    let rows = rows
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.limit() as usize)
        .collect();
    (rows, total)
}

#[async_trait]
impl PurchaseStore for MemoryPurchaseStore {
    async fn insert(&self, purchase: &Purchase) -> Result<(), PurchaseError> {
        match self.records.entry(purchase.id) {
            Entry::Occupied(_) => Err(PurchaseError::Storage(format!(
                "purchase {} already exists",
                purchase.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(purchase.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, id: PurchaseId) -> Result<Option<Purchase>, PurchaseError> {
        Ok(self.records.get(&id).map(|entry| entry.value().clone()))
    }

    async fn compare_and_swap(
        &self,
        expected: PurchaseStatus,
        next: &Purchase,
    ) -> Result<bool, PurchaseError> {
        let Some(mut current) = self.records.get_mut(&next.id) else {
            return Ok(false);
        };
        if current.status() != expected {
            return Ok(false);
        }
        // the download counter is owned by record_download
        let download_count = current.download_count;
        *current = next.clone();
        current.download_count = download_count;
        Ok(true)
    }

    async fn find_due_auto_confirm(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Purchase>, PurchaseError> {
        let mut due = self.collect(|p| p.is_auto_confirm_due(now));
        due.sort_by_key(|p| p.lifecycle.auto_confirm_at());
        due.truncate(limit);
        Ok(due)
    }

    async fn find_due_escalation(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Purchase>, PurchaseError> {
        let mut due = self.collect(|p| p.should_platform_intervene(now));
        due.sort_by_key(|p| p.lifecycle.dispute().map(|d| d.platform_intervention_at));
        due.truncate(limit);
        Ok(due)
    }

    async fn list_pending_confirmations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Purchase>, PurchaseError> {
        let mut pending = self.collect(|p| p.can_request_dispute(now));
        pending.sort_by_key(|p| p.lifecycle.auto_confirm_at());
        Ok(pending)
    }

    async fn list_pending_interventions(&self) -> Result<Vec<Purchase>, PurchaseError> {
        let mut pending = self.collect(|p| p.status() == PurchaseStatus::DisputeRequested);
        pending.sort_by_key(|p| p.lifecycle.dispute().map(|d| d.platform_intervention_at));
        Ok(pending)
    }

    async fn list_disputes(&self, page: Page) -> Result<(Vec<Purchase>, u64), PurchaseError> {
        let mut disputes = self.collect(|p| p.status().is_disputed());
        disputes.sort_by_key(|p| Reverse(p.lifecycle.dispute().map(|d| d.requested_at)));
        Ok(paginate(disputes, page))
    }

    async fn list_for_buyer(
        &self,
        buyer_id: UserId,
        page: Page,
    ) -> Result<(Vec<Purchase>, u64), PurchaseError> {
        let mut history = self.collect(|p| p.buyer_id == buyer_id);
        history.sort_by_key(|p| Reverse((p.created_at, p.id)));
        Ok(paginate(history, page))
    }

    async fn record_download(&self, id: PurchaseId) -> Result<Option<Purchase>, PurchaseError> {
        let Some(mut current) = self.records.get_mut(&id) else {
            return Ok(None);
        };
        if !current.can_download() {
            return Ok(None);
        }
        current.download_count += 1;
        Ok(Some(current.clone()))
    }

    async fn buyer_stats(&self, buyer_id: UserId) -> Result<BuyerStats, PurchaseError> {
        let stats = self
            .records
            .iter()
            .filter(|entry| entry.buyer_id == buyer_id)
            .fold(BuyerStats::default(), |mut stats, entry| {
                stats.total_purchases += 1;
                if entry.status().is_paid() {
                    stats.paid_purchases += 1;
                    stats.total_spent += entry.price;
                }
                stats
            });
        Ok(stats)
    }

    async fn find_paid(
        &self,
        buyer_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<Purchase>, PurchaseError> {
        let found = self
            .collect(|p| {
                p.buyer_id == buyer_id && p.product_id == product_id && p.status().is_paid()
            })
            .into_iter()
            .max_by_key(|p| (p.created_at, p.id));
        Ok(found)
    }
}
