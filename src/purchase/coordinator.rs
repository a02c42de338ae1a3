//! Purchase Coordinator
//!
//! Synchronous transition handler. Every operation follows the same path:
//! load the snapshot, authorize the actor, ask the state machine, persist with
//! a status-guarded CAS, then dispatch the side effects the machine returned.
//! The reconciliation worker reuses the same path through [`advance_due`].
//!
//! [`advance_due`]: PurchaseCoordinator::advance_due

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::effects::EffectDispatcher;
use super::error::PurchaseError;
use super::machine::{self, LifecycleWindows, PurchaseEvent};
use super::state::PurchaseStatus;
use super::store::PurchaseStore;
use super::types::{Actor, NewPurchase, ProductId, Purchase, PurchaseId, Role};

pub const DISPUTE_REASON_MIN: usize = 10;
pub const DISPUTE_REASON_MAX: usize = 500;
pub const RESOLUTION_MIN: usize = 10;
pub const RESOLUTION_MAX: usize = 1000;

/// Outcome reported by the payment gateway bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentResult {
    Succeeded,
    Failed,
    /// Buyer abandoned the payment page
    Cancelled,
}

/// An accepted and persisted transition
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub from: PurchaseStatus,
    pub purchase: Purchase,
    /// Effects that failed after the status write; the transition stands
    pub side_effect_failures: Vec<PurchaseError>,
}

/// Purchase Coordinator - drives the lifecycle for API callers
pub struct PurchaseCoordinator {
    store: Arc<dyn PurchaseStore>,
    effects: EffectDispatcher,
    clock: Arc<dyn Clock>,
    windows: LifecycleWindows,
}

impl PurchaseCoordinator {
    pub fn new(store: Arc<dyn PurchaseStore>, effects: EffectDispatcher) -> Self {
        Self::with_clock(store, effects, Arc::new(SystemClock), LifecycleWindows::default())
    }

    pub fn with_clock(
        store: Arc<dyn PurchaseStore>,
        effects: EffectDispatcher,
        clock: Arc<dyn Clock>,
        windows: LifecycleWindows,
    ) -> Self {
        Self {
            store,
            effects,
            clock,
            windows,
        }
    }

    pub fn store(&self) -> &Arc<dyn PurchaseStore> {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn windows(&self) -> &LifecycleWindows {
        &self.windows
    }

    /// Open a payment order in `pending` for the calling buyer
    pub async fn open_order(
        &self,
        actor: Actor,
        product_id: ProductId,
        price: Decimal,
        asset_ref: Option<String>,
    ) -> Result<Purchase, PurchaseError> {
        if actor.user_id == 0 {
            return Err(PurchaseError::Forbidden("orders require a buyer account"));
        }
        if price <= Decimal::ZERO {
            return Err(PurchaseError::Validation(format!(
                "price must be positive, got {}",
                price
            )));
        }

        let purchase = Purchase::new(
            NewPurchase {
                buyer_id: actor.user_id,
                product_id,
                price,
                asset_ref,
            },
            self.now(),
        );
        self.store.insert(&purchase).await?;

        info!(
            purchase_id = %purchase.id,
            order_ref = %purchase.order_ref,
            buyer_id = purchase.buyer_id,
            product_id = purchase.product_id,
            price = %purchase.price,
            "Purchase order opened"
        );
        Ok(purchase)
    }

    /// Apply the payment gateway's verdict to a `pending` purchase
    pub async fn record_payment(
        &self,
        actor: Actor,
        id: PurchaseId,
        result: PaymentResult,
    ) -> Result<TransitionOutcome, PurchaseError> {
        if !matches!(actor.role, Role::System | Role::Admin) {
            return Err(PurchaseError::Forbidden(
                "payment signals are accepted from internal callers only",
            ));
        }
        let event = match result {
            PaymentResult::Succeeded => PurchaseEvent::PaymentSucceeded,
            PaymentResult::Failed => PurchaseEvent::PaymentFailed,
            PaymentResult::Cancelled => PurchaseEvent::PaymentCancelled,
        };
        let current = self.load(id).await?;
        self.drive(current, event, self.now()).await
    }

    /// Buyer abandons their own `pending` order
    pub async fn cancel_order(
        &self,
        actor: Actor,
        id: PurchaseId,
    ) -> Result<TransitionOutcome, PurchaseError> {
        let current = self.load_owned(actor, id).await?;
        self.drive(current, PurchaseEvent::CancelOrder, self.now())
            .await
    }

    /// Buyer contests delivery before the auto-confirm deadline
    pub async fn open_dispute(
        &self,
        actor: Actor,
        id: PurchaseId,
        reason: &str,
    ) -> Result<TransitionOutcome, PurchaseError> {
        let reason = validate_text("dispute reason", reason, DISPUTE_REASON_MIN, DISPUTE_REASON_MAX)?;
        let current = self.load_owned(actor, id).await?;
        self.drive(current, PurchaseEvent::OpenDispute { reason }, self.now())
            .await
    }

    /// Admin takes over an open dispute ahead of the escalation deadline
    pub async fn begin_processing(
        &self,
        actor: Actor,
        id: PurchaseId,
    ) -> Result<TransitionOutcome, PurchaseError> {
        require_admin(actor)?;
        let current = self.load(id).await?;
        self.drive(current, PurchaseEvent::BeginProcessing, self.now())
            .await
    }

    /// Admin closes a dispute with or without a refund
    pub async fn resolve(
        &self,
        actor: Actor,
        id: PurchaseId,
        notes: &str,
        refund: bool,
    ) -> Result<TransitionOutcome, PurchaseError> {
        require_admin(actor)?;
        let notes = validate_text("resolution", notes, RESOLUTION_MIN, RESOLUTION_MAX)?;
        let current = self.load(id).await?;
        self.drive(current, PurchaseEvent::Resolve { notes, refund }, self.now())
            .await
    }

    /// Admin confirms an undisputed purchase without waiting for the deadline
    pub async fn force_confirm(
        &self,
        actor: Actor,
        id: PurchaseId,
    ) -> Result<TransitionOutcome, PurchaseError> {
        require_admin(actor)?;
        let current = self.load(id).await?;
        self.drive(current, PurchaseEvent::ForceConfirm, self.now())
            .await
    }

    /// Count a buyer download against the purchase's limit. Only `completed`
    /// purchases can be downloaded.
    pub async fn record_download(
        &self,
        actor: Actor,
        id: PurchaseId,
    ) -> Result<Purchase, PurchaseError> {
        let current = self.load_owned(actor, id).await?;
        if !current.can_download() {
            return Err(PurchaseError::DownloadNotAllowed(id));
        }
        // status or counter may have moved since the read
        let Some(purchase) = self.store.record_download(id).await? else {
            debug!(purchase_id = %id, "Download refused by store");
            return Err(PurchaseError::DownloadNotAllowed(id));
        };
        info!(
            purchase_id = %id,
            download_count = purchase.download_count,
            max_downloads = purchase.max_downloads,
            "Download recorded"
        );
        Ok(purchase)
    }

    /// Fetch a purchase as seen by `actor`: buyers only see their own
    pub async fn get(&self, actor: Actor, id: PurchaseId) -> Result<Purchase, PurchaseError> {
        if actor.is_admin() || actor.role == Role::System {
            self.load(id).await
        } else {
            self.load_owned(actor, id).await
        }
    }

    /// Timer-driven transition for the reconciliation sweep. The record is
    /// re-read so the guard is evaluated against current state, not against
    /// the snapshot the candidate query returned.
    pub async fn advance_due(
        &self,
        id: PurchaseId,
        event: PurchaseEvent,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, PurchaseError> {
        let current = self.load(id).await?;
        self.drive(current, event, now).await
    }

    async fn load(&self, id: PurchaseId) -> Result<Purchase, PurchaseError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| PurchaseError::NotFound(id.to_string()))
    }

    /// Other buyers' purchases are indistinguishable from missing ones
    async fn load_owned(&self, actor: Actor, id: PurchaseId) -> Result<Purchase, PurchaseError> {
        let purchase = self.load(id).await?;
        if purchase.buyer_id != actor.user_id {
            debug!(
                purchase_id = %id,
                actor_id = actor.user_id,
                "Purchase not owned by actor"
            );
            return Err(PurchaseError::NotFound(id.to_string()));
        }
        Ok(purchase)
    }

    async fn drive(
        &self,
        current: Purchase,
        event: PurchaseEvent,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, PurchaseError> {
        let kind = event.kind();
        let transition = machine::apply(&current, event, now, &self.windows)?;

        // Persist BEFORE any side effect
        if !self
            .store
            .compare_and_swap(transition.from, &transition.purchase)
            .await?
        {
            warn!(
                purchase_id = %current.id,
                event = %kind,
                expected = %transition.from,
                "Purchase modified concurrently, transition dropped"
            );
            return Err(PurchaseError::ConcurrentModification(current.id));
        }

        info!(
            purchase_id = %current.id,
            event = %kind,
            from = %transition.from,
            to = %transition.to(),
            "Purchase state advanced"
        );

        let side_effect_failures = self
            .effects
            .dispatch_detached(transition.purchase.clone(), transition.effects)
            .await;

        Ok(TransitionOutcome {
            from: transition.from,
            purchase: transition.purchase,
            side_effect_failures,
        })
    }
}

fn require_admin(actor: Actor) -> Result<(), PurchaseError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(PurchaseError::Forbidden("admin role required"))
    }
}

/// Trim and bound free text by character count
fn validate_text(field: &str, text: &str, min: usize, max: usize) -> Result<String, PurchaseError> {
    let text = text.trim();
    let len = text.chars().count();
    if len < min || len > max {
        return Err(PurchaseError::Validation(format!(
            "{} must be {}-{} characters, got {}",
            field, min, max, len
        )));
    }
    Ok(text.to_string())
}
