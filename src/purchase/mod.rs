//! Purchase Lifecycle
//!
//! Governs a purchase from payment through auto-confirmation or dispute.
//!
//! # Architecture
//!
//! One pure state machine ([`machine::apply`]) is shared by two drivers:
//! - **Synchronous**: [`PurchaseCoordinator`] handles buyer/admin/payment calls
//! - **Asynchronous**: [`ReconciliationWorker`] fires due timers on an interval
//!
//! # State Machine
//!
//! ```text
//! PENDING → COMPLETED → CONFIRMED
//!    ↓          ↓
//! FAILED    DISPUTE_REQUESTED → DISPUTE_PROCESSING
//! CANCELLED     ↓                     ↓
//!             REFUNDED / CONFIRMED (admin resolution)
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Guarded Write**: every transition is persisted with a CAS on the status read
//! 2. **Persist-Before-Effect**: settlement and asset cleanup run only after the write
//! 3. **No Contradictory Timers**: the auto-confirm deadline and an open dispute
//!    never coexist; [`types::Lifecycle`] cannot represent it
//! 4. **Terminal Is Final**: failed, cancelled, confirmed and refunded accept no events

pub mod api;
pub mod clock;
pub mod coordinator;
pub mod effects;
pub mod error;
pub mod machine;
pub mod queries;
pub mod reconciler;
pub mod state;
pub mod store;
pub mod types;

#[cfg(test)]
mod integration_tests;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{PaymentResult, PurchaseCoordinator, TransitionOutcome};
pub use effects::{
    AssetJanitor, EffectDispatcher, EffectError, HttpAssetJanitor, HttpSettlementClient,
    LoggingAssetJanitor, LoggingSettlementClient, SettlementClient,
};
pub use error::{ColumnsError, EventKind, GuardViolation, PurchaseError, TransitionRejected};
pub use machine::{LifecycleWindows, PurchaseEvent, SettlementOutcome, SideEffect, Transition};
pub use queries::{ProductOwnership, PurchasePage, PurchaseQueries, PurchaseView};
pub use reconciler::{ReconciliationWorker, SweepSummary, WorkerConfig};
pub use state::PurchaseStatus;
pub use store::{BuyerStats, MemoryPurchaseStore, Page, PgPurchaseStore, PurchaseStore};
pub use types::{Actor, NewPurchase, OrderRef, Purchase, PurchaseId, Role};
