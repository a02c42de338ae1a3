//! Purchase State Machine
//!
//! Pure transition logic shared by the synchronous [`PurchaseCoordinator`]
//! and the background [`ReconciliationWorker`]. Given a snapshot, an event
//! and the current time it returns the next snapshot plus the side effects
//! owed, or a [`TransitionRejected`]. Nothing here performs I/O; callers own
//! persistence and effect dispatch.
//!
//! ```text
//! PENDING ──pay ok──▶ COMPLETED ──auto-confirm due / force──▶ CONFIRMED
//!    │                    │
//!    │ fail / cancel      │ buyer dispute (before deadline)
//!    ▼                    ▼
//! FAILED / CANCELLED  DISPUTE_REQUESTED ──intervention due / admin──▶ DISPUTE_PROCESSING
//!                         │                                               │
//!                         └──────────── admin resolve ◀───────────────────┘
//!                                         │
//!                             refund ─────┴───── no refund
//!                               ▼                   ▼
//!                            REFUNDED           CONFIRMED
//! ```
//!
//! [`PurchaseCoordinator`]: super::coordinator::PurchaseCoordinator
//! [`ReconciliationWorker`]: super::reconciler::ReconciliationWorker

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::error::{EventKind, GuardViolation, TransitionRejected};
use super::state::PurchaseStatus;
use super::types::{Confirmation, Dispute, Lifecycle, Purchase, Resolution};

const FROM_PENDING: &[PurchaseStatus] = &[PurchaseStatus::Pending];
const FROM_COMPLETED: &[PurchaseStatus] = &[PurchaseStatus::Completed];
const FROM_DISPUTE_REQUESTED: &[PurchaseStatus] = &[PurchaseStatus::DisputeRequested];
const FROM_OPEN_DISPUTE: &[PurchaseStatus] = &[
    PurchaseStatus::DisputeRequested,
    PurchaseStatus::DisputeProcessing,
];

/// Fixed waiting periods, applied once when the preceding state is entered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleWindows {
    /// `completed` → automatic `confirmed`
    pub auto_confirm: Duration,
    /// `dispute_requested` → platform takes over
    pub escalation: Duration,
}

impl Default for LifecycleWindows {
    fn default() -> Self {
        Self {
            auto_confirm: Duration::days(7),
            escalation: Duration::days(3),
        }
    }
}

/// Events accepted by the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseEvent {
    PaymentSucceeded,
    PaymentFailed,
    PaymentCancelled,
    /// Buyer abandons their own pending order
    CancelOrder,
    /// Timer-driven, fired by the reconciliation sweep
    AutoConfirmDue,
    OpenDispute { reason: String },
    /// Timer-driven, fired by the reconciliation sweep
    PlatformInterventionDue,
    /// Admin escalation ahead of the deadline
    BeginProcessing,
    /// Admin confirmation ahead of the deadline
    ForceConfirm,
    Resolve { notes: String, refund: bool },
}

impl PurchaseEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PurchaseEvent::PaymentSucceeded => EventKind::PaymentSucceeded,
            PurchaseEvent::PaymentFailed => EventKind::PaymentFailed,
            PurchaseEvent::PaymentCancelled => EventKind::PaymentCancelled,
            PurchaseEvent::CancelOrder => EventKind::CancelOrder,
            PurchaseEvent::AutoConfirmDue => EventKind::AutoConfirmDue,
            PurchaseEvent::OpenDispute { .. } => EventKind::OpenDispute,
            PurchaseEvent::PlatformInterventionDue => EventKind::PlatformInterventionDue,
            PurchaseEvent::BeginProcessing => EventKind::BeginProcessing,
            PurchaseEvent::ForceConfirm => EventKind::ForceConfirm,
            PurchaseEvent::Resolve { .. } => EventKind::Resolve,
        }
    }
}

/// Statuses from which an event may fire
pub fn expected_sources(kind: EventKind) -> &'static [PurchaseStatus] {
    match kind {
        EventKind::PaymentSucceeded
        | EventKind::PaymentFailed
        | EventKind::PaymentCancelled
        | EventKind::CancelOrder => FROM_PENDING,
        EventKind::AutoConfirmDue | EventKind::OpenDispute | EventKind::ForceConfirm => {
            FROM_COMPLETED
        }
        EventKind::PlatformInterventionDue | EventKind::BeginProcessing => FROM_DISPUTE_REQUESTED,
        EventKind::Resolve => FROM_OPEN_DISPUTE,
    }
}

/// Monetary outcome handed to the payment collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementOutcome {
    /// Release held funds to the seller
    Confirm,
    /// Reverse the payment to the buyer
    Refund,
}

/// External work owed after a transition is durably recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    Settle(SettlementOutcome),
    DeleteAsset { asset_ref: String },
}

impl SideEffect {
    pub fn name(&self) -> &'static str {
        match self {
            SideEffect::Settle(SettlementOutcome::Confirm) => "release_funds",
            SideEffect::Settle(SettlementOutcome::Refund) => "refund",
            SideEffect::DeleteAsset { .. } => "delete_asset",
        }
    }
}

/// Accepted transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: PurchaseStatus,
    pub purchase: Purchase,
    pub effects: Vec<SideEffect>,
}

impl Transition {
    #[inline]
    pub fn to(&self) -> PurchaseStatus {
        self.purchase.status()
    }
}

/// Evaluate `event` against `purchase` at `now`.
pub fn apply(
    purchase: &Purchase,
    event: PurchaseEvent,
    now: DateTime<Utc>,
    windows: &LifecycleWindows,
) -> Result<Transition, TransitionRejected> {
    let kind = event.kind();
    let from = purchase.status();
    let guard_failed = |guard: GuardViolation| TransitionRejected {
        event: kind,
        current: from,
        expected: expected_sources(kind),
        guard: Some(guard),
    };

    let (lifecycle, effects) = match (&purchase.lifecycle, event) {
        (Lifecycle::Pending, PurchaseEvent::PaymentSucceeded) => (
            Lifecycle::Completed {
                auto_confirm_at: now + windows.auto_confirm,
            },
            Vec::new(),
        ),
        (Lifecycle::Pending, PurchaseEvent::PaymentFailed) => (Lifecycle::Failed, Vec::new()),
        (Lifecycle::Pending, PurchaseEvent::PaymentCancelled | PurchaseEvent::CancelOrder) => {
            (Lifecycle::Cancelled, Vec::new())
        }

        (Lifecycle::Completed { auto_confirm_at }, PurchaseEvent::AutoConfirmDue) => {
            if now < *auto_confirm_at {
                return Err(guard_failed(GuardViolation::AutoConfirmNotDue));
            }
            (
                Lifecycle::Confirmed(Confirmation::Undisputed {
                    auto_confirm_at: *auto_confirm_at,
                }),
                confirmation_effects(purchase, true),
            )
        }
        (Lifecycle::Completed { auto_confirm_at }, PurchaseEvent::ForceConfirm) => (
            Lifecycle::Confirmed(Confirmation::Undisputed {
                auto_confirm_at: *auto_confirm_at,
            }),
            confirmation_effects(purchase, true),
        ),
        (Lifecycle::Completed { auto_confirm_at }, PurchaseEvent::OpenDispute { reason }) => {
            if now >= *auto_confirm_at {
                return Err(guard_failed(GuardViolation::DisputeWindowClosed));
            }
            (
                Lifecycle::DisputeRequested {
                    dispute: Dispute {
                        reason,
                        requested_at: now,
                        platform_intervention_at: now + windows.escalation,
                    },
                },
                Vec::new(),
            )
        }

        (Lifecycle::DisputeRequested { dispute }, PurchaseEvent::PlatformInterventionDue) => {
            if now < dispute.platform_intervention_at {
                return Err(guard_failed(GuardViolation::InterventionNotDue));
            }
            (
                Lifecycle::DisputeProcessing {
                    dispute: dispute.clone(),
                },
                Vec::new(),
            )
        }
        (Lifecycle::DisputeRequested { dispute }, PurchaseEvent::BeginProcessing) => (
            Lifecycle::DisputeProcessing {
                dispute: dispute.clone(),
            },
            Vec::new(),
        ),

        (
            Lifecycle::DisputeRequested { dispute } | Lifecycle::DisputeProcessing { dispute },
            PurchaseEvent::Resolve { notes, refund },
        ) => {
            let resolution = Resolution {
                resolved_at: now,
                notes,
            };
            if refund {
                (
                    Lifecycle::Refunded {
                        dispute: dispute.clone(),
                        resolution,
                    },
                    vec![SideEffect::Settle(SettlementOutcome::Refund)],
                )
            } else {
                (
                    Lifecycle::Confirmed(Confirmation::DisputeResolved {
                        dispute: dispute.clone(),
                        resolution,
                    }),
                    confirmation_effects(purchase, false),
                )
            }
        }

        _ => {
            return Err(TransitionRejected {
                event: kind,
                current: from,
                expected: expected_sources(kind),
                guard: None,
            });
        }
    };

    let mut next = purchase.clone();
    next.lifecycle = lifecycle;
    next.updated_at = now;

    Ok(Transition {
        from,
        purchase: next,
        effects,
    })
}

/// Undisputed confirmation releases funds; a dispute resolved in the seller's
/// favour only schedules the asset cleanup.
fn confirmation_effects(purchase: &Purchase, release_funds: bool) -> Vec<SideEffect> {
    let mut effects = Vec::with_capacity(2);
    if release_funds {
        effects.push(SideEffect::Settle(SettlementOutcome::Confirm));
    }
    if let Some(asset_ref) = &purchase.asset_ref {
        effects.push(SideEffect::DeleteAsset {
            asset_ref: asset_ref.clone(),
        });
    }
    effects
}
