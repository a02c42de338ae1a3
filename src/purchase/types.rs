//! Purchase Core Types
//!
//! The domain record carries a tagged [`Lifecycle`] that holds only the
//! fields meaningful in the current status. The flat nullable columns of
//! `purchases_tb` exist only in [`LifecycleColumns`], at the storage boundary.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::error::ColumnsError;
use super::state::PurchaseStatus;

pub type UserId = u64;
pub type ProductId = u64;

/// Default download limit per purchase
pub const DEFAULT_MAX_DOWNLOADS: i32 = 5;

/// Purchase ID - ULID-based unique identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PurchaseId(ulid::Ulid);

impl PurchaseId {
    /// Generate a new unique PurchaseId
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for PurchaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PurchaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PurchaseId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

impl Serialize for PurchaseId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PurchaseId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Human-readable order reference: `ORD-<unix seconds>-<8 hex chars>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderRef(String);

impl OrderRef {
    pub fn generate(now: DateTime<Utc>) -> Self {
        let suffix: [u8; 4] = rand::random();
        Self(format!("ORD-{}-{}", now.timestamp(), hex::encode(suffix)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for OrderRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for OrderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Actor role as asserted by the upstream auth proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
    /// Internal callers such as the payment gateway bridge
    System,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Authenticated caller of a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::User,
        }
    }

    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    pub fn system() -> Self {
        Self {
            user_id: 0,
            role: Role::System,
        }
    }

    #[inline]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// An opened dispute. Both deadlines are absolute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dispute {
    pub reason: String,
    pub requested_at: DateTime<Utc>,
    pub platform_intervention_at: DateTime<Utc>,
}

/// Admin decision closing a dispute
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub resolved_at: DateTime<Utc>,
    pub notes: String,
}

/// How a purchase reached `confirmed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// No dispute was ever opened; carries the deadline that was pending
    Undisputed { auto_confirm_at: DateTime<Utc> },
    /// An admin closed a dispute in the seller's favour
    DisputeResolved {
        dispute: Dispute,
        resolution: Resolution,
    },
}

/// Per-status payload of a purchase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    Pending,
    Failed,
    Cancelled,
    Completed {
        auto_confirm_at: DateTime<Utc>,
    },
    DisputeRequested {
        dispute: Dispute,
    },
    DisputeProcessing {
        dispute: Dispute,
    },
    Confirmed(Confirmation),
    Refunded {
        dispute: Dispute,
        resolution: Resolution,
    },
}

impl Lifecycle {
    pub fn status(&self) -> PurchaseStatus {
        match self {
            Lifecycle::Pending => PurchaseStatus::Pending,
            Lifecycle::Failed => PurchaseStatus::Failed,
            Lifecycle::Cancelled => PurchaseStatus::Cancelled,
            Lifecycle::Completed { .. } => PurchaseStatus::Completed,
            Lifecycle::DisputeRequested { .. } => PurchaseStatus::DisputeRequested,
            Lifecycle::DisputeProcessing { .. } => PurchaseStatus::DisputeProcessing,
            Lifecycle::Confirmed(_) => PurchaseStatus::Confirmed,
            Lifecycle::Refunded { .. } => PurchaseStatus::Refunded,
        }
    }

    /// Pending auto-confirm deadline, only while `completed`
    pub fn auto_confirm_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Lifecycle::Completed { auto_confirm_at } => Some(*auto_confirm_at),
            _ => None,
        }
    }

    /// The dispute, open or closed, if one was ever raised
    pub fn dispute(&self) -> Option<&Dispute> {
        match self {
            Lifecycle::DisputeRequested { dispute }
            | Lifecycle::DisputeProcessing { dispute }
            | Lifecycle::Refunded { dispute, .. }
            | Lifecycle::Confirmed(Confirmation::DisputeResolved { dispute, .. }) => Some(dispute),
            _ => None,
        }
    }

    pub fn resolution(&self) -> Option<&Resolution> {
        match self {
            Lifecycle::Refunded { resolution, .. }
            | Lifecycle::Confirmed(Confirmation::DisputeResolved { resolution, .. }) => {
                Some(resolution)
            }
            _ => None,
        }
    }

    /// Flatten into the nullable column layout of `purchases_tb`
    pub fn to_columns(&self) -> LifecycleColumns {
        let mut cols = LifecycleColumns::bare(self.status());
        match self {
            Lifecycle::Pending | Lifecycle::Failed | Lifecycle::Cancelled => {}
            Lifecycle::Completed { auto_confirm_at }
            | Lifecycle::Confirmed(Confirmation::Undisputed { auto_confirm_at }) => {
                cols.auto_confirm_at = Some(*auto_confirm_at);
            }
            Lifecycle::DisputeRequested { dispute } | Lifecycle::DisputeProcessing { dispute } => {
                cols.set_dispute(dispute);
            }
            Lifecycle::Confirmed(Confirmation::DisputeResolved {
                dispute,
                resolution,
            })
            | Lifecycle::Refunded {
                dispute,
                resolution,
            } => {
                cols.set_dispute(dispute);
                cols.dispute_resolved_at = Some(resolution.resolved_at);
                cols.dispute_notes = Some(resolution.notes.clone());
            }
        }
        cols
    }

    /// Rebuild from stored columns, rejecting rows whose timers contradict
    /// their status.
    pub fn from_columns(cols: LifecycleColumns) -> Result<Self, ColumnsError> {
        let status = cols.status;
        let dispute = cols.take_dispute()?;
        let resolution = cols.take_resolution()?;
        let lifecycle = match (status, cols.auto_confirm_at, dispute, resolution) {
            (PurchaseStatus::Pending, None, None, None) => Lifecycle::Pending,
            (PurchaseStatus::Failed, None, None, None) => Lifecycle::Failed,
            (PurchaseStatus::Cancelled, None, None, None) => Lifecycle::Cancelled,
            (PurchaseStatus::Completed, Some(auto_confirm_at), None, None) => {
                Lifecycle::Completed { auto_confirm_at }
            }
            (PurchaseStatus::DisputeRequested, None, Some(dispute), None) => {
                Lifecycle::DisputeRequested { dispute }
            }
            (PurchaseStatus::DisputeProcessing, None, Some(dispute), None) => {
                Lifecycle::DisputeProcessing { dispute }
            }
            (PurchaseStatus::Confirmed, Some(auto_confirm_at), None, None) => {
                Lifecycle::Confirmed(Confirmation::Undisputed { auto_confirm_at })
            }
            (PurchaseStatus::Confirmed, None, Some(dispute), Some(resolution)) => {
                Lifecycle::Confirmed(Confirmation::DisputeResolved {
                    dispute,
                    resolution,
                })
            }
            (PurchaseStatus::Refunded, None, Some(dispute), Some(resolution)) => {
                Lifecycle::Refunded {
                    dispute,
                    resolution,
                }
            }
            (status, auto_confirm_at, dispute, resolution) => {
                return Err(ColumnsError::Inconsistent {
                    status,
                    auto_confirm: auto_confirm_at.is_some(),
                    dispute: dispute.is_some(),
                    resolution: resolution.is_some(),
                });
            }
        };
        Ok(lifecycle)
    }
}

/// Flat column layout of the lifecycle part of `purchases_tb`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleColumns {
    pub status: PurchaseStatus,
    pub auto_confirm_at: Option<DateTime<Utc>>,
    pub dispute_reason: Option<String>,
    pub dispute_requested_at: Option<DateTime<Utc>>,
    pub platform_intervention_at: Option<DateTime<Utc>>,
    pub dispute_resolved_at: Option<DateTime<Utc>>,
    pub dispute_notes: Option<String>,
}

impl LifecycleColumns {
    pub fn bare(status: PurchaseStatus) -> Self {
        Self {
            status,
            auto_confirm_at: None,
            dispute_reason: None,
            dispute_requested_at: None,
            platform_intervention_at: None,
            dispute_resolved_at: None,
            dispute_notes: None,
        }
    }

    fn set_dispute(&mut self, dispute: &Dispute) {
        self.dispute_reason = Some(dispute.reason.clone());
        self.dispute_requested_at = Some(dispute.requested_at);
        self.platform_intervention_at = Some(dispute.platform_intervention_at);
    }

    fn take_dispute(&self) -> Result<Option<Dispute>, ColumnsError> {
        match (
            &self.dispute_reason,
            self.dispute_requested_at,
            self.platform_intervention_at,
        ) {
            (None, None, None) => Ok(None),
            (Some(reason), Some(requested_at), Some(platform_intervention_at)) => {
                Ok(Some(Dispute {
                    reason: reason.clone(),
                    requested_at,
                    platform_intervention_at,
                }))
            }
            _ => Err(ColumnsError::PartialDispute(self.status)),
        }
    }

    fn take_resolution(&self) -> Result<Option<Resolution>, ColumnsError> {
        match (self.dispute_resolved_at, &self.dispute_notes) {
            (None, None) => Ok(None),
            (Some(resolved_at), Some(notes)) => Ok(Some(Resolution {
                resolved_at,
                notes: notes.clone(),
            })),
            _ => Err(ColumnsError::PartialResolution(self.status)),
        }
    }
}

/// Purchase record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Purchase {
    pub id: PurchaseId,
    pub order_ref: OrderRef,
    pub buyer_id: UserId,
    pub product_id: ProductId,
    /// Price paid, immutable after creation
    pub price: Decimal,
    /// Object key of the downloadable file, target of asset deletion
    pub asset_ref: Option<String>,
    pub lifecycle: Lifecycle,
    pub download_count: i32,
    pub max_downloads: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Purchase {
    /// Create a new purchase in PENDING state
    pub fn new(order: NewPurchase, now: DateTime<Utc>) -> Self {
        Self {
            id: PurchaseId::new(),
            order_ref: OrderRef::generate(now),
            buyer_id: order.buyer_id,
            product_id: order.product_id,
            price: order.price,
            asset_ref: order.asset_ref,
            lifecycle: Lifecycle::Pending,
            download_count: 0,
            max_downloads: DEFAULT_MAX_DOWNLOADS,
            created_at: now,
            updated_at: now,
        }
    }

    #[inline]
    pub fn status(&self) -> PurchaseStatus {
        self.lifecycle.status()
    }

    /// Buyer may still contest delivery
    pub fn can_request_dispute(&self, now: DateTime<Utc>) -> bool {
        matches!(self.lifecycle, Lifecycle::Completed { auto_confirm_at } if now < auto_confirm_at)
    }

    /// Auto-confirm deadline has passed with no dispute
    pub fn is_auto_confirm_due(&self, now: DateTime<Utc>) -> bool {
        matches!(self.lifecycle, Lifecycle::Completed { auto_confirm_at } if now >= auto_confirm_at)
    }

    /// Escalation deadline of an unattended dispute has passed
    pub fn should_platform_intervene(&self, now: DateTime<Utc>) -> bool {
        matches!(
            &self.lifecycle,
            Lifecycle::DisputeRequested { dispute } if now >= dispute.platform_intervention_at
        )
    }

    /// Whole days (rounded up) until auto-confirm, only while `completed`
    pub fn days_until_auto_confirm(&self, now: DateTime<Utc>) -> Option<i64> {
        let remaining = (self.lifecycle.auto_confirm_at()? - now).num_seconds();
        if remaining <= 0 {
            return Some(0);
        }
        Some((remaining + 86_399) / 86_400)
    }

    /// A limit of 0 means unlimited downloads
    pub fn can_download(&self) -> bool {
        self.status() == PurchaseStatus::Completed
            && (self.max_downloads <= 0 || self.download_count < self.max_downloads)
    }

    pub fn display_status(&self) -> &'static str {
        self.status().display_label()
    }
}

impl fmt::Display for Purchase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Purchase[{}] order={} buyer={} product={} price={} status={}",
            self.id,
            self.order_ref,
            self.buyer_id,
            self.product_id,
            self.price,
            self.status()
        )
    }
}

/// Payment order opened by a buyer
#[derive(Debug, Clone)]
pub struct NewPurchase {
    pub buyer_id: UserId,
    pub product_id: ProductId,
    pub price: Decimal,
    pub asset_ref: Option<String>,
}
