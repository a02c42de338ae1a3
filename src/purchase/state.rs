//! Purchase Status Definitions
//!
//! Status names match the `status` column of `purchases_tb`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Purchase lifecycle status
///
/// Stored as VARCHAR in PostgreSQL.
/// Terminal states: FAILED, CANCELLED, CONFIRMED, REFUNDED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    /// Payment order opened, waiting on the payment gateway
    Pending,

    /// Terminal: payment rejected by the gateway
    Failed,

    /// Terminal: payment abandoned before completion
    Cancelled,

    /// Paid; seller funds held until auto-confirm or dispute
    Completed,

    /// Buyer contested delivery, waiting on the seller
    DisputeRequested,

    /// Platform took over the dispute
    DisputeProcessing,

    /// Terminal: sale final, seller funds released
    Confirmed,

    /// Terminal: money returned to the buyer
    Refunded,
}

impl PurchaseStatus {
    pub const ALL: [PurchaseStatus; 8] = [
        PurchaseStatus::Pending,
        PurchaseStatus::Failed,
        PurchaseStatus::Cancelled,
        PurchaseStatus::Completed,
        PurchaseStatus::DisputeRequested,
        PurchaseStatus::DisputeProcessing,
        PurchaseStatus::Confirmed,
        PurchaseStatus::Refunded,
    ];

    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PurchaseStatus::Failed
                | PurchaseStatus::Cancelled
                | PurchaseStatus::Confirmed
                | PurchaseStatus::Refunded
        )
    }

    /// Check if a dispute is open (requested or under platform review)
    #[inline]
    pub fn is_disputed(&self) -> bool {
        matches!(
            self,
            PurchaseStatus::DisputeRequested | PurchaseStatus::DisputeProcessing
        )
    }

    /// Payment captured and not refunded
    #[inline]
    pub fn is_paid(&self) -> bool {
        matches!(
            self,
            PurchaseStatus::Completed
                | PurchaseStatus::DisputeRequested
                | PurchaseStatus::DisputeProcessing
                | PurchaseStatus::Confirmed
        )
    }

    /// Column value for PostgreSQL storage
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseStatus::Pending => "pending",
            PurchaseStatus::Failed => "failed",
            PurchaseStatus::Cancelled => "cancelled",
            PurchaseStatus::Completed => "completed",
            PurchaseStatus::DisputeRequested => "dispute_requested",
            PurchaseStatus::DisputeProcessing => "dispute_processing",
            PurchaseStatus::Confirmed => "confirmed",
            PurchaseStatus::Refunded => "refunded",
        }
    }

    /// Label shown to buyers and admins
    pub fn display_label(&self) -> &'static str {
        match self {
            PurchaseStatus::Pending => "Awaiting payment",
            PurchaseStatus::Failed => "Payment failed",
            PurchaseStatus::Cancelled => "Cancelled",
            PurchaseStatus::Completed => "Purchase completed",
            PurchaseStatus::DisputeRequested => "Dispute in progress",
            PurchaseStatus::DisputeProcessing => "Under platform review",
            PurchaseStatus::Confirmed => "Purchase confirmed",
            PurchaseStatus::Refunded => "Refunded",
        }
    }
}

impl fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PurchaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PurchaseStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown purchase status: {}", s))
    }
}
