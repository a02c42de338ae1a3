//! Purchase Error Types

use std::fmt;

use thiserror::Error;

use super::state::PurchaseStatus;
use super::types::PurchaseId;

/// Which event a rejected transition carried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    PaymentSucceeded,
    PaymentFailed,
    PaymentCancelled,
    CancelOrder,
    AutoConfirmDue,
    OpenDispute,
    PlatformInterventionDue,
    BeginProcessing,
    ForceConfirm,
    Resolve,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PaymentSucceeded => "payment_succeeded",
            EventKind::PaymentFailed => "payment_failed",
            EventKind::PaymentCancelled => "payment_cancelled",
            EventKind::CancelOrder => "cancel_order",
            EventKind::AutoConfirmDue => "auto_confirm_due",
            EventKind::OpenDispute => "open_dispute",
            EventKind::PlatformInterventionDue => "platform_intervention_due",
            EventKind::BeginProcessing => "begin_processing",
            EventKind::ForceConfirm => "force_confirm",
            EventKind::Resolve => "resolve",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Guard that failed although the status itself allowed the event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardViolation {
    DisputeWindowClosed,
    AutoConfirmNotDue,
    InterventionNotDue,
}

impl fmt::Display for GuardViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GuardViolation::DisputeWindowClosed => "dispute window closed",
            GuardViolation::AutoConfirmNotDue => "auto-confirm not yet due",
            GuardViolation::InterventionNotDue => "platform intervention not yet due",
        })
    }
}

/// Named rejection produced by the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRejected {
    pub event: EventKind,
    pub current: PurchaseStatus,
    pub expected: &'static [PurchaseStatus],
    pub guard: Option<GuardViolation>,
}

impl fmt::Display for TransitionRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let expected: Vec<&str> = self.expected.iter().map(|s| s.as_str()).collect();
        write!(
            f,
            "{} not allowed from {} (expected {})",
            self.event,
            self.current,
            expected.join(" | ")
        )?;
        if let Some(guard) = self.guard {
            write!(f, ": {}", guard)?;
        }
        Ok(())
    }
}

/// Stored lifecycle columns that do not describe a valid state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ColumnsError {
    #[error("partial dispute columns for status {0}")]
    PartialDispute(PurchaseStatus),

    #[error("partial resolution columns for status {0}")]
    PartialResolution(PurchaseStatus),

    #[error(
        "inconsistent columns for status {status}: auto_confirm_at={auto_confirm}, dispute={dispute}, resolution={resolution}"
    )]
    Inconsistent {
        status: PurchaseStatus,
        auto_confirm: bool,
        dispute: bool,
        resolution: bool,
    },
}

/// Purchase error types
#[derive(Error, Debug, Clone)]
pub enum PurchaseError {
    #[error("Invalid state transition: {0}")]
    InvalidTransition(TransitionRejected),

    #[error("Purchase not found: {0}")]
    NotFound(String),

    #[error("Purchase {0} was modified concurrently")]
    ConcurrentModification(PurchaseId),

    #[error("Side effect {effect} failed for purchase {purchase_id}: {message}")]
    SideEffectFailure {
        purchase_id: PurchaseId,
        effect: &'static str,
        message: String,
    },

    #[error("Download not allowed for purchase {0}")]
    DownloadNotAllowed(PurchaseId),

    #[error("Forbidden: {0}")]
    Forbidden(&'static str),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl PurchaseError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            PurchaseError::InvalidTransition(_) => "INVALID_TRANSITION",
            PurchaseError::NotFound(_) => "NOT_FOUND",
            PurchaseError::ConcurrentModification(_) => "CONCURRENT_MODIFICATION",
            PurchaseError::SideEffectFailure { .. } => "SIDE_EFFECT_FAILURE",
            PurchaseError::DownloadNotAllowed(_) => "DOWNLOAD_NOT_ALLOWED",
            PurchaseError::Forbidden(_) => "FORBIDDEN",
            PurchaseError::Validation(_) => "VALIDATION_ERROR",
            PurchaseError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            PurchaseError::Validation(_) => 400,
            PurchaseError::Forbidden(_) => 403,
            PurchaseError::NotFound(_) => 404,
            PurchaseError::InvalidTransition(_)
            | PurchaseError::ConcurrentModification(_)
            | PurchaseError::DownloadNotAllowed(_) => 409,
            PurchaseError::SideEffectFailure { .. } | PurchaseError::Storage(_) => 500,
        }
    }
}

impl From<TransitionRejected> for PurchaseError {
    fn from(rejected: TransitionRejected) -> Self {
        PurchaseError::InvalidTransition(rejected)
    }
}

impl From<ColumnsError> for PurchaseError {
    fn from(e: ColumnsError) -> Self {
        PurchaseError::Storage(e.to_string())
    }
}

impl From<sqlx::Error> for PurchaseError {
    fn from(e: sqlx::Error) -> Self {
        PurchaseError::Storage(e.to_string())
    }
}
