//! Purchase API Layer
//!
//! HTTP handlers for buyer, admin and payment-bridge operations.
//! Request bodies are validated here and again in the coordinator.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use super::coordinator::{PaymentResult, TransitionOutcome};
use super::error::PurchaseError;
use super::queries::{ProductOwnership, PurchasePage, PurchaseView};
use super::state::PurchaseStatus;
use super::store::{BuyerStats, Page};
use super::types::{Actor, ProductId, PurchaseId};
use crate::gateway::state::AppState;
use crate::gateway::types::{ApiError, ApiResult, ok};

// ============================================================================
// API Request/Response Types
// ============================================================================

/// Open a payment order
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct OpenOrderRequest {
    #[validate(range(min = 1))]
    pub product_id: u64,
    /// Price as string (to avoid float precision issues)
    #[schema(value_type = String, example = "19.99")]
    pub price: Decimal,
    /// Object key of the product file
    #[validate(length(min = 1, max = 512))]
    pub asset_ref: Option<String>,
}

/// Buyer dispute request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct OpenDisputeRequest {
    #[validate(length(min = 10, max = 500))]
    #[schema(example = "The archive is corrupted and cannot be extracted")]
    pub reason: String,
}

/// Admin dispute resolution
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ResolveDisputeRequest {
    #[validate(length(min = 10, max = 1000))]
    #[schema(example = "Seller confirmed the file was replaced; refund approved")]
    pub resolution: String,
    pub refund: bool,
}

/// Payment gateway verdict
#[derive(Debug, Deserialize, ToSchema)]
pub struct PaymentSignalRequest {
    pub purchase_id: String,
    pub succeeded: bool,
    /// Distinguishes an abandoned payment from a failed one
    #[serde(default)]
    pub cancelled: bool,
}

/// Result of a state-changing call
#[derive(Debug, Serialize, ToSchema)]
pub struct TransitionResponse {
    pub from: PurchaseStatus,
    pub purchase: PurchaseView,
    /// Effects that failed after the transition was recorded
    pub side_effect_failures: Vec<String>,
}

// ============================================================================
// Error Codes
// ============================================================================

pub mod error_codes {
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const VALIDATION_FAILED: i32 = 1002;
    pub const MISSING_AUTH: i32 = 2001;
    pub const FORBIDDEN: i32 = 2003;
    pub const PURCHASE_NOT_FOUND: i32 = 4001;
    pub const INVALID_TRANSITION: i32 = 4091;
    pub const CONCURRENT_MODIFICATION: i32 = 4092;
    pub const DOWNLOAD_NOT_ALLOWED: i32 = 4093;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SIDE_EFFECT_FAILED: i32 = 5002;
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Map PurchaseError to (StatusCode, error_code, message)
pub fn map_error(e: &PurchaseError) -> (StatusCode, i32, String) {
    let status = match e.http_status() {
        400 => StatusCode::BAD_REQUEST,
        403 => StatusCode::FORBIDDEN,
        404 => StatusCode::NOT_FOUND,
        409 => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let code = match e {
        PurchaseError::Validation(_) => error_codes::VALIDATION_FAILED,
        PurchaseError::Forbidden(_) => error_codes::FORBIDDEN,
        PurchaseError::NotFound(_) => error_codes::PURCHASE_NOT_FOUND,
        PurchaseError::InvalidTransition(_) => error_codes::INVALID_TRANSITION,
        PurchaseError::ConcurrentModification(_) => error_codes::CONCURRENT_MODIFICATION,
        PurchaseError::DownloadNotAllowed(_) => error_codes::DOWNLOAD_NOT_ALLOWED,
        PurchaseError::SideEffectFailure { .. } => error_codes::SIDE_EFFECT_FAILED,
        PurchaseError::Storage(_) => error_codes::INTERNAL_ERROR,
    };

    // Do not leak driver messages to clients
    let msg = match e {
        PurchaseError::Storage(_) => "internal storage error".to_string(),
        other => other.to_string(),
    };

    (status, code, msg)
}

impl From<PurchaseError> for ApiError {
    fn from(e: PurchaseError) -> Self {
        if let PurchaseError::Storage(detail) = &e {
            tracing::error!(error = %detail, "Storage failure while serving request");
        }
        let (status, code, msg) = map_error(&e);
        ApiError::new(status, code, msg)
    }
}

fn parse_id(raw: &str) -> Result<PurchaseId, ApiError> {
    raw.parse().map_err(|_| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            error_codes::INVALID_PARAMETER,
            format!("Invalid purchase id: {}", raw),
        )
    })
}

fn parse_product_id(raw: &str) -> Result<ProductId, ApiError> {
    match raw.parse::<ProductId>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            error_codes::INVALID_PARAMETER,
            format!("Invalid product id: {}", raw),
        )),
    }
}

fn validate<T: Validate>(req: &T) -> Result<(), ApiError> {
    req.validate().map_err(|e| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            error_codes::VALIDATION_FAILED,
            e.to_string(),
        )
    })
}

fn require_admin(actor: &Actor) -> Result<(), ApiError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(PurchaseError::Forbidden("admin role required").into())
    }
}

fn transition_response(state: &AppState, outcome: TransitionOutcome) -> TransitionResponse {
    TransitionResponse {
        from: outcome.from,
        purchase: PurchaseView::at(&outcome.purchase, state.coordinator.now()),
        side_effect_failures: outcome
            .side_effect_failures
            .iter()
            .map(|e| e.to_string())
            .collect(),
    }
}

// ============================================================================
// Buyer Handlers
// ============================================================================

/// Open a payment order
#[utoipa::path(
    post,
    path = "/api/v1/purchases",
    request_body = OpenOrderRequest,
    responses(
        (status = 200, description = "Order opened in pending", body = PurchaseView),
        (status = 400, description = "Invalid request")
    ),
    tag = "Purchases"
)]
pub async fn open_order(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<OpenOrderRequest>,
) -> ApiResult<PurchaseView> {
    validate(&req)?;
    let purchase = state
        .coordinator
        .open_order(actor, req.product_id, req.price, req.asset_ref)
        .await?;
    ok(PurchaseView::at(&purchase, state.coordinator.now()))
}

/// Purchase history of the calling buyer
#[utoipa::path(
    get,
    path = "/api/v1/purchases",
    params(Page),
    responses((status = 200, description = "Newest first", body = PurchasePage)),
    tag = "Purchases"
)]
pub async fn list_my_purchases(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Query(page): Query<Page>,
) -> ApiResult<PurchasePage> {
    ok(state.queries.history(actor.user_id, page).await?)
}

/// Get one purchase
#[utoipa::path(
    get,
    path = "/api/v1/purchases/{purchase_id}",
    params(("purchase_id" = String, Path, description = "Purchase ULID")),
    responses(
        (status = 200, description = "Purchase found", body = PurchaseView),
        (status = 404, description = "Unknown or not owned by caller")
    ),
    tag = "Purchases"
)]
pub async fn get_purchase(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(purchase_id): Path<String>,
) -> ApiResult<PurchaseView> {
    let id = parse_id(&purchase_id)?;
    let purchase = state.coordinator.get(actor, id).await?;
    ok(PurchaseView::at(&purchase, state.coordinator.now()))
}

/// Cancel a pending order
#[utoipa::path(
    post,
    path = "/api/v1/purchases/{purchase_id}/cancel",
    params(("purchase_id" = String, Path, description = "Purchase ULID")),
    responses(
        (status = 200, description = "Order cancelled", body = TransitionResponse),
        (status = 409, description = "Order is no longer pending")
    ),
    tag = "Purchases"
)]
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(purchase_id): Path<String>,
) -> ApiResult<TransitionResponse> {
    let id = parse_id(&purchase_id)?;
    let outcome = state.coordinator.cancel_order(actor, id).await?;
    ok(transition_response(&state, outcome))
}

/// Open a dispute on a completed purchase
#[utoipa::path(
    post,
    path = "/api/v1/purchases/{purchase_id}/dispute",
    params(("purchase_id" = String, Path, description = "Purchase ULID")),
    request_body = OpenDisputeRequest,
    responses(
        (status = 200, description = "Dispute opened", body = TransitionResponse),
        (status = 404, description = "Unknown or not owned by caller"),
        (status = 409, description = "Dispute window closed or dispute already open")
    ),
    tag = "Purchases"
)]
pub async fn open_dispute(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(purchase_id): Path<String>,
    Json(req): Json<OpenDisputeRequest>,
) -> ApiResult<TransitionResponse> {
    validate(&req)?;
    let id = parse_id(&purchase_id)?;
    let outcome = state
        .coordinator
        .open_dispute(actor, id, &req.reason)
        .await?;
    ok(transition_response(&state, outcome))
}

/// Record a download of a completed purchase
#[utoipa::path(
    post,
    path = "/api/v1/purchases/{purchase_id}/download",
    params(("purchase_id" = String, Path, description = "Purchase ULID")),
    responses(
        (status = 200, description = "Download counted", body = PurchaseView),
        (status = 404, description = "Unknown or not owned by caller"),
        (status = 409, description = "Not completed or download limit reached")
    ),
    tag = "Purchases"
)]
pub async fn record_download(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(purchase_id): Path<String>,
) -> ApiResult<PurchaseView> {
    let id = parse_id(&purchase_id)?;
    let purchase = state.coordinator.record_download(actor, id).await?;
    ok(PurchaseView::at(&purchase, state.coordinator.now()))
}

/// Purchase totals of the calling buyer
#[utoipa::path(
    get,
    path = "/api/v1/purchases/stats",
    responses((status = 200, description = "Counts and paid spend", body = BuyerStats)),
    tag = "Purchases"
)]
pub async fn purchase_stats(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<BuyerStats> {
    ok(state.queries.stats(actor.user_id).await?)
}

/// Whether the caller holds a paid purchase of a product
#[utoipa::path(
    get,
    path = "/api/v1/purchases/products/{product_id}/status",
    params(("product_id" = u64, Path, description = "Product id")),
    responses(
        (status = 200, description = "Ownership of the product", body = ProductOwnership),
        (status = 400, description = "Invalid product id")
    ),
    tag = "Purchases"
)]
pub async fn product_status(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(product_id): Path<String>,
) -> ApiResult<ProductOwnership> {
    let product_id = parse_product_id(&product_id)?;
    ok(state.queries.ownership(actor.user_id, product_id).await?)
}

// ============================================================================
// Payment Bridge Handler
// ============================================================================

/// Payment gateway verdict for a pending order
#[utoipa::path(
    post,
    path = "/api/v1/internal/payments",
    request_body = PaymentSignalRequest,
    responses(
        (status = 200, description = "Signal applied", body = TransitionResponse),
        (status = 403, description = "Caller is not an internal service")
    ),
    tag = "Internal"
)]
pub async fn payment_signal(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<PaymentSignalRequest>,
) -> ApiResult<TransitionResponse> {
    let id = parse_id(&req.purchase_id)?;
    let result = match (req.succeeded, req.cancelled) {
        (true, _) => PaymentResult::Succeeded,
        (false, true) => PaymentResult::Cancelled,
        (false, false) => PaymentResult::Failed,
    };
    let outcome = state.coordinator.record_payment(actor, id, result).await?;
    ok(transition_response(&state, outcome))
}

// ============================================================================
// Admin Handlers
// ============================================================================

/// Completed purchases awaiting auto-confirm
#[utoipa::path(
    get,
    path = "/api/v1/admin/purchases/pending-confirmations",
    responses((status = 200, description = "Nearest deadline first", body = Vec<PurchaseView>)),
    tag = "Admin"
)]
pub async fn pending_confirmations(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Vec<PurchaseView>> {
    require_admin(&actor)?;
    ok(state.queries.pending_confirmations().await?)
}

/// Disputes waiting for the seller
#[utoipa::path(
    get,
    path = "/api/v1/admin/purchases/pending-interventions",
    responses((status = 200, description = "Nearest escalation first", body = Vec<PurchaseView>)),
    tag = "Admin"
)]
pub async fn pending_interventions(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Vec<PurchaseView>> {
    require_admin(&actor)?;
    ok(state.queries.pending_interventions().await?)
}

/// Open disputes, paginated
#[utoipa::path(
    get,
    path = "/api/v1/admin/disputes",
    params(Page),
    responses((status = 200, description = "Most recent first", body = PurchasePage)),
    tag = "Admin"
)]
pub async fn list_disputes(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Query(page): Query<Page>,
) -> ApiResult<PurchasePage> {
    require_admin(&actor)?;
    ok(state.queries.disputes(page).await?)
}

/// Take over a dispute before its escalation deadline
#[utoipa::path(
    post,
    path = "/api/v1/admin/purchases/{purchase_id}/process",
    params(("purchase_id" = String, Path, description = "Purchase ULID")),
    responses(
        (status = 200, description = "Dispute under platform review", body = TransitionResponse),
        (status = 409, description = "Not in dispute_requested")
    ),
    tag = "Admin"
)]
pub async fn process_dispute(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(purchase_id): Path<String>,
) -> ApiResult<TransitionResponse> {
    let id = parse_id(&purchase_id)?;
    let outcome = state.coordinator.begin_processing(actor, id).await?;
    ok(transition_response(&state, outcome))
}

/// Close a dispute
#[utoipa::path(
    post,
    path = "/api/v1/admin/purchases/{purchase_id}/resolve",
    params(("purchase_id" = String, Path, description = "Purchase ULID")),
    request_body = ResolveDisputeRequest,
    responses(
        (status = 200, description = "Refunded or confirmed", body = TransitionResponse),
        (status = 409, description = "No open dispute")
    ),
    tag = "Admin"
)]
pub async fn resolve_dispute(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(purchase_id): Path<String>,
    Json(req): Json<ResolveDisputeRequest>,
) -> ApiResult<TransitionResponse> {
    validate(&req)?;
    let id = parse_id(&purchase_id)?;
    let outcome = state
        .coordinator
        .resolve(actor, id, &req.resolution, req.refund)
        .await?;
    ok(transition_response(&state, outcome))
}

/// Confirm an undisputed purchase immediately
#[utoipa::path(
    post,
    path = "/api/v1/admin/purchases/{purchase_id}/confirm",
    params(("purchase_id" = String, Path, description = "Purchase ULID")),
    responses(
        (status = 200, description = "Purchase confirmed", body = TransitionResponse),
        (status = 409, description = "Not in completed")
    ),
    tag = "Admin"
)]
pub async fn force_confirm(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(purchase_id): Path<String>,
) -> ApiResult<TransitionResponse> {
    let id = parse_id(&purchase_id)?;
    let outcome = state.coordinator.force_confirm(actor, id).await?;
    ok(transition_response(&state, outcome))
}

// ============================================================================
// Unit Tests
// ============================================================================
