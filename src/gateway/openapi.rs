//! OpenAPI / Swagger UI Documentation
//!
//! - Swagger UI: `http://localhost:8080/docs`
//! - OpenAPI JSON: `http://localhost:8080/api-docs/openapi.json`

use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::gateway::HealthResponse;
use crate::purchase::api::{
    OpenDisputeRequest, OpenOrderRequest, PaymentSignalRequest, ResolveDisputeRequest,
    TransitionResponse,
};
use crate::purchase::queries::{DisputeView, ProductOwnership, PurchasePage, PurchaseView};
use crate::purchase::state::PurchaseStatus;
use crate::purchase::store::BuyerStats;

/// Identity forwarded by the upstream auth proxy
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "forwarded_identity",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    "X-User-Id",
                    "Numeric user id set by the auth proxy. X-User-Role (user|admin|system) \
                     accompanies it; absent means user.",
                ))),
            );
        }
    }
}

/// Main API Documentation struct
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Purchase Lifecycle API",
        version = "1.0.0",
        description = "Purchase lifecycle and dispute reconciliation for a digital goods marketplace.",
        license(name = "MIT")
    ),
    servers(
        (url = "http://localhost:8080", description = "Development"),
    ),
    paths(
        crate::gateway::health_check,
        crate::purchase::api::open_order,
        crate::purchase::api::list_my_purchases,
        crate::purchase::api::get_purchase,
        crate::purchase::api::cancel_order,
        crate::purchase::api::open_dispute,
        crate::purchase::api::record_download,
        crate::purchase::api::purchase_stats,
        crate::purchase::api::product_status,
        crate::purchase::api::payment_signal,
        crate::purchase::api::pending_confirmations,
        crate::purchase::api::pending_interventions,
        crate::purchase::api::list_disputes,
        crate::purchase::api::process_dispute,
        crate::purchase::api::resolve_dispute,
        crate::purchase::api::force_confirm,
    ),
    components(
        schemas(
            HealthResponse,
            PurchaseStatus,
            PurchaseView,
            DisputeView,
            PurchasePage,
            BuyerStats,
            ProductOwnership,
            OpenOrderRequest,
            OpenDisputeRequest,
            ResolveDisputeRequest,
            PaymentSignalRequest,
            TransitionResponse,
        )
    ),
    modifiers(&SecurityAddon),
    security(("forwarded_identity" = [])),
    tags(
        (name = "Purchases", description = "Buyer orders, history and disputes"),
        (name = "Admin", description = "Dispute handling and lifecycle overrides (admin role)"),
        (name = "Internal", description = "Payment gateway bridge (system role)"),
        (name = "System", description = "Health checks")
    )
)]
pub struct ApiDoc;
