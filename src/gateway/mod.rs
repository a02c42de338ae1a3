pub mod auth;
pub mod openapi;
pub mod state;
pub mod types;

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    middleware::from_fn,
    routing::{get, post},
};
use tokio::net::TcpListener;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use crate::purchase::api;
use state::AppState;
use types::ApiResponse;

/// Health check response data
#[derive(serde::Serialize, ToSchema)]
pub struct HealthResponse {
    /// Server timestamp in milliseconds
    #[schema(example = 1764583200000_i64)]
    pub timestamp_ms: i64,
    /// `postgres` or `memory`
    pub store: String,
}

/// Health check endpoint
///
/// - Healthy: 200 OK + {code: 0, data: {timestamp_ms, store}}
/// - Unhealthy: 503 Service Unavailable + {code: 503, msg: "unavailable"}
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse, content_type = "application/json"),
        (status = 503, description = "Service unavailable")
    ),
    security(()),
    tag = "System"
)]
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    let store = match &state.pg_db {
        Some(db) => {
            if let Err(e) = db.health_check().await {
                tracing::error!("[HEALTH] PostgreSQL ping failed: {}", e);
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(ApiResponse {
                        code: 503,
                        msg: "unavailable".to_string(),
                        data: None,
                    }),
                );
            }
            "postgres"
        }
        None => "memory",
    };

    (
        StatusCode::OK,
        Json(ApiResponse::success(HealthResponse {
            timestamp_ms: state.coordinator.now().timestamp_millis(),
            store: store.to_string(),
        })),
    )
}

/// Build the HTTP router
pub fn router(state: Arc<AppState>) -> Router {
    let buyer_routes = Router::new()
        .route("/", post(api::open_order).get(api::list_my_purchases))
        .route("/stats", get(api::purchase_stats))
        .route("/products/{product_id}/status", get(api::product_status))
        .route("/{purchase_id}", get(api::get_purchase))
        .route("/{purchase_id}/cancel", post(api::cancel_order))
        .route("/{purchase_id}/dispute", post(api::open_dispute))
        .route("/{purchase_id}/download", post(api::record_download));

    let admin_routes = Router::new()
        .route(
            "/purchases/pending-confirmations",
            get(api::pending_confirmations),
        )
        .route(
            "/purchases/pending-interventions",
            get(api::pending_interventions),
        )
        .route("/purchases/{purchase_id}/process", post(api::process_dispute))
        .route("/purchases/{purchase_id}/resolve", post(api::resolve_dispute))
        .route("/purchases/{purchase_id}/confirm", post(api::force_confirm))
        .route("/disputes", get(api::list_disputes));

    let internal_routes = Router::new().route("/payments", post(api::payment_signal));

    let authenticated = Router::new()
        .nest("/purchases", buyer_routes)
        .nest("/admin", admin_routes)
        .nest("/internal", internal_routes)
        .layer(from_fn(auth::actor_middleware));

    Router::new()
        .route("/api/v1/health", get(health_check))
        // unversioned alias for load balancers
        .route("/health", get(health_check))
        .nest("/api/v1", authenticated)
        .with_state(state)
        // OpenAPI / Swagger UI (stateless, added after with_state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
}

/// Start HTTP Gateway server; returns once `shutdown` resolves and in-flight
/// requests have drained.
pub async fn run_server<F>(
    host: &str,
    port: u16,
    state: Arc<AppState>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state);

    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {} (port already in use?)", addr))?;

    tracing::info!("Gateway listening on http://{}", addr);
    tracing::info!("API Docs: http://{}/docs", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Gateway server error")?;

    tracing::info!("Gateway stopped");
    Ok(())
}
