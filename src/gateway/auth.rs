//! Actor extraction
//!
//! Authentication happens upstream. The auth proxy forwards the caller's
//! identity as `X-User-Id` and `X-User-Role`; this middleware turns them into
//! an [`Actor`] request extension and rejects requests without them.

use axum::{body::Body, http::Request, http::StatusCode, middleware::Next, response::Response};

use super::types::ApiError;
use crate::purchase::api::error_codes;
use crate::purchase::types::{Actor, Role};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

fn unauthorized(msg: &str) -> ApiError {
    ApiError::new(StatusCode::UNAUTHORIZED, error_codes::MISSING_AUTH, msg)
}

/// Parse the forwarded identity headers. A missing role means `user`.
pub fn actor_from_headers(headers: &axum::http::HeaderMap) -> Result<Actor, ApiError> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .ok_or_else(|| unauthorized("Missing X-User-Id header"))?
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| unauthorized("Invalid X-User-Id header"))?;

    let role = match headers.get(USER_ROLE_HEADER) {
        None => Role::User,
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<Role>().ok())
            .ok_or_else(|| unauthorized("Invalid X-User-Role header"))?,
    };

    Ok(Actor { user_id, role })
}

/// Axum middleware injecting the [`Actor`] extension
pub async fn actor_middleware(mut request: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let actor = actor_from_headers(request.headers())?;
    tracing::debug!(actor_id = actor.user_id, role = ?actor.role, "Request authenticated");
    request.extensions_mut().insert(actor);
    Ok(next.run(request).await)
}
