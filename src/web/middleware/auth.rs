use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::web::{error::AppError, AppState};

/// Static-token check for ingest and administrative routes. Accepts
/// `Authorization: Bearer <token>` first, then `X-API-Key`. An empty
/// configured token disables the check.
pub async fn require_api_token(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let expected = state.config.auth.api_token.as_str();
    if expected.is_empty() {
        return Ok(next.run(req).await);
    }

    let token = bearer_token(&req)
        .or_else(|| {
            req.headers()
                .get("X-API-Key")
                .and_then(|h| h.to_str().ok())
                .map(str::trim)
        })
        .unwrap_or("");

    if token != expected {
        warn!(path = %req.uri().path(), "rejected request with missing or invalid API token");
        return Err(AppError::Unauthorized);
    }
    Ok(next.run(req).await)
}

fn bearer_token(req: &Request) -> Option<&str> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, rest) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") {
        Some(rest.trim())
    } else {
        None
    }
}
