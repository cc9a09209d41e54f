//! services/orchestrator/src/web/middleware.rs
//!
//! Bearer-token middleware protecting the trigger routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::warn;

use crate::web::state::AppState;

/// Rejects requests whose `Authorization: Bearer` token does not match the
/// configured `TRIGGER_TOKEN`. Without a configured token every request passes.
pub async fn require_trigger_token(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(expected) = state.config.trigger_token.as_deref() {
        if !token_matches(req.headers(), expected) {
            warn!(path = %req.uri().path(), "Rejected trigger request with a missing or wrong token");
            return Err(StatusCode::UNAUTHORIZED);
        }
    }
    Ok(next.run(req).await)
}

fn token_matches(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token.trim() == expected)
}
