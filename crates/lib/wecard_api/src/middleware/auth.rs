//! Session middleware: Bearer token extraction and verification.

use axum::http::header::AUTHORIZATION;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::debug;
use wecard_core::session::SessionClaims;

use crate::AppState;
use crate::error::AppError;

/// Key used to store verified [`SessionClaims`] in request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedMember(pub SessionClaims);

/// Axum middleware: extracts `Authorization: Bearer <token>`, verifies the
/// session token, and injects `AuthenticatedMember` into request extensions.
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing authorization header".into()))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Invalid authorization scheme".into()))?;

    let claims = state.sessions.verify(token).map_err(|e| {
        debug!(error = %e, "session rejected");
        AppError::from(e)
    })?;

    request.extensions_mut().insert(AuthenticatedMember(claims));

    Ok(next.run(request).await)
}
