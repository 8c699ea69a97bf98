//! Session issuance and introspection.

use axum::extract::{Query, State};
use axum::{Extension, Json};
use tracing::{info, warn};
use wecard_core::session::SessionClaims;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::handlers::{present, required};
use crate::middleware::auth::AuthenticatedMember;
use crate::models::{SessionUser, VerifyResponse, VerifyUserQuery, VerifyUserResponse};

/// Non-admins are admitted only when the caller opts in.
fn non_admin_allowed(query: &VerifyUserQuery) -> bool {
    matches!(query.allow_non_admin.as_deref(), Some("1" | "true" | "True"))
        || query.target.as_deref() == Some("card")
}

/// `GET /api/v1/wecom/auth/verify_user`: exchange an OAuth `code` for a session token.
pub async fn verify_user_handler(
    State(state): State<AppState>,
    Query(query): Query<VerifyUserQuery>,
) -> AppResult<Json<VerifyUserResponse>> {
    let code = required(query.code.clone(), "code")?;
    let identity = state.exchanger.user_identity(&code).await?;

    let corp_id = present(identity.corpid).ok_or_else(|| {
        AppError::Forbidden("User does not belong to an authorized organization".into())
    })?;
    let userid = present(identity.userid)
        .ok_or_else(|| AppError::BadRequest("Unable to resolve user from code".into()))?;

    let tenant = state
        .store
        .tenant_by_corp_id(&corp_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Tenant not found".into()))?;
    if tenant.permanent_code().is_none() {
        return Err(AppError::BadRequest(
            "Tenant authorization incomplete".into(),
        ));
    }
    if tenant.is_cancelled() {
        return Err(AppError::Forbidden("Tenant authorization cancelled".into()));
    }

    let permission = state.permissions.resolve(&tenant, &userid).await;
    if !permission.has_access {
        warn!(%corp_id, %userid, "user outside visible range");
        return Err(AppError::Forbidden(
            "User is not in the app's visible range".into(),
        ));
    }
    if !permission.is_admin && !non_admin_allowed(&query) {
        return Err(AppError::Forbidden("Administrator role required".into()));
    }

    let open_userid = present(identity.open_userid);
    let claims = SessionClaims::new(&tenant, userid.clone(), open_userid.clone(), &permission);
    let token = state.sessions.issue(claims)?;

    info!(%corp_id, %userid, role = %permission.role, "session issued");
    Ok(Json(VerifyUserResponse {
        success: true,
        token,
        user: SessionUser::new(&tenant, userid, open_userid, &permission),
    }))
}

/// `POST /api/v1/wecom/auth/verify`: claims of the presented token. Requires authentication.
pub async fn verify_handler(
    Extension(AuthenticatedMember(claims)): Extension<AuthenticatedMember>,
) -> Json<VerifyResponse> {
    Json(VerifyResponse {
        valid: true,
        user: claims,
    })
}
