//! Directory synchronization trigger.

use axum::extract::State;
use axum::{Extension, Json};
use tracing::info;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedMember;
use crate::models::SyncMembersResponse;

/// `POST /api/v1/wecom/sync-members`: mirror the tenant directory. Admins only.
pub async fn sync_members_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedMember(claims)): Extension<AuthenticatedMember>,
) -> AppResult<Json<SyncMembersResponse>> {
    if !claims.is_admin {
        return Err(AppError::Forbidden("Administrator role required".into()));
    }

    let tenant = state
        .store
        .tenant_by_id(claims.tenant_id)
        .await?
        .filter(|t| t.corp_id == claims.corp_id)
        .ok_or_else(|| AppError::NotFound("Tenant not found".into()))?;
    if tenant.is_cancelled() {
        return Err(AppError::Forbidden("Tenant authorization cancelled".into()));
    }

    info!(corp_id = %tenant.corp_id, userid = %claims.userid, "member sync requested");
    let report = state.directory.sync(&tenant).await?;
    Ok(Json(SyncMembersResponse {
        success: true,
        report,
    }))
}
