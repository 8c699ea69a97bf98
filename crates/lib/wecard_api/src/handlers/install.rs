//! Suite installation: QR install URL and manual auth-code exchange.

use axum::Json;
use axum::extract::{Query, State};
use tracing::info;
use wecard_core::models::Upserted;

use crate::AppState;
use crate::error::AppResult;
use crate::handlers::{ensure_configured, present, required};
use crate::models::{AuthCodeRequest, AuthCodeResponse, InstallQuery, InstallResponse};

const DEFAULT_INSTALL_STATE: &str = "wechat_auth";

/// `GET /api/v1/wecom/install`: pre-auth code plus the QR install URL.
pub async fn install_handler(
    State(state): State<AppState>,
    Query(query): Query<InstallQuery>,
) -> AppResult<Json<InstallResponse>> {
    ensure_configured(&state.config)?;

    let pre_auth_code = state.exchanger.pre_auth_code().await?;
    let redirect_uri = present(query.redirect_uri)
        .unwrap_or_else(|| format!("{}/wecom/settings", state.config.public_base_url));
    let install_state = present(query.state).unwrap_or_else(|| DEFAULT_INSTALL_STATE.into());
    let qr_url = state
        .exchanger
        .install_url(&pre_auth_code, &redirect_uri, &install_state);

    info!(%redirect_uri, "install URL issued");
    Ok(Json(InstallResponse {
        pre_auth_code,
        qr_url,
    }))
}

/// `POST /api/v1/wecom/auth`: exchange an install `auth_code` for the tenant.
///
/// Same upsert as the `create_auth` event; replaying a code the platform
/// already consumed surfaces as an upstream error.
pub async fn auth_code_handler(
    State(state): State<AppState>,
    Json(body): Json<AuthCodeRequest>,
) -> AppResult<Json<AuthCodeResponse>> {
    ensure_configured(&state.config)?;
    let auth_code = required(body.auth_code, "auth_code")?;

    let (tenant, upserted) = state.dispatcher.authorize_code("manual", &auth_code).await?;
    info!(corp_id = %tenant.corp_id, tenant_id = tenant.id, ?upserted, "auth code exchanged");
    Ok(Json(AuthCodeResponse {
        success: true,
        tenant_id: tenant.id,
        corp_id: tenant.corp_id,
        corp_name: tenant.name,
        created: upserted == Upserted::Created,
        auth_info: tenant.auth_info,
    }))
}
