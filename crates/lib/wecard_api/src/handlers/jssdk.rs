//! JS-SDK configuration signature for pages opened inside the client.

use axum::extract::{Query, State};
use axum::{Extension, Json};
use chrono::Utc;
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use tracing::debug;
use wecard_core::crypto::jsapi_signature;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::handlers::required;
use crate::middleware::auth::AuthenticatedMember;
use crate::models::{JssdkSignatureQuery, JssdkSignatureResponse};

const NONCE_LEN: usize = 16;

/// `GET /api/v1/wecom/jssdk/signature?url=`: sign `url` with the tenant's jsapi ticket.
pub async fn signature_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedMember(claims)): Extension<AuthenticatedMember>,
    Query(query): Query<JssdkSignatureQuery>,
) -> AppResult<Json<JssdkSignatureResponse>> {
    let url = required(query.url, "url")?;
    let tenant = state
        .store
        .tenant_by_id(claims.tenant_id)
        .await?
        .filter(|t| t.corp_id == claims.corp_id)
        .ok_or_else(|| AppError::NotFound("Tenant not found".into()))?;
    if tenant.is_cancelled() {
        return Err(AppError::Forbidden("Tenant authorization cancelled".into()));
    }
    let permanent_code = tenant
        .permanent_code()
        .ok_or_else(|| AppError::BadRequest("Tenant authorization incomplete".into()))?;

    let ticket = state
        .exchanger
        .jsapi_ticket(&tenant.corp_id, permanent_code)
        .await?;
    let nonce_str: String = rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect();
    let timestamp = Utc::now().timestamp();
    let signature = jsapi_signature(&ticket, &nonce_str, &timestamp.to_string(), &url);

    debug!(corp_id = %tenant.corp_id, %url, "jssdk signature issued");
    Ok(Json(JssdkSignatureResponse {
        agentid: tenant.agent_id(),
        corpid: tenant.corp_id,
        timestamp,
        nonce_str,
        signature,
    }))
}
