//! Member OAuth: authorize redirect and profile capture callback.

use std::time::Duration;

use axum::Json;
use axum::extract::{Query, State};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use tracing::{debug, info, warn};
use wecard_core::cache;
use wecard_core::session::SessionClaims;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::handlers::{present, required};
use crate::models::{
    AuthorizeQuery, AuthorizeResponse, OAuthCallbackQuery, ProfileResponse, SessionUser,
};

/// How long an issued OAuth state stays redeemable.
const OAUTH_STATE_TTL: Duration = Duration::from_secs(600);

const OAUTH_STATE_LEN: usize = 24;

const SCOPE_BASE: &str = "snsapi_base";
const SCOPE_PRIVATEINFO: &str = "snsapi_privateinfo";

fn random_state() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(OAUTH_STATE_LEN)
        .map(char::from)
        .collect()
}

/// `GET /api/v1/wecom/oauth/authorize`: platform authorize URL with a fresh state.
pub async fn authorize_handler(
    State(state): State<AppState>,
    Query(query): Query<AuthorizeQuery>,
) -> AppResult<Json<AuthorizeResponse>> {
    let redirect_uri = present(query.redirect_uri)
        .unwrap_or_else(|| format!("{}/wecom/workspace", state.config.public_base_url));
    let scope = match query.scope.as_deref() {
        Some(SCOPE_PRIVATEINFO) => SCOPE_PRIVATEINFO,
        _ => SCOPE_BASE,
    };

    let oauth_state = random_state();
    state
        .cache
        .put(&cache::oauth_state_key(&oauth_state), &redirect_uri, OAUTH_STATE_TTL)
        .await;

    let auth_url = state
        .exchanger
        .oauth_authorize_url(&redirect_uri, scope, &oauth_state);
    debug!(%redirect_uri, scope, "oauth authorize URL issued");
    Ok(Json(AuthorizeResponse {
        auth_url,
        state: oauth_state,
    }))
}

/// `GET /api/v1/wecom/oauth/callback`: capture the member profile and sign in.
pub async fn callback_handler(
    State(state): State<AppState>,
    Query(query): Query<OAuthCallbackQuery>,
) -> AppResult<Json<ProfileResponse>> {
    let code = required(query.code, "code")?;
    let corp_id = required(query.corp_id, "corp_id")?;

    let tenant = state
        .store
        .tenant_by_corp_id(&corp_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Tenant not found".into()))?;
    if tenant.is_cancelled() {
        return Err(AppError::Forbidden("Tenant authorization cancelled".into()));
    }

    // One-shot: a state is consumed by the first callback that presents it.
    let redirect_uri = match present(query.state) {
        Some(s) => {
            let key = cache::oauth_state_key(&s);
            let remembered = state.cache.get(&key).await;
            if remembered.is_some() {
                state.cache.remove(&key).await;
            }
            remembered
        }
        None => None,
    };

    let member = state.profiles.capture(&tenant, &code).await?;
    let permission = state.permissions.resolve(&tenant, &member.userid).await;
    if !permission.has_access {
        warn!(corp_id = %tenant.corp_id, userid = %member.userid, "user outside visible range");
        return Err(AppError::Forbidden(
            "User is not in the app's visible range".into(),
        ));
    }
    let claims = SessionClaims::new(
        &tenant,
        member.userid.clone(),
        member.open_userid.clone(),
        &permission,
    );
    let token = state.sessions.issue(claims)?;

    info!(
        corp_id = %tenant.corp_id,
        member_id = member.id,
        role = %permission.role,
        "oauth profile captured"
    );
    Ok(Json(ProfileResponse {
        success: true,
        token,
        user: SessionUser::new(
            &tenant,
            member.userid.clone(),
            member.open_userid.clone(),
            &permission,
        ),
        member,
        redirect_uri,
    }))
}
