//! Request and response bodies.

use serde::{Deserialize, Serialize};
use wecard_core::directory::SyncReport;
use wecard_core::models::{Member, Tenant};
use wecard_core::permission::{Permission, Role};
use wecard_core::session::SessionClaims;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Signed query parameters on every platform callback.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackQuery {
    pub msg_signature: Option<String>,
    pub timestamp: Option<String>,
    pub nonce: Option<String>,
    /// Encrypted challenge, GET only.
    pub echostr: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstallQuery {
    pub redirect_uri: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallResponse {
    pub pre_auth_code: String,
    pub qr_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthCodeRequest {
    pub auth_code: Option<String>,
}

/// Tenant produced by a manual auth-code exchange. The permanent code stays server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthCodeResponse {
    pub success: bool,
    pub tenant_id: i64,
    pub corp_id: String,
    pub corp_name: String,
    pub created: bool,
    pub auth_info: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JssdkSignatureQuery {
    /// Page URL without the fragment.
    pub url: Option<String>,
}

/// Arguments for `wx.config` / `wx.agentConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JssdkSignatureResponse {
    pub corpid: String,
    pub agentid: Option<i64>,
    pub timestamp: i64,
    pub nonce_str: String,
    pub signature: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizeQuery {
    pub redirect_uri: Option<String>,
    /// `snsapi_base` (default) or `snsapi_privateinfo`.
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    pub auth_url: String,
    pub state: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OAuthCallbackQuery {
    pub code: Option<String>,
    pub corp_id: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyUserQuery {
    pub code: Option<String>,
    pub allow_non_admin: Option<String>,
    pub target: Option<String>,
}

/// Caller summary returned next to a freshly issued token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUser {
    pub userid: String,
    pub open_userid: Option<String>,
    pub tenant_id: i64,
    pub tenant_name: String,
    pub corp_id: String,
    pub is_admin: bool,
    pub role: Role,
    pub in_visible_range: bool,
    pub has_access: bool,
}

impl SessionUser {
    pub fn new(
        tenant: &Tenant,
        userid: impl Into<String>,
        open_userid: Option<String>,
        permission: &Permission,
    ) -> Self {
        Self {
            userid: userid.into(),
            open_userid,
            tenant_id: tenant.id,
            tenant_name: tenant.name.clone(),
            corp_id: tenant.corp_id.clone(),
            is_admin: permission.is_admin,
            role: permission.role,
            in_visible_range: permission.in_visible_range,
            has_access: permission.has_access,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyUserResponse {
    pub success: bool,
    pub token: String,
    pub user: SessionUser,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileResponse {
    pub success: bool,
    pub token: String,
    pub user: SessionUser,
    pub member: Member,
    /// Redirect target remembered by `oauth/authorize`, if the state matched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
    pub user: SessionClaims,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncMembersResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: SyncReport,
}
