//! Credential exchange with the platform API.
//!
//! Token hierarchy:
//!
//! ```text
//! suite_ticket (pushed) ─┬─> suite_access_token ─┬─> pre_auth_code
//!                        │                       ├─> permanent_code (stored on tenant)
//!                        │                       └─> corp_access_token (per tenant)
//! ```
//!
//! Every fetch checks the [`CredentialCache`] first and makes at most one
//! network call on a miss. Concurrent misses across workers each fetch; the
//! results overwrite one another harmlessly.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::cache::{self, CredentialCache};
use crate::config::SuiteConfig;

/// Suite ticket lifetime; the platform re-pushes every ten minutes.
const SUITE_TICKET_TTL: Duration = Duration::from_secs(600);

/// Fallback when the platform omits `expires_in` for the pre-auth code.
const DEFAULT_PRE_AUTH_TTL_SECS: u64 = 600;

/// Fallback for access tokens without `expires_in`.
const DEFAULT_TOKEN_TTL_SECS: u64 = 7200;

/// Floor applied after subtracting the safety margin, for long lifetimes.
const MIN_CACHE_TTL: Duration = Duration::from_secs(60);

const THIRD_PARTY_INSTALL_URL: &str = "https://open.work.weixin.qq.com/wwopen/sso/3rd_qrConnect";
const OAUTH_AUTHORIZE_URL: &str = "https://open.weixin.qq.com/connect/oauth2/authorize";

/// Exchange errors.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("{api} returned errcode {errcode}: {errmsg}")]
    Upstream {
        api: &'static str,
        errcode: i64,
        errmsg: String,
    },

    #[error("{api} returned HTTP {status}")]
    Http { api: &'static str, status: u16 },

    #[error("{api} request failed: {source}")]
    Transport {
        api: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{api} response could not be decoded: {message}")]
    Decode { api: &'static str, message: String },

    #[error("{api} response is missing {field}")]
    MissingField {
        api: &'static str,
        field: &'static str,
    },

    #[error("Suite ticket has not been received yet")]
    MissingSuiteTicket,

    #[error("HTTP client error: {0}")]
    Client(String),
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Deserialize)]
struct SuiteTokenResponse {
    suite_access_token: String,
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PreAuthCodeResponse {
    pre_auth_code: String,
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct JsapiTicketResponse {
    ticket: String,
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CorpTokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

/// Authorized corp, as reported by the permanent-code exchange.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AuthCorpInfo {
    pub corpid: String,
    #[serde(default)]
    pub corp_name: String,
}

/// The user who performed the install.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AuthUserInfo {
    pub userid: Option<String>,
    pub open_userid: Option<String>,
    pub name: Option<String>,
}

/// Result of exchanging a temporary authorization code.
#[derive(Debug, Clone, Deserialize)]
pub struct PermanentCodeGrant {
    pub permanent_code: String,
    #[serde(rename = "auth_corp_info")]
    pub corp: AuthCorpInfo,
    /// Raw scope payload; holds `agent[*].privilege.allow_user`.
    #[serde(default)]
    pub auth_info: Value,
    #[serde(rename = "auth_user_info", default)]
    pub installer: AuthUserInfo,
}

/// Authorization details for an installed corp.
#[derive(Debug, Clone, Deserialize)]
pub struct CorpAuthInfo {
    #[serde(rename = "auth_corp_info")]
    pub corp: AuthCorpInfo,
    #[serde(default)]
    pub auth_info: Value,
}

/// Identity behind an OAuth `code`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UserIdentity {
    #[serde(alias = "CorpId")]
    pub corpid: Option<String>,
    #[serde(alias = "UserId")]
    pub userid: Option<String>,
    pub open_userid: Option<String>,
    pub user_ticket: Option<String>,
}

/// Sensitive profile returned for a `user_ticket`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UserDetail {
    pub corpid: Option<String>,
    pub userid: Option<String>,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub qr_code: Option<String>,
    pub mobile: Option<String>,
    pub email: Option<String>,
    pub biz_mail: Option<String>,
    pub position: Option<String>,
    pub external_position: Option<String>,
}

/// One entry of the application admin list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AdminEntry {
    pub userid: String,
    /// `1` grants management rights, `0` messaging only.
    #[serde(default)]
    pub auth_type: i64,
}

impl AdminEntry {
    pub fn can_manage(&self) -> bool {
        self.auth_type == 1
    }
}

#[derive(Debug, Deserialize)]
struct AdminListResponse {
    #[serde(default)]
    admin: Vec<AdminEntry>,
}

/// A user as seen by the directory API.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DirectoryUser {
    pub userid: String,
    #[serde(default)]
    pub name: String,
    pub mobile: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<String>,
    pub position: Option<String>,
    /// 1 active, 2 disabled, 4 not activated, 5 left.
    pub status: Option<i64>,
    #[serde(default)]
    pub isleader: i64,
}

impl DirectoryUser {
    pub fn is_active(&self) -> bool {
        self.status.unwrap_or(1) == 1
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Department {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    pub parentid: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct DepartmentListResponse {
    #[serde(default)]
    department: Vec<Department>,
}

#[derive(Debug, Deserialize)]
struct UserListResponse {
    #[serde(default)]
    userlist: Vec<DirectoryUser>,
}

/// Attachment of a welcome message sent to a new external contact.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "msgtype", rename_all = "lowercase")]
pub enum WelcomeAttachment {
    Text { text: TextContent },
    Link { link: LinkContent },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextContent {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkContent {
    pub title: String,
    pub url: String,
    pub desc: String,
}

// =============================================================================
// Exchanger
// =============================================================================

/// Platform API client backed by the shared credential cache.
#[derive(Clone)]
pub struct CredentialExchanger {
    config: Arc<SuiteConfig>,
    cache: Arc<dyn CredentialCache>,
    client: Client,
}

impl CredentialExchanger {
    /// Build an exchanger whose requests time out after `config.http_timeout`.
    pub fn new(
        config: Arc<SuiteConfig>,
        cache: Arc<dyn CredentialCache>,
    ) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| ExchangeError::Client(e.to_string()))?;
        Ok(Self {
            config,
            cache,
            client,
        })
    }

    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn CredentialCache> {
        &self.cache
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_base_url)
    }

    /// Cache TTL for a platform-reported lifetime: `expires_in - margin`.
    ///
    /// The floor is [`MIN_CACHE_TTL`] or half the lifetime, whichever is
    /// smaller, so a cached credential never outlives the platform's validity.
    fn cache_ttl(&self, expires_in: Option<u64>, default_secs: u64) -> Duration {
        let lifetime = Duration::from_secs(expires_in.unwrap_or(default_secs));
        lifetime
            .saturating_sub(self.config.token_safety_margin)
            .max(MIN_CACHE_TTL.min(lifetime / 2))
    }

    // -------------------------------------------------------------------------
    // Suite level
    // -------------------------------------------------------------------------

    /// Store the latest pushed suite ticket.
    pub async fn cache_suite_ticket(&self, ticket: &str) {
        self.cache
            .put(cache::SUITE_TICKET, ticket, SUITE_TICKET_TTL)
            .await;
        debug!(ticket_prefix = %prefix(ticket), "suite ticket cached");
    }

    /// Suite-level access token, fetched with the cached ticket on a miss.
    pub async fn suite_access_token(&self) -> Result<String, ExchangeError> {
        if let Some(token) = self.cache.get(cache::SUITE_ACCESS_TOKEN).await {
            return Ok(token);
        }
        let ticket = self
            .cache
            .get(cache::SUITE_TICKET)
            .await
            .ok_or(ExchangeError::MissingSuiteTicket)?;

        let body = json!({
            "suite_id": self.config.suite_id,
            "suite_secret": self.config.suite_secret,
            "suite_ticket": ticket,
        });
        let resp: SuiteTokenResponse = self
            .send(
                "get_suite_token",
                self.client
                    .post(self.endpoint("/cgi-bin/service/get_suite_token"))
                    .json(&body),
                "suite_access_token",
            )
            .await?;

        let ttl = self.cache_ttl(resp.expires_in, DEFAULT_TOKEN_TTL_SECS);
        self.cache
            .put(cache::SUITE_ACCESS_TOKEN, &resp.suite_access_token, ttl)
            .await;
        info!(ttl_secs = ttl.as_secs(), "suite access token refreshed");
        Ok(resp.suite_access_token)
    }

    /// One-time pre-auth code for the install flow.
    pub async fn pre_auth_code(&self) -> Result<String, ExchangeError> {
        if let Some(code) = self.cache.get(cache::PRE_AUTH_CODE).await {
            return Ok(code);
        }
        let token = self.suite_access_token().await?;
        let resp: PreAuthCodeResponse = self
            .send(
                "get_pre_auth_code",
                self.client
                    .get(self.endpoint("/cgi-bin/service/get_pre_auth_code"))
                    .query(&[("suite_access_token", token.as_str())]),
                "pre_auth_code",
            )
            .await?;

        let ttl = self.cache_ttl(resp.expires_in, DEFAULT_PRE_AUTH_TTL_SECS);
        self.cache
            .put(cache::PRE_AUTH_CODE, &resp.pre_auth_code, ttl)
            .await;
        Ok(resp.pre_auth_code)
    }

    /// Exchange a temporary auth code for the tenant's permanent code. Never cached.
    pub async fn permanent_code(&self, auth_code: &str) -> Result<PermanentCodeGrant, ExchangeError> {
        let token = self.suite_access_token().await?;
        let grant: PermanentCodeGrant = self
            .send(
                "get_permanent_code",
                self.client
                    .post(self.endpoint("/cgi-bin/service/get_permanent_code"))
                    .query(&[("suite_access_token", token.as_str())])
                    .json(&json!({ "auth_code": auth_code })),
                "permanent_code",
            )
            .await?;
        if grant.permanent_code.is_empty() {
            return Err(ExchangeError::MissingField {
                api: "get_permanent_code",
                field: "permanent_code",
            });
        }
        if grant.corp.corpid.is_empty() {
            return Err(ExchangeError::MissingField {
                api: "get_permanent_code",
                field: "auth_corp_info.corpid",
            });
        }
        Ok(grant)
    }

    /// Current authorization details for an installed corp.
    pub async fn corp_info(
        &self,
        corp_id: &str,
        permanent_code: &str,
    ) -> Result<CorpAuthInfo, ExchangeError> {
        let token = self.suite_access_token().await?;
        self.send(
            "get_auth_info",
            self.client
                .post(self.endpoint("/cgi-bin/service/get_auth_info"))
                .query(&[("suite_access_token", token.as_str())])
                .json(&json!({ "auth_corpid": corp_id, "permanent_code": permanent_code })),
            "auth_corp_info",
        )
        .await
    }

    /// Tenant-level access token, cached per corp.
    pub async fn corp_access_token(
        &self,
        corp_id: &str,
        permanent_code: &str,
    ) -> Result<String, ExchangeError> {
        let key = cache::corp_access_token_key(corp_id);
        if let Some(token) = self.cache.get(&key).await {
            return Ok(token);
        }
        let suite_token = self.suite_access_token().await?;
        let resp: CorpTokenResponse = self
            .send(
                "get_corp_token",
                self.client
                    .post(self.endpoint("/cgi-bin/service/get_corp_token"))
                    .query(&[("suite_access_token", suite_token.as_str())])
                    .json(&json!({ "auth_corpid": corp_id, "permanent_code": permanent_code })),
                "access_token",
            )
            .await?;

        let ttl = self.cache_ttl(resp.expires_in, DEFAULT_TOKEN_TTL_SECS);
        self.cache.put(&key, &resp.access_token, ttl).await;
        debug!(%corp_id, ttl_secs = ttl.as_secs(), "corp access token refreshed");
        Ok(resp.access_token)
    }

    // -------------------------------------------------------------------------
    // User identity
    // -------------------------------------------------------------------------

    /// Resolve an OAuth `code` to the user behind it.
    pub async fn user_identity(&self, code: &str) -> Result<UserIdentity, ExchangeError> {
        let token = self.suite_access_token().await?;
        self.send(
            "getuserinfo3rd",
            self.client
                .get(self.endpoint("/cgi-bin/service/auth/getuserinfo3rd"))
                .query(&[("suite_access_token", token.as_str()), ("code", code)]),
            "corpid",
        )
        .await
    }

    /// Sensitive profile fields for a `user_ticket` (requires `snsapi_privateinfo`).
    pub async fn user_detail(&self, user_ticket: &str) -> Result<UserDetail, ExchangeError> {
        let token = self.suite_access_token().await?;
        self.send(
            "getuserdetail3rd",
            self.client
                .post(self.endpoint("/cgi-bin/service/auth/getuserdetail3rd"))
                .query(&[("suite_access_token", token.as_str())])
                .json(&json!({ "user_ticket": user_ticket })),
            "userid",
        )
        .await
    }

    // -------------------------------------------------------------------------
    // Tenant directory
    // -------------------------------------------------------------------------

    /// Application admins of the corp. Never cached.
    pub async fn admin_list(
        &self,
        corp_id: &str,
        permanent_code: &str,
    ) -> Result<Vec<AdminEntry>, ExchangeError> {
        let token = self.corp_access_token(corp_id, permanent_code).await?;
        let resp: AdminListResponse = self
            .send(
                "get_admin_list",
                self.client
                    .post(self.endpoint("/cgi-bin/agent/get_admin_list"))
                    .query(&[("access_token", token.as_str())])
                    .json(&json!({})),
                "admin",
            )
            .await?;
        Ok(resp.admin)
    }

    /// A single directory user.
    pub async fn corp_user(
        &self,
        corp_id: &str,
        permanent_code: &str,
        userid: &str,
    ) -> Result<DirectoryUser, ExchangeError> {
        let token = self.corp_access_token(corp_id, permanent_code).await?;
        self.send(
            "user_get",
            self.client
                .get(self.endpoint("/cgi-bin/user/get"))
                .query(&[("access_token", token.as_str()), ("userid", userid)]),
            "userid",
        )
        .await
    }

    pub async fn departments(
        &self,
        corp_id: &str,
        permanent_code: &str,
    ) -> Result<Vec<Department>, ExchangeError> {
        let token = self.corp_access_token(corp_id, permanent_code).await?;
        let resp: DepartmentListResponse = self
            .send(
                "department_list",
                self.client
                    .get(self.endpoint("/cgi-bin/department/list"))
                    .query(&[("access_token", token.as_str())]),
                "department",
            )
            .await?;
        Ok(resp.department)
    }

    /// Corp-level JS-SDK ticket, cached per corp like the access token.
    pub async fn jsapi_ticket(
        &self,
        corp_id: &str,
        permanent_code: &str,
    ) -> Result<String, ExchangeError> {
        let key = cache::jsapi_ticket_key(corp_id);
        if let Some(ticket) = self.cache.get(&key).await {
            return Ok(ticket);
        }
        let token = self.corp_access_token(corp_id, permanent_code).await?;
        let resp: JsapiTicketResponse = self
            .send(
                "get_jsapi_ticket",
                self.client
                    .get(self.endpoint("/cgi-bin/get_jsapi_ticket"))
                    .query(&[("access_token", token.as_str())]),
                "ticket",
            )
            .await?;

        let ttl = self.cache_ttl(resp.expires_in, DEFAULT_TOKEN_TTL_SECS);
        self.cache.put(&key, &resp.ticket, ttl).await;
        debug!(%corp_id, ttl_secs = ttl.as_secs(), "jsapi ticket refreshed");
        Ok(resp.ticket)
    }

    /// Direct members of one department (children excluded).
    pub async fn department_users(
        &self,
        corp_id: &str,
        permanent_code: &str,
        department_id: i64,
    ) -> Result<Vec<DirectoryUser>, ExchangeError> {
        let token = self.corp_access_token(corp_id, permanent_code).await?;
        let department_id = department_id.to_string();
        let resp: UserListResponse = self
            .send(
                "user_list",
                self.client.get(self.endpoint("/cgi-bin/user/list")).query(&[
                    ("access_token", token.as_str()),
                    ("department_id", department_id.as_str()),
                    ("fetch_child", "0"),
                ]),
                "userlist",
            )
            .await?;
        Ok(resp.userlist)
    }

    /// Reply to a new external contact using its one-time welcome code.
    pub async fn send_welcome_message(
        &self,
        corp_id: &str,
        permanent_code: &str,
        welcome_code: &str,
        attachments: &[WelcomeAttachment],
    ) -> Result<(), ExchangeError> {
        let token = self.corp_access_token(corp_id, permanent_code).await?;
        let _: Value = self
            .send(
                "send_welcome_msg",
                self.client
                    .post(self.endpoint("/cgi-bin/externalcontact/send_welcome_msg"))
                    .query(&[("access_token", token.as_str())])
                    .json(&json!({ "welcome_code": welcome_code, "attachments": attachments })),
                "errcode",
            )
            .await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // URL builders
    // -------------------------------------------------------------------------

    /// QR-connect URL an admin scans to install the suite.
    pub fn install_url(&self, pre_auth_code: &str, redirect_uri: &str, state: &str) -> String {
        build_url(
            THIRD_PARTY_INSTALL_URL,
            &[
                ("appid", self.config.suite_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("state", state),
                ("usertype", "admin"),
                ("pre_auth_code", pre_auth_code),
            ],
            None,
        )
    }

    /// OAuth authorize URL for `scope` (`snsapi_base` or `snsapi_privateinfo`).
    pub fn oauth_authorize_url(&self, redirect_uri: &str, scope: &str, state: &str) -> String {
        build_url(
            OAUTH_AUTHORIZE_URL,
            &[
                ("appid", self.config.suite_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", scope),
                ("state", state),
            ],
            Some("wechat_redirect"),
        )
    }

    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------

    /// Send once and classify the JSON body.
    ///
    /// Success is `errcode == 0`, or no `errcode` with `expected` present.
    async fn send<T: DeserializeOwned>(
        &self,
        api: &'static str,
        request: RequestBuilder,
        expected: &'static str,
    ) -> Result<T, ExchangeError> {
        let resp = request.send().await.map_err(|source| {
            error!(api, error = %source, "platform request failed");
            ExchangeError::Transport { api, source }
        })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            error!(api, status, "platform returned non-success HTTP status");
            return Err(ExchangeError::Http { api, status });
        }

        let body: Value = resp.json().await.map_err(|e| ExchangeError::Decode {
            api,
            message: e.to_string(),
        })?;
        classify(api, body, expected)
    }
}

/// Apply the errcode rule and decode the success body.
fn classify<T: DeserializeOwned>(
    api: &'static str,
    body: Value,
    expected: &'static str,
) -> Result<T, ExchangeError> {
    let errcode = body.get("errcode").and_then(Value::as_i64);
    let ok = match errcode {
        Some(0) => true,
        Some(_) => false,
        None => body.get("errcode").is_none() && body.get(expected).is_some(),
    };
    if !ok {
        let errmsg = body
            .get("errmsg")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let errcode = errcode.unwrap_or(-1);
        error!(api, errcode, %errmsg, "platform call failed");
        return Err(ExchangeError::Upstream {
            api,
            errcode,
            errmsg,
        });
    }
    serde_json::from_value(body).map_err(|e| ExchangeError::Decode {
        api,
        message: e.to_string(),
    })
}

fn build_url(base: &str, params: &[(&str, &str)], fragment: Option<&str>) -> String {
    match Url::parse_with_params(base, params) {
        Ok(mut url) => {
            url.set_fragment(fragment);
            url.into()
        }
        Err(e) => {
            error!(%base, error = %e, "invalid base url");
            base.to_string()
        }
    }
}

/// First eight characters, for logging secrets.
pub(crate) fn prefix(secret: &str) -> &str {
    let end = secret
        .char_indices()
        .nth(8)
        .map(|(i, _)| i)
        .unwrap_or(secret.len());
    &secret[..end]
}
