//! Member profile capture from an OAuth `code` (`snsapi_privateinfo` scope).

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::exchanger::{CredentialExchanger, ExchangeError, UserDetail, UserIdentity};
use crate::models::{Member, Tenant};
use crate::store::{DirectoryStore, StoreError};

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("OAuth code did not resolve to a user id")]
    MissingUser,

    #[error("OAuth identity belongs to corp {found:?}, not {expected}")]
    CorpMismatch {
        expected: String,
        found: Option<String>,
    },

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct ProfileCapture {
    exchanger: CredentialExchanger,
    store: Arc<dyn DirectoryStore>,
}

impl ProfileCapture {
    pub fn new(exchanger: CredentialExchanger, store: Arc<dyn DirectoryStore>) -> Self {
        Self { exchanger, store }
    }

    /// Resolve `code`, then create or update the member and mark it authorized.
    ///
    /// The identity must belong to `tenant`'s corp; user ids are only unique
    /// within a corp.
    pub async fn capture(&self, tenant: &Tenant, code: &str) -> Result<Member, ProfileError> {
        let identity = self.exchanger.user_identity(code).await?;
        let corpid = identity.corpid.as_deref().filter(|c| !c.is_empty());
        if corpid != Some(tenant.corp_id.as_str()) {
            warn!(corp_id = %tenant.corp_id, found = ?corpid, "oauth identity from another corp");
            return Err(ProfileError::CorpMismatch {
                expected: tenant.corp_id.clone(),
                found: corpid.map(str::to_string),
            });
        }
        let userid = identity
            .userid
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or(ProfileError::MissingUser)?;
        let open_userid = identity
            .open_userid
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| userid.clone());

        let detail = self.detail(&identity).await;

        let mut member = match self.store.member_by_open_userid(tenant.id, &open_userid).await? {
            Some(member) => member,
            None => match self.store.member(tenant.id, &userid).await? {
                Some(member) => member,
                None => Member::new(tenant.id, userid.clone()),
            },
        };
        if member.open_userid.is_none() {
            member.open_userid = Some(open_userid);
        }
        if let Some(detail) = &detail {
            apply_detail(&mut member, detail);
        }
        member.oauth_authorized = true;
        member.oauth_authorized_at = Some(Utc::now());
        if let Some(ticket) = identity.user_ticket.filter(|t| !t.is_empty()) {
            member.user_ticket = Some(ticket);
        }

        let saved = self.store.save_member(&member).await?;
        info!(
            corp_id = %tenant.corp_id,
            member_id = saved.id,
            has_detail = detail.is_some(),
            "member profile captured"
        );
        Ok(saved)
    }

    /// Sensitive profile; absent without a ticket or on upstream failure.
    async fn detail(&self, identity: &UserIdentity) -> Option<UserDetail> {
        let ticket = identity.user_ticket.as_deref().filter(|t| !t.is_empty())?;
        match self.exchanger.user_detail(ticket).await {
            Ok(detail) => Some(detail),
            Err(e) => {
                warn!(error = %e, "user detail unavailable, keeping basic identity");
                None
            }
        }
    }
}

/// Overwrite fields the platform returned non-empty. External position wins.
fn apply_detail(member: &mut Member, detail: &UserDetail) {
    let pick = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(str::to_string);

    if let Some(name) = pick(&detail.name) {
        member.name = name;
    }
    if let Some(avatar) = pick(&detail.avatar) {
        member.avatar = Some(avatar);
    }
    if let Some(mobile) = pick(&detail.mobile) {
        member.mobile = Some(mobile);
    }
    if let Some(position) = pick(&detail.external_position).or_else(|| pick(&detail.position)) {
        member.position = Some(position);
    }
    if let Some(email) = pick(&detail.email).or_else(|| pick(&detail.biz_mail)) {
        member.email = Some(email);
    }
    if let Some(qr) = pick(&detail.qr_code) {
        member.qr_code = Some(qr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{self, CredentialCache, MemoryCache};
    use crate::config::SuiteConfig;
    use crate::models::{TRIAL_PLAN, TenantStatus};
    use crate::store::MemoryStore;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tenant() -> Tenant {
        Tenant {
            id: 1,
            corp_id: "wwcorp".into(),
            name: "Acme".into(),
            plan: TRIAL_PLAN.into(),
            status: TenantStatus::Active,
            permanent_code: Some("perm".into()),
            installer_userid: None,
            auth_info: json!({}),
            user_limit: 0,
            config: json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn capture_with(server: &MockServer, store: Arc<MemoryStore>) -> ProfileCapture {
        let config =
            SuiteConfig::new("suite", "secret", "tok", "key", "jwt").with_api_base_url(server.uri());
        let cache = Arc::new(MemoryCache::new());
        cache
            .put(cache::SUITE_ACCESS_TOKEN, "suite-token", std::time::Duration::from_secs(600))
            .await;
        let exchanger = CredentialExchanger::new(Arc::new(config), cache).unwrap();
        ProfileCapture::new(exchanger, store)
    }

    async fn mount_identity(server: &MockServer, ticket: Option<&str>) {
        Mock::given(method("GET"))
            .and(path("/cgi-bin/service/auth/getuserinfo3rd"))
            .and(query_param("code", "code-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errcode": 0,
                "corpid": "wwcorp",
                "userid": "zhangsan",
                "open_userid": "woZhang",
                "user_ticket": ticket
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn capture_creates_member_with_external_position() {
        let server = MockServer::start().await;
        mount_identity(&server, Some("ticket-1")).await;
        Mock::given(method("POST"))
            .and(path("/cgi-bin/service/auth/getuserdetail3rd"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errcode": 0,
                "corpid": "wwcorp",
                "userid": "zhangsan",
                "name": "Zhang San",
                "avatar": "https://img/1.png",
                "mobile": "13800000001",
                "position": "PM",
                "external_position": "Senior PM",
                "email": ""
            })))
            .mount(&server)
            .await;
        let store = Arc::new(MemoryStore::new());
        let capture = capture_with(&server, store.clone()).await;

        let member = capture.capture(&tenant(), "code-1").await.unwrap();
        assert!(member.is_persisted());
        assert_eq!(member.userid, "zhangsan");
        assert_eq!(member.open_userid.as_deref(), Some("woZhang"));
        assert_eq!(member.name, "Zhang San");
        assert_eq!(member.position.as_deref(), Some("Senior PM"));
        assert_eq!(member.email, None);
        assert!(member.oauth_authorized);
        assert!(member.oauth_authorized_at.is_some());
        assert_eq!(member.user_ticket.as_deref(), Some("ticket-1"));
    }

    #[tokio::test]
    async fn capture_without_ticket_updates_existing_member() {
        let server = MockServer::start().await;
        mount_identity(&server, None).await;
        let store = Arc::new(MemoryStore::new());
        let mut existing = Member::new(1, "zhangsan");
        existing.name = "Zhang San".into();
        let existing = store.save_member(&existing).await.unwrap();
        let capture = capture_with(&server, store.clone()).await;

        let member = capture.capture(&tenant(), "code-1").await.unwrap();
        assert_eq!(member.id, existing.id);
        assert_eq!(member.name, "Zhang San");
        assert_eq!(member.open_userid.as_deref(), Some("woZhang"));
        assert!(member.oauth_authorized);
        assert_eq!(store.members(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn identity_from_other_corp_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cgi-bin/service/auth/getuserinfo3rd"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errcode": 0, "corpid": "wwother", "userid": "zhangsan"
            })))
            .mount(&server)
            .await;
        let store = Arc::new(MemoryStore::new());
        let capture = capture_with(&server, store.clone()).await;

        let err = capture.capture(&tenant(), "code-1").await.unwrap_err();
        assert!(matches!(
            err,
            ProfileError::CorpMismatch { ref found, .. } if found.as_deref() == Some("wwother")
        ));
        assert!(store.members(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn identity_without_corp_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cgi-bin/service/auth/getuserinfo3rd"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errcode": 0, "userid": "zhangsan"
            })))
            .mount(&server)
            .await;
        let capture = capture_with(&server, Arc::new(MemoryStore::new())).await;
        assert!(matches!(
            capture.capture(&tenant(), "code-1").await,
            Err(ProfileError::CorpMismatch { found: None, .. })
        ));
    }

    #[tokio::test]
    async fn identity_without_userid_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cgi-bin/service/auth/getuserinfo3rd"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errcode": 0, "corpid": "wwcorp", "openid": "oX"
            })))
            .mount(&server)
            .await;
        let capture = capture_with(&server, Arc::new(MemoryStore::new())).await;
        assert!(matches!(
            capture.capture(&tenant(), "code-1").await,
            Err(ProfileError::MissingUser)
        ));
    }
}
