//! Drives tenant and member state transitions from classified events.
//!
//! Every transition is safe to replay: the platform redelivers until it sees
//! `success`, so the same event may arrive more than once.

use std::sync::Arc;

use tracing::{info, warn};

use super::{ContactChange, EventError, SuiteEvent};
use crate::exchanger::{CredentialExchanger, LinkContent, TextContent, WelcomeAttachment, prefix};
use crate::models::{Member, Tenant, TenantAuthorization, Upserted, visible_users};
use crate::store::DirectoryStore;

const WELCOME_LINK_TITLE: &str = "My digital business card";
const WELCOME_LINK_DESC: &str = "Tap to view my contact details and services";

/// Result of dispatching one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    TicketCached,
    TenantCreated { tenant_id: i64 },
    TenantUpdated { tenant_id: i64 },
    TenantCancelled { tenant_id: i64 },
    WelcomePushed { member_id: i64 },
    /// Recognized event that required no action.
    NoOp(&'static str),
    /// Event type not modeled.
    Ignored,
}

/// Applies [`SuiteEvent`]s to the credential cache and directory store.
#[derive(Clone)]
pub struct EventDispatcher {
    exchanger: CredentialExchanger,
    store: Arc<dyn DirectoryStore>,
}

impl EventDispatcher {
    pub fn new(exchanger: CredentialExchanger, store: Arc<dyn DirectoryStore>) -> Self {
        Self { exchanger, store }
    }

    pub async fn dispatch(&self, event: &SuiteEvent) -> Result<DispatchOutcome, EventError> {
        match event {
            SuiteEvent::SuiteTicket { ticket } => {
                self.exchanger.cache_suite_ticket(ticket).await;
                Ok(DispatchOutcome::TicketCached)
            }
            SuiteEvent::CreateAuth { auth_code } | SuiteEvent::ChangeAuth { auth_code } => {
                self.authorize(event.kind(), auth_code).await
            }
            SuiteEvent::CancelAuth { corp_id } => self.cancel(corp_id).await,
            SuiteEvent::ExternalContact {
                corp_id,
                change,
                user_id,
                welcome_code,
                ..
            } => {
                self.external_contact(corp_id, change, user_id.as_deref(), welcome_code.as_deref())
                    .await
            }
            SuiteEvent::Unknown { info_type } => {
                info!(%info_type, "ignoring unmodeled event");
                Ok(DispatchOutcome::Ignored)
            }
        }
    }

    async fn authorize(&self, kind: &str, auth_code: &str) -> Result<DispatchOutcome, EventError> {
        let (tenant, upserted) = self.authorize_code(kind, auth_code).await?;
        Ok(match upserted {
            Upserted::Created => DispatchOutcome::TenantCreated {
                tenant_id: tenant.id,
            },
            Upserted::Updated => DispatchOutcome::TenantUpdated {
                tenant_id: tenant.id,
            },
        })
    }

    /// Exchange the auth code and upsert the tenant.
    ///
    /// Shared by the `create_auth`/`change_auth` events and the manual
    /// exchange endpoint; `source` only labels the log line.
    pub async fn authorize_code(
        &self,
        source: &str,
        auth_code: &str,
    ) -> Result<(Tenant, Upserted), EventError> {
        let grant = self.exchanger.permanent_code(auth_code).await?;
        let visible = visible_users(&grant.auth_info);
        let corp_name = if grant.corp.corp_name.is_empty() {
            grant.corp.corpid.clone()
        } else {
            grant.corp.corp_name.clone()
        };

        let auth = TenantAuthorization {
            corp_id: grant.corp.corpid.clone(),
            corp_name,
            permanent_code: grant.permanent_code.clone(),
            installer_userid: grant.installer.userid.clone().filter(|u| !u.is_empty()),
            auth_info: grant.auth_info.clone(),
            user_limit: i32::try_from(visible.len()).unwrap_or(i32::MAX),
        };
        let (tenant, upserted) = self.store.upsert_authorization(&auth).await?;

        info!(
            event = source,
            corp_id = %tenant.corp_id,
            tenant_id = tenant.id,
            installer = ?tenant.installer_userid,
            visible_users = visible.len(),
            permanent_code_prefix = %prefix(&grant.permanent_code),
            ?upserted,
            "tenant authorized"
        );
        Ok((tenant, upserted))
    }

    async fn cancel(&self, corp_id: &str) -> Result<DispatchOutcome, EventError> {
        match self.store.cancel_tenant(corp_id).await? {
            Some(tenant) => {
                info!(%corp_id, tenant_id = tenant.id, "tenant cancelled");
                Ok(DispatchOutcome::TenantCancelled {
                    tenant_id: tenant.id,
                })
            }
            None => {
                info!(%corp_id, "cancel_auth for unknown corp");
                Ok(DispatchOutcome::NoOp("unknown tenant"))
            }
        }
    }

    async fn external_contact(
        &self,
        corp_id: &str,
        change: &ContactChange,
        user_id: Option<&str>,
        welcome_code: Option<&str>,
    ) -> Result<DispatchOutcome, EventError> {
        if !change.is_addition() {
            info!(%corp_id, ?change, "external contact change recorded");
            return Ok(DispatchOutcome::NoOp("not an addition"));
        }
        let Some(tenant) = self.store.tenant_by_corp_id(corp_id).await? else {
            info!(%corp_id, "external contact event for unknown tenant");
            return Ok(DispatchOutcome::NoOp("unknown tenant"));
        };
        let Some(user_id) = user_id else {
            return Ok(DispatchOutcome::NoOp("no member"));
        };
        let Some(member) = self.store.member(tenant.id, user_id).await? else {
            info!(%corp_id, %user_id, "external contact added for unknown member");
            return Ok(DispatchOutcome::NoOp("no member"));
        };
        let Some(welcome_code) = welcome_code else {
            info!(%corp_id, %user_id, "no welcome code, skipping card push");
            return Ok(DispatchOutcome::NoOp("no welcome code"));
        };
        let Some(permanent_code) = tenant.permanent_code() else {
            warn!(%corp_id, "tenant has no permanent code, skipping card push");
            return Ok(DispatchOutcome::NoOp("no permanent code"));
        };

        if !member.oauth_authorized && (member.name == member.userid || member.avatar.is_none()) {
            warn!(%corp_id, %user_id, "member profile incomplete, card may render sparsely");
        }

        let attachments = self.card_attachments(&tenant, &member);
        match self
            .exchanger
            .send_welcome_message(corp_id, permanent_code, welcome_code, &attachments)
            .await
        {
            Ok(()) => {
                info!(%corp_id, member_id = member.id, "business card pushed");
                Ok(DispatchOutcome::WelcomePushed {
                    member_id: member.id,
                })
            }
            Err(e) => {
                warn!(%corp_id, member_id = member.id, error = %e, "business card push failed");
                Ok(DispatchOutcome::NoOp("push failed"))
            }
        }
    }

    /// Text title followed by a link to the card preview.
    fn card_attachments(&self, tenant: &Tenant, member: &Member) -> [WelcomeAttachment; 2] {
        let title = tenant
            .card_title()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}'s business card", member.name));
        let url = format!(
            "{}/card-preview/{}/{}",
            self.exchanger.config().public_base_url,
            tenant.id,
            member.id
        );
        [
            WelcomeAttachment::Text {
                text: TextContent { content: title },
            },
            WelcomeAttachment::Link {
                link: LinkContent {
                    title: WELCOME_LINK_TITLE.to_string(),
                    url,
                    desc: WELCOME_LINK_DESC.to_string(),
                },
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{self, CredentialCache, MemoryCache};
    use crate::config::SuiteConfig;
    use crate::models::TenantStatus;
    use crate::store::MemoryStore;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        server: MockServer,
        cache: Arc<MemoryCache>,
        store: Arc<MemoryStore>,
        dispatcher: EventDispatcher,
    }

    async fn harness() -> Harness {
        let server = MockServer::start().await;
        let config = SuiteConfig::new("suite-1", "secret-1", "tok", "key", "jwt")
            .with_api_base_url(server.uri())
            .with_public_base_url("https://cards.example.com");
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryStore::new());
        let exchanger = CredentialExchanger::new(Arc::new(config), cache.clone()).unwrap();
        let dispatcher = EventDispatcher::new(exchanger, store.clone());
        cache
            .put(cache::SUITE_ACCESS_TOKEN, "suite-token", std::time::Duration::from_secs(600))
            .await;
        Harness {
            server,
            cache,
            store,
            dispatcher,
        }
    }

    async fn mount_permanent_code(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/cgi-bin/service/get_permanent_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "permanent_code": "perm-1",
                "auth_corp_info": {"corpid": "wwcorp", "corp_name": "Acme"},
                "auth_info": {"agent": [{"privilege": {"allow_user": ["u2", "u3"]}}]},
                "auth_user_info": {"userid": "u1"}
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn suite_ticket_is_cached() {
        let h = harness().await;
        let outcome = h
            .dispatcher
            .dispatch(&SuiteEvent::SuiteTicket {
                ticket: "ticket-9".into(),
            })
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::TicketCached);
        assert_eq!(h.cache.get(cache::SUITE_TICKET).await.as_deref(), Some("ticket-9"));
        assert_eq!(h.store.tenant_count().await, 0);
    }

    #[tokio::test]
    async fn manual_code_exchange_upserts_tenant() {
        let h = harness().await;
        mount_permanent_code(&h.server).await;

        let (tenant, upserted) = h.dispatcher.authorize_code("manual", "auth-1").await.unwrap();
        assert_eq!(upserted, Upserted::Created);
        assert_eq!(tenant.corp_id, "wwcorp");
        assert_eq!(tenant.permanent_code(), Some("perm-1"));
        assert_eq!(tenant.user_limit, 2);

        let (again, upserted) = h.dispatcher.authorize_code("manual", "auth-1").await.unwrap();
        assert_eq!(upserted, Upserted::Updated);
        assert_eq!(again.id, tenant.id);
        assert_eq!(h.store.tenant_count().await, 1);
    }

    #[tokio::test]
    async fn replayed_create_auth_yields_one_tenant() {
        let h = harness().await;
        mount_permanent_code(&h.server).await;
        let event = SuiteEvent::CreateAuth {
            auth_code: "auth-1".into(),
        };

        let first = h.dispatcher.dispatch(&event).await.unwrap();
        let second = h.dispatcher.dispatch(&event).await.unwrap();

        let DispatchOutcome::TenantCreated { tenant_id } = first else {
            panic!("unexpected outcome: {first:?}");
        };
        assert_eq!(second, DispatchOutcome::TenantUpdated { tenant_id });
        assert_eq!(h.store.tenant_count().await, 1);

        let tenant = h.store.tenant_by_corp_id("wwcorp").await.unwrap().unwrap();
        assert_eq!(tenant.name, "Acme");
        assert_eq!(tenant.plan, "trial");
        assert_eq!(tenant.installer_userid.as_deref(), Some("u1"));
        assert_eq!(tenant.permanent_code(), Some("perm-1"));
        assert_eq!(tenant.user_limit, 2);
        assert_eq!(tenant.visible_users(), vec!["u2", "u3"]);
    }

    #[tokio::test]
    async fn create_auth_upstream_failure_is_an_error_without_mutation() {
        let h = harness().await;
        Mock::given(method("POST"))
            .and(path("/cgi-bin/service/get_permanent_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errcode": 40084, "errmsg": "invalid permanent_code"
            })))
            .mount(&h.server)
            .await;

        let result = h
            .dispatcher
            .dispatch(&SuiteEvent::CreateAuth {
                auth_code: "bad".into(),
            })
            .await;
        assert!(matches!(result, Err(EventError::Exchange(_))));
        assert_eq!(h.store.tenant_count().await, 0);
    }

    #[tokio::test]
    async fn cancel_auth_marks_tenant_cancelled() {
        let h = harness().await;
        mount_permanent_code(&h.server).await;
        h.dispatcher
            .dispatch(&SuiteEvent::CreateAuth {
                auth_code: "auth-1".into(),
            })
            .await
            .unwrap();

        let outcome = h
            .dispatcher
            .dispatch(&SuiteEvent::CancelAuth {
                corp_id: "wwcorp".into(),
            })
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::TenantCancelled { .. }));
        let tenant = h.store.tenant_by_corp_id("wwcorp").await.unwrap().unwrap();
        assert_eq!(tenant.status, TenantStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_auth_for_unknown_corp_is_noop() {
        let h = harness().await;
        let outcome = h
            .dispatcher
            .dispatch(&SuiteEvent::CancelAuth {
                corp_id: "nobody".into(),
            })
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::NoOp("unknown tenant"));
        assert_eq!(h.store.tenant_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_event_is_ignored() {
        let h = harness().await;
        let outcome = h
            .dispatcher
            .dispatch(&SuiteEvent::Unknown {
                info_type: "reset_permanent_code".into(),
            })
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Ignored);
    }

    fn contact_added(user_id: &str, welcome_code: Option<&str>) -> SuiteEvent {
        SuiteEvent::ExternalContact {
            corp_id: "wwcorp".into(),
            change: ContactChange::Add,
            user_id: Some(user_id.into()),
            external_user_id: Some("wmEx".into()),
            welcome_code: welcome_code.map(str::to_string),
            state: None,
        }
    }

    async fn authorized_tenant_with_member(h: &Harness) -> (Tenant, Member) {
        mount_permanent_code(&h.server).await;
        h.dispatcher
            .dispatch(&SuiteEvent::CreateAuth {
                auth_code: "auth-1".into(),
            })
            .await
            .unwrap();
        let tenant = h.store.tenant_by_corp_id("wwcorp").await.unwrap().unwrap();
        let mut member = Member::new(tenant.id, "zhangsan");
        member.name = "Zhang San".into();
        let member = h.store.save_member(&member).await.unwrap();
        (tenant, member)
    }

    #[tokio::test]
    async fn contact_without_welcome_code_is_noop() {
        let h = harness().await;
        authorized_tenant_with_member(&h).await;
        let outcome = h
            .dispatcher
            .dispatch(&contact_added("zhangsan", None))
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::NoOp("no welcome code"));
    }

    #[tokio::test]
    async fn contact_for_unknown_member_is_noop() {
        let h = harness().await;
        authorized_tenant_with_member(&h).await;
        let outcome = h
            .dispatcher
            .dispatch(&contact_added("lisi", Some("wc-1")))
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::NoOp("no member"));
    }

    #[tokio::test]
    async fn contact_removal_is_noop() {
        let h = harness().await;
        let outcome = h
            .dispatcher
            .dispatch(&SuiteEvent::ExternalContact {
                corp_id: "wwcorp".into(),
                change: ContactChange::Delete,
                user_id: Some("zhangsan".into()),
                external_user_id: None,
                welcome_code: None,
                state: None,
            })
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::NoOp("not an addition"));
    }

    #[tokio::test]
    async fn welcome_code_pushes_card() {
        let h = harness().await;
        let (tenant, member) = authorized_tenant_with_member(&h).await;
        Mock::given(method("POST"))
            .and(path("/cgi-bin/service/get_corp_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "corp-token", "expires_in": 7200
            })))
            .mount(&h.server)
            .await;
        let preview = format!(
            "https://cards.example.com/card-preview/{}/{}",
            tenant.id, member.id
        );
        Mock::given(method("POST"))
            .and(path("/cgi-bin/externalcontact/send_welcome_msg"))
            .and(body_partial_json(json!({
                "welcome_code": "wc-1",
                "attachments": [
                    {"msgtype": "text", "text": {"content": "Zhang San's business card"}},
                    {"msgtype": "link", "link": {"url": preview}}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errcode": 0})))
            .expect(1)
            .mount(&h.server)
            .await;

        let outcome = h
            .dispatcher
            .dispatch(&contact_added("zhangsan", Some("wc-1")))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::WelcomePushed {
                member_id: member.id
            }
        );
    }

    #[tokio::test]
    async fn failed_push_is_reported_as_noop() {
        let h = harness().await;
        authorized_tenant_with_member(&h).await;
        Mock::given(method("POST"))
            .and(path("/cgi-bin/service/get_corp_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errcode": 42001, "errmsg": "access_token expired"
            })))
            .mount(&h.server)
            .await;

        let outcome = h
            .dispatcher
            .dispatch(&contact_added("zhangsan", Some("wc-1")))
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::NoOp("push failed"));
    }
}
