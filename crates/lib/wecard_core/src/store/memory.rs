//! In-memory store with the same uniqueness rules as the SQL schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tokio::sync::Mutex;

use super::{DirectoryStore, StoreError};
use crate::models::{Member, Tenant, TenantAuthorization, TenantStatus, TRIAL_PLAN, Upserted};

#[derive(Debug, Default)]
struct Tables {
    tenants: Vec<Tenant>,
    members: Vec<Member>,
    next_tenant_id: i64,
    next_member_id: i64,
}

/// Process-local store. One lock guards both tables so upserts are atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tenant rows, cancelled ones included.
    pub async fn tenant_count(&self) -> usize {
        self.tables.lock().await.tenants.len()
    }

    /// Insert a tenant directly, bypassing the authorization flow.
    pub async fn insert_tenant(&self, mut tenant: Tenant) -> Tenant {
        let mut tables = self.tables.lock().await;
        tables.next_tenant_id += 1;
        tenant.id = tables.next_tenant_id;
        tables.tenants.push(tenant.clone());
        tenant
    }
}

#[async_trait]
impl DirectoryStore for MemoryStore {
    async fn tenant_by_id(&self, id: i64) -> Result<Option<Tenant>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.tenants.iter().find(|t| t.id == id).cloned())
    }

    async fn tenant_by_corp_id(&self, corp_id: &str) -> Result<Option<Tenant>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.tenants.iter().find(|t| t.corp_id == corp_id).cloned())
    }

    async fn upsert_authorization(
        &self,
        auth: &TenantAuthorization,
    ) -> Result<(Tenant, Upserted), StoreError> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();

        if let Some(tenant) = tables.tenants.iter_mut().find(|t| t.corp_id == auth.corp_id) {
            tenant.name = auth.corp_name.clone();
            tenant.plan = TRIAL_PLAN.to_string();
            tenant.status = TenantStatus::Active;
            tenant.permanent_code = Some(auth.permanent_code.clone());
            if auth.installer_userid.is_some() {
                tenant.installer_userid = auth.installer_userid.clone();
            }
            tenant.auth_info = auth.auth_info.clone();
            tenant.user_limit = auth.user_limit;
            tenant.updated_at = now;
            return Ok((tenant.clone(), Upserted::Updated));
        }

        tables.next_tenant_id += 1;
        let tenant = Tenant {
            id: tables.next_tenant_id,
            corp_id: auth.corp_id.clone(),
            name: auth.corp_name.clone(),
            plan: TRIAL_PLAN.to_string(),
            status: TenantStatus::Active,
            permanent_code: Some(auth.permanent_code.clone()),
            installer_userid: auth.installer_userid.clone(),
            auth_info: auth.auth_info.clone(),
            user_limit: auth.user_limit,
            config: json!({}),
            created_at: now,
            updated_at: now,
        };
        tables.tenants.push(tenant.clone());
        Ok((tenant, Upserted::Created))
    }

    async fn cancel_tenant(&self, corp_id: &str) -> Result<Option<Tenant>, StoreError> {
        let mut tables = self.tables.lock().await;
        Ok(tables
            .tenants
            .iter_mut()
            .find(|t| t.corp_id == corp_id)
            .map(|t| {
                t.status = TenantStatus::Cancelled;
                t.updated_at = Utc::now();
                t.clone()
            }))
    }

    async fn member(&self, tenant_id: i64, userid: &str) -> Result<Option<Member>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .members
            .iter()
            .find(|m| m.tenant_id == tenant_id && m.userid == userid)
            .cloned())
    }

    async fn member_by_open_userid(
        &self,
        tenant_id: i64,
        open_userid: &str,
    ) -> Result<Option<Member>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .members
            .iter()
            .find(|m| m.tenant_id == tenant_id && m.open_userid.as_deref() == Some(open_userid))
            .cloned())
    }

    async fn member_by_mobile(
        &self,
        tenant_id: i64,
        mobile: &str,
    ) -> Result<Option<Member>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .members
            .iter()
            .find(|m| m.tenant_id == tenant_id && m.mobile.as_deref() == Some(mobile))
            .cloned())
    }

    async fn save_member(&self, member: &Member) -> Result<Member, StoreError> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();

        if member.is_persisted() {
            if tables.members.iter().any(|m| {
                m.id != member.id && m.tenant_id == member.tenant_id && m.userid == member.userid
            }) {
                return Err(StoreError::DuplicateMember {
                    tenant_id: member.tenant_id,
                    userid: member.userid.clone(),
                });
            }
            let slot = tables
                .members
                .iter_mut()
                .find(|m| m.id == member.id)
                .ok_or(StoreError::MissingMember(member.id))?;
            let created_at = slot.created_at;
            *slot = Member {
                created_at,
                updated_at: now,
                ..member.clone()
            };
            return Ok(slot.clone());
        }

        if let Some(slot) = tables
            .members
            .iter_mut()
            .find(|m| m.tenant_id == member.tenant_id && m.userid == member.userid)
        {
            let merged = Member {
                id: slot.id,
                open_userid: member.open_userid.clone().or(slot.open_userid.take()),
                mobile: member.mobile.clone().or(slot.mobile.take()),
                email: member.email.clone().or(slot.email.take()),
                position: member.position.clone().or(slot.position.take()),
                avatar: member.avatar.clone().or(slot.avatar.take()),
                qr_code: member.qr_code.clone().or(slot.qr_code.take()),
                department: member.department.clone().or(slot.department.take()),
                oauth_authorized: slot.oauth_authorized || member.oauth_authorized,
                oauth_authorized_at: member.oauth_authorized_at.or(slot.oauth_authorized_at),
                user_ticket: member.user_ticket.clone().or(slot.user_ticket.take()),
                created_at: slot.created_at,
                updated_at: now,
                ..member.clone()
            };
            *slot = merged;
            return Ok(slot.clone());
        }

        tables.next_member_id += 1;
        let saved = Member {
            id: tables.next_member_id,
            created_at: now,
            updated_at: now,
            ..member.clone()
        };
        tables.members.push(saved.clone());
        Ok(saved)
    }

    async fn members(&self, tenant_id: i64) -> Result<Vec<Member>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .members
            .iter()
            .filter(|m| m.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn deactivate_members_except(
        &self,
        tenant_id: i64,
        keep: &[i64],
    ) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let mut changed = 0;
        for member in tables.members.iter_mut().filter(|m| {
            m.tenant_id == tenant_id && !keep.contains(&m.id) && (m.is_active || m.in_visible_range)
        }) {
            member.is_active = false;
            member.in_visible_range = false;
            member.updated_at = now;
            changed += 1;
        }
        Ok(changed)
    }

    async fn record_member_sync(
        &self,
        tenant_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(tenant) = tables.tenants.iter_mut().find(|t| t.id == tenant_id) else {
            return Ok(());
        };
        if !tenant.config.is_object() {
            tenant.config = json!({});
        }
        if let Value::Object(config) = &mut tenant.config {
            let workspace = config.entry("workspace").or_insert_with(|| json!({}));
            if !workspace.is_object() {
                *workspace = json!({});
            }
            workspace["last_member_sync"] = Value::String(at.to_rfc3339());
        }
        tenant.updated_at = Utc::now();
        Ok(())
    }
}
