//! Directory synchronization: mirror the tenant's visible directory into members.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::exchanger::{CredentialExchanger, DirectoryUser, ExchangeError};
use crate::models::{Member, Tenant};
use crate::store::{DirectoryStore, StoreError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Tenant has no permanent code")]
    MissingPermanentCode,

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Counts from one synchronization run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    /// Distinct users seen.
    pub count: usize,
    pub created: usize,
    pub updated: usize,
    pub deactivated: u64,
    /// Departments whose user listing failed; deactivation is skipped when non-zero.
    pub skipped_departments: usize,
    pub synced_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct DirectorySync {
    exchanger: CredentialExchanger,
    store: Arc<dyn DirectoryStore>,
}

impl DirectorySync {
    pub fn new(exchanger: CredentialExchanger, store: Arc<dyn DirectoryStore>) -> Self {
        Self { exchanger, store }
    }

    /// Walk departments, upsert every listed user, deactivate the rest.
    ///
    /// Users are matched by userid, then by mobile (members created by OAuth
    /// before their real userid was known). A failed department listing is
    /// skipped and disables deactivation for the run, since its users were
    /// never seen. A failed department tree listing aborts the run.
    pub async fn sync(&self, tenant: &Tenant) -> Result<SyncReport, SyncError> {
        let permanent_code = tenant
            .permanent_code()
            .ok_or(SyncError::MissingPermanentCode)?;
        let departments = self
            .exchanger
            .departments(&tenant.corp_id, permanent_code)
            .await?;
        info!(corp_id = %tenant.corp_id, departments = departments.len(), "directory sync started");

        let mut seen: HashSet<String> = HashSet::new();
        let mut keep: Vec<i64> = Vec::new();
        let mut created = 0;
        let mut updated = 0;
        let mut skipped_departments = 0;

        for department in &departments {
            let users = match self
                .exchanger
                .department_users(&tenant.corp_id, permanent_code, department.id)
                .await
            {
                Ok(users) => users,
                Err(e) => {
                    warn!(corp_id = %tenant.corp_id, department_id = department.id, error = %e, "department listing failed");
                    skipped_departments += 1;
                    continue;
                }
            };
            debug!(department_id = department.id, users = users.len(), "department listed");

            for user in users {
                if user.userid.is_empty() || !seen.insert(user.userid.clone()) {
                    continue;
                }
                let (member, is_new) = self.match_member(tenant.id, &user).await?;
                let member = apply_directory_user(member, &user, &department.name);
                let saved = self.store.save_member(&member).await?;
                keep.push(saved.id);
                if is_new {
                    created += 1;
                } else {
                    updated += 1;
                }
            }
        }

        let deactivated = if skipped_departments == 0 {
            self.store
                .deactivate_members_except(tenant.id, &keep)
                .await?
        } else {
            warn!(
                corp_id = %tenant.corp_id,
                skipped_departments,
                "directory incomplete, deactivation skipped"
            );
            0
        };
        let synced_at = Utc::now();
        if let Err(e) = self.store.record_member_sync(tenant.id, synced_at).await {
            warn!(corp_id = %tenant.corp_id, error = %e, "failed to record sync time");
        }
        let report = SyncReport {
            count: seen.len(),
            created,
            updated,
            deactivated,
            skipped_departments,
            synced_at,
        };
        info!(
            corp_id = %tenant.corp_id,
            count = report.count,
            created,
            updated,
            deactivated,
            skipped_departments,
            "directory sync finished"
        );
        Ok(report)
    }

    async fn match_member(
        &self,
        tenant_id: i64,
        user: &DirectoryUser,
    ) -> Result<(Member, bool), StoreError> {
        if let Some(member) = self.store.member(tenant_id, &user.userid).await? {
            return Ok((member, false));
        }
        if let Some(mobile) = user.mobile.as_deref().filter(|m| !m.is_empty())
            && let Some(mut member) = self.store.member_by_mobile(tenant_id, mobile).await?
        {
            debug!(old = %member.userid, new = %user.userid, "member matched by mobile");
            member.userid = user.userid.clone();
            return Ok((member, false));
        }
        Ok((Member::new(tenant_id, user.userid.clone()), true))
    }
}

/// Overlay non-empty directory fields onto `member`.
fn apply_directory_user(mut member: Member, user: &DirectoryUser, department: &str) -> Member {
    fn non_empty(v: &Option<String>) -> Option<String> {
        v.as_deref().filter(|s| !s.is_empty()).map(str::to_string)
    }

    if !user.name.is_empty() {
        member.name = user.name.clone();
    }
    member.mobile = non_empty(&user.mobile).or(member.mobile);
    member.email = non_empty(&user.email).or(member.email);
    member.avatar = non_empty(&user.avatar).or(member.avatar);
    member.position = non_empty(&user.position).or(member.position);
    if !department.is_empty() {
        member.department = Some(department.to_string());
    }
    member.is_active = user.is_active();
    member.in_visible_range = true;
    member
}
