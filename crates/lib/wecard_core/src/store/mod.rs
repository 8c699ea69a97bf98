//! Tenant and member persistence.
//!
//! [`PgStore`] is the production backend; [`MemoryStore`] mirrors its
//! uniqueness semantics for tests and single-process development.

mod memory;
mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{Member, Tenant, TenantAuthorization, Upserted};

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Member {0} does not exist")]
    MissingMember(i64),

    #[error("Tenant {tenant_id} already has a member with userid {userid}")]
    DuplicateMember { tenant_id: i64, userid: String },
}

/// Read/write access to tenants and their members.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn tenant_by_id(&self, id: i64) -> Result<Option<Tenant>, StoreError>;

    async fn tenant_by_corp_id(&self, corp_id: &str) -> Result<Option<Tenant>, StoreError>;

    /// Insert or update the tenant for `auth.corp_id`.
    ///
    /// Sets plan `trial` and status `active`. Concurrent calls for the same
    /// corp converge on a single row.
    async fn upsert_authorization(
        &self,
        auth: &TenantAuthorization,
    ) -> Result<(Tenant, Upserted), StoreError>;

    /// Mark the tenant cancelled. `None` when the corp is unknown.
    async fn cancel_tenant(&self, corp_id: &str) -> Result<Option<Tenant>, StoreError>;

    async fn member(&self, tenant_id: i64, userid: &str) -> Result<Option<Member>, StoreError>;

    async fn member_by_open_userid(
        &self,
        tenant_id: i64,
        open_userid: &str,
    ) -> Result<Option<Member>, StoreError>;

    async fn member_by_mobile(
        &self,
        tenant_id: i64,
        mobile: &str,
    ) -> Result<Option<Member>, StoreError>;

    /// Persist `member`: update by id when persisted, else upsert on
    /// `(tenant_id, userid)`. Renaming a persisted member onto a userid
    /// another row holds fails with [`StoreError::DuplicateMember`].
    async fn save_member(&self, member: &Member) -> Result<Member, StoreError>;

    async fn members(&self, tenant_id: i64) -> Result<Vec<Member>, StoreError>;

    /// Mark every member of the tenant not in `keep` inactive and outside the
    /// visible range. Returns the number of members changed.
    async fn deactivate_members_except(
        &self,
        tenant_id: i64,
        keep: &[i64],
    ) -> Result<u64, StoreError>;

    /// Store `at` as `config.workspace.last_member_sync`, keeping the rest of
    /// the tenant config.
    async fn record_member_sync(&self, tenant_id: i64, at: DateTime<Utc>)
    -> Result<(), StoreError>;
}
