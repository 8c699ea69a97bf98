//! PostgreSQL-backed store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{DirectoryStore, StoreError};
use crate::models::{Member, Tenant, TenantAuthorization, TRIAL_PLAN, Upserted};

const TENANT_COLUMNS: &str = "id, corp_id, name, plan, status, permanent_code, installer_userid, \
     auth_info, user_limit, config, created_at, updated_at";

const MEMBER_COLUMNS: &str = "id, tenant_id, userid, open_userid, name, mobile, email, position, \
     avatar, qr_code, department, is_active, role, is_installer, in_visible_range, \
     oauth_authorized, oauth_authorized_at, user_ticket, created_at, updated_at";

/// Upsert result row; `inserted` is derived from `xmax = 0`.
#[derive(sqlx::FromRow)]
struct UpsertedTenantRow {
    #[sqlx(flatten)]
    tenant: Tenant,
    inserted: bool,
}

/// Store over a shared connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DirectoryStore for PgStore {
    async fn tenant_by_id(&self, id: i64) -> Result<Option<Tenant>, StoreError> {
        let row = sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {TENANT_COLUMNS} FROM tenants WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn tenant_by_corp_id(&self, corp_id: &str) -> Result<Option<Tenant>, StoreError> {
        let row = sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {TENANT_COLUMNS} FROM tenants WHERE corp_id = $1"
        ))
        .bind(corp_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn upsert_authorization(
        &self,
        auth: &TenantAuthorization,
    ) -> Result<(Tenant, Upserted), StoreError> {
        let row = sqlx::query_as::<_, UpsertedTenantRow>(&format!(
            r#"
            INSERT INTO tenants
                (corp_id, name, plan, status, permanent_code, installer_userid, auth_info, user_limit)
            VALUES ($1, $2, $3, 'active', $4, $5, $6, $7)
            ON CONFLICT (corp_id) DO UPDATE SET
                name = EXCLUDED.name,
                plan = EXCLUDED.plan,
                status = 'active',
                permanent_code = EXCLUDED.permanent_code,
                installer_userid = COALESCE(EXCLUDED.installer_userid, tenants.installer_userid),
                auth_info = EXCLUDED.auth_info,
                user_limit = EXCLUDED.user_limit,
                updated_at = now()
            RETURNING {TENANT_COLUMNS}, (xmax = 0) AS inserted
            "#
        ))
        .bind(&auth.corp_id)
        .bind(&auth.corp_name)
        .bind(TRIAL_PLAN)
        .bind(&auth.permanent_code)
        .bind(&auth.installer_userid)
        .bind(&auth.auth_info)
        .bind(auth.user_limit)
        .fetch_one(&self.pool)
        .await?;

        let upserted = if row.inserted {
            Upserted::Created
        } else {
            Upserted::Updated
        };
        Ok((row.tenant, upserted))
    }

    async fn cancel_tenant(&self, corp_id: &str) -> Result<Option<Tenant>, StoreError> {
        let row = sqlx::query_as::<_, Tenant>(&format!(
            "UPDATE tenants SET status = 'cancelled', updated_at = now() \
             WHERE corp_id = $1 RETURNING {TENANT_COLUMNS}"
        ))
        .bind(corp_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn member(&self, tenant_id: i64, userid: &str) -> Result<Option<Member>, StoreError> {
        let row = sqlx::query_as::<_, Member>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members WHERE tenant_id = $1 AND userid = $2"
        ))
        .bind(tenant_id)
        .bind(userid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn member_by_open_userid(
        &self,
        tenant_id: i64,
        open_userid: &str,
    ) -> Result<Option<Member>, StoreError> {
        let row = sqlx::query_as::<_, Member>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members WHERE tenant_id = $1 AND open_userid = $2 LIMIT 1"
        ))
        .bind(tenant_id)
        .bind(open_userid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn member_by_mobile(
        &self,
        tenant_id: i64,
        mobile: &str,
    ) -> Result<Option<Member>, StoreError> {
        let row = sqlx::query_as::<_, Member>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members WHERE tenant_id = $1 AND mobile = $2 LIMIT 1"
        ))
        .bind(tenant_id)
        .bind(mobile)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn save_member(&self, member: &Member) -> Result<Member, StoreError> {
        if member.is_persisted() {
            let row = sqlx::query_as::<_, Member>(&format!(
                r#"
                UPDATE members SET
                    userid = $2, open_userid = $3, name = $4, mobile = $5, email = $6,
                    position = $7, avatar = $8, qr_code = $9, department = $10,
                    is_active = $11, role = $12, is_installer = $13, in_visible_range = $14,
                    oauth_authorized = $15, oauth_authorized_at = $16, user_ticket = $17,
                    updated_at = now()
                WHERE id = $1
                RETURNING {MEMBER_COLUMNS}
                "#
            ))
            .bind(member.id)
            .bind(&member.userid)
            .bind(&member.open_userid)
            .bind(&member.name)
            .bind(&member.mobile)
            .bind(&member.email)
            .bind(&member.position)
            .bind(&member.avatar)
            .bind(&member.qr_code)
            .bind(&member.department)
            .bind(member.is_active)
            .bind(member.role)
            .bind(member.is_installer)
            .bind(member.in_visible_range)
            .bind(member.oauth_authorized)
            .bind(member.oauth_authorized_at)
            .bind(&member.user_ticket)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    StoreError::DuplicateMember {
                        tenant_id: member.tenant_id,
                        userid: member.userid.clone(),
                    }
                }
                e => StoreError::Db(e),
            })?;
            return row.ok_or(StoreError::MissingMember(member.id));
        }

        let row = sqlx::query_as::<_, Member>(&format!(
            r#"
            INSERT INTO members
                (tenant_id, userid, open_userid, name, mobile, email, position, avatar,
                 qr_code, department, is_active, role, is_installer, in_visible_range,
                 oauth_authorized, oauth_authorized_at, user_ticket)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (tenant_id, userid) DO UPDATE SET
                open_userid = COALESCE(EXCLUDED.open_userid, members.open_userid),
                name = EXCLUDED.name,
                mobile = COALESCE(EXCLUDED.mobile, members.mobile),
                email = COALESCE(EXCLUDED.email, members.email),
                position = COALESCE(EXCLUDED.position, members.position),
                avatar = COALESCE(EXCLUDED.avatar, members.avatar),
                qr_code = COALESCE(EXCLUDED.qr_code, members.qr_code),
                department = COALESCE(EXCLUDED.department, members.department),
                is_active = EXCLUDED.is_active,
                role = EXCLUDED.role,
                is_installer = EXCLUDED.is_installer,
                in_visible_range = EXCLUDED.in_visible_range,
                oauth_authorized = members.oauth_authorized OR EXCLUDED.oauth_authorized,
                oauth_authorized_at = COALESCE(EXCLUDED.oauth_authorized_at, members.oauth_authorized_at),
                user_ticket = COALESCE(EXCLUDED.user_ticket, members.user_ticket),
                updated_at = now()
            RETURNING {MEMBER_COLUMNS}
            "#
        ))
        .bind(member.tenant_id)
        .bind(&member.userid)
        .bind(&member.open_userid)
        .bind(&member.name)
        .bind(&member.mobile)
        .bind(&member.email)
        .bind(&member.position)
        .bind(&member.avatar)
        .bind(&member.qr_code)
        .bind(&member.department)
        .bind(member.is_active)
        .bind(member.role)
        .bind(member.is_installer)
        .bind(member.in_visible_range)
        .bind(member.oauth_authorized)
        .bind(member.oauth_authorized_at)
        .bind(&member.user_ticket)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn members(&self, tenant_id: i64) -> Result<Vec<Member>, StoreError> {
        let rows = sqlx::query_as::<_, Member>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members WHERE tenant_id = $1 ORDER BY id"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn deactivate_members_except(
        &self,
        tenant_id: i64,
        keep: &[i64],
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE members SET is_active = FALSE, in_visible_range = FALSE, updated_at = now() \
             WHERE tenant_id = $1 AND NOT (id = ANY($2)) \
               AND (is_active OR in_visible_range)",
        )
        .bind(tenant_id)
        .bind(keep)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn record_member_sync(
        &self,
        tenant_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE tenants SET
                config = jsonb_set(
                    config || jsonb_build_object(
                        'workspace',
                        CASE jsonb_typeof(config->'workspace')
                            WHEN 'object' THEN config->'workspace'
                            ELSE '{}'::jsonb
                        END
                    ),
                    '{workspace,last_member_sync}',
                    to_jsonb($2::text)
                ),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(tenant_id)
        .bind(at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
