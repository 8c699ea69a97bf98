//! Tenant and member domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Enums
// =============================================================================

/// Tenant lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "tenant_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Cancelled,
}

/// Stored member role (distinct from the resolved [`crate::permission::Role`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "member_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    User,
}

/// Plan assigned on (re-)authorization.
pub const TRIAL_PLAN: &str = "trial";

// =============================================================================
// Tenant
// =============================================================================

/// One customer organization that installed the suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tenant {
    pub id: i64,
    pub corp_id: String,
    pub name: String,
    pub plan: String,
    pub status: TenantStatus,
    #[serde(skip_serializing)]
    pub permanent_code: Option<String>,
    pub installer_userid: Option<String>,
    /// Raw `auth_info` payload from the permanent-code exchange.
    pub auth_info: serde_json::Value,
    pub user_limit: i32,
    /// Tenant settings edited through the admin surface.
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    pub fn is_cancelled(&self) -> bool {
        self.status == TenantStatus::Cancelled
    }

    /// Permanent code, if the tenant has completed authorization.
    pub fn permanent_code(&self) -> Option<&str> {
        self.permanent_code.as_deref().filter(|c| !c.is_empty())
    }

    /// User ids in the visible range: `auth_info.agent[*].privilege.allow_user`.
    pub fn visible_users(&self) -> Vec<String> {
        visible_users(&self.auth_info)
    }

    pub fn is_visible(&self, userid: &str) -> bool {
        self.visible_users().iter().any(|u| u == userid)
    }

    /// Custom card title from `config.push_config.cardTitle`.
    pub fn card_title(&self) -> Option<&str> {
        self.config
            .get("push_config")
            .and_then(|p| p.get("cardTitle"))
            .and_then(|t| t.as_str())
            .filter(|t| !t.is_empty())
    }

    /// Agent id of the first authorized agent in `auth_info.agent`.
    pub fn agent_id(&self) -> Option<i64> {
        self.auth_info
            .get("agent")
            .and_then(|a| a.as_array())
            .and_then(|a| a.first())
            .and_then(|a| a.get("agentid"))
            .and_then(|id| id.as_i64())
    }

    /// RFC 3339 time of the last directory sync, from `config.workspace`.
    pub fn last_member_sync(&self) -> Option<&str> {
        self.config
            .get("workspace")
            .and_then(|w| w.get("last_member_sync"))
            .and_then(|t| t.as_str())
    }
}

/// Collect `agent[*].privilege.allow_user` from an `auth_info` payload, deduplicated.
pub fn visible_users(auth_info: &serde_json::Value) -> Vec<String> {
    let mut users: Vec<String> = Vec::new();
    let agents = auth_info
        .get("agent")
        .and_then(|a| a.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();
    for agent in agents {
        let allowed = agent
            .get("privilege")
            .and_then(|p| p.get("allow_user"))
            .and_then(|u| u.as_array())
            .map(Vec::as_slice)
            .unwrap_or_default();
        for user in allowed.iter().filter_map(|u| u.as_str()) {
            if !users.iter().any(|u| u == user) {
                users.push(user.to_string());
            }
        }
    }
    users
}

/// Data written to a tenant by a create/change authorization event.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantAuthorization {
    pub corp_id: String,
    pub corp_name: String,
    pub permanent_code: String,
    pub installer_userid: Option<String>,
    pub auth_info: serde_json::Value,
    pub user_limit: i32,
}

/// Whether an upsert inserted or updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Created,
    Updated,
}

// =============================================================================
// Member
// =============================================================================

/// One user of a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Member {
    pub id: i64,
    pub tenant_id: i64,
    /// Tenant-scoped user id.
    pub userid: String,
    /// Platform-wide encrypted id used by third-party APIs.
    pub open_userid: Option<String>,
    pub name: String,
    pub mobile: Option<String>,
    pub email: Option<String>,
    pub position: Option<String>,
    pub avatar: Option<String>,
    pub qr_code: Option<String>,
    pub department: Option<String>,
    pub is_active: bool,
    pub role: MemberRole,
    pub is_installer: bool,
    pub in_visible_range: bool,
    pub oauth_authorized: bool,
    pub oauth_authorized_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub user_ticket: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Member {
    /// A member not yet persisted (`id == 0`).
    pub fn new(tenant_id: i64, userid: impl Into<String>) -> Self {
        let userid = userid.into();
        let now = Utc::now();
        Self {
            id: 0,
            tenant_id,
            name: userid.clone(),
            userid,
            open_userid: None,
            mobile: None,
            email: None,
            position: None,
            avatar: None,
            qr_code: None,
            department: None,
            is_active: true,
            role: MemberRole::User,
            is_installer: false,
            in_visible_range: false,
            oauth_authorized: false,
            oauth_authorized_at: None,
            user_ticket: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id != 0
    }
}
