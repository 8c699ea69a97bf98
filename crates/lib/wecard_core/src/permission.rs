//! Caller trust level within a tenant.
//!
//! Evaluation order, first match wins:
//!
//! 1. installer: the tenant's stored installer id
//! 2. super_admin: platform admin list (`auth_type == 1`), else directory `isleader`
//! 3. member: listed in the tenant's visible range
//! 4. none

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::exchanger::CredentialExchanger;
use crate::models::Tenant;

/// Resolved role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Installer,
    SuperAdmin,
    Member,
    None,
}

impl Role {
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Installer | Role::SuperAdmin)
    }

    pub fn has_access(self) -> bool {
        self != Role::None
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Installer => "installer",
            Role::SuperAdmin => "super_admin",
            Role::Member => "member",
            Role::None => "none",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role plus the derived flags returned to the frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub role: Role,
    pub is_admin: bool,
    pub has_access: bool,
    pub in_visible_range: bool,
}

impl Permission {
    fn new(role: Role, in_visible_range: bool) -> Self {
        Self {
            role,
            is_admin: role.is_admin(),
            has_access: role.has_access(),
            in_visible_range,
        }
    }
}

/// Resolves roles, consulting the platform for the admin roster.
#[derive(Clone)]
pub struct PermissionResolver {
    exchanger: CredentialExchanger,
}

impl PermissionResolver {
    pub fn new(exchanger: CredentialExchanger) -> Self {
        Self { exchanger }
    }

    pub async fn resolve(&self, tenant: &Tenant, userid: &str) -> Permission {
        if tenant
            .installer_userid
            .as_deref()
            .is_some_and(|installer| installer == userid)
        {
            return Permission::new(Role::Installer, true);
        }

        if self.is_super_admin(tenant, userid).await {
            return Permission::new(Role::SuperAdmin, true);
        }

        if tenant.is_visible(userid) {
            Permission::new(Role::Member, true)
        } else {
            Permission::new(Role::None, false)
        }
    }

    /// Live admin check. Upstream failures count as "not an admin".
    async fn is_super_admin(&self, tenant: &Tenant, userid: &str) -> bool {
        let Some(permanent_code) = tenant.permanent_code() else {
            return false;
        };

        match self.exchanger.admin_list(&tenant.corp_id, permanent_code).await {
            Ok(admins) => {
                if admins.iter().any(|a| a.userid == userid && a.can_manage()) {
                    return true;
                }
            }
            Err(e) => {
                warn!(corp_id = %tenant.corp_id, %userid, error = %e, "admin list unavailable");
            }
        }

        match self
            .exchanger
            .corp_user(&tenant.corp_id, permanent_code, userid)
            .await
        {
            Ok(user) => {
                debug!(corp_id = %tenant.corp_id, %userid, isleader = user.isleader, "leader fallback");
                user.isleader == 1
            }
            Err(e) => {
                warn!(corp_id = %tenant.corp_id, %userid, error = %e, "user lookup unavailable");
                false
            }
        }
    }
}
