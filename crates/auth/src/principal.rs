use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use authcore_core::{Subject, TenantId};

use crate::bitmask::{PermissionMask, RoleMask, RolePermissionTable};

/// Contextual identity attributes carried alongside a principal.
pub type Claims = BTreeMap<String, serde_json::Value>;

/// The result of a successful authentication.
///
/// Transient: returned per call and never persisted by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub subject: Subject,
    pub tenant: TenantId,
    pub role_mask: RoleMask,
    /// Direct grants; role-derived permissions are not folded in.
    pub permission_mask: PermissionMask,
    #[serde(default)]
    pub claims: Claims,
    pub authenticated_at: DateTime<Utc>,
}

impl Principal {
    pub fn new(subject: Subject, tenant: TenantId, authenticated_at: DateTime<Utc>) -> Self {
        Self {
            subject,
            tenant,
            role_mask: RoleMask::NONE,
            permission_mask: PermissionMask::NONE,
            claims: Claims::new(),
            authenticated_at,
        }
    }

    #[must_use]
    pub fn with_masks(mut self, roles: RoleMask, permissions: PermissionMask) -> Self {
        self.role_mask = roles;
        self.permission_mask = permissions;
        self
    }

    #[must_use]
    pub fn with_claim(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.claims.insert(key.into(), value.into());
        self
    }

    /// Direct grants plus everything the held roles grant under the
    /// standard role table.
    pub fn effective_permissions(&self) -> PermissionMask {
        self.effective_permissions_with(&RolePermissionTable::standard())
    }

    pub fn effective_permissions_with(&self, table: &RolePermissionTable) -> PermissionMask {
        table.effective(self.role_mask, self.permission_mask)
    }
}
