use serde::Serialize;
use thiserror::Error;

use authcore_core::{AuthError, ErrorKind, Subject, TenantId};

use crate::bitmask::{PermissionMask, RoleMask, RolePermissionTable, has_all};
use crate::principal::Principal;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("forbidden: missing permissions {0}")]
    Forbidden(PermissionMask),
}

impl From<AuthzError> for AuthError {
    fn from(value: AuthzError) -> Self {
        AuthError::wrap(ErrorKind::PermissionDenied, value.to_string(), value)
    }
}

/// Check that `principal` holds every bit of `required` within `tenant`.
///
/// Pure: no IO and no panics. Roles are expanded through the standard table.
pub fn authorize(
    principal: &Principal,
    tenant: &TenantId,
    required: PermissionMask,
) -> Result<(), AuthzError> {
    authorize_with(&RolePermissionTable::standard(), principal, tenant, required)
}

pub fn authorize_with(
    table: &RolePermissionTable,
    principal: &Principal,
    tenant: &TenantId,
    required: PermissionMask,
) -> Result<(), AuthzError> {
    if &principal.tenant != tenant {
        return Err(AuthzError::TenantMismatch);
    }

    let effective = principal.effective_permissions_with(table);
    if has_all(effective, required) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(effective.missing(required)))
    }
}

/// Auditable account of an authorization decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub subject: Subject,
    pub requested_tenant: TenantId,
    pub principal_tenant: TenantId,
    pub required: PermissionMask,
    pub role_mask: RoleMask,
    pub effective: PermissionMask,
    pub granted: bool,
    pub denial: Option<DenialKind>,
    /// Required bits the principal lacks.
    pub missing: PermissionMask,
    /// Single roles that would cover every missing bit on their own.
    pub sufficient_roles: Vec<RoleMask>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    TenantMismatch,
    MissingPermission,
}

/// Explain why a request would be allowed or denied.
pub fn explain_authorization(
    table: &RolePermissionTable,
    principal: &Principal,
    tenant: &TenantId,
    required: PermissionMask,
) -> AuthorizationExplanation {
    let effective = principal.effective_permissions_with(table);
    let missing = effective.missing(required);

    let denial = if &principal.tenant != tenant {
        Some(DenialKind::TenantMismatch)
    } else if !missing.is_empty() {
        Some(DenialKind::MissingPermission)
    } else {
        None
    };

    let sufficient_roles = if missing.is_empty() {
        Vec::new()
    } else {
        RoleMask::from_bits(u64::MAX)
            .roles()
            .filter(|role| has_all(table.permissions_for(*role), missing))
            .collect()
    };

    AuthorizationExplanation {
        subject: principal.subject.clone(),
        requested_tenant: tenant.clone(),
        principal_tenant: principal.tenant.clone(),
        required,
        role_mask: principal.role_mask,
        effective,
        granted: denial.is_none(),
        denial,
        missing,
        sufficient_roles,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn principal(roles: RoleMask, direct: PermissionMask) -> Principal {
        Principal::new(Subject::new("u1"), TenantId::default(), Utc::now()).with_masks(roles, direct)
    }

    #[test]
    fn role_grants_are_honored() {
        let p = principal(RoleMask::EDITOR, PermissionMask::NONE);
        assert!(authorize(&p, &TenantId::default(), PermissionMask::WRITE).is_ok());
    }

    #[test]
    fn missing_bits_are_forbidden() {
        let p = principal(RoleMask::VIEWER, PermissionMask::NONE);
        let err = authorize(&p, &TenantId::default(), PermissionMask::READ | PermissionMask::DELETE)
            .unwrap_err();
        assert_eq!(err, AuthzError::Forbidden(PermissionMask::DELETE));
    }

    #[test]
    fn other_tenant_is_rejected() {
        let p = principal(RoleMask::ADMIN, PermissionMask::NONE);
        assert_eq!(
            authorize(&p, &TenantId::new("acme"), PermissionMask::READ),
            Err(AuthzError::TenantMismatch)
        );
    }

    #[test]
    fn denial_maps_to_permission_denied() {
        let err: AuthError = AuthzError::TenantMismatch.into();
        assert!(err.is(ErrorKind::PermissionDenied));
    }

    #[test]
    fn explanation_suggests_roles() {
        let p = principal(RoleMask::VIEWER, PermissionMask::NONE);
        let explanation = explain_authorization(
            &RolePermissionTable::standard(),
            &p,
            &TenantId::default(),
            PermissionMask::DELETE,
        );

        assert!(!explanation.granted);
        assert_eq!(explanation.denial, Some(DenialKind::MissingPermission));
        assert_eq!(explanation.missing, PermissionMask::DELETE);
        assert_eq!(explanation.sufficient_roles, vec![RoleMask::OWNER, RoleMask::ADMIN]);
    }

    #[test]
    fn explanation_of_grant() {
        let p = principal(RoleMask::NONE, PermissionMask::READ);
        let explanation = explain_authorization(
            &RolePermissionTable::standard(),
            &p,
            &TenantId::default(),
            PermissionMask::READ,
        );
        assert!(explanation.granted);
        assert!(explanation.sufficient_roles.is_empty());
    }
}
