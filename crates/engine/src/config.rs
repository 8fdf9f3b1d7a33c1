use std::time::Duration;

use serde::{Deserialize, Serialize};

use authcore_auth::AuthProfile;
use authcore_core::TenantId;

/// What `create_auth` does with an expiry that is already in the past.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PastExpiryPolicy {
    /// Drop it and store non-expiring material.
    #[default]
    TreatAsNonExpiring,
    /// Fail with `invalid_input`.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Tenant for inputs that do not name one, and for token validation when
    /// the introspection result carries no tenant.
    pub default_tenant: TenantId,
    pub password_profile: AuthProfile,
    pub api_key_profile: AuthProfile,
    pub token_profile: AuthProfile,
    pub past_expiry: PastExpiryPolicy,
    /// How long `fail_open` cache entries outlive their freshness.
    pub stale_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_tenant: TenantId::default_tenant(),
            password_profile: AuthProfile::PasswordBasic,
            api_key_profile: AuthProfile::ApiKey,
            token_profile: AuthProfile::AccessOpaqueRemote,
            past_expiry: PastExpiryPolicy::TreatAsNonExpiring,
            stale_grace: Duration::from_secs(10 * 60),
        }
    }
}
