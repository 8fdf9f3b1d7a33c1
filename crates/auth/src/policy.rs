//! Persistence policy matrix.
//!
//! Each [`AuthProfile`] maps to an immutable [`PersistencePolicy`] that says
//! where the material is authoritative, how (if at all) it may be cached and
//! what to do when the source of truth cannot be reached.

use std::collections::HashMap;
use std::time::Duration;

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use authcore_core::{AuthError, AuthMaterialType, TokenFormat, TokenUse};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthProfile {
    PasswordBasic,
    RefreshRotating,
    AccessOpaqueLocal,
    AccessOpaqueRemote,
    AccessJwt,
    ApiKey,
    ClientSecret,
}

/// Where the truth about a profile's material lives.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Authority {
    SourceOfTruth,
    ExternalAuthority,
    SelfContained,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheRole {
    None,
    ReadThrough,
    /// The cache holds results of external validation only.
    Introspection,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    FailClosed,
    /// Serve a stale cache entry when the source of truth is unreachable.
    FailOpen,
}

macro_rules! str_enum {
    ($t:ident, $what:literal, [$($variant:ident = $s:literal),+ $(,)?]) => {
        impl $t {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($t::$variant => $s,)+
                }
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $t {
            type Err = AuthError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($s => Ok($t::$variant),)+
                    other => Err(AuthError::invalid_input(format!("unknown {}: '{}'", $what, other))),
                }
            }
        }
    };
}

str_enum!(AuthProfile, "auth profile", [
    PasswordBasic = "password_basic",
    RefreshRotating = "refresh_rotating",
    AccessOpaqueLocal = "access_opaque_local",
    AccessOpaqueRemote = "access_opaque_remote",
    AccessJwt = "access_jwt",
    ApiKey = "api_key",
    ClientSecret = "client_secret",
]);

str_enum!(Authority, "authority", [
    SourceOfTruth = "source_of_truth",
    ExternalAuthority = "external_authority",
    SelfContained = "self_contained",
]);

str_enum!(CacheRole, "cache role", [
    None = "none",
    ReadThrough = "read_through",
    Introspection = "introspection",
]);

str_enum!(FailureMode, "failure mode", [
    FailClosed = "fail_closed",
    FailOpen = "fail_open",
]);

impl AuthProfile {
    pub const ALL: [AuthProfile; 7] = [
        AuthProfile::PasswordBasic,
        AuthProfile::RefreshRotating,
        AuthProfile::AccessOpaqueLocal,
        AuthProfile::AccessOpaqueRemote,
        AuthProfile::AccessJwt,
        AuthProfile::ApiKey,
        AuthProfile::ClientSecret,
    ];
}

/// Storage, cache and failure behavior for one auth profile.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistencePolicy {
    pub material_type: AuthMaterialType,
    pub token_format: Option<TokenFormat>,
    pub token_use: Option<TokenUse>,
    pub authority: Authority,
    pub cache_role: CacheRole,
    pub persist_in_source_of_truth: bool,
    pub allow_non_expiring: bool,
    /// Upper bound for any cache entry; zero disables caching.
    pub max_cache_ttl: Duration,
    pub failure_mode: FailureMode,
}

impl PersistencePolicy {
    /// Base policy for material held in this system's own store.
    pub const fn source_of_truth(material_type: AuthMaterialType) -> Self {
        Self {
            material_type,
            token_format: None,
            token_use: None,
            authority: Authority::SourceOfTruth,
            cache_role: CacheRole::None,
            persist_in_source_of_truth: true,
            allow_non_expiring: false,
            max_cache_ttl: Duration::ZERO,
            failure_mode: FailureMode::FailClosed,
        }
    }

    pub fn uses_cache(&self) -> bool {
        self.cache_role != CacheRole::None && !self.max_cache_ttl.is_zero()
    }

    pub fn fails_open(&self) -> bool {
        self.failure_mode == FailureMode::FailOpen
    }

    /// TTL for a cache write-back: the policy bound, clipped to the
    /// material's remaining lifetime. `None` means "do not cache".
    pub fn cache_ttl_for(&self, remaining: Option<Duration>) -> Option<Duration> {
        if !self.uses_cache() {
            return None;
        }
        let ttl = match remaining {
            Some(remaining) => remaining.min(self.max_cache_ttl),
            None => self.max_cache_ttl,
        };
        (!ttl.is_zero()).then_some(ttl)
    }
}

/// Read-only lookup from profile to policy.
pub trait PolicyMatrix: Send + Sync {
    fn policy(&self, profile: AuthProfile) -> Option<PersistencePolicy>;
}

impl<M> PolicyMatrix for std::sync::Arc<M>
where
    M: PolicyMatrix + ?Sized,
{
    fn policy(&self, profile: AuthProfile) -> Option<PersistencePolicy> {
        (**self).policy(profile)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticPolicyMatrix {
    policies: HashMap<AuthProfile, PersistencePolicy>,
}

impl StaticPolicyMatrix {
    pub fn new(policies: impl IntoIterator<Item = (AuthProfile, PersistencePolicy)>) -> Self {
        Self {
            policies: policies.into_iter().collect(),
        }
    }

    /// The seven built-in profiles.
    ///
    /// `password_basic` accepts passwords without an expiry; every other
    /// source-of-truth profile except `api_key` requires one.
    pub fn defaults() -> Self {
        use AuthMaterialType as M;

        let password_basic = PersistencePolicy {
            allow_non_expiring: true,
            ..PersistencePolicy::source_of_truth(M::Password)
        };

        let refresh_rotating = PersistencePolicy {
            token_format: Some(TokenFormat::Opaque),
            token_use: Some(TokenUse::Refresh),
            cache_role: CacheRole::ReadThrough,
            max_cache_ttl: Duration::from_secs(2 * 60),
            ..PersistencePolicy::source_of_truth(M::RefreshToken)
        };

        let access_opaque_local = PersistencePolicy {
            token_format: Some(TokenFormat::Opaque),
            token_use: Some(TokenUse::Access),
            cache_role: CacheRole::ReadThrough,
            max_cache_ttl: Duration::from_secs(5 * 60),
            ..PersistencePolicy::source_of_truth(M::AccessToken)
        };

        let access_opaque_remote = PersistencePolicy {
            token_format: Some(TokenFormat::Opaque),
            token_use: Some(TokenUse::Access),
            authority: Authority::ExternalAuthority,
            cache_role: CacheRole::Introspection,
            persist_in_source_of_truth: false,
            max_cache_ttl: Duration::from_secs(60),
            ..PersistencePolicy::source_of_truth(M::AccessToken)
        };

        let access_jwt = PersistencePolicy {
            token_format: Some(TokenFormat::Jwt),
            token_use: Some(TokenUse::Access),
            authority: Authority::SelfContained,
            persist_in_source_of_truth: false,
            ..PersistencePolicy::source_of_truth(M::AccessToken)
        };

        let api_key = PersistencePolicy {
            cache_role: CacheRole::ReadThrough,
            allow_non_expiring: true,
            max_cache_ttl: Duration::from_secs(15 * 60),
            ..PersistencePolicy::source_of_truth(M::ApiKey)
        };

        let client_secret = PersistencePolicy::source_of_truth(M::ClientSecret);

        Self::new([
            (AuthProfile::PasswordBasic, password_basic),
            (AuthProfile::RefreshRotating, refresh_rotating),
            (AuthProfile::AccessOpaqueLocal, access_opaque_local),
            (AuthProfile::AccessOpaqueRemote, access_opaque_remote),
            (AuthProfile::AccessJwt, access_jwt),
            (AuthProfile::ApiKey, api_key),
            (AuthProfile::ClientSecret, client_secret),
        ])
    }

    /// Copy of this matrix with one profile replaced or added.
    #[must_use]
    pub fn with_policy(mut self, profile: AuthProfile, policy: PersistencePolicy) -> Self {
        self.policies.insert(profile, policy);
        self
    }

    #[must_use]
    pub fn without_profile(mut self, profile: AuthProfile) -> Self {
        self.policies.remove(&profile);
        self
    }
}

impl Default for StaticPolicyMatrix {
    fn default() -> Self {
        Self::defaults()
    }
}

impl PolicyMatrix for StaticPolicyMatrix {
    fn policy(&self, profile: AuthProfile) -> Option<PersistencePolicy> {
        self.policies.get(&profile).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_profile() {
        let matrix = StaticPolicyMatrix::defaults();
        for profile in AuthProfile::ALL {
            assert!(matrix.policy(profile).is_some(), "{profile}");
        }
    }

    #[test]
    fn every_default_fails_closed() {
        let matrix = StaticPolicyMatrix::defaults();
        for profile in AuthProfile::ALL {
            assert_eq!(matrix.policy(profile).unwrap().failure_mode, FailureMode::FailClosed);
        }
    }

    #[test]
    fn remote_access_is_introspection_only() {
        let policy = StaticPolicyMatrix::defaults()
            .policy(AuthProfile::AccessOpaqueRemote)
            .unwrap();
        assert_eq!(policy.authority, Authority::ExternalAuthority);
        assert_eq!(policy.cache_role, CacheRole::Introspection);
        assert!(!policy.persist_in_source_of_truth);
        assert_eq!(policy.max_cache_ttl, Duration::from_secs(60));
    }

    #[test]
    fn password_basic_has_no_cache() {
        let policy = StaticPolicyMatrix::defaults()
            .policy(AuthProfile::PasswordBasic)
            .unwrap();
        assert_eq!(policy.material_type, AuthMaterialType::Password);
        assert!(!policy.uses_cache());
        assert_eq!(policy.cache_ttl_for(Some(Duration::from_secs(30))), None);
    }

    #[test]
    fn passwords_may_be_created_without_expiry() {
        let matrix = StaticPolicyMatrix::defaults();
        assert!(matrix.policy(AuthProfile::PasswordBasic).unwrap().allow_non_expiring);
        assert!(matrix.policy(AuthProfile::ApiKey).unwrap().allow_non_expiring);
        assert!(!matrix.policy(AuthProfile::ClientSecret).unwrap().allow_non_expiring);
    }

    #[test]
    fn cache_ttl_is_clipped_to_remaining_lifetime() {
        let policy = StaticPolicyMatrix::defaults()
            .policy(AuthProfile::ApiKey)
            .unwrap();
        assert_eq!(
            policy.cache_ttl_for(Some(Duration::from_secs(30))),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            policy.cache_ttl_for(Some(Duration::from_secs(3600))),
            Some(Duration::from_secs(15 * 60))
        );
        assert_eq!(policy.cache_ttl_for(None), Some(Duration::from_secs(15 * 60)));
        assert_eq!(policy.cache_ttl_for(Some(Duration::ZERO)), None);
    }

    #[test]
    fn missing_profile_is_absent() {
        let matrix = StaticPolicyMatrix::defaults().without_profile(AuthProfile::ClientSecret);
        assert!(matrix.policy(AuthProfile::ClientSecret).is_none());
    }

    #[test]
    fn profile_names_parse() {
        for profile in AuthProfile::ALL {
            assert_eq!(profile.as_str().parse::<AuthProfile>().unwrap(), profile);
        }
        assert!("kerberos".parse::<AuthProfile>().is_err());
    }
}
