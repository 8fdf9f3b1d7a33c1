//! Policy-driven cache access.
//!
//! Keys are SHA-256 digests so no secret or token reaches a cache adapter
//! in clear. Every cache failure is logged and treated as a miss.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use authcore_auth::{AuthProfile, PermissionMask, PersistencePolicy, Principal};
use authcore_core::{CallContext, Subject, TenantId};
use authcore_infra::cache::{CacheStores, PermissionCache, PrincipalCache, PrincipalSnapshot, TokenCache};

/// Length-prefixed digest of `parts`, hex encoded.
fn digest(domain: &str, parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(domain.as_bytes());
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

pub(crate) fn principal_key(profile: AuthProfile, tenant: &TenantId, subject: &Subject, secret: &str) -> String {
    digest(
        "principal",
        &[
            profile.as_str().as_bytes(),
            tenant.as_str().as_bytes(),
            subject.as_str().as_bytes(),
            secret.as_bytes(),
        ],
    )
}

pub(crate) fn token_key(profile: AuthProfile, token: &str) -> String {
    digest("token", &[profile.as_str().as_bytes(), token.as_bytes()])
}

pub(crate) fn permission_key(tenant: &TenantId, subject: &Subject) -> String {
    digest("perm", &[tenant.as_str().as_bytes(), subject.as_str().as_bytes()])
}

/// A snapshot read from cache, split by freshness.
pub(crate) enum Cached {
    Fresh(PrincipalSnapshot),
    Stale(PrincipalSnapshot),
    Miss,
}

impl Cached {
    fn classify(snapshot: Option<PrincipalSnapshot>, now: DateTime<Utc>) -> Self {
        match snapshot {
            Some(s) if s.is_fresh_at(now) => Cached::Fresh(s),
            Some(s) => Cached::Stale(s),
            None => Cached::Miss,
        }
    }

    /// Keep a stale snapshot only where the policy may serve it.
    pub(crate) fn stale_for(self, policy: &PersistencePolicy) -> Option<PrincipalSnapshot> {
        match self {
            Cached::Stale(s) if policy.fails_open() => Some(s),
            _ => None,
        }
    }
}

/// Cache access for one call under one profile's policy.
pub(crate) struct CachePath<'a> {
    caches: &'a CacheStores,
    profile: AuthProfile,
    policy: PersistencePolicy,
    stale_grace: Duration,
}

impl<'a> CachePath<'a> {
    pub(crate) fn new(
        caches: &'a CacheStores,
        profile: AuthProfile,
        policy: PersistencePolicy,
        stale_grace: Duration,
    ) -> Self {
        Self {
            caches,
            profile,
            policy,
            stale_grace,
        }
    }

    pub(crate) fn policy(&self) -> &PersistencePolicy {
        &self.policy
    }

    /// Entry TTL: the freshness window, plus the grace period when stale
    /// entries may be served.
    fn entry_ttl(&self, fresh_for: Duration) -> Duration {
        if self.policy.fails_open() {
            fresh_for.saturating_add(self.stale_grace)
        } else {
            fresh_for
        }
    }

    pub(crate) async fn lookup_principal(&self, ctx: &CallContext, key: &str) -> Cached {
        let Some(cache) = self.principals() else {
            return Cached::Miss;
        };
        match cache.get_principal(ctx, key).await {
            Ok(found) => Cached::classify(found, Utc::now()),
            Err(err) => {
                warn!(profile = %self.profile, error = %err, "principal cache read failed");
                Cached::Miss
            }
        }
    }

    pub(crate) async fn store_principal(
        &self,
        ctx: &CallContext,
        key: &str,
        principal: &Principal,
        remaining: Option<Duration>,
    ) {
        let (Some(cache), Some(ttl)) = (self.principals(), self.policy.cache_ttl_for(remaining)) else {
            return;
        };
        let snapshot = snapshot_for(principal, ttl);
        if let Err(err) = cache.set_principal(ctx, key, &snapshot, self.entry_ttl(ttl)).await {
            warn!(profile = %self.profile, subject = %principal.subject, error = %err, "principal cache write-back failed");
        }
    }

    pub(crate) async fn lookup_token(&self, ctx: &CallContext, key: &str) -> Cached {
        let Some(cache) = self.tokens() else {
            return Cached::Miss;
        };
        match cache.get_token(ctx, key).await {
            Ok(found) => Cached::classify(found, Utc::now()),
            Err(err) => {
                warn!(profile = %self.profile, error = %err, "token cache read failed");
                Cached::Miss
            }
        }
    }

    pub(crate) async fn store_token(
        &self,
        ctx: &CallContext,
        key: &str,
        principal: &Principal,
        remaining: Option<Duration>,
    ) {
        let (Some(cache), Some(ttl)) = (self.tokens(), self.policy.cache_ttl_for(remaining)) else {
            return;
        };
        let snapshot = snapshot_for(principal, ttl);
        if let Err(err) = cache.set_token(ctx, key, &snapshot, self.entry_ttl(ttl)).await {
            warn!(profile = %self.profile, subject = %principal.subject, error = %err, "token cache write-back failed");
        }
    }

    pub(crate) async fn lookup_permission_mask(&self, ctx: &CallContext, key: &str) -> Option<PermissionMask> {
        let cache = self.permissions()?;
        match cache.get_permission_mask(ctx, key).await {
            Ok(found) => found,
            Err(err) => {
                warn!(profile = %self.profile, error = %err, "permission cache read failed");
                None
            }
        }
    }

    pub(crate) async fn store_permission_mask(&self, ctx: &CallContext, key: &str, mask: PermissionMask) {
        let (Some(cache), Some(ttl)) = (self.permissions(), self.policy.cache_ttl_for(None)) else {
            return;
        };
        if let Err(err) = cache.set_permission_mask(ctx, key, mask, ttl).await {
            warn!(profile = %self.profile, error = %err, "permission cache write-back failed");
        } else {
            debug!(profile = %self.profile, "permission mask cached");
        }
    }

    fn principals(&self) -> Option<&dyn PrincipalCache> {
        self.policy
            .uses_cache()
            .then_some(self.caches.principals.as_deref())
            .flatten()
    }

    fn tokens(&self) -> Option<&dyn TokenCache> {
        self.policy
            .uses_cache()
            .then_some(self.caches.tokens.as_deref())
            .flatten()
    }

    fn permissions(&self) -> Option<&dyn PermissionCache> {
        self.policy
            .uses_cache()
            .then_some(self.caches.permissions.as_deref())
            .flatten()
    }
}

fn snapshot_for(principal: &Principal, fresh_for: Duration) -> PrincipalSnapshot {
    let fresh_for = chrono::Duration::from_std(fresh_for).unwrap_or(chrono::Duration::MAX);
    let expires_at = Utc::now()
        .checked_add_signed(fresh_for)
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    PrincipalSnapshot::from_principal(principal, expires_at)
}
