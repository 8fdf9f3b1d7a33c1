//! Cache contracts: a non-authoritative acceleration layer.
//!
//! Nothing read from a cache is ever treated as the source of truth. Keys
//! are opaque strings chosen by the caller; adapters never see secrets.

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use authcore_auth::{Claims, PermissionMask, Principal, RoleMask};
use authcore_core::{CallContext, Interrupted, Subject, TenantId};

pub use in_memory::InMemoryCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisCache;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache key is required")]
    InvalidKey,

    #[error("cache ttl must be greater than zero")]
    InvalidTtl,

    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Canceled(#[from] Interrupted),
}

/// Principal-shaped data held in a cache.
///
/// `expires_at` marks freshness. An adapter may keep the entry longer than
/// that; a stale snapshot is only ever served under a fail-open policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrincipalSnapshot {
    pub subject: Subject,
    pub tenant: TenantId,
    pub role_mask: RoleMask,
    pub permission_mask: PermissionMask,
    #[serde(default)]
    pub claims: Claims,
    pub expires_at: DateTime<Utc>,
}

impl PrincipalSnapshot {
    pub fn from_principal(principal: &Principal, expires_at: DateTime<Utc>) -> Self {
        Self {
            subject: principal.subject.clone(),
            tenant: principal.tenant.clone(),
            role_mask: principal.role_mask,
            permission_mask: principal.permission_mask,
            claims: principal.claims.clone(),
            expires_at,
        }
    }

    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn into_principal(self, authenticated_at: DateTime<Utc>) -> Principal {
        Principal {
            subject: self.subject,
            tenant: self.tenant,
            role_mask: self.role_mask,
            permission_mask: self.permission_mask,
            claims: self.claims,
            authenticated_at,
        }
    }
}

/// Results of external token validation.
#[async_trait::async_trait]
pub trait TokenCache: Send + Sync {
    async fn set_token(
        &self,
        ctx: &CallContext,
        key: &str,
        snapshot: &PrincipalSnapshot,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    async fn get_token(&self, ctx: &CallContext, key: &str) -> Result<Option<PrincipalSnapshot>, CacheError>;

    async fn delete_token(&self, ctx: &CallContext, key: &str) -> Result<(), CacheError>;
}

/// Read-through copies of source-of-truth authentications.
#[async_trait::async_trait]
pub trait PrincipalCache: Send + Sync {
    async fn set_principal(
        &self,
        ctx: &CallContext,
        key: &str,
        snapshot: &PrincipalSnapshot,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    async fn get_principal(&self, ctx: &CallContext, key: &str) -> Result<Option<PrincipalSnapshot>, CacheError>;

    async fn delete_principal(&self, ctx: &CallContext, key: &str) -> Result<(), CacheError>;
}

#[async_trait::async_trait]
pub trait PermissionCache: Send + Sync {
    async fn set_permission_mask(
        &self,
        ctx: &CallContext,
        key: &str,
        mask: PermissionMask,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    async fn get_permission_mask(&self, ctx: &CallContext, key: &str) -> Result<Option<PermissionMask>, CacheError>;

    async fn delete_permission_mask(&self, ctx: &CallContext, key: &str) -> Result<(), CacheError>;
}

/// The caches available to the engine. Any of them may be absent.
#[derive(Clone, Default)]
pub struct CacheStores {
    pub tokens: Option<Arc<dyn TokenCache>>,
    pub principals: Option<Arc<dyn PrincipalCache>>,
    pub permissions: Option<Arc<dyn PermissionCache>>,
}

impl CacheStores {
    pub fn none() -> Self {
        Self::default()
    }

    /// Use one adapter for all three key-spaces.
    pub fn from_cache<C>(cache: Arc<C>) -> Self
    where
        C: TokenCache + PrincipalCache + PermissionCache + 'static,
    {
        Self {
            tokens: Some(cache.clone()),
            principals: Some(cache.clone()),
            permissions: Some(cache),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_none() && self.principals.is_none() && self.permissions.is_none()
    }
}

impl core::fmt::Debug for CacheStores {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CacheStores")
            .field("tokens", &self.tokens.is_some())
            .field("principals", &self.principals.is_some())
            .field("permissions", &self.permissions.is_some())
            .finish()
    }
}

fn validate_set(key: &str, ttl: Duration) -> Result<(), CacheError> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey);
    }
    if ttl.is_zero() {
        return Err(CacheError::InvalidTtl);
    }
    Ok(())
}
