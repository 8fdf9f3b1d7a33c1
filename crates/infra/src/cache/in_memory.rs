//! Process-local cache with per-entry TTL.
//!
//! Expired entries are evicted lazily when read; [`InMemoryCache::purge_expired`]
//! sweeps the rest. Time comes from `tokio::time` so tests can pause it.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::time::Instant;

use authcore_auth::PermissionMask;
use authcore_core::CallContext;

use super::{CacheError, PermissionCache, PrincipalCache, PrincipalSnapshot, TokenCache, validate_set};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
enum Space {
    Token,
    Principal,
    Permission,
}

#[derive(Debug, Clone)]
enum Value {
    Snapshot(PrincipalSnapshot),
    Mask(PermissionMask),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    /// `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live_at(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

type Entries = HashMap<(Space, String), Entry>;

#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: RwLock<Entries>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Entries>, CacheError> {
        self.entries
            .read()
            .map_err(|_| CacheError::Unavailable("in-memory cache lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Entries>, CacheError> {
        self.entries
            .write()
            .map_err(|_| CacheError::Unavailable("in-memory cache lock poisoned".to_string()))
    }

    /// Entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        match self.write() {
            Ok(mut entries) => {
                let before = entries.len();
                entries.retain(|_, entry| entry.is_live_at(now));
                before - entries.len()
            }
            Err(_) => 0,
        }
    }

    fn set(&self, ctx: &CallContext, space: Space, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        ctx.check()?;
        validate_set(key, ttl)?;

        let entry = Entry {
            value,
            expires_at: Instant::now().checked_add(ttl),
        };
        self.write()?.insert((space, key.to_string()), entry);
        Ok(())
    }

    fn get(&self, ctx: &CallContext, space: Space, key: &str) -> Result<Option<Value>, CacheError> {
        ctx.check()?;
        if key.is_empty() {
            return Err(CacheError::InvalidKey);
        }

        let lookup = (space, key.to_string());
        let now = Instant::now();
        {
            let entries = self.read()?;
            match entries.get(&lookup) {
                None => return Ok(None),
                Some(entry) if entry.is_live_at(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        // Expired: re-check under the write lock, a writer may have refreshed it.
        let mut entries = self.write()?;
        match entries.get(&lookup) {
            Some(entry) if entry.is_live_at(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(&lookup);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn delete(&self, ctx: &CallContext, space: Space, key: &str) -> Result<(), CacheError> {
        ctx.check()?;
        if key.is_empty() {
            return Err(CacheError::InvalidKey);
        }
        self.write()?.remove(&(space, key.to_string()));
        Ok(())
    }

    fn get_snapshot(&self, ctx: &CallContext, space: Space, key: &str) -> Result<Option<PrincipalSnapshot>, CacheError> {
        match self.get(ctx, space, key)? {
            Some(Value::Snapshot(snapshot)) => Ok(Some(snapshot)),
            Some(Value::Mask(_)) => Err(CacheError::Codec(format!("{space:?} entry holds a permission mask"))),
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl TokenCache for InMemoryCache {
    async fn set_token(
        &self,
        ctx: &CallContext,
        key: &str,
        snapshot: &PrincipalSnapshot,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.set(ctx, Space::Token, key, Value::Snapshot(snapshot.clone()), ttl)
    }

    async fn get_token(&self, ctx: &CallContext, key: &str) -> Result<Option<PrincipalSnapshot>, CacheError> {
        self.get_snapshot(ctx, Space::Token, key)
    }

    async fn delete_token(&self, ctx: &CallContext, key: &str) -> Result<(), CacheError> {
        self.delete(ctx, Space::Token, key)
    }
}

#[async_trait::async_trait]
impl PrincipalCache for InMemoryCache {
    async fn set_principal(
        &self,
        ctx: &CallContext,
        key: &str,
        snapshot: &PrincipalSnapshot,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.set(ctx, Space::Principal, key, Value::Snapshot(snapshot.clone()), ttl)
    }

    async fn get_principal(&self, ctx: &CallContext, key: &str) -> Result<Option<PrincipalSnapshot>, CacheError> {
        self.get_snapshot(ctx, Space::Principal, key)
    }

    async fn delete_principal(&self, ctx: &CallContext, key: &str) -> Result<(), CacheError> {
        self.delete(ctx, Space::Principal, key)
    }
}

#[async_trait::async_trait]
impl PermissionCache for InMemoryCache {
    async fn set_permission_mask(
        &self,
        ctx: &CallContext,
        key: &str,
        mask: PermissionMask,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.set(ctx, Space::Permission, key, Value::Mask(mask), ttl)
    }

    async fn get_permission_mask(&self, ctx: &CallContext, key: &str) -> Result<Option<PermissionMask>, CacheError> {
        match self.get(ctx, Space::Permission, key)? {
            Some(Value::Mask(mask)) => Ok(Some(mask)),
            Some(Value::Snapshot(_)) => Err(CacheError::Codec("permission entry holds a snapshot".to_string())),
            None => Ok(None),
        }
    }

    async fn delete_permission_mask(&self, ctx: &CallContext, key: &str) -> Result<(), CacheError> {
        self.delete(ctx, Space::Permission, key)
    }
}
