//! Redis-backed cache.
//!
//! Keys are namespaced `{namespace}:{space}:{key}`; snapshots are stored as
//! JSON and masks as decimal strings, both with a millisecond TTL (`PX`).
//! A fresh multiplexed connection is opened per call under a connect timeout.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{instrument, warn};

use authcore_auth::PermissionMask;
use authcore_core::CallContext;

use super::{CacheError, PermissionCache, PrincipalCache, PrincipalSnapshot, TokenCache, validate_set};
use crate::config::RedisConfig;

const TOKEN_SPACE: &str = "token";
const PRINCIPAL_SPACE: &str = "principal";
const PERMISSION_SPACE: &str = "perm";

#[derive(Debug, Clone)]
pub struct RedisCache {
    client: Arc<redis::Client>,
    namespace: String,
    connect_timeout: Duration,
}

impl RedisCache {
    pub fn new(config: &RedisConfig) -> Result<Self, CacheError> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| CacheError::Unavailable(e.to_string()))?;
        Ok(Self {
            client: Arc::new(client),
            namespace: config.namespace.clone(),
            connect_timeout: config.connect_timeout,
        })
    }

    fn key(&self, space: &str, key: &str) -> Result<String, CacheError> {
        if key.is_empty() {
            return Err(CacheError::InvalidKey);
        }
        Ok(format!("{}:{space}:{key}", self.namespace))
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, CacheError> {
        match tokio::time::timeout(self.connect_timeout, self.client.get_multiplexed_async_connection()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(CacheError::Unavailable(e.to_string())),
            Err(_) => Err(CacheError::Unavailable("redis connect timed out".to_string())),
        }
    }

    async fn set_raw(&self, ctx: &CallContext, key: String, value: String, ttl: Duration) -> Result<(), CacheError> {
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        ctx.run(async {
            let mut conn = self.connection().await?;
            redis::cmd("SET")
                .arg(&key)
                .arg(value)
                .arg("PX")
                .arg(millis)
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(|e| CacheError::Unavailable(e.to_string()))
        })
        .await?
    }

    async fn get_raw(&self, ctx: &CallContext, key: String) -> Result<Option<String>, CacheError> {
        ctx.run(async {
            let mut conn = self.connection().await?;
            redis::cmd("GET")
                .arg(&key)
                .query_async::<_, Option<String>>(&mut conn)
                .await
                .map_err(|e| CacheError::Unavailable(e.to_string()))
        })
        .await?
    }

    async fn delete_raw(&self, ctx: &CallContext, key: String) -> Result<(), CacheError> {
        ctx.run(async {
            let mut conn = self.connection().await?;
            redis::cmd("DEL")
                .arg(&key)
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(|e| CacheError::Unavailable(e.to_string()))
        })
        .await?
    }

    async fn set_json<T: Serialize>(
        &self,
        ctx: &CallContext,
        space: &str,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        validate_set(key, ttl)?;
        let json = serde_json::to_string(value).map_err(|e| CacheError::Codec(e.to_string()))?;
        self.set_raw(ctx, self.key(space, key)?, json, ttl).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        space: &str,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        let Some(raw) = self.get_raw(ctx, self.key(space, key)?).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw).map(Some).map_err(|e| {
            warn!(space, error = %e, "undecodable cache entry");
            CacheError::Codec(e.to_string())
        })
    }
}

#[async_trait::async_trait]
impl TokenCache for RedisCache {
    #[instrument(skip_all, err)]
    async fn set_token(
        &self,
        ctx: &CallContext,
        key: &str,
        snapshot: &PrincipalSnapshot,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.set_json(ctx, TOKEN_SPACE, key, snapshot, ttl).await
    }

    #[instrument(skip_all, err)]
    async fn get_token(&self, ctx: &CallContext, key: &str) -> Result<Option<PrincipalSnapshot>, CacheError> {
        self.get_json(ctx, TOKEN_SPACE, key).await
    }

    async fn delete_token(&self, ctx: &CallContext, key: &str) -> Result<(), CacheError> {
        self.delete_raw(ctx, self.key(TOKEN_SPACE, key)?).await
    }
}

#[async_trait::async_trait]
impl PrincipalCache for RedisCache {
    #[instrument(skip_all, err)]
    async fn set_principal(
        &self,
        ctx: &CallContext,
        key: &str,
        snapshot: &PrincipalSnapshot,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.set_json(ctx, PRINCIPAL_SPACE, key, snapshot, ttl).await
    }

    #[instrument(skip_all, err)]
    async fn get_principal(&self, ctx: &CallContext, key: &str) -> Result<Option<PrincipalSnapshot>, CacheError> {
        self.get_json(ctx, PRINCIPAL_SPACE, key).await
    }

    async fn delete_principal(&self, ctx: &CallContext, key: &str) -> Result<(), CacheError> {
        self.delete_raw(ctx, self.key(PRINCIPAL_SPACE, key)?).await
    }
}

#[async_trait::async_trait]
impl PermissionCache for RedisCache {
    async fn set_permission_mask(
        &self,
        ctx: &CallContext,
        key: &str,
        mask: PermissionMask,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        validate_set(key, ttl)?;
        self.set_raw(ctx, self.key(PERMISSION_SPACE, key)?, mask.bits().to_string(), ttl)
            .await
    }

    async fn get_permission_mask(&self, ctx: &CallContext, key: &str) -> Result<Option<PermissionMask>, CacheError> {
        let Some(raw) = self.get_raw(ctx, self.key(PERMISSION_SPACE, key)?).await? else {
            return Ok(None);
        };
        raw.parse::<u64>()
            .map(|bits| Some(PermissionMask::from_bits(bits)))
            .map_err(|e| CacheError::Codec(e.to_string()))
    }

    async fn delete_permission_mask(&self, ctx: &CallContext, key: &str) -> Result<(), CacheError> {
        self.delete_raw(ctx, self.key(PERMISSION_SPACE, key)?).await
    }
}
