//! Runtime facade: wires storage and cache backends from [`RuntimeConfig`]
//! into an [`AuthEngine`] and owns their lifecycle.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use authcore_auth::{AuthProfile, Principal};
use authcore_core::{AuthError, AuthResult, CallContext, ErrorKind};
use authcore_infra::cache::{CacheStores, InMemoryCache};
use authcore_infra::config::{CacheBackend, CacheConfig, RuntimeConfig, StorageBackend, StorageConfig};
use authcore_infra::storage::{AuthMaterialStores, AuthzStores, InMemoryAuthStore, PostgresAuthStore};

use crate::config::EngineConfig;
use crate::engine::{AuthEngine, AuthEngineBuilder};
use crate::input::{AuthInput, CreateAuthInput};

/// A backend resource released by [`Client::close`].
#[async_trait::async_trait]
trait Resource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn close(&self) -> Result<(), String>;
}

#[async_trait::async_trait]
impl Resource for PostgresAuthStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn close(&self) -> Result<(), String> {
        PostgresAuthStore::close(self).await;
        Ok(())
    }
}

struct Running {
    engine: AuthEngine,
    resources: Vec<Arc<dyn Resource>>,
}

pub struct Client {
    state: RwLock<Option<Running>>,
}

impl Client {
    /// Wrap an engine whose collaborators are owned elsewhere.
    pub fn new(engine: AuthEngine) -> Self {
        Self {
            state: RwLock::new(Some(Running {
                engine,
                resources: Vec::new(),
            })),
        }
    }

    /// Initialize backends from `runtime` and build an engine with `config`.
    pub async fn connect(runtime: &RuntimeConfig, config: EngineConfig) -> AuthResult<Self> {
        Self::connect_with(runtime, AuthEngine::builder().config(config)).await
    }

    /// Like [`connect`](Self::connect), but collaborators already set on
    /// `builder` take precedence over the configured backends.
    #[instrument(skip_all, fields(storage = ?runtime.storage.backend, cache = ?runtime.cache.backend), err(Display))]
    pub async fn connect_with(runtime: &RuntimeConfig, builder: AuthEngineBuilder) -> AuthResult<Self> {
        let mut resources: Vec<Arc<dyn Resource>> = Vec::new();

        let builder = init_storage(&runtime.storage, builder, &mut resources).await?;
        let builder = match init_cache(&runtime.cache, builder) {
            Ok(builder) => builder,
            Err(err) => {
                if let Err(close_err) = close_all(&resources).await {
                    warn!(error = %close_err, "failed to release storage after cache initialization failed");
                }
                return Err(err);
            }
        };

        Ok(Self {
            state: RwLock::new(Some(Running {
                engine: builder.build(),
                resources,
            })),
        })
    }

    async fn engine(&self) -> AuthResult<AuthEngine> {
        self.state
            .read()
            .await
            .as_ref()
            .map(|running| running.engine.clone())
            .ok_or_else(|| AuthError::new(ErrorKind::Unauthenticated, "no authenticator configured"))
    }

    pub async fn authorize(&self, ctx: &CallContext, input: &AuthInput) -> AuthResult<Principal> {
        self.engine().await?.authorize(ctx, input).await
    }

    pub async fn create_auth(&self, ctx: &CallContext, input: &CreateAuthInput) -> AuthResult<()> {
        self.engine().await?.create_auth(ctx, input).await
    }

    pub async fn validate_token(
        &self,
        ctx: &CallContext,
        token: &str,
        profile: Option<AuthProfile>,
    ) -> AuthResult<Principal> {
        self.engine().await?.validate_token(ctx, token, profile).await
    }

    pub async fn is_closed(&self) -> bool {
        self.state.read().await.is_none()
    }

    /// Release backends in reverse order of initialization. Idempotent;
    /// every later call on this client fails with `unauthenticated`.
    pub async fn close(&self) -> AuthResult<()> {
        let Some(running) = self.state.write().await.take() else {
            return Ok(());
        };
        close_all(&running.resources).await
    }
}

impl core::fmt::Debug for Client {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

async fn init_storage(
    config: &StorageConfig,
    builder: AuthEngineBuilder,
    resources: &mut Vec<Arc<dyn Resource>>,
) -> AuthResult<AuthEngineBuilder> {
    match config.backend {
        StorageBackend::None => Ok(builder),
        StorageBackend::Memory => {
            let store = Arc::new(InMemoryAuthStore::new());
            info!("initialized memory storage backend");
            Ok(with_stores(builder, || AuthMaterialStores::transactional(store.clone()), || {
                AuthzStores::from_store(store.clone())
            }))
        }
        StorageBackend::Postgres => {
            let pg = config
                .postgres
                .as_ref()
                .ok_or_else(|| AuthError::configuration("postgres storage requires a postgres configuration"))?;
            let store = Arc::new(
                PostgresAuthStore::connect(pg)
                    .await
                    .map_err(|e| e.into_auth_error(ErrorKind::StorageUnavailable, "failed to connect to postgres"))?,
            );
            resources.push(store.clone());
            info!(max_connections = pg.max_connections, "initialized postgres storage backend");
            Ok(with_stores(builder, || AuthMaterialStores::transactional(store.clone()), || {
                AuthzStores::from_store(store.clone())
            }))
        }
    }
}

fn with_stores(
    mut builder: AuthEngineBuilder,
    material: impl FnOnce() -> AuthMaterialStores,
    authz: impl FnOnce() -> AuthzStores,
) -> AuthEngineBuilder {
    if !builder.has_material_stores() {
        builder = builder.material_stores(material());
    }
    if !builder.has_authz_stores() {
        builder = builder.authz_stores(authz());
    }
    builder
}

fn init_cache(config: &CacheConfig, builder: AuthEngineBuilder) -> AuthResult<AuthEngineBuilder> {
    if builder.has_caches() {
        return Ok(builder);
    }
    match config.backend {
        CacheBackend::None => Ok(builder),
        CacheBackend::Memory => {
            info!("initialized memory cache backend");
            Ok(builder.caches(CacheStores::from_cache(Arc::new(InMemoryCache::new()))))
        }
        CacheBackend::Redis => redis_cache(config, builder),
    }
}

#[cfg(feature = "redis")]
fn redis_cache(config: &CacheConfig, builder: AuthEngineBuilder) -> AuthResult<AuthEngineBuilder> {
    use authcore_infra::cache::RedisCache;

    let redis = config
        .redis
        .as_ref()
        .ok_or_else(|| AuthError::configuration("redis cache requires a redis configuration"))?;
    let cache = RedisCache::new(redis)
        .map_err(|e| AuthError::wrap(ErrorKind::StorageUnavailable, "failed to initialize redis cache", e))?;
    info!(namespace = %redis.namespace, "initialized redis cache backend");
    Ok(builder.caches(CacheStores::from_cache(Arc::new(cache))))
}

#[cfg(not(feature = "redis"))]
fn redis_cache(_config: &CacheConfig, _builder: AuthEngineBuilder) -> AuthResult<AuthEngineBuilder> {
    Err(AuthError::configuration(
        "redis cache backend requires the `redis` feature",
    ))
}

/// Close in reverse order and fold every failure into one error.
async fn close_all(resources: &[Arc<dyn Resource>]) -> AuthResult<()> {
    let mut failures = Vec::new();
    for resource in resources.iter().rev() {
        if let Err(err) = resource.close().await {
            warn!(resource = resource.name(), error = %err, "failed to close resource");
            failures.push(format!("{}: {}", resource.name(), err));
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(AuthError::configuration(format!(
            "failed to close client resources: {}",
            failures.join("; ")
        )))
    }
}
