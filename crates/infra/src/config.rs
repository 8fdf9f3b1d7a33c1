//! Runtime configuration for storage and cache adapters.
//!
//! Values come from the environment (`from_env`) or are built directly.
//! Parsing goes through [`RuntimeConfig::from_lookup`] so tests can supply
//! variables without touching the process environment.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_STORAGE_BACKEND: &str = "AUTHCORE_STORAGE_BACKEND";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_PG_MAX_CONNECTIONS: &str = "AUTHCORE_PG_MAX_CONNECTIONS";
pub const ENV_PG_MIN_CONNECTIONS: &str = "AUTHCORE_PG_MIN_CONNECTIONS";
pub const ENV_PG_ACQUIRE_TIMEOUT_MS: &str = "AUTHCORE_PG_ACQUIRE_TIMEOUT_MS";
pub const ENV_CACHE_BACKEND: &str = "AUTHCORE_CACHE_BACKEND";
pub const ENV_REDIS_URL: &str = "REDIS_URL";
pub const ENV_REDIS_NAMESPACE: &str = "AUTHCORE_REDIS_NAMESPACE";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is required when {context}")]
    Missing { name: &'static str, context: &'static str },

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("unsupported {name}: '{value}'")]
    Unsupported { name: &'static str, value: String },
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    None,
    #[default]
    Memory,
    Postgres,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "memory" => Ok(StorageBackend::Memory),
            "none" => Ok(StorageBackend::None),
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            other => Err(ConfigError::Unsupported {
                name: "storage backend",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    #[default]
    None,
    Memory,
    Redis,
}

impl FromStr for CacheBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(CacheBackend::None),
            "memory" => Ok(CacheBackend::Memory),
            "redis" => Ok(CacheBackend::Redis),
            other => Err(ConfigError::Unsupported {
                name: "cache backend",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub max_lifetime: Option<Duration>,
}

impl PostgresConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Some(Duration::from_secs(600)),
            max_lifetime: Some(Duration::from_secs(1800)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub namespace: String,
    pub connect_timeout: Duration,
}

impl RedisConfig {
    pub const DEFAULT_NAMESPACE: &'static str = "authcore";

    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            namespace: Self::DEFAULT_NAMESPACE.to_string(),
            connect_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub postgres: Option<PostgresConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub redis: Option<RedisConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub storage: StorageConfig,
    pub cache: CacheConfig,
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let storage_backend: StorageBackend = lookup(ENV_STORAGE_BACKEND).unwrap_or_default().parse()?;
        let postgres = match storage_backend {
            StorageBackend::Postgres => {
                let url = lookup(ENV_DATABASE_URL).filter(|v| !v.is_empty()).ok_or(ConfigError::Missing {
                    name: ENV_DATABASE_URL,
                    context: "the storage backend is postgres",
                })?;
                let mut pg = PostgresConfig::new(url);
                if let Some(v) = lookup(ENV_PG_MAX_CONNECTIONS) {
                    pg.max_connections = parse_number(ENV_PG_MAX_CONNECTIONS, &v)?;
                }
                if let Some(v) = lookup(ENV_PG_MIN_CONNECTIONS) {
                    pg.min_connections = parse_number(ENV_PG_MIN_CONNECTIONS, &v)?;
                }
                if let Some(v) = lookup(ENV_PG_ACQUIRE_TIMEOUT_MS) {
                    pg.acquire_timeout = Duration::from_millis(parse_number(ENV_PG_ACQUIRE_TIMEOUT_MS, &v)?);
                }
                if pg.max_connections == 0 || pg.min_connections > pg.max_connections {
                    return Err(ConfigError::Invalid {
                        name: ENV_PG_MAX_CONNECTIONS,
                        reason: format!(
                            "max {} must be positive and at least min {}",
                            pg.max_connections, pg.min_connections
                        ),
                    });
                }
                Some(pg)
            }
            _ => None,
        };

        let cache_backend: CacheBackend = lookup(ENV_CACHE_BACKEND).unwrap_or_default().parse()?;
        let redis = match cache_backend {
            CacheBackend::Redis => {
                if !cfg!(feature = "redis") {
                    return Err(ConfigError::Unsupported {
                        name: "cache backend",
                        value: "redis (built without the `redis` feature)".to_string(),
                    });
                }
                let url = lookup(ENV_REDIS_URL).filter(|v| !v.is_empty()).ok_or(ConfigError::Missing {
                    name: ENV_REDIS_URL,
                    context: "the cache backend is redis",
                })?;
                let mut redis = RedisConfig::new(url);
                if let Some(ns) = lookup(ENV_REDIS_NAMESPACE).filter(|v| !v.is_empty()) {
                    redis.namespace = ns;
                }
                Some(redis)
            }
            _ => None,
        };

        Ok(Self {
            storage: StorageConfig {
                backend: storage_backend,
                postgres,
            },
            cache: CacheConfig {
                backend: cache_backend,
                redis,
            },
        })
    }
}

fn parse_number<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn empty_environment_uses_memory_storage_without_cache() {
        let cfg = RuntimeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
        assert_eq!(cfg.cache.backend, CacheBackend::None);
        assert!(cfg.storage.postgres.is_none());
    }

    #[test]
    fn postgres_requires_database_url() {
        let err = RuntimeConfig::from_lookup(lookup(&[(ENV_STORAGE_BACKEND, "postgres")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { name: ENV_DATABASE_URL, .. }));
    }

    #[test]
    fn postgres_pool_settings_are_read() {
        let cfg = RuntimeConfig::from_lookup(lookup(&[
            (ENV_STORAGE_BACKEND, "Postgres"),
            (ENV_DATABASE_URL, "postgres://localhost/auth"),
            (ENV_PG_MAX_CONNECTIONS, "25"),
            (ENV_PG_ACQUIRE_TIMEOUT_MS, "1500"),
        ]))
        .unwrap();

        let pg = cfg.storage.postgres.unwrap();
        assert_eq!(pg.url, "postgres://localhost/auth");
        assert_eq!(pg.max_connections, 25);
        assert_eq!(pg.acquire_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn bad_pool_size_is_invalid() {
        let err = RuntimeConfig::from_lookup(lookup(&[
            (ENV_STORAGE_BACKEND, "postgres"),
            (ENV_DATABASE_URL, "postgres://localhost/auth"),
            (ENV_PG_MAX_CONNECTIONS, "many"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn sqlite_is_unsupported() {
        let err = RuntimeConfig::from_lookup(lookup(&[(ENV_STORAGE_BACKEND, "sqlite")])).unwrap_err();
        assert!(matches!(err, ConfigError::Unsupported { .. }));
    }

    #[cfg(feature = "redis")]
    #[test]
    fn redis_cache_reads_url_and_namespace() {
        let cfg = RuntimeConfig::from_lookup(lookup(&[
            (ENV_CACHE_BACKEND, "redis"),
            (ENV_REDIS_URL, "redis://cache:6379"),
            (ENV_REDIS_NAMESPACE, "tenant-a"),
        ]))
        .unwrap();
        let redis = cfg.cache.redis.unwrap();
        assert_eq!(redis.url, "redis://cache:6379");
        assert_eq!(redis.namespace, "tenant-a");
    }

    #[cfg(not(feature = "redis"))]
    #[test]
    fn redis_cache_needs_the_feature() {
        let err = RuntimeConfig::from_lookup(lookup(&[
            (ENV_CACHE_BACKEND, "redis"),
            (ENV_REDIS_URL, "redis://cache:6379"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Unsupported { .. }));
    }
}
