//! Infrastructure layer: storage and cache adapters plus runtime configuration.

pub mod cache;
pub mod config;
pub mod storage;

#[cfg(test)]
mod integration_tests;

pub use config::{CacheBackend, CacheConfig, ConfigError, PostgresConfig, RedisConfig, RuntimeConfig, StorageBackend, StorageConfig};
