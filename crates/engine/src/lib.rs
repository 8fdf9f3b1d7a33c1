//! `authcore-engine`: the auth engine and its runtime facade.
//!
//! [`AuthEngine`] verifies identity claims against stored material, creates
//! linked material atomically and validates externally issued tokens, all
//! under the per-profile persistence policy. [`Client`] wires it to the
//! backends named in a [`RuntimeConfig`](authcore_infra::RuntimeConfig).

mod cache_path;
pub mod client;
pub mod config;
pub mod engine;
pub mod input;
pub mod introspection;
mod saga;

pub use client::Client;
pub use config::{EngineConfig, PastExpiryPolicy};
pub use engine::{AuthEngine, AuthEngineBuilder};
pub use input::{AuthInput, CreateAuthInput, InputType};
pub use introspection::{IntrospectionError, IntrospectorRegistry, TokenIntrospection, TokenIntrospector};
