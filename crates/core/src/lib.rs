//! `authcore-core`: shared building blocks for the authentication core.
//!
//! This crate contains **no IO**: identifiers, the error taxonomy, material
//! classification and the per-call context threaded through every
//! storage/cache operation.

pub mod context;
pub mod error;
pub mod id;
pub mod material;

pub use context::{CallContext, Interrupted};
pub use error::{AuthError, AuthResult, ErrorKind};
pub use id::{AuthId, LinkId, LogId, Subject, TenantId};
pub use material::{AuthMaterialType, AuthStatus, TokenFormat, TokenUse};
