//! `authcore-auth`: pure authentication/authorization primitives.
//!
//! This crate is intentionally decoupled from storage and transport: the
//! credential hasher, the bitwise role/permission model, the persistence
//! policy matrix and the `Principal` returned by the engine.

pub mod authorize;
pub mod bitmask;
pub mod hasher;
pub mod policy;
pub mod principal;

pub use authorize::{
    AuthorizationExplanation, AuthzError, DenialKind, authorize, authorize_with, explain_authorization,
};
pub use bitmask::{PermissionMask, RoleMask, RolePermissionTable, effective_permissions, has_all, has_any};
pub use hasher::{HashError, Hasher, Pbkdf2Hasher, Pbkdf2Options};
pub use policy::{
    AuthProfile, Authority, CacheRole, FailureMode, PersistencePolicy, PolicyMatrix, StaticPolicyMatrix,
};
pub use principal::{Claims, Principal};
