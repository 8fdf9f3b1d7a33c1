//! Storage contracts consumed by the auth engine.
//!
//! Auth material, subject linkage, the audit trail and role/permission
//! masks each have their own trait. A backend may additionally implement
//! [`AuthMaterialTransactor`] to write linked records atomically; the
//! engine discovers that capability through [`AuthMaterialStores`].

pub mod in_memory;
pub mod postgres;
pub mod records;
pub mod r#trait;

pub use in_memory::InMemoryAuthStore;
pub use postgres::PostgresAuthStore;
pub use records::{
    AuthLogEvent, AuthLogRecord, AuthRecord, Metadata, PermissionRecord, RoleRecord, SubjectAuthRecord,
};
pub use r#trait::{
    AuthLogStore, AuthMaterialStores, AuthMaterialTransactor, AuthStore, AuthzStores, LinkedWriteReport,
    PermissionStore, RoleStore, StorageError, SubjectAuthStore,
};
