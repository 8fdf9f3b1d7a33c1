use std::sync::Arc;

use thiserror::Error;

use authcore_core::{AuthError, AuthId, CallContext, ErrorKind, Interrupted, LinkId, Subject, TenantId};

use super::records::{AuthLogRecord, AuthRecord, PermissionRecord, RoleRecord, SubjectAuthRecord};

/// Storage errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Backend unreachable, closed or uninitialized.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Unique constraint violation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Stored data contradicts an invariant (e.g. a linkage for the wrong subject).
    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error(transparent)]
    Canceled(#[from] Interrupted),

    #[error("backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, StorageError::Canceled(_))
    }

    /// Taxonomy kind used when no more specific mapping applies.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::Unavailable(_) => ErrorKind::StorageUnavailable,
            StorageError::Integrity(_) => ErrorKind::InvalidCredentials,
            StorageError::Canceled(_) => ErrorKind::Canceled,
            StorageError::Conflict(_) | StorageError::Backend(_) => ErrorKind::Unknown,
        }
    }

    /// Wrap into an [`AuthError`], letting cancellation win over `fallback`.
    pub fn into_auth_error(self, fallback: ErrorKind, message: impl Into<String>) -> AuthError {
        let kind = if self.is_canceled() { ErrorKind::Canceled } else { fallback };
        AuthError::wrap(kind, message, self)
    }
}

impl From<StorageError> for AuthError {
    fn from(value: StorageError) -> Self {
        let kind = value.kind();
        AuthError::wrap(kind, value.to_string(), value)
    }
}

/// Auth material records keyed by id.
#[async_trait::async_trait]
pub trait AuthStore: Send + Sync {
    /// Insert or replace a record. Metadata is replaced wholesale.
    async fn put_auth(&self, ctx: &CallContext, record: &AuthRecord) -> Result<(), StorageError>;

    async fn get_auth(&self, ctx: &CallContext, id: AuthId) -> Result<AuthRecord, StorageError>;

    /// Fetch every existing record among `ids` in [`AuthRecord::cmp_recency`]
    /// order. Unknown ids are skipped.
    async fn get_auths(&self, ctx: &CallContext, ids: &[AuthId]) -> Result<Vec<AuthRecord>, StorageError>;

    async fn delete_auth(&self, ctx: &CallContext, id: AuthId) -> Result<(), StorageError>;
}

/// Subject to auth material linkage.
#[async_trait::async_trait]
pub trait SubjectAuthStore: Send + Sync {
    /// Insert a linkage. A second linkage for the same `auth_id` re-points
    /// the existing one.
    async fn put_subject_auth(&self, ctx: &CallContext, record: &SubjectAuthRecord) -> Result<(), StorageError>;

    async fn list_subject_auth_by_subject(
        &self,
        ctx: &CallContext,
        subject: &Subject,
    ) -> Result<Vec<SubjectAuthRecord>, StorageError>;

    async fn list_subject_auth_by_auth_id(
        &self,
        ctx: &CallContext,
        auth_id: AuthId,
    ) -> Result<Vec<SubjectAuthRecord>, StorageError>;

    async fn delete_subject_auth(&self, ctx: &CallContext, id: LinkId) -> Result<(), StorageError>;
}

/// Append-only audit trail.
#[async_trait::async_trait]
pub trait AuthLogStore: Send + Sync {
    async fn put_auth_log(&self, ctx: &CallContext, record: &AuthLogRecord) -> Result<(), StorageError>;

    /// Oldest first.
    async fn list_auth_logs_by_auth_id(
        &self,
        ctx: &CallContext,
        auth_id: AuthId,
    ) -> Result<Vec<AuthLogRecord>, StorageError>;

    /// Oldest first.
    async fn list_auth_logs_by_subject(
        &self,
        ctx: &CallContext,
        subject: &Subject,
    ) -> Result<Vec<AuthLogRecord>, StorageError>;
}

#[async_trait::async_trait]
pub trait RoleStore: Send + Sync {
    async fn put_role(&self, ctx: &CallContext, record: &RoleRecord) -> Result<(), StorageError>;

    /// `None` when the subject holds no roles in the tenant.
    async fn get_role(
        &self,
        ctx: &CallContext,
        subject: &Subject,
        tenant: &TenantId,
    ) -> Result<Option<RoleRecord>, StorageError>;

    async fn delete_role(&self, ctx: &CallContext, subject: &Subject, tenant: &TenantId) -> Result<(), StorageError>;
}

#[async_trait::async_trait]
pub trait PermissionStore: Send + Sync {
    async fn put_permission(&self, ctx: &CallContext, record: &PermissionRecord) -> Result<(), StorageError>;

    /// `None` when the subject holds no direct grants in the tenant.
    async fn get_permission(
        &self,
        ctx: &CallContext,
        subject: &Subject,
        tenant: &TenantId,
    ) -> Result<Option<PermissionRecord>, StorageError>;

    async fn delete_permission(
        &self,
        ctx: &CallContext,
        subject: &Subject,
        tenant: &TenantId,
    ) -> Result<(), StorageError>;
}

/// Outcome of a committed linked write.
#[derive(Debug, Default)]
pub struct LinkedWriteReport {
    /// The audit insert failed and was rolled back on its own; the material
    /// and linkage were still committed.
    pub audit_error: Option<StorageError>,
}

/// Optional capability: write material, linkage and audit record as one unit.
///
/// Either material and linkage are both committed or neither is visible.
/// The audit record is best-effort inside the unit.
#[async_trait::async_trait]
pub trait AuthMaterialTransactor: Send + Sync {
    async fn write_linked(
        &self,
        ctx: &CallContext,
        auth: &AuthRecord,
        link: &SubjectAuthRecord,
        log: &AuthLogRecord,
    ) -> Result<LinkedWriteReport, StorageError>;
}

/// The stores the engine needs for auth material, plus the optional
/// transactional capability.
#[derive(Clone)]
pub struct AuthMaterialStores {
    pub auth: Arc<dyn AuthStore>,
    pub subject_auth: Arc<dyn SubjectAuthStore>,
    pub auth_log: Arc<dyn AuthLogStore>,
    pub transactor: Option<Arc<dyn AuthMaterialTransactor>>,
}

impl AuthMaterialStores {
    /// Use one backend for every store, without transactional writes.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: AuthStore + SubjectAuthStore + AuthLogStore + 'static,
    {
        Self {
            auth: store.clone(),
            subject_auth: store.clone(),
            auth_log: store,
            transactor: None,
        }
    }

    /// Use one backend for every store, including transactional writes.
    pub fn transactional<S>(store: Arc<S>) -> Self
    where
        S: AuthStore + SubjectAuthStore + AuthLogStore + AuthMaterialTransactor + 'static,
    {
        let transactor: Arc<dyn AuthMaterialTransactor> = store.clone();
        Self {
            transactor: Some(transactor),
            ..Self::from_store(store)
        }
    }

    #[must_use]
    pub fn with_transactor(mut self, transactor: Arc<dyn AuthMaterialTransactor>) -> Self {
        self.transactor = Some(transactor);
        self
    }

    #[must_use]
    pub fn without_transactor(mut self) -> Self {
        self.transactor = None;
        self
    }
}

impl core::fmt::Debug for AuthMaterialStores {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthMaterialStores")
            .field("transactional", &self.transactor.is_some())
            .finish_non_exhaustive()
    }
}

/// Role and permission lookups for authorization masks.
#[derive(Clone)]
pub struct AuthzStores {
    pub roles: Arc<dyn RoleStore>,
    pub permissions: Arc<dyn PermissionStore>,
}

impl AuthzStores {
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: RoleStore + PermissionStore + 'static,
    {
        Self {
            roles: store.clone(),
            permissions: store,
        }
    }
}

impl core::fmt::Debug for AuthzStores {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthzStores").finish_non_exhaustive()
    }
}
