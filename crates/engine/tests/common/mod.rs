//! Shared fixtures: a fast hasher and a store wrapper with switchable faults.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use authcore_auth::{Hasher, Pbkdf2Hasher, Pbkdf2Options};
use authcore_core::{AuthId, CallContext, LinkId, Subject, TenantId};
use authcore_engine::{AuthEngine, AuthEngineBuilder};
use authcore_infra::storage::{
    AuthLogRecord, AuthLogStore, AuthMaterialStores, AuthMaterialTransactor, AuthRecord, AuthStore, AuthzStores,
    InMemoryAuthStore, LinkedWriteReport, PermissionRecord, PermissionStore, RoleRecord, RoleStore, StorageError,
    SubjectAuthRecord, SubjectAuthStore,
};

pub fn fast_hasher() -> Arc<dyn Hasher> {
    Arc::new(Pbkdf2Hasher::new(Pbkdf2Options {
        iterations: 1_000,
        ..Pbkdf2Options::default()
    }))
}

pub fn ctx() -> CallContext {
    CallContext::new()
}

#[derive(Default)]
pub struct Faults {
    pub subject_lookup_unavailable: AtomicBool,
    pub mix_subjects: AtomicBool,
    pub fail_put_auth: AtomicBool,
    pub fail_link_write: AtomicBool,
    pub fail_audit_write: AtomicBool,
    pub fail_delete_auth: AtomicBool,
    pub fail_role_lookup: AtomicBool,
    pub fail_permission_lookup: AtomicBool,
}

impl Faults {
    pub fn set(flag: &AtomicBool) {
        flag.store(true, Ordering::SeqCst);
    }

    pub fn clear(flag: &AtomicBool) {
        flag.store(false, Ordering::SeqCst);
    }

    fn on(flag: &AtomicBool) -> bool {
        flag.load(Ordering::SeqCst)
    }
}

/// Delegates to an in-memory store unless a fault is switched on.
/// Implements no transactor, so the engine takes the saga path.
pub struct FaultyStore {
    pub inner: Arc<InMemoryAuthStore>,
    pub faults: Faults,
}

impl FaultyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(InMemoryAuthStore::new()),
            faults: Faults::default(),
        })
    }
}

#[async_trait::async_trait]
impl AuthStore for FaultyStore {
    async fn put_auth(&self, ctx: &CallContext, record: &AuthRecord) -> Result<(), StorageError> {
        if Faults::on(&self.faults.fail_put_auth) {
            return Err(StorageError::Backend("injected put_auth failure".into()));
        }
        self.inner.put_auth(ctx, record).await
    }

    async fn get_auth(&self, ctx: &CallContext, id: AuthId) -> Result<AuthRecord, StorageError> {
        self.inner.get_auth(ctx, id).await
    }

    async fn get_auths(&self, ctx: &CallContext, ids: &[AuthId]) -> Result<Vec<AuthRecord>, StorageError> {
        self.inner.get_auths(ctx, ids).await
    }

    async fn delete_auth(&self, ctx: &CallContext, id: AuthId) -> Result<(), StorageError> {
        if Faults::on(&self.faults.fail_delete_auth) {
            return Err(StorageError::Unavailable("injected delete failure".into()));
        }
        self.inner.delete_auth(ctx, id).await
    }
}

#[async_trait::async_trait]
impl SubjectAuthStore for FaultyStore {
    async fn put_subject_auth(&self, ctx: &CallContext, record: &SubjectAuthRecord) -> Result<(), StorageError> {
        if Faults::on(&self.faults.fail_link_write) {
            return Err(StorageError::Unavailable("injected linkage failure".into()));
        }
        self.inner.put_subject_auth(ctx, record).await
    }

    async fn list_subject_auth_by_subject(
        &self,
        ctx: &CallContext,
        subject: &Subject,
    ) -> Result<Vec<SubjectAuthRecord>, StorageError> {
        if Faults::on(&self.faults.subject_lookup_unavailable) {
            return Err(StorageError::Unavailable("injected outage".into()));
        }
        let mut links = self.inner.list_subject_auth_by_subject(ctx, subject).await?;
        if Faults::on(&self.faults.mix_subjects) {
            if let Some(first) = links.first().cloned() {
                links.push(SubjectAuthRecord {
                    id: LinkId::new(),
                    subject: Subject::new("someone-else"),
                    ..first
                });
            }
        }
        Ok(links)
    }

    async fn list_subject_auth_by_auth_id(
        &self,
        ctx: &CallContext,
        auth_id: AuthId,
    ) -> Result<Vec<SubjectAuthRecord>, StorageError> {
        self.inner.list_subject_auth_by_auth_id(ctx, auth_id).await
    }

    async fn delete_subject_auth(&self, ctx: &CallContext, id: LinkId) -> Result<(), StorageError> {
        self.inner.delete_subject_auth(ctx, id).await
    }
}

#[async_trait::async_trait]
impl AuthLogStore for FaultyStore {
    async fn put_auth_log(&self, ctx: &CallContext, record: &AuthLogRecord) -> Result<(), StorageError> {
        if Faults::on(&self.faults.fail_audit_write) {
            return Err(StorageError::Backend("injected audit failure".into()));
        }
        self.inner.put_auth_log(ctx, record).await
    }

    async fn list_auth_logs_by_auth_id(
        &self,
        ctx: &CallContext,
        auth_id: AuthId,
    ) -> Result<Vec<AuthLogRecord>, StorageError> {
        self.inner.list_auth_logs_by_auth_id(ctx, auth_id).await
    }

    async fn list_auth_logs_by_subject(
        &self,
        ctx: &CallContext,
        subject: &Subject,
    ) -> Result<Vec<AuthLogRecord>, StorageError> {
        self.inner.list_auth_logs_by_subject(ctx, subject).await
    }
}

#[async_trait::async_trait]
impl RoleStore for FaultyStore {
    async fn put_role(&self, ctx: &CallContext, record: &RoleRecord) -> Result<(), StorageError> {
        self.inner.put_role(ctx, record).await
    }

    async fn get_role(
        &self,
        ctx: &CallContext,
        subject: &Subject,
        tenant: &TenantId,
    ) -> Result<Option<RoleRecord>, StorageError> {
        if Faults::on(&self.faults.fail_role_lookup) {
            return Err(StorageError::Unavailable("injected role failure".into()));
        }
        self.inner.get_role(ctx, subject, tenant).await
    }

    async fn delete_role(&self, ctx: &CallContext, subject: &Subject, tenant: &TenantId) -> Result<(), StorageError> {
        self.inner.delete_role(ctx, subject, tenant).await
    }
}

#[async_trait::async_trait]
impl PermissionStore for FaultyStore {
    async fn put_permission(&self, ctx: &CallContext, record: &PermissionRecord) -> Result<(), StorageError> {
        self.inner.put_permission(ctx, record).await
    }

    async fn get_permission(
        &self,
        ctx: &CallContext,
        subject: &Subject,
        tenant: &TenantId,
    ) -> Result<Option<PermissionRecord>, StorageError> {
        if Faults::on(&self.faults.fail_permission_lookup) {
            return Err(StorageError::Unavailable("injected permission failure".into()));
        }
        self.inner.get_permission(ctx, subject, tenant).await
    }

    async fn delete_permission(
        &self,
        ctx: &CallContext,
        subject: &Subject,
        tenant: &TenantId,
    ) -> Result<(), StorageError> {
        self.inner.delete_permission(ctx, subject, tenant).await
    }
}

/// A transactor that loses a race: another writer claims the linkage for
/// the incoming auth id just before the atomic write runs.
pub struct RacingTransactor {
    pub inner: Arc<InMemoryAuthStore>,
}

#[async_trait::async_trait]
impl AuthMaterialTransactor for RacingTransactor {
    async fn write_linked(
        &self,
        ctx: &CallContext,
        auth: &AuthRecord,
        link: &SubjectAuthRecord,
        log: &AuthLogRecord,
    ) -> Result<LinkedWriteReport, StorageError> {
        let claim = SubjectAuthRecord::new(Subject::new("intruder"), auth.id);
        self.inner.put_subject_auth(ctx, &claim).await?;
        self.inner.write_linked(ctx, auth, link, log).await
    }
}

pub fn builder_for(store: &Arc<FaultyStore>) -> AuthEngineBuilder {
    AuthEngine::builder()
        .material_stores(AuthMaterialStores::from_store(store.clone()))
        .authz_stores(AuthzStores::from_store(store.clone()))
        .hasher(fast_hasher())
}

pub fn transactional_engine(store: &Arc<InMemoryAuthStore>) -> AuthEngine {
    AuthEngine::builder()
        .material_stores(AuthMaterialStores::transactional(store.clone()))
        .authz_stores(AuthzStores::from_store(store.clone()))
        .hasher(fast_hasher())
        .build()
}
