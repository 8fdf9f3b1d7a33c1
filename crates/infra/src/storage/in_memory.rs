//! In-memory storage for tests and local development.
//!
//! All tables live behind one `RwLock`, which also makes the linked write
//! atomic: material, linkage and audit record are inserted under a single
//! write guard.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use authcore_core::{AuthId, CallContext, LinkId, Subject, TenantId};

use super::records::{AuthLogRecord, AuthRecord, PermissionRecord, RoleRecord, SubjectAuthRecord};
use super::r#trait::{
    AuthLogStore, AuthMaterialTransactor, AuthStore, LinkedWriteReport, PermissionStore, RoleStore,
    StorageError, SubjectAuthStore,
};

#[derive(Debug, Default)]
struct Tables {
    auths: HashMap<AuthId, AuthRecord>,
    links: HashMap<LinkId, SubjectAuthRecord>,
    logs: Vec<AuthLogRecord>,
    roles: HashMap<(Subject, TenantId), RoleRecord>,
    permissions: HashMap<(Subject, TenantId), PermissionRecord>,
}

impl Tables {
    fn upsert_link(&mut self, record: &SubjectAuthRecord) {
        let existing = self
            .links
            .values_mut()
            .find(|l| l.auth_id == record.auth_id);

        match existing {
            Some(link) => {
                link.subject = record.subject.clone();
                link.date_modified = Some(Utc::now());
            }
            None => {
                self.links.insert(record.id, record.clone());
            }
        }
    }
}

/// In-memory implementation of every storage contract.
#[derive(Debug, Default)]
pub struct InMemoryAuthStore {
    inner: RwLock<Tables>,
}

impl InMemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StorageError> {
        self.inner
            .read()
            .map_err(|_| StorageError::Backend("in-memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StorageError> {
        self.inner
            .write()
            .map_err(|_| StorageError::Backend("in-memory store lock poisoned".to_string()))
    }

    /// Number of auth material records (test helper).
    pub fn auth_count(&self) -> usize {
        self.read().map(|t| t.auths.len()).unwrap_or(0)
    }

    /// Number of linkage records (test helper).
    pub fn link_count(&self) -> usize {
        self.read().map(|t| t.links.len()).unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl AuthStore for InMemoryAuthStore {
    async fn put_auth(&self, ctx: &CallContext, record: &AuthRecord) -> Result<(), StorageError> {
        ctx.check()?;
        let mut tables = self.write()?;
        tables.auths.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_auth(&self, ctx: &CallContext, id: AuthId) -> Result<AuthRecord, StorageError> {
        ctx.check()?;
        let tables = self.read()?;
        tables
            .auths
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("auth {id}")))
    }

    async fn get_auths(&self, ctx: &CallContext, ids: &[AuthId]) -> Result<Vec<AuthRecord>, StorageError> {
        ctx.check()?;
        let tables = self.read()?;
        let mut records: Vec<AuthRecord> = ids
            .iter()
            .filter_map(|id| tables.auths.get(id).cloned())
            .collect();
        records.sort_by(AuthRecord::cmp_recency);
        records.dedup_by_key(|r| r.id);
        Ok(records)
    }

    async fn delete_auth(&self, ctx: &CallContext, id: AuthId) -> Result<(), StorageError> {
        ctx.check()?;
        let mut tables = self.write()?;
        tables.auths.remove(&id);
        Ok(())
    }
}

#[async_trait::async_trait]
impl SubjectAuthStore for InMemoryAuthStore {
    async fn put_subject_auth(&self, ctx: &CallContext, record: &SubjectAuthRecord) -> Result<(), StorageError> {
        ctx.check()?;
        self.write()?.upsert_link(record);
        Ok(())
    }

    async fn list_subject_auth_by_subject(
        &self,
        ctx: &CallContext,
        subject: &Subject,
    ) -> Result<Vec<SubjectAuthRecord>, StorageError> {
        ctx.check()?;
        let tables = self.read()?;
        let mut links: Vec<_> = tables
            .links
            .values()
            .filter(|l| &l.subject == subject)
            .cloned()
            .collect();
        links.sort_by_key(|l| (l.date_added, l.id));
        Ok(links)
    }

    async fn list_subject_auth_by_auth_id(
        &self,
        ctx: &CallContext,
        auth_id: AuthId,
    ) -> Result<Vec<SubjectAuthRecord>, StorageError> {
        ctx.check()?;
        let tables = self.read()?;
        Ok(tables
            .links
            .values()
            .filter(|l| l.auth_id == auth_id)
            .cloned()
            .collect())
    }

    async fn delete_subject_auth(&self, ctx: &CallContext, id: LinkId) -> Result<(), StorageError> {
        ctx.check()?;
        self.write()?.links.remove(&id);
        Ok(())
    }
}

#[async_trait::async_trait]
impl AuthLogStore for InMemoryAuthStore {
    async fn put_auth_log(&self, ctx: &CallContext, record: &AuthLogRecord) -> Result<(), StorageError> {
        ctx.check()?;
        let mut tables = self.write()?;
        if tables.logs.iter().any(|l| l.id == record.id) {
            return Err(StorageError::Conflict(format!("auth log {}", record.id)));
        }
        tables.logs.push(record.clone());
        Ok(())
    }

    async fn list_auth_logs_by_auth_id(
        &self,
        ctx: &CallContext,
        auth_id: AuthId,
    ) -> Result<Vec<AuthLogRecord>, StorageError> {
        ctx.check()?;
        let tables = self.read()?;
        Ok(tables
            .logs
            .iter()
            .filter(|l| l.auth_id == auth_id)
            .cloned()
            .collect())
    }

    async fn list_auth_logs_by_subject(
        &self,
        ctx: &CallContext,
        subject: &Subject,
    ) -> Result<Vec<AuthLogRecord>, StorageError> {
        ctx.check()?;
        let tables = self.read()?;
        Ok(tables
            .logs
            .iter()
            .filter(|l| &l.subject == subject)
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl RoleStore for InMemoryAuthStore {
    async fn put_role(&self, ctx: &CallContext, record: &RoleRecord) -> Result<(), StorageError> {
        ctx.check()?;
        self.write()?
            .roles
            .insert((record.subject.clone(), record.tenant.clone()), record.clone());
        Ok(())
    }

    async fn get_role(
        &self,
        ctx: &CallContext,
        subject: &Subject,
        tenant: &TenantId,
    ) -> Result<Option<RoleRecord>, StorageError> {
        ctx.check()?;
        let tables = self.read()?;
        Ok(tables.roles.get(&(subject.clone(), tenant.clone())).cloned())
    }

    async fn delete_role(&self, ctx: &CallContext, subject: &Subject, tenant: &TenantId) -> Result<(), StorageError> {
        ctx.check()?;
        self.write()?.roles.remove(&(subject.clone(), tenant.clone()));
        Ok(())
    }
}

#[async_trait::async_trait]
impl PermissionStore for InMemoryAuthStore {
    async fn put_permission(&self, ctx: &CallContext, record: &PermissionRecord) -> Result<(), StorageError> {
        ctx.check()?;
        self.write()?
            .permissions
            .insert((record.subject.clone(), record.tenant.clone()), record.clone());
        Ok(())
    }

    async fn get_permission(
        &self,
        ctx: &CallContext,
        subject: &Subject,
        tenant: &TenantId,
    ) -> Result<Option<PermissionRecord>, StorageError> {
        ctx.check()?;
        let tables = self.read()?;
        Ok(tables.permissions.get(&(subject.clone(), tenant.clone())).cloned())
    }

    async fn delete_permission(
        &self,
        ctx: &CallContext,
        subject: &Subject,
        tenant: &TenantId,
    ) -> Result<(), StorageError> {
        ctx.check()?;
        self.write()?
            .permissions
            .remove(&(subject.clone(), tenant.clone()));
        Ok(())
    }
}

#[async_trait::async_trait]
impl AuthMaterialTransactor for InMemoryAuthStore {
    async fn write_linked(
        &self,
        ctx: &CallContext,
        auth: &AuthRecord,
        link: &SubjectAuthRecord,
        log: &AuthLogRecord,
    ) -> Result<LinkedWriteReport, StorageError> {
        ctx.check()?;
        let mut tables = self.write()?;

        if tables.auths.contains_key(&auth.id) {
            return Err(StorageError::Conflict(format!("auth {}", auth.id)));
        }
        if tables.links.values().any(|l| l.auth_id == link.auth_id) {
            return Err(StorageError::Conflict(format!("linkage for auth {}", link.auth_id)));
        }

        tables.auths.insert(auth.id, auth.clone());
        tables.links.insert(link.id, link.clone());

        let audit_error = if tables.logs.iter().any(|l| l.id == log.id) {
            Some(StorageError::Conflict(format!("auth log {}", log.id)))
        } else {
            tables.logs.push(log.clone());
            None
        };

        Ok(LinkedWriteReport { audit_error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::AuthLogEvent;
    use authcore_auth::RoleMask;
    use authcore_core::{AuthMaterialType, Interrupted};
    use chrono::Duration;

    fn ctx() -> CallContext {
        CallContext::new()
    }

    #[tokio::test]
    async fn put_get_delete_auth() {
        let store = InMemoryAuthStore::new();
        let record = AuthRecord::new(AuthMaterialType::Password, "hash");

        store.put_auth(&ctx(), &record).await.unwrap();
        assert_eq!(store.get_auth(&ctx(), record.id).await.unwrap(), record);

        store.delete_auth(&ctx(), record.id).await.unwrap();
        assert!(matches!(
            store.get_auth(&ctx(), record.id).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn bulk_fetch_is_newest_first() {
        let store = InMemoryAuthStore::new();
        let mut older = AuthRecord::new(AuthMaterialType::Password, "a");
        older.date_added = Utc::now() - Duration::hours(1);
        let newer = AuthRecord::new(AuthMaterialType::Password, "b");

        store.put_auth(&ctx(), &older).await.unwrap();
        store.put_auth(&ctx(), &newer).await.unwrap();

        let ids = [older.id, AuthId::new(), newer.id];
        let records = store.get_auths(&ctx(), &ids).await.unwrap();
        let got: Vec<_> = records.iter().map(|r| r.id).collect();
        assert_eq!(got, vec![newer.id, older.id]);
    }

    #[tokio::test]
    async fn linkage_is_unique_per_auth_id() {
        let store = InMemoryAuthStore::new();
        let auth_id = AuthId::new();

        store
            .put_subject_auth(&ctx(), &SubjectAuthRecord::new(Subject::new("u1"), auth_id))
            .await
            .unwrap();
        store
            .put_subject_auth(&ctx(), &SubjectAuthRecord::new(Subject::new("u2"), auth_id))
            .await
            .unwrap();

        let links = store.list_subject_auth_by_auth_id(&ctx(), auth_id).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].subject, Subject::new("u2"));
    }

    #[tokio::test]
    async fn missing_role_is_none() {
        let store = InMemoryAuthStore::new();
        let subject = Subject::new("u1");
        let tenant = TenantId::default();
        assert!(store.get_role(&ctx(), &subject, &tenant).await.unwrap().is_none());

        store
            .put_role(
                &ctx(),
                &RoleRecord {
                    subject: subject.clone(),
                    tenant: tenant.clone(),
                    role_mask: RoleMask::EDITOR,
                },
            )
            .await
            .unwrap();
        let role = store.get_role(&ctx(), &subject, &tenant).await.unwrap().unwrap();
        assert_eq!(role.role_mask, RoleMask::EDITOR);
    }

    #[tokio::test]
    async fn linked_write_is_all_or_nothing() {
        let store = InMemoryAuthStore::new();
        let auth = AuthRecord::new(AuthMaterialType::Password, "hash");
        let link = SubjectAuthRecord::new(Subject::new("u1"), auth.id);
        let log = AuthLogRecord::new(auth.id, Subject::new("u1"), AuthLogEvent::Validated, Utc::now());

        let report = store.write_linked(&ctx(), &auth, &link, &log).await.unwrap();
        assert!(report.audit_error.is_none());
        assert_eq!(store.auth_count(), 1);
        assert_eq!(store.link_count(), 1);

        // Same auth id again: rejected without touching the tables.
        let again = store.write_linked(&ctx(), &auth, &link, &log).await;
        assert!(matches!(again, Err(StorageError::Conflict(_))));
        assert_eq!(store.auth_count(), 1);
        assert_eq!(store.link_count(), 1);
    }

    #[tokio::test]
    async fn canceled_context_is_rejected() {
        let store = InMemoryAuthStore::new();
        let ctx = CallContext::new();
        ctx.cancel();
        let err = store.get_auths(&ctx, &[]).await.unwrap_err();
        assert_eq!(err, StorageError::Canceled(Interrupted::Canceled));
    }
}
