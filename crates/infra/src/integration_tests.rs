//! Postgres adapter tests against a live database.
//!
//! Skipped unless `DATABASE_URL` points at a disposable database. Each test
//! uses fresh subjects so runs can share one schema.

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use authcore_auth::{PermissionMask, RoleMask};
    use authcore_core::{AuthMaterialType, AuthStatus, CallContext, Subject, TenantId};

    use crate::config::{ENV_DATABASE_URL, PostgresConfig};
    use crate::storage::{
        AuthLogEvent, AuthLogRecord, AuthLogStore, AuthMaterialTransactor, AuthRecord, AuthStore, PermissionRecord,
        PermissionStore, PostgresAuthStore, RoleRecord, RoleStore, StorageError, SubjectAuthRecord, SubjectAuthStore,
    };

    async fn store() -> anyhow::Result<Option<PostgresAuthStore>> {
        let Ok(url) = std::env::var(ENV_DATABASE_URL) else {
            eprintln!("{ENV_DATABASE_URL} not set; skipping postgres test");
            return Ok(None);
        };
        let store = PostgresAuthStore::connect(&PostgresConfig::new(url)).await?;
        store.ensure_schema(&CallContext::new()).await?;
        Ok(Some(store))
    }

    fn fresh_subject() -> Subject {
        Subject::new(format!("it-{}", Uuid::now_v7()))
    }

    #[tokio::test]
    async fn material_round_trips_with_metadata() -> anyhow::Result<()> {
        let Some(store) = store().await? else { return Ok(()) };
        let ctx = CallContext::new();

        let mut record = AuthRecord::new(AuthMaterialType::ApiKey, "$pbkdf2-sha256$i=1000$c2FsdA$aGFzaA");
        record.metadata.insert("label".into(), "ci".into());
        store.put_auth(&ctx, &record).await?;

        let loaded = store.get_auth(&ctx, record.id).await?;
        assert_eq!(loaded.material_type, AuthMaterialType::ApiKey);
        assert_eq!(loaded.status, AuthStatus::Active);
        assert_eq!(loaded.metadata.get("label").map(String::as_str), Some("ci"));

        store.delete_auth(&ctx, record.id).await?;
        assert!(matches!(store.get_auth(&ctx, record.id).await, Err(StorageError::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn linked_write_is_atomic() -> anyhow::Result<()> {
        let Some(store) = store().await? else { return Ok(()) };
        let ctx = CallContext::new();
        let subject = fresh_subject();

        let auth = AuthRecord::new(AuthMaterialType::Password, "hash");
        let link = SubjectAuthRecord::new(subject.clone(), auth.id);
        let log = AuthLogRecord::new(auth.id, subject.clone(), AuthLogEvent::Validated, Utc::now());
        let report = store.write_linked(&ctx, &auth, &link, &log).await?;
        assert!(report.audit_error.is_none());

        // Same auth id again: the insert conflicts and the rolled-back
        // transaction leaves the first write untouched.
        let other = SubjectAuthRecord::new(fresh_subject(), auth.id);
        let mut replaced = auth.clone();
        replaced.material_hash = "replaced".into();
        let err = store.write_linked(&ctx, &replaced, &other, &log).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)), "{err}");

        assert_eq!(store.get_auth(&ctx, auth.id).await?.material_hash, "hash");
        let links = store.list_subject_auth_by_subject(&ctx, &subject).await?;
        assert_eq!(links.len(), 1);
        assert_eq!(store.list_auth_logs_by_auth_id(&ctx, auth.id).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn masks_are_scoped_per_tenant() -> anyhow::Result<()> {
        let Some(store) = store().await? else { return Ok(()) };
        let ctx = CallContext::new();
        let subject = fresh_subject();
        let acme = TenantId::new("acme");

        store
            .put_role(&ctx, &RoleRecord {
                subject: subject.clone(),
                tenant: acme.clone(),
                role_mask: RoleMask::EDITOR | RoleMask::VIEWER,
            })
            .await?;
        store
            .put_permission(&ctx, &PermissionRecord {
                subject: subject.clone(),
                tenant: acme.clone(),
                permission_mask: PermissionMask::WRITE,
            })
            .await?;

        let role = store.get_role(&ctx, &subject, &acme).await?;
        assert_eq!(role.map(|r| r.role_mask), Some(RoleMask::EDITOR | RoleMask::VIEWER));
        assert!(store.get_role(&ctx, &subject, &TenantId::default_tenant()).await?.is_none());

        store.delete_permission(&ctx, &subject, &acme).await?;
        assert!(store.get_permission(&ctx, &subject, &acme).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn closed_pool_is_unavailable() -> anyhow::Result<()> {
        let Some(store) = store().await? else { return Ok(()) };
        store.close().await;
        let err = store.ping(&CallContext::new()).await.unwrap_err();
        assert!(err.is_unavailable(), "{err}");
        Ok(())
    }
}
