use sqlx::Row;
use tracing::instrument;

use authcore_auth::{PermissionMask, RoleMask};
use authcore_core::{CallContext, Subject, TenantId};

use super::{PostgresAuthStore, map_sqlx_error, run};
use crate::storage::{PermissionRecord, PermissionStore, RoleRecord, RoleStore, StorageError};

#[async_trait::async_trait]
impl RoleStore for PostgresAuthStore {
    #[instrument(skip(self, ctx, record), fields(tenant = %record.tenant), err)]
    async fn put_role(&self, ctx: &CallContext, record: &RoleRecord) -> Result<(), StorageError> {
        run(
            ctx,
            "put_role",
            sqlx::query(
                r#"
                INSERT INTO subject_role (subject, tenant, role_mask, date_modified)
                VALUES ($1, $2, $3, NOW())
                ON CONFLICT (subject, tenant) DO UPDATE
                SET role_mask = EXCLUDED.role_mask, date_modified = NOW()
                "#,
            )
            .bind(record.subject.as_str())
            .bind(record.tenant.as_str())
            .bind(record.role_mask.to_i64())
            .execute(&*self.pool),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, ctx, subject), fields(tenant = %tenant), err)]
    async fn get_role(
        &self,
        ctx: &CallContext,
        subject: &Subject,
        tenant: &TenantId,
    ) -> Result<Option<RoleRecord>, StorageError> {
        let row = run(
            ctx,
            "get_role",
            sqlx::query("SELECT role_mask FROM subject_role WHERE subject = $1 AND tenant = $2")
                .bind(subject.as_str())
                .bind(tenant.as_str())
                .fetch_optional(&*self.pool),
        )
        .await?;

        row.map(|row| -> Result<RoleRecord, StorageError> {
            let bits: i64 = row.try_get("role_mask").map_err(|e| map_sqlx_error("get_role", e))?;
            Ok(RoleRecord {
                subject: subject.clone(),
                tenant: tenant.clone(),
                role_mask: RoleMask::from_i64(bits),
            })
        })
        .transpose()
    }

    #[instrument(skip(self, ctx, subject), fields(tenant = %tenant), err)]
    async fn delete_role(&self, ctx: &CallContext, subject: &Subject, tenant: &TenantId) -> Result<(), StorageError> {
        run(
            ctx,
            "delete_role",
            sqlx::query("DELETE FROM subject_role WHERE subject = $1 AND tenant = $2")
                .bind(subject.as_str())
                .bind(tenant.as_str())
                .execute(&*self.pool),
        )
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl PermissionStore for PostgresAuthStore {
    #[instrument(skip(self, ctx, record), fields(tenant = %record.tenant), err)]
    async fn put_permission(&self, ctx: &CallContext, record: &PermissionRecord) -> Result<(), StorageError> {
        run(
            ctx,
            "put_permission",
            sqlx::query(
                r#"
                INSERT INTO subject_permission (subject, tenant, permission_mask, date_modified)
                VALUES ($1, $2, $3, NOW())
                ON CONFLICT (subject, tenant) DO UPDATE
                SET permission_mask = EXCLUDED.permission_mask, date_modified = NOW()
                "#,
            )
            .bind(record.subject.as_str())
            .bind(record.tenant.as_str())
            .bind(record.permission_mask.to_i64())
            .execute(&*self.pool),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, ctx, subject), fields(tenant = %tenant), err)]
    async fn get_permission(
        &self,
        ctx: &CallContext,
        subject: &Subject,
        tenant: &TenantId,
    ) -> Result<Option<PermissionRecord>, StorageError> {
        let row = run(
            ctx,
            "get_permission",
            sqlx::query("SELECT permission_mask FROM subject_permission WHERE subject = $1 AND tenant = $2")
                .bind(subject.as_str())
                .bind(tenant.as_str())
                .fetch_optional(&*self.pool),
        )
        .await?;

        row.map(|row| -> Result<PermissionRecord, StorageError> {
            let bits: i64 = row
                .try_get("permission_mask")
                .map_err(|e| map_sqlx_error("get_permission", e))?;
            Ok(PermissionRecord {
                subject: subject.clone(),
                tenant: tenant.clone(),
                permission_mask: PermissionMask::from_i64(bits),
            })
        })
        .transpose()
    }

    #[instrument(skip(self, ctx, subject), fields(tenant = %tenant), err)]
    async fn delete_permission(
        &self,
        ctx: &CallContext,
        subject: &Subject,
        tenant: &TenantId,
    ) -> Result<(), StorageError> {
        run(
            ctx,
            "delete_permission",
            sqlx::query("DELETE FROM subject_permission WHERE subject = $1 AND tenant = $2")
                .bind(subject.as_str())
                .bind(tenant.as_str())
                .execute(&*self.pool),
        )
        .await?;
        Ok(())
    }
}
