use tracing::{instrument, warn};

use authcore_core::CallContext;

use super::audit::put_auth_log_in;
use super::auth::put_auth_in;
use super::subject_auth::put_subject_auth_in;
use super::{OnConflict, PostgresAuthStore, is_unique_violation, map_sqlx_error, run};
use crate::storage::{
    AuthLogRecord, AuthMaterialTransactor, AuthRecord, LinkedWriteReport, StorageError, SubjectAuthRecord,
};

const AUDIT_SAVEPOINT: &str = "auth_log_write";

#[async_trait::async_trait]
impl AuthMaterialTransactor for PostgresAuthStore {
    /// Material and linkage are inserted, never upserted, and commit
    /// together or not at all. The audit insert runs under a savepoint: its
    /// failure is rolled back alone and reported.
    ///
    /// Any early return drops the transaction, which sqlx rolls back.
    #[instrument(skip_all, fields(auth_id = %auth.id), err)]
    async fn write_linked(
        &self,
        ctx: &CallContext,
        auth: &AuthRecord,
        link: &SubjectAuthRecord,
        log: &AuthLogRecord,
    ) -> Result<LinkedWriteReport, StorageError> {
        let mut tx = run(ctx, "begin_transaction", self.pool.begin()).await?;

        run(ctx, "insert_auth", put_auth_in(&mut tx, auth, OnConflict::Fail)).await?;

        ctx.run(put_subject_auth_in(&mut tx, link, OnConflict::Fail))
            .await?
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StorageError::Conflict(format!("auth {} is already linked", link.auth_id))
                } else {
                    map_sqlx_error("put_subject_auth", e)
                }
            })?;

        let savepoint = format!("SAVEPOINT {AUDIT_SAVEPOINT}");
        run(ctx, "savepoint", sqlx::query(&savepoint).execute(&mut *tx)).await?;

        let audit_error = match run(ctx, "put_auth_log", put_auth_log_in(&mut tx, log)).await {
            Ok(()) => {
                let release = format!("RELEASE SAVEPOINT {AUDIT_SAVEPOINT}");
                run(ctx, "release_savepoint", sqlx::query(&release).execute(&mut *tx)).await?;
                None
            }
            Err(StorageError::Canceled(reason)) => return Err(StorageError::Canceled(reason)),
            Err(err) => {
                warn!(auth_id = %auth.id, event = %log.event, error = %err, "audit insert rolled back to savepoint");
                let rollback = format!("ROLLBACK TO SAVEPOINT {AUDIT_SAVEPOINT}");
                run(ctx, "rollback_savepoint", sqlx::query(&rollback).execute(&mut *tx)).await?;
                Some(err)
            }
        };

        run(ctx, "commit_transaction", tx.commit()).await?;
        Ok(LinkedWriteReport { audit_error })
    }
}
