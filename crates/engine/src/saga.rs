//! The linked write behind `create_auth`.
//!
//! With a transactional store the three records go through
//! [`AuthMaterialTransactor::write_linked`]. Without one the write is a
//! two-step saga: material, then linkage, with a single compensating delete
//! of the material if the linkage fails. The audit record is best-effort in
//! both modes.

use std::time::Duration;

use tracing::{error, info, warn};

use authcore_core::CallContext;
use authcore_infra::storage::{AuthLogRecord, AuthMaterialStores, AuthRecord, StorageError, SubjectAuthRecord};

/// Upper bound for the compensating delete, which runs detached from the
/// caller's cancellation.
const COMPENSATION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum WriteMode {
    Transactional,
    Compensating,
}

impl WriteMode {
    fn as_str(self) -> &'static str {
        match self {
            WriteMode::Transactional => "transactional",
            WriteMode::Compensating => "compensating",
        }
    }
}

pub(crate) struct LinkedWrite {
    pub(crate) auth: AuthRecord,
    pub(crate) link: SubjectAuthRecord,
    pub(crate) log: AuthLogRecord,
}

impl LinkedWrite {
    pub(crate) async fn execute(&self, ctx: &CallContext, stores: &AuthMaterialStores) -> Result<WriteMode, StorageError> {
        match &stores.transactor {
            Some(transactor) => {
                let report = transactor.write_linked(ctx, &self.auth, &self.link, &self.log).await?;
                if let Some(err) = report.audit_error {
                    self.audit_failed(WriteMode::Transactional, &err);
                }
                Ok(WriteMode::Transactional)
            }
            None => {
                self.run_saga(ctx, stores).await?;
                Ok(WriteMode::Compensating)
            }
        }
    }

    async fn run_saga(&self, ctx: &CallContext, stores: &AuthMaterialStores) -> Result<(), StorageError> {
        stores.auth.put_auth(ctx, &self.auth).await?;

        if let Err(err) = stores.subject_auth.put_subject_auth(ctx, &self.link).await {
            self.compensate(stores).await;
            return Err(err);
        }

        if let Err(err) = stores.auth_log.put_auth_log(ctx, &self.log).await {
            self.audit_failed(WriteMode::Compensating, &err);
        }
        Ok(())
    }

    /// Delete the material written by the first step. Runs under its own
    /// context so a canceled caller does not leave orphaned material.
    async fn compensate(&self, stores: &AuthMaterialStores) {
        let ctx = CallContext::new().with_timeout(COMPENSATION_TIMEOUT);
        match stores.auth.delete_auth(&ctx, self.auth.id).await {
            Ok(()) => info!(auth_id = %self.auth.id, "compensating delete removed unlinked auth material"),
            Err(err) => error!(
                auth_id = %self.auth.id,
                subject = %self.link.subject,
                error = %err,
                "compensating delete failed; auth material left without linkage"
            ),
        }
    }

    fn audit_failed(&self, mode: WriteMode, err: &StorageError) {
        warn!(
            auth_id = %self.auth.id,
            subject = %self.log.subject,
            event = %self.log.event,
            mode = mode.as_str(),
            error = %err,
            "failed to write auth log record"
        );
    }
}
