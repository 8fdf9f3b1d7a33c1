use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, Row};
use tracing::instrument;
use uuid::Uuid;

use authcore_core::{AuthId, CallContext, LogId, Subject};

use super::{PostgresAuthStore, decode_error, map_sqlx_error, run};
use crate::storage::{AuthLogRecord, AuthLogStore, Metadata, StorageError};

pub(super) async fn put_auth_log_in(conn: &mut PgConnection, record: &AuthLogRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO auth_log (id, date_added, auth_id, subject, event, occurred_at, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(record.id.as_uuid())
    .bind(record.date_added)
    .bind(record.auth_id.as_uuid())
    .bind(record.subject.as_str())
    .bind(record.event.as_str())
    .bind(record.occurred_at)
    .bind(Json(&record.metadata))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn log_from_row(row: &PgRow) -> Result<AuthLogRecord, StorageError> {
    let op = "decode_auth_log";
    let event: String = row.try_get("event").map_err(|e| map_sqlx_error(op, e))?;
    let Json(metadata): Json<Metadata> = row.try_get("metadata").map_err(|e| map_sqlx_error(op, e))?;

    Ok(AuthLogRecord {
        id: LogId::from_uuid(row.try_get::<Uuid, _>("id").map_err(|e| map_sqlx_error(op, e))?),
        date_added: row.try_get("date_added").map_err(|e| map_sqlx_error(op, e))?,
        auth_id: AuthId::from_uuid(row.try_get::<Uuid, _>("auth_id").map_err(|e| map_sqlx_error(op, e))?),
        subject: Subject::new(row.try_get::<String, _>("subject").map_err(|e| map_sqlx_error(op, e))?),
        event: event.parse().map_err(|e| decode_error(op, "event", e))?,
        occurred_at: row.try_get("occurred_at").map_err(|e| map_sqlx_error(op, e))?,
        metadata,
    })
}

#[async_trait::async_trait]
impl AuthLogStore for PostgresAuthStore {
    #[instrument(skip(self, ctx, record), fields(auth_id = %record.auth_id, event = %record.event), err)]
    async fn put_auth_log(&self, ctx: &CallContext, record: &AuthLogRecord) -> Result<(), StorageError> {
        let mut conn = run(ctx, "acquire", self.pool.acquire()).await?;
        run(ctx, "put_auth_log", put_auth_log_in(&mut conn, record)).await
    }

    #[instrument(skip(self, ctx), fields(auth_id = %auth_id), err)]
    async fn list_auth_logs_by_auth_id(
        &self,
        ctx: &CallContext,
        auth_id: AuthId,
    ) -> Result<Vec<AuthLogRecord>, StorageError> {
        let rows = run(
            ctx,
            "list_auth_logs_by_auth_id",
            sqlx::query(
                r#"
                SELECT id, date_added, auth_id, subject, event, occurred_at, metadata
                FROM auth_log
                WHERE auth_id = $1
                ORDER BY date_added ASC, id
                "#,
            )
            .bind(auth_id.as_uuid())
            .fetch_all(&*self.pool),
        )
        .await?;

        rows.iter().map(log_from_row).collect()
    }

    #[instrument(skip(self, ctx, subject), err)]
    async fn list_auth_logs_by_subject(
        &self,
        ctx: &CallContext,
        subject: &Subject,
    ) -> Result<Vec<AuthLogRecord>, StorageError> {
        let rows = run(
            ctx,
            "list_auth_logs_by_subject",
            sqlx::query(
                r#"
                SELECT id, date_added, auth_id, subject, event, occurred_at, metadata
                FROM auth_log
                WHERE subject = $1
                ORDER BY date_added ASC, id
                "#,
            )
            .bind(subject.as_str())
            .fetch_all(&*self.pool),
        )
        .await?;

        rows.iter().map(log_from_row).collect()
    }
}
