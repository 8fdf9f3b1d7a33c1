use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};
use tracing::instrument;
use uuid::Uuid;

use authcore_core::{AuthId, CallContext, LinkId, Subject};

use super::{OnConflict, PostgresAuthStore, map_sqlx_error, run};
use crate::storage::{StorageError, SubjectAuthRecord, SubjectAuthStore};

/// An auth id is linked at most once; `Update` moves the linkage to the
/// record's subject, `Fail` surfaces the unique violation.
pub(super) async fn put_subject_auth_in(
    conn: &mut PgConnection,
    record: &SubjectAuthRecord,
    on_conflict: OnConflict,
) -> Result<(), sqlx::Error> {
    let upsert = match on_conflict {
        OnConflict::Update => "ON CONFLICT (auth_id) DO UPDATE SET subject = EXCLUDED.subject, date_modified = NOW()",
        OnConflict::Fail => "",
    };
    let query = format!(
        "INSERT INTO subject_auth (id, date_added, date_modified, subject, auth_id) VALUES ($1, $2, $3, $4, $5) {upsert}"
    );
    sqlx::query(&query)
        .bind(record.id.as_uuid())
        .bind(record.date_added)
        .bind(record.date_modified)
        .bind(record.subject.as_str())
        .bind(record.auth_id.as_uuid())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn link_from_row(row: &PgRow) -> Result<SubjectAuthRecord, sqlx::Error> {
    Ok(SubjectAuthRecord {
        id: LinkId::from_uuid(row.try_get::<Uuid, _>("id")?),
        date_added: row.try_get("date_added")?,
        date_modified: row.try_get("date_modified")?,
        subject: Subject::new(row.try_get::<String, _>("subject")?),
        auth_id: AuthId::from_uuid(row.try_get::<Uuid, _>("auth_id")?),
    })
}

fn links_from_rows(operation: &str, rows: &[PgRow]) -> Result<Vec<SubjectAuthRecord>, StorageError> {
    rows.iter()
        .map(|row| link_from_row(row).map_err(|e| map_sqlx_error(operation, e)))
        .collect()
}

#[async_trait::async_trait]
impl SubjectAuthStore for PostgresAuthStore {
    #[instrument(skip(self, ctx, record), fields(auth_id = %record.auth_id), err)]
    async fn put_subject_auth(&self, ctx: &CallContext, record: &SubjectAuthRecord) -> Result<(), StorageError> {
        let mut conn = run(ctx, "acquire", self.pool.acquire()).await?;
        run(ctx, "put_subject_auth", put_subject_auth_in(&mut conn, record, OnConflict::Update)).await
    }

    #[instrument(skip(self, ctx, subject), err)]
    async fn list_subject_auth_by_subject(
        &self,
        ctx: &CallContext,
        subject: &Subject,
    ) -> Result<Vec<SubjectAuthRecord>, StorageError> {
        let rows = run(
            ctx,
            "list_subject_auth_by_subject",
            sqlx::query(
                r#"
                SELECT id, date_added, date_modified, subject, auth_id
                FROM subject_auth
                WHERE subject = $1
                ORDER BY date_added ASC, id
                "#,
            )
            .bind(subject.as_str())
            .fetch_all(&*self.pool),
        )
        .await?;

        links_from_rows("list_subject_auth_by_subject", &rows)
    }

    #[instrument(skip(self, ctx), fields(auth_id = %auth_id), err)]
    async fn list_subject_auth_by_auth_id(
        &self,
        ctx: &CallContext,
        auth_id: AuthId,
    ) -> Result<Vec<SubjectAuthRecord>, StorageError> {
        let rows = run(
            ctx,
            "list_subject_auth_by_auth_id",
            sqlx::query(
                r#"
                SELECT id, date_added, date_modified, subject, auth_id
                FROM subject_auth
                WHERE auth_id = $1
                "#,
            )
            .bind(auth_id.as_uuid())
            .fetch_all(&*self.pool),
        )
        .await?;

        links_from_rows("list_subject_auth_by_auth_id", &rows)
    }

    #[instrument(skip(self, ctx), fields(link_id = %id), err)]
    async fn delete_subject_auth(&self, ctx: &CallContext, id: LinkId) -> Result<(), StorageError> {
        run(
            ctx,
            "delete_subject_auth",
            sqlx::query("DELETE FROM subject_auth WHERE id = $1")
                .bind(id.as_uuid())
                .execute(&*self.pool),
        )
        .await?;
        Ok(())
    }
}
