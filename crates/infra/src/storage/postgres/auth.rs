use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};
use tracing::instrument;
use uuid::Uuid;

use authcore_core::{AuthId, CallContext};

use super::{OnConflict, PostgresAuthStore, decode_error, map_sqlx_error, run};
use crate::storage::{AuthRecord, AuthStore, Metadata, StorageError};

const AUTH_COLUMNS: &str = r#"
    id, status, date_added, date_modified, material_type, material_hash,
    token_format, token_use, expires_at, revoked_at
"#;

const AUTH_UPSERT: &str = r#"
    ON CONFLICT (id) DO UPDATE
    SET
        status = EXCLUDED.status,
        date_modified = EXCLUDED.date_modified,
        material_type = EXCLUDED.material_type,
        material_hash = EXCLUDED.material_hash,
        token_format = EXCLUDED.token_format,
        token_use = EXCLUDED.token_use,
        expires_at = EXCLUDED.expires_at,
        revoked_at = EXCLUDED.revoked_at
"#;

/// Write the record and replace its metadata. Runs on a caller-owned
/// connection so it can join an outer transaction.
pub(super) async fn put_auth_in(
    conn: &mut PgConnection,
    record: &AuthRecord,
    on_conflict: OnConflict,
) -> Result<(), sqlx::Error> {
    let date_modified = record.date_modified.unwrap_or_else(Utc::now);

    let query = format!(
        "INSERT INTO auth ({AUTH_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) {}",
        match on_conflict {
            OnConflict::Update => AUTH_UPSERT,
            OnConflict::Fail => "",
        }
    );
    sqlx::query(&query)
        .bind(record.id.as_uuid())
        .bind(record.status.as_str())
        .bind(record.date_added)
        .bind(date_modified)
        .bind(record.material_type.as_str())
        .bind(&record.material_hash)
        .bind(record.token_format.map(|f| f.as_str()))
        .bind(record.token_use.map(|u| u.as_str()))
        .bind(record.expires_at)
        .bind(record.revoked_at)
        .execute(&mut *conn)
        .await?;

    sqlx::query("DELETE FROM auth_metadata WHERE auth_id = $1")
        .bind(record.id.as_uuid())
        .execute(&mut *conn)
        .await?;

    for (key, value) in &record.metadata {
        sqlx::query(
            r#"
            INSERT INTO auth_metadata (auth_id, date_added, key, value)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(date_modified)
        .bind(key)
        .bind(value)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

fn auth_from_row(row: &PgRow) -> Result<AuthRecord, StorageError> {
    let op = "decode_auth";
    let get = |e: sqlx::Error| map_sqlx_error(op, e);

    let id: Uuid = row.try_get("id").map_err(get)?;
    let status: String = row.try_get("status").map_err(get)?;
    let material_type: String = row.try_get("material_type").map_err(get)?;
    let token_format: Option<String> = row.try_get("token_format").map_err(get)?;
    let token_use: Option<String> = row.try_get("token_use").map_err(get)?;

    Ok(AuthRecord {
        id: AuthId::from_uuid(id),
        status: status.parse().map_err(|e| decode_error(op, "status", e))?,
        date_added: row.try_get("date_added").map_err(get)?,
        date_modified: row.try_get::<Option<DateTime<Utc>>, _>("date_modified").map_err(get)?,
        material_type: material_type
            .parse()
            .map_err(|e| decode_error(op, "material_type", e))?,
        material_hash: row.try_get("material_hash").map_err(get)?,
        token_format: token_format
            .map(|f| f.parse())
            .transpose()
            .map_err(|e| decode_error(op, "token_format", e))?,
        token_use: token_use
            .map(|u| u.parse())
            .transpose()
            .map_err(|e| decode_error(op, "token_use", e))?,
        expires_at: row.try_get("expires_at").map_err(get)?,
        revoked_at: row.try_get("revoked_at").map_err(get)?,
        metadata: Metadata::new(),
    })
}

impl PostgresAuthStore {
    async fn load_metadata(
        &self,
        ctx: &CallContext,
        ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Metadata>, StorageError> {
        let rows = run(
            ctx,
            "get_auth_metadata",
            sqlx::query("SELECT auth_id, key, value FROM auth_metadata WHERE auth_id = ANY($1)")
                .bind(ids)
                .fetch_all(&*self.pool),
        )
        .await?;

        let mut out: HashMap<Uuid, Metadata> = HashMap::new();
        for row in rows {
            let auth_id: Uuid = row.try_get("auth_id").map_err(|e| map_sqlx_error("get_auth_metadata", e))?;
            let key: String = row.try_get("key").map_err(|e| map_sqlx_error("get_auth_metadata", e))?;
            let value: String = row.try_get("value").map_err(|e| map_sqlx_error("get_auth_metadata", e))?;
            out.entry(auth_id).or_default().insert(key, value);
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl AuthStore for PostgresAuthStore {
    #[instrument(skip(self, ctx, record), fields(auth_id = %record.id), err)]
    async fn put_auth(&self, ctx: &CallContext, record: &AuthRecord) -> Result<(), StorageError> {
        let mut tx = run(ctx, "begin_transaction", self.pool.begin()).await?;
        run(ctx, "put_auth", put_auth_in(&mut tx, record, OnConflict::Update)).await?;
        run(ctx, "commit_transaction", tx.commit()).await
    }

    #[instrument(skip(self, ctx), fields(auth_id = %id), err)]
    async fn get_auth(&self, ctx: &CallContext, id: AuthId) -> Result<AuthRecord, StorageError> {
        let query = format!("SELECT {AUTH_COLUMNS} FROM auth WHERE id = $1");
        let row = run(
            ctx,
            "get_auth",
            sqlx::query(&query).bind(id.as_uuid()).fetch_optional(&*self.pool),
        )
        .await?
        .ok_or_else(|| StorageError::NotFound(format!("auth {id}")))?;

        let mut record = auth_from_row(&row)?;
        let mut metadata = self.load_metadata(ctx, &[*id.as_uuid()]).await?;
        record.metadata = metadata.remove(id.as_uuid()).unwrap_or_default();
        Ok(record)
    }

    #[instrument(skip(self, ctx, ids), fields(count = ids.len()), err)]
    async fn get_auths(&self, ctx: &CallContext, ids: &[AuthId]) -> Result<Vec<AuthRecord>, StorageError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let query = format!("SELECT {AUTH_COLUMNS} FROM auth WHERE id = ANY($1) ORDER BY date_added DESC, id");
        let rows = run(
            ctx,
            "get_auths",
            sqlx::query(&query).bind(&uuids).fetch_all(&*self.pool),
        )
        .await?;

        let mut records = rows
            .iter()
            .map(auth_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let mut metadata = self.load_metadata(ctx, &uuids).await?;
        for record in &mut records {
            record.metadata = metadata.remove(record.id.as_uuid()).unwrap_or_default();
        }
        Ok(records)
    }

    #[instrument(skip(self, ctx), fields(auth_id = %id), err)]
    async fn delete_auth(&self, ctx: &CallContext, id: AuthId) -> Result<(), StorageError> {
        run(
            ctx,
            "delete_auth",
            sqlx::query("DELETE FROM auth WHERE id = $1")
                .bind(id.as_uuid())
                .execute(&*self.pool),
        )
        .await?;
        Ok(())
    }
}
