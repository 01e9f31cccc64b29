//! Flag record persistence (append-only)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{FlagRecord, NewFlagRecord, TargetKind, TargetRef};

/// Violation records. There is deliberately no update or delete.
#[async_trait]
pub trait FlagRecordStore: Send + Sync {
    async fn append(&self, record: NewFlagRecord) -> Result<FlagRecord>;

    /// All records for one target, newest first.
    async fn list_for_target(&self, target: TargetRef) -> Result<Vec<FlagRecord>>;

    /// Review queue across all targets, newest first.
    async fn list_recent(&self, limit: i64, offset: i64) -> Result<Vec<FlagRecord>>;
}

#[derive(Debug, sqlx::FromRow)]
struct FlagRow {
    id: Uuid,
    target_type: i16,
    target_id: Uuid,
    flag_type: String,
    flag_field: String,
    flag_reason: String,
    created_by: Uuid,
    created_at: DateTime<Utc>,
}

impl TryFrom<FlagRow> for FlagRecord {
    type Error = crate::error::AppError;

    fn try_from(row: FlagRow) -> Result<Self> {
        Ok(FlagRecord {
            id: row.id,
            target: TargetRef::new(TargetKind::try_from(row.target_type)?, row.target_id),
            flag_type: row.flag_type,
            flag_field: row.flag_field,
            flag_reason: row.flag_reason,
            created_by: row.created_by,
            created_at: row.created_at,
        })
    }
}

#[derive(Clone)]
pub struct PgFlagRecordStore {
    pool: PgPool,
}

impl PgFlagRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FlagRecordStore for PgFlagRecordStore {
    async fn append(&self, record: NewFlagRecord) -> Result<FlagRecord> {
        let row = sqlx::query_as::<_, FlagRow>(
            r#"
            INSERT INTO flag_records (
                id,
                target_type,
                target_id,
                flag_type,
                flag_field,
                flag_reason,
                created_by,
                created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            RETURNING id, target_type, target_id, flag_type, flag_field,
                      flag_reason, created_by, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.target.kind.discriminator())
        .bind(record.target.id)
        .bind(&record.flag_type)
        .bind(&record.flag_field)
        .bind(&record.flag_reason)
        .bind(record.created_by)
        .fetch_one(&self.pool)
        .await?;

        let saved = FlagRecord::try_from(row)?;

        tracing::info!(
            flag_id = %saved.id,
            target = %saved.target,
            flag_type = %saved.flag_type,
            "Flag record saved"
        );

        Ok(saved)
    }

    async fn list_for_target(&self, target: TargetRef) -> Result<Vec<FlagRecord>> {
        let rows = sqlx::query_as::<_, FlagRow>(
            r#"
            SELECT id, target_type, target_id, flag_type, flag_field,
                   flag_reason, created_by, created_at
            FROM flag_records
            WHERE target_type = $1 AND target_id = $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(target.kind.discriminator())
        .bind(target.id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FlagRecord::try_from).collect()
    }

    async fn list_recent(&self, limit: i64, offset: i64) -> Result<Vec<FlagRecord>> {
        let rows = sqlx::query_as::<_, FlagRow>(
            r#"
            SELECT id, target_type, target_id, flag_type, flag_field,
                   flag_reason, created_by, created_at
            FROM flag_records
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FlagRecord::try_from).collect()
    }
}
