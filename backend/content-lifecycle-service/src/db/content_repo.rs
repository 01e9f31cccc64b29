use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{ModeratedContent, ModerationStatus, TargetKind, TargetRef, Viewer};

/// Moderation state of content rows.
///
/// Implementations never change `status` away from a terminal value: the
/// conditional writes below only touch rows that are still Pending.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn find(&self, target: TargetRef) -> Result<Option<ModeratedContent>>;

    /// Put never-moderated content into Pending. Returns false when the row is
    /// missing or already carries a moderation decision.
    async fn mark_pending(&self, target: TargetRef) -> Result<bool>;

    /// Set or clear the flag bit. Returns false unless the row is Pending.
    async fn set_flagged(&self, target: TargetRef, flagged: bool) -> Result<bool>;

    /// Pending -> `status`, recording who decided and when. Returns false if
    /// the row was no longer Pending (or is gone).
    async fn resolve(
        &self,
        target: TargetRef,
        status: ModerationStatus,
        moderated_by: Uuid,
        moderated_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Pending -> Rejected when the row is flagged, Approved otherwise, with
    /// the flag read by the same conditional write. Returns the applied
    /// status, or `None` if the row was no longer Pending (or is gone).
    async fn resolve_by_flag(
        &self,
        target: TargetRef,
        moderated_by: Uuid,
        moderated_at: DateTime<Utc>,
    ) -> Result<Option<ModerationStatus>>;

    /// Pending content created strictly before `cutoff`, oldest first, across
    /// every target kind, at most `limit` rows.
    async fn list_pending_created_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ModeratedContent>>;

    /// Newest-first listing of one kind filtered by [`Viewer::can_see`].
    async fn list_visible(
        &self,
        kind: TargetKind,
        viewer: Viewer,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ModeratedContent>>;
}

#[derive(Debug, sqlx::FromRow)]
struct ContentRow {
    id: Uuid,
    user_id: Uuid,
    text: String,
    status: i16,
    is_flagged: bool,
    moderated_at: Option<DateTime<Utc>>,
    moderated_by: Option<Uuid>,
    score: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ContentRow {
    fn into_content(self, kind: TargetKind) -> Result<ModeratedContent> {
        Ok(ModeratedContent {
            target: TargetRef::new(kind, self.id),
            owner_id: self.user_id,
            text: self.text,
            status: ModerationStatus::try_from(self.status)?,
            is_flagged: self.is_flagged,
            moderated_at: self.moderated_at,
            moderated_by: self.moderated_by,
            score: self.score,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PendingRow {
    kind: i16,
    #[sqlx(flatten)]
    content: ContentRow,
}

fn select_columns(kind: TargetKind) -> String {
    format!(
        "SELECT id, user_id, {} AS text, status, is_flagged, moderated_at, moderated_by, \
         score, created_at, updated_at FROM {}",
        kind.text_field(),
        kind.table()
    )
}

/// PostgreSQL-backed content store over `posts`, `comments`,
/// `comment_replies` and `reels`.
#[derive(Clone)]
pub struct PgContentStore {
    pool: PgPool,
}

impl PgContentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContentStore for PgContentStore {
    async fn find(&self, target: TargetRef) -> Result<Option<ModeratedContent>> {
        let sql = format!("{} WHERE id = $1", select_columns(target.kind));
        let row = sqlx::query_as::<_, ContentRow>(&sql)
            .bind(target.id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_content(target.kind)).transpose()
    }

    async fn mark_pending(&self, target: TargetRef) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET status = $2, updated_at = NOW() \
             WHERE id = $1 AND moderated_at IS NULL",
            target.kind.table()
        );
        let result = sqlx::query(&sql)
            .bind(target.id)
            .bind(ModerationStatus::Pending.as_i16())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_flagged(&self, target: TargetRef, flagged: bool) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET is_flagged = $2, updated_at = NOW() WHERE id = $1 AND status = $3",
            target.kind.table()
        );
        let result = sqlx::query(&sql)
            .bind(target.id)
            .bind(flagged)
            .bind(ModerationStatus::Pending.as_i16())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn resolve(
        &self,
        target: TargetRef,
        status: ModerationStatus,
        moderated_by: Uuid,
        moderated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let sql = format!(
            r#"
            UPDATE {}
            SET status = $2,
                moderated_at = $3,
                moderated_by = $4,
                updated_at = $3
            WHERE id = $1 AND status = $5
            "#,
            target.kind.table()
        );
        let result = sqlx::query(&sql)
            .bind(target.id)
            .bind(status.as_i16())
            .bind(moderated_at)
            .bind(moderated_by)
            .bind(ModerationStatus::Pending.as_i16())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn resolve_by_flag(
        &self,
        target: TargetRef,
        moderated_by: Uuid,
        moderated_at: DateTime<Utc>,
    ) -> Result<Option<ModerationStatus>> {
        let sql = format!(
            r#"
            UPDATE {}
            SET status = CASE WHEN is_flagged THEN $4 ELSE $5 END,
                moderated_at = $2,
                moderated_by = $3,
                updated_at = $2
            WHERE id = $1 AND status = $6
            RETURNING status
            "#,
            target.kind.table()
        );
        let status: Option<i16> = sqlx::query_scalar(&sql)
            .bind(target.id)
            .bind(moderated_at)
            .bind(moderated_by)
            .bind(ModerationStatus::for_flag(true).as_i16())
            .bind(ModerationStatus::for_flag(false).as_i16())
            .bind(ModerationStatus::Pending.as_i16())
            .fetch_optional(&self.pool)
            .await?;

        status.map(ModerationStatus::try_from).transpose()
    }

    async fn list_pending_created_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ModeratedContent>> {
        // Each branch is capped at `limit` on its partial index before the
        // global merge.
        let branches: Vec<String> = TargetKind::ALL
            .iter()
            .map(|kind| {
                format!(
                    "(SELECT id, user_id, {} AS text, status, is_flagged, moderated_at, \
                     moderated_by, score, created_at, updated_at, \
                     CAST({} AS SMALLINT) AS kind \
                     FROM {} WHERE status = $1 AND created_at < $2 \
                     ORDER BY created_at ASC LIMIT $3)",
                    kind.text_field(),
                    kind.discriminator(),
                    kind.table()
                )
            })
            .collect();
        let sql = format!(
            "{} ORDER BY created_at ASC LIMIT $3",
            branches.join(" UNION ALL ")
        );

        let rows = sqlx::query_as::<_, PendingRow>(&sql)
            .bind(ModerationStatus::Pending.as_i16())
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                let kind = TargetKind::try_from(row.kind)?;
                row.content.into_content(kind)
            })
            .collect()
    }

    async fn list_visible(
        &self,
        kind: TargetKind,
        viewer: Viewer,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ModeratedContent>> {
        let (privileged, viewer_id) = match viewer {
            Viewer::Privileged => (true, None),
            Viewer::User(id) => (false, Some(id)),
            Viewer::Anonymous => (false, None),
        };

        let sql = format!(
            "{} WHERE ($1 OR status = $2 OR user_id = $3) \
             ORDER BY created_at DESC LIMIT $4 OFFSET $5",
            select_columns(kind)
        );
        let rows = sqlx::query_as::<_, ContentRow>(&sql)
            .bind(privileged)
            .bind(ModerationStatus::Approved.as_i16())
            .bind(viewer_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(|r| r.into_content(kind)).collect()
    }
}
