use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Reaction, ReactionKind, ReactionTally, TargetKind, TargetRef};

/// Reaction persistence. Writes go through a [`ReactionTx`] so the reaction
/// mutation and the score recompute commit together.
#[async_trait]
pub trait ReactionStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn ReactionTx>>;

    /// Committed counts for `target`.
    async fn tally(&self, target: TargetRef) -> Result<ReactionTally>;

    async fn find_reaction(&self, target: TargetRef, actor_id: Uuid) -> Result<Option<Reaction>>;
}

/// Unit of work over reactions and the target's score column.
///
/// Dropping a transaction without calling [`commit`](ReactionTx::commit)
/// discards every write made through it.
#[async_trait]
pub trait ReactionTx: Send {
    /// Lock the target row for the rest of the transaction. Returns false if
    /// the target does not exist.
    async fn lock_target(&mut self, target: TargetRef) -> Result<bool>;

    async fn find(&mut self, target: TargetRef, actor_id: Uuid) -> Result<Option<Reaction>>;

    async fn insert(
        &mut self,
        target: TargetRef,
        actor_id: Uuid,
        kind: ReactionKind,
    ) -> Result<Reaction>;

    async fn update_kind(&mut self, reaction_id: Uuid, kind: ReactionKind) -> Result<()>;

    async fn delete(&mut self, reaction_id: Uuid) -> Result<()>;

    /// Counts as seen by this transaction, including its own writes.
    async fn tally(&mut self, target: TargetRef) -> Result<ReactionTally>;

    /// Persist `score` on the target row and bump its `updated_at`.
    async fn write_score(&mut self, target: TargetRef, score: i64) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

#[derive(Debug, sqlx::FromRow)]
struct ReactionRow {
    id: Uuid,
    target_type: i16,
    target_id: Uuid,
    reaction_type: i16,
    user_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ReactionRow> for Reaction {
    type Error = crate::error::AppError;

    fn try_from(row: ReactionRow) -> Result<Self> {
        Ok(Reaction {
            id: row.id,
            target: TargetRef::new(TargetKind::try_from(row.target_type)?, row.target_id),
            kind: ReactionKind::try_from(row.reaction_type)?,
            actor_id: row.user_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const FIND_REACTION_SQL: &str = r#"
    SELECT id, target_type, target_id, reaction_type, user_id, created_at, updated_at
    FROM reactions
    WHERE target_type = $1 AND target_id = $2 AND user_id = $3
    ORDER BY updated_at DESC
    LIMIT 1
"#;

const TALLY_SQL: &str = r#"
    SELECT
        COUNT(*) FILTER (WHERE reaction_type = 1)::BIGINT AS likes,
        COUNT(*) FILTER (WHERE reaction_type = 0)::BIGINT AS dislikes
    FROM reactions
    WHERE target_type = $1 AND target_id = $2
"#;

fn tally_from_row(row: &sqlx::postgres::PgRow) -> Result<ReactionTally> {
    Ok(ReactionTally {
        likes: row.try_get("likes")?,
        dislikes: row.try_get("dislikes")?,
    })
}

#[derive(Clone)]
pub struct PgReactionStore {
    pool: PgPool,
}

impl PgReactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReactionStore for PgReactionStore {
    async fn begin(&self) -> Result<Box<dyn ReactionTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgReactionTx { tx }))
    }

    async fn tally(&self, target: TargetRef) -> Result<ReactionTally> {
        let row = sqlx::query(TALLY_SQL)
            .bind(target.kind.discriminator())
            .bind(target.id)
            .fetch_one(&self.pool)
            .await?;

        tally_from_row(&row)
    }

    async fn find_reaction(&self, target: TargetRef, actor_id: Uuid) -> Result<Option<Reaction>> {
        let row = sqlx::query_as::<_, ReactionRow>(FIND_REACTION_SQL)
            .bind(target.kind.discriminator())
            .bind(target.id)
            .bind(actor_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Reaction::try_from).transpose()
    }
}

/// Runs at READ COMMITTED. `lock_target` takes `FOR UPDATE` on the target row
/// first, so toggles on one target by different actors queue on that row and
/// every recompute counts all committed reactions.
pub struct PgReactionTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ReactionTx for PgReactionTx {
    async fn lock_target(&mut self, target: TargetRef) -> Result<bool> {
        let sql = format!(
            "SELECT id FROM {} WHERE id = $1 FOR UPDATE",
            target.kind.table()
        );
        let locked: Option<Uuid> = sqlx::query_scalar(&sql)
            .bind(target.id)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(locked.is_some())
    }

    async fn find(&mut self, target: TargetRef, actor_id: Uuid) -> Result<Option<Reaction>> {
        let row = sqlx::query_as::<_, ReactionRow>(FIND_REACTION_SQL)
            .bind(target.kind.discriminator())
            .bind(target.id)
            .bind(actor_id)
            .fetch_optional(&mut *self.tx)
            .await?;

        row.map(Reaction::try_from).transpose()
    }

    async fn insert(
        &mut self,
        target: TargetRef,
        actor_id: Uuid,
        kind: ReactionKind,
    ) -> Result<Reaction> {
        let row = sqlx::query_as::<_, ReactionRow>(
            r#"
            INSERT INTO reactions (id, target_type, target_id, reaction_type, user_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            RETURNING id, target_type, target_id, reaction_type, user_id, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(target.kind.discriminator())
        .bind(target.id)
        .bind(kind.as_i16())
        .bind(actor_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Reaction::try_from(row)
    }

    async fn update_kind(&mut self, reaction_id: Uuid, kind: ReactionKind) -> Result<()> {
        sqlx::query("UPDATE reactions SET reaction_type = $2, updated_at = NOW() WHERE id = $1")
            .bind(reaction_id)
            .bind(kind.as_i16())
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn delete(&mut self, reaction_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM reactions WHERE id = $1")
            .bind(reaction_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn tally(&mut self, target: TargetRef) -> Result<ReactionTally> {
        let row = sqlx::query(TALLY_SQL)
            .bind(target.kind.discriminator())
            .bind(target.id)
            .fetch_one(&mut *self.tx)
            .await?;

        tally_from_row(&row)
    }

    async fn write_score(&mut self, target: TargetRef, score: i64) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET score = $2, updated_at = NOW() WHERE id = $1",
            target.kind.table()
        );
        sqlx::query(&sql)
            .bind(target.id)
            .bind(score)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
