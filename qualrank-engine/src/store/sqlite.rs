//! SQLite implementation of the store traits

use super::{ActivityLog, LimitStore, MutationStore, QualifierStore, TierLifecycle};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qualrank_common::db::{
    ActivityEntry, ClassId, CompetitionClass, MutationId, MutationKind, MutationRecord,
    NewMutation, NewQualifier, ParticipationStatus, Qualifier, QualifierId, Tier, TierId,
    TierLevel,
};
use qualrank_common::time::{from_millis, to_millis};
use qualrank_common::{Error, Result};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::str::FromStr;

macro_rules! select_qualifiers {
    ($tail:literal) => {
        concat!(
            "SELECT id, tier_id, class_id, subject_id, home_org_id, seed_value, tiebreak_key, \
             champion_label, order_index, admission_rank, participation, \
             confirmation_requested_at, audit_log FROM qualifiers ",
            $tail
        )
    };
}

macro_rules! select_mutations {
    ($tail:literal) => {
        concat!(
            "SELECT id, kind, tier_id, class_id, qualifier_id, old_limit, new_limit, payload, \
             actor, created_at, processed_at, is_processed, outcome, last_error FROM mutations ",
            $tail
        )
    };
}

fn qualifier_from_row(row: &SqliteRow) -> Result<Qualifier> {
    let seed_text: String = row.try_get("seed_value")?;
    let seed_value = Decimal::from_str(&seed_text)
        .map_err(|e| Error::Internal(format!("Bad seed_value {:?}: {}", seed_text, e)))?;

    let status_text: String = row.try_get("participation")?;
    let participation = ParticipationStatus::parse(&status_text)
        .ok_or_else(|| Error::Internal(format!("Bad participation {:?}", status_text)))?;

    let requested: Option<i64> = row.try_get("confirmation_requested_at")?;

    Ok(Qualifier {
        id: QualifierId(row.try_get("id")?),
        tier_id: TierId(row.try_get("tier_id")?),
        class_id: ClassId(row.try_get("class_id")?),
        subject_id: row.try_get("subject_id")?,
        home_org_id: row.try_get("home_org_id")?,
        seed_value,
        tiebreak_key: row.try_get("tiebreak_key")?,
        champion_label: row.try_get("champion_label")?,
        order_index: row.try_get("order_index")?,
        admission_rank: row.try_get("admission_rank")?,
        participation,
        confirmation_requested_at: requested.map(from_millis),
        audit_log: row.try_get("audit_log")?,
    })
}

fn mutation_from_row(row: &SqliteRow) -> Result<MutationRecord> {
    let kind_text: String = row.try_get("kind")?;
    let kind = MutationKind::parse(&kind_text)
        .ok_or_else(|| Error::Internal(format!("Bad mutation kind {:?}", kind_text)))?;

    let class_id: Option<i64> = row.try_get("class_id")?;
    let qualifier_id: Option<i64> = row.try_get("qualifier_id")?;
    let processed_at: Option<i64> = row.try_get("processed_at")?;

    Ok(MutationRecord {
        id: MutationId(row.try_get("id")?),
        kind,
        tier_id: TierId(row.try_get("tier_id")?),
        class_id: class_id.map(ClassId),
        qualifier_id: qualifier_id.map(QualifierId),
        old_limit: row.try_get("old_limit")?,
        new_limit: row.try_get("new_limit")?,
        payload: row.try_get("payload")?,
        actor: row.try_get("actor")?,
        created_at: from_millis(row.try_get("created_at")?),
        processed_at: processed_at.map(from_millis),
        is_processed: row.try_get("is_processed")?,
        outcome: row.try_get("outcome")?,
        last_error: row.try_get("last_error")?,
    })
}

fn tier_from_row(row: &SqliteRow) -> Result<Tier> {
    let level_text: String = row.try_get("level")?;
    let level = TierLevel::parse(&level_text)
        .ok_or_else(|| Error::Internal(format!("Bad tier level {:?}", level_text)))?;
    let parent_id: Option<i64> = row.try_get("parent_id")?;

    Ok(Tier {
        id: TierId(row.try_get("id")?),
        name: row.try_get("name")?,
        level,
        parent_id: parent_id.map(TierId),
        is_closed: row.try_get("is_closed")?,
    })
}

#[async_trait]
impl QualifierStore for SqliteConnection {
    async fn load_class(&mut self, tier: TierId, class: ClassId) -> Result<Vec<Qualifier>> {
        let rows = sqlx::query(select_qualifiers!(
            "WHERE tier_id = ? AND class_id = ? ORDER BY order_index, id"
        ))
        .bind(tier.0)
        .bind(class.0)
        .fetch_all(&mut *self)
        .await?;

        rows.iter().map(qualifier_from_row).collect()
    }

    async fn fetch_qualifier(&mut self, id: QualifierId) -> Result<Option<Qualifier>> {
        let row = sqlx::query(select_qualifiers!("WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&mut *self)
            .await?;

        row.as_ref().map(qualifier_from_row).transpose()
    }

    async fn insert_qualifier(&mut self, row: &NewQualifier) -> Result<QualifierId> {
        let result = sqlx::query(
            r#"
            INSERT INTO qualifiers
                (tier_id, class_id, subject_id, home_org_id, seed_value, tiebreak_key,
                 champion_label, order_index, admission_rank, participation, audit_log)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'UNKNOWN', ?)
            "#,
        )
        .bind(row.tier_id.0)
        .bind(row.class_id.0)
        .bind(&row.subject_id)
        .bind(row.home_org_id)
        .bind(row.seed_value.to_string())
        .bind(&row.tiebreak_key)
        .bind(&row.champion_label)
        .bind(row.order_index)
        .bind(row.order_index)
        .bind(&row.audit_log)
        .execute(&mut *self)
        .await?;

        Ok(QualifierId(result.last_insert_rowid()))
    }

    async fn insert_qualifiers(&mut self, rows: &[NewQualifier]) -> Result<()> {
        for row in rows {
            self.insert_qualifier(row).await?;
        }
        Ok(())
    }

    async fn set_qualifier_class(&mut self, id: QualifierId, class: ClassId) -> Result<()> {
        let result = sqlx::query("UPDATE qualifiers SET class_id = ? WHERE id = ?")
            .bind(class.0)
            .bind(id.0)
            .execute(&mut *self)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("qualifier {}", id)));
        }
        Ok(())
    }

    async fn save_qualifier(&mut self, row: &Qualifier) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE qualifiers
            SET order_index = ?, admission_rank = ?, participation = ?,
                confirmation_requested_at = ?, audit_log = ?
            WHERE id = ?
            "#,
        )
        .bind(row.order_index)
        .bind(row.admission_rank)
        .bind(row.participation.as_str())
        .bind(row.confirmation_requested_at.map(to_millis))
        .bind(&row.audit_log)
        .bind(row.id.0)
        .execute(&mut *self)
        .await?;

        Ok(())
    }

    async fn admitted_rows(
        &mut self,
        tier: TierId,
        class: ClassId,
        limit: i64,
    ) -> Result<Vec<Qualifier>> {
        let rows = sqlx::query(select_qualifiers!(
            "WHERE tier_id = ? AND class_id = ? AND participation != 'WITHDRAWN' \
             AND admission_rank BETWEEN 1 AND ? ORDER BY admission_rank"
        ))
        .bind(tier.0)
        .bind(class.0)
        .bind(limit)
        .fetch_all(&mut *self)
        .await?;

        rows.iter().map(qualifier_from_row).collect()
    }
}

#[async_trait]
impl MutationStore for SqliteConnection {
    async fn append_mutation(
        &mut self,
        mutation: &NewMutation,
        created_at: DateTime<Utc>,
    ) -> Result<MutationId> {
        let result = sqlx::query(
            r#"
            INSERT INTO mutations
                (kind, tier_id, class_id, qualifier_id, old_limit, new_limit, payload, actor, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(mutation.kind.as_str())
        .bind(mutation.tier_id.0)
        .bind(mutation.class_id.map(|c| c.0))
        .bind(mutation.qualifier_id.map(|q| q.0))
        .bind(mutation.old_limit)
        .bind(mutation.new_limit)
        .bind(&mutation.payload)
        .bind(&mutation.actor)
        .bind(to_millis(created_at))
        .execute(&mut *self)
        .await?;

        Ok(MutationId(result.last_insert_rowid()))
    }

    async fn pending_after(
        &mut self,
        after: MutationId,
        limit: Option<usize>,
    ) -> Result<Vec<MutationId>> {
        // LIMIT -1 means no limit in SQLite
        let limit = limit.map(|n| i64::try_from(n).unwrap_or(i64::MAX)).unwrap_or(-1);

        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM mutations
            WHERE is_processed = 0 AND id > ?
            ORDER BY created_at, id
            LIMIT ?
            "#,
        )
        .bind(after.0)
        .bind(limit)
        .fetch_all(&mut *self)
        .await?;

        Ok(ids.into_iter().map(MutationId).collect())
    }

    async fn fetch_mutation(&mut self, id: MutationId) -> Result<Option<MutationRecord>> {
        let row = sqlx::query(select_mutations!("WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&mut *self)
            .await?;

        row.as_ref().map(mutation_from_row).transpose()
    }

    async fn mark_processed(
        &mut self,
        id: MutationId,
        outcome: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE mutations
            SET is_processed = 1, processed_at = ?, outcome = ?, last_error = NULL
            WHERE id = ? AND is_processed = 0
            "#,
        )
        .bind(to_millis(at))
        .bind(outcome)
        .bind(id.0)
        .execute(&mut *self)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_failure(&mut self, id: MutationId, reason: &str) -> Result<()> {
        sqlx::query("UPDATE mutations SET last_error = ? WHERE id = ? AND is_processed = 0")
            .bind(reason)
            .bind(id.0)
            .execute(&mut *self)
            .await?;
        Ok(())
    }

    async fn pending_count(&mut self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mutations WHERE is_processed = 0")
            .fetch_one(&mut *self)
            .await?;
        Ok(count)
    }

    async fn last_mutation_id(&mut self) -> Result<MutationId> {
        let id: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(id), 0) FROM mutations")
            .fetch_one(&mut *self)
            .await?;
        Ok(MutationId(id))
    }

    async fn high_water_mark(&mut self) -> Result<MutationId> {
        let mark: Option<i64> =
            sqlx::query_scalar("SELECT high_water_mark FROM worker_state WHERE id = 1")
                .fetch_optional(&mut *self)
                .await?;
        Ok(MutationId(mark.unwrap_or(0)))
    }

    async fn advance_high_water_mark(&mut self, at: DateTime<Utc>) -> Result<MutationId> {
        let first_pending: Option<i64> =
            sqlx::query_scalar("SELECT MIN(id) FROM mutations WHERE is_processed = 0")
                .fetch_one(&mut *self)
                .await?;

        let candidate = match first_pending {
            Some(id) => MutationId(id - 1),
            None => self.last_mutation_id().await?,
        };
        let mark = candidate.max(self.high_water_mark().await?);

        sqlx::query(
            r#"
            INSERT INTO worker_state (id, high_water_mark, last_pass_at) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                high_water_mark = excluded.high_water_mark,
                last_pass_at = excluded.last_pass_at
            "#,
        )
        .bind(mark.0)
        .bind(to_millis(at))
        .execute(&mut *self)
        .await?;

        Ok(mark)
    }
}

#[async_trait]
impl LimitStore for SqliteConnection {
    async fn get_limit(&mut self, tier: TierId, class: ClassId) -> Result<i64> {
        if let Some(limit) = self.stored_limit(tier, class).await? {
            return Ok(limit);
        }
        let class_def = self
            .fetch_class(class)
            .await?
            .ok_or_else(|| Error::NotFound(format!("class {}", class)))?;
        Ok(class_def.default_limit())
    }

    async fn stored_limit(&mut self, tier: TierId, class: ClassId) -> Result<Option<i64>> {
        let limit: Option<i64> = sqlx::query_scalar(
            "SELECT limit_value FROM class_limits WHERE tier_id = ? AND class_id = ?",
        )
        .bind(tier.0)
        .bind(class.0)
        .fetch_optional(&mut *self)
        .await?;
        Ok(limit)
    }

    async fn set_limit(&mut self, tier: TierId, class: ClassId, limit: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO class_limits (tier_id, class_id, limit_value) VALUES (?, ?, ?)
            ON CONFLICT(tier_id, class_id) DO UPDATE SET limit_value = excluded.limit_value
            "#,
        )
        .bind(tier.0)
        .bind(class.0)
        .bind(limit)
        .execute(&mut *self)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TierLifecycle for SqliteConnection {
    async fn fetch_tier(&mut self, id: TierId) -> Result<Option<Tier>> {
        let row = sqlx::query("SELECT id, name, level, parent_id, is_closed FROM tiers WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&mut *self)
            .await?;
        row.as_ref().map(tier_from_row).transpose()
    }

    async fn create_tier(
        &mut self,
        name: &str,
        level: TierLevel,
        parent: Option<TierId>,
    ) -> Result<TierId> {
        let result = sqlx::query("INSERT INTO tiers (name, level, parent_id) VALUES (?, ?, ?)")
            .bind(name)
            .bind(level.as_str())
            .bind(parent.map(|p| p.0))
            .execute(&mut *self)
            .await?;
        Ok(TierId(result.last_insert_rowid()))
    }

    async fn set_tier_closed(&mut self, id: TierId, closed: bool) -> Result<()> {
        let result = sqlx::query("UPDATE tiers SET is_closed = ? WHERE id = ?")
            .bind(closed)
            .bind(id.0)
            .execute(&mut *self)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("tier {}", id)));
        }
        Ok(())
    }

    async fn child_tiers(&mut self, parent: TierId) -> Result<Vec<Tier>> {
        let rows = sqlx::query(
            "SELECT id, name, level, parent_id, is_closed FROM tiers WHERE parent_id = ? ORDER BY id",
        )
        .bind(parent.0)
        .fetch_all(&mut *self)
        .await?;
        rows.iter().map(tier_from_row).collect()
    }

    async fn fetch_class(&mut self, id: ClassId) -> Result<Option<CompetitionClass>> {
        let row = sqlx::query("SELECT id, description, is_team FROM competition_classes WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&mut *self)
            .await?;

        match row {
            Some(row) => Ok(Some(CompetitionClass {
                id: ClassId(row.try_get("id")?),
                description: row.try_get("description")?,
                is_team: row.try_get("is_team")?,
            })),
            None => Ok(None),
        }
    }

    async fn create_class(&mut self, description: &str, is_team: bool) -> Result<ClassId> {
        let result =
            sqlx::query("INSERT INTO competition_classes (description, is_team) VALUES (?, ?)")
                .bind(description)
                .bind(is_team)
                .execute(&mut *self)
                .await?;
        Ok(ClassId(result.last_insert_rowid()))
    }
}

#[async_trait]
impl ActivityLog for SqliteConnection {
    async fn log_activity(
        &mut self,
        tier: TierId,
        actor: &str,
        topic: &str,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO activity_log (tier_id, created_at, actor, topic, message) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(tier.0)
        .bind(to_millis(at))
        .bind(actor)
        .bind(topic)
        .bind(message)
        .execute(&mut *self)
        .await?;
        Ok(())
    }

    async fn activity_for_tier(&mut self, tier: TierId) -> Result<Vec<ActivityEntry>> {
        let rows = sqlx::query(
            "SELECT id, created_at, actor, topic, message FROM activity_log WHERE tier_id = ? ORDER BY id",
        )
        .bind(tier.0)
        .fetch_all(&mut *self)
        .await?;

        rows.iter()
            .map(|row| -> Result<ActivityEntry> {
                Ok(ActivityEntry {
                    id: row.try_get("id")?,
                    created_at: from_millis(row.try_get("created_at")?),
                    actor: row.try_get("actor")?,
                    topic: row.try_get("topic")?,
                    message: row.try_get("message")?,
                })
            })
            .collect()
    }
}
