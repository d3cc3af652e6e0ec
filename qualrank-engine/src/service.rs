//! Enqueue side of the engine
//!
//! Request-handling code only ever appends mutation records and reads
//! committed lists through this service. Nothing here touches ranking
//! fields; the worker applies every change.

use crate::eligibility::{build_eligible, RawCandidate};
use crate::store::{ActivityLog, LimitStore, MutationStore, QualifierStore, TierLifecycle};
use crate::team::TeamEntry;
use qualrank_common::db::{
    ActivityEntry, ClassId, CompetitionClass, EligibleEntry, MutationId, MutationKind,
    NewMutation, Placement, Qualifier, QualifierId, Tier, TierId, TierLevel,
};
use qualrank_common::{time, Error, Result};
use serde::Serialize;
use sqlx::SqliteConnection;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Committed list of one class, split the way readers present it
#[derive(Debug, Clone, Serialize)]
pub struct ClassView {
    pub tier: Tier,
    pub class: CompetitionClass,
    pub limit: i64,
    pub participants: Vec<Qualifier>,
    pub reserves: Vec<Qualifier>,
    pub not_participating: Vec<Qualifier>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub high_water_mark: MutationId,
    pub pending: i64,
}

#[derive(Clone)]
pub struct QualificationService {
    pool: SqlitePool,
    wake: Arc<Notify>,
}

impl QualificationService {
    pub fn new(pool: SqlitePool, wake: Arc<Notify>) -> Self {
        Self { pool, wake }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Wake the worker without enqueueing anything
    pub fn ping(&self) {
        self.wake.notify_one();
    }

    pub async fn create_tier(
        &self,
        name: &str,
        level: TierLevel,
        parent: Option<TierId>,
    ) -> Result<TierId> {
        let mut conn = self.pool.acquire().await?;
        if let Some(parent_id) = parent {
            let parent_tier = conn
                .fetch_tier(parent_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("tier {}", parent_id)))?;
            if parent_tier.level != TierLevel::National {
                return Err(Error::InvalidInput(format!(
                    "parent tier {} is not a national tier",
                    parent_id
                )));
            }
        }
        let id = conn.create_tier(name, level, parent).await?;
        info!("Created {} tier {} ({})", level.as_str(), id, name);
        Ok(id)
    }

    pub async fn create_class(&self, description: &str, is_team: bool) -> Result<ClassId> {
        let mut conn = self.pool.acquire().await?;
        conn.create_class(description, is_team).await
    }

    /// Stop accepting mutations for a tier; queued ones stay unprocessed
    pub async fn close_tier(&self, tier: TierId, actor: &str) -> Result<()> {
        self.set_closed(tier, true, actor).await
    }

    pub async fn reopen_tier(&self, tier: TierId, actor: &str) -> Result<()> {
        self.set_closed(tier, false, actor).await
    }

    async fn set_closed(&self, tier: TierId, closed: bool, actor: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        tx.set_tier_closed(tier, closed).await?;
        let message = if closed { "Tier closed" } else { "Tier reopened" };
        tx.log_activity(tier, actor, "lifecycle", message, time::now()).await?;
        tx.commit().await?;
        info!("{} by {}: tier {}", message, actor, tier);
        if !closed {
            // records deferred while closed are runnable again
            self.wake.notify_one();
        }
        Ok(())
    }

    pub async fn enqueue_seed(
        &self,
        tier: TierId,
        class: ClassId,
        eligible: &[EligibleEntry],
        actor: &str,
    ) -> Result<MutationId> {
        let mut conn = self.pool.acquire().await?;
        open_tier(&mut conn, tier).await?;
        known_class(&mut conn, class).await?;
        let mutation = NewMutation::seed(tier, class, eligible, actor)?;
        self.append(&mut conn, mutation).await
    }

    /// SEED from raw prior-round results (first tier)
    pub async fn enqueue_first_tier_seed(
        &self,
        tier: TierId,
        class: ClassId,
        candidates: Vec<RawCandidate>,
        min_scores: usize,
        actor: &str,
    ) -> Result<MutationId> {
        let eligible = build_eligible(candidates, min_scores);
        self.enqueue_seed(tier, class, &eligible, actor).await
    }

    /// SEED for a team class
    pub async fn enqueue_team_seed(
        &self,
        tier: TierId,
        class: ClassId,
        teams: Vec<TeamEntry>,
        actor: &str,
    ) -> Result<MutationId> {
        let eligible: Vec<EligibleEntry> = teams.into_iter().map(TeamEntry::into_eligible).collect();
        self.enqueue_seed(tier, class, &eligible, actor).await
    }

    pub async fn enqueue_cut_change(
        &self,
        tier: TierId,
        class: ClassId,
        new_limit: i64,
        actor: &str,
    ) -> Result<MutationId> {
        if new_limit < 1 {
            return Err(Error::InvalidInput(format!(
                "limit must be at least 1, got {}",
                new_limit
            )));
        }
        let mut conn = self.pool.acquire().await?;
        open_tier(&mut conn, tier).await?;
        known_class(&mut conn, class).await?;
        let old_limit = conn.get_limit(tier, class).await?;
        let mutation = NewMutation::cut_change(tier, class, old_limit, new_limit, actor);
        self.append(&mut conn, mutation).await
    }

    pub async fn enqueue_withdraw(&self, qualifier: QualifierId, actor: &str) -> Result<MutationId> {
        self.enqueue_for_qualifier(MutationKind::Withdraw, qualifier, actor).await
    }

    pub async fn enqueue_register(&self, qualifier: QualifierId, actor: &str) -> Result<MutationId> {
        self.enqueue_for_qualifier(MutationKind::Register, qualifier, actor).await
    }

    pub async fn enqueue_invite(&self, qualifier: QualifierId, actor: &str) -> Result<MutationId> {
        self.enqueue_for_qualifier(MutationKind::Invite, qualifier, actor).await
    }

    /// Hand the regional lists of a class over to a national tier
    pub async fn enqueue_cascade(
        &self,
        national: TierId,
        class: ClassId,
        actor: &str,
    ) -> Result<MutationId> {
        let mut conn = self.pool.acquire().await?;
        let tier = open_tier(&mut conn, national).await?;
        if tier.level != TierLevel::National {
            return Err(Error::InvalidInput(format!(
                "tier {} is not a national tier",
                national
            )));
        }
        known_class(&mut conn, class).await?;
        self.append(&mut conn, NewMutation::cascade(national, class, actor)).await
    }

    /// Late qualifier added to an already seeded class
    pub async fn enqueue_extra_entry(
        &self,
        tier: TierId,
        class: ClassId,
        entry: &EligibleEntry,
        actor: &str,
    ) -> Result<MutationId> {
        let mut conn = self.pool.acquire().await?;
        open_tier(&mut conn, tier).await?;
        known_class(&mut conn, class).await?;
        let mutation = NewMutation::extra_entry(tier, class, entry, actor)?;
        self.append(&mut conn, mutation).await
    }

    pub async fn enqueue_move_class(
        &self,
        qualifier: QualifierId,
        destination: ClassId,
        actor: &str,
    ) -> Result<MutationId> {
        let mut conn = self.pool.acquire().await?;
        let row = conn
            .fetch_qualifier(qualifier)
            .await?
            .ok_or_else(|| Error::NotFound(format!("qualifier {}", qualifier)))?;
        open_tier(&mut conn, row.tier_id).await?;
        known_class(&mut conn, destination).await?;
        self.append(&mut conn, NewMutation::move_class(&row, destination, actor)).await
    }

    pub async fn enqueue_renumber(&self, tier: TierId, class: ClassId, actor: &str) -> Result<MutationId> {
        let mut conn = self.pool.acquire().await?;
        open_tier(&mut conn, tier).await?;
        known_class(&mut conn, class).await?;
        self.append(&mut conn, NewMutation::renumber(tier, class, actor)).await
    }

    async fn enqueue_for_qualifier(
        &self,
        kind: MutationKind,
        qualifier: QualifierId,
        actor: &str,
    ) -> Result<MutationId> {
        let mut conn = self.pool.acquire().await?;
        let row = conn
            .fetch_qualifier(qualifier)
            .await?
            .ok_or_else(|| Error::NotFound(format!("qualifier {}", qualifier)))?;
        open_tier(&mut conn, row.tier_id).await?;
        self.append(&mut conn, NewMutation::for_qualifier(kind, &row, actor)).await
    }

    async fn append(&self, conn: &mut SqliteConnection, mutation: NewMutation) -> Result<MutationId> {
        let id = conn.append_mutation(&mutation, time::now()).await?;
        info!(
            mutation = %id,
            tier = %mutation.tier_id,
            "Enqueued {} by {}",
            mutation.kind,
            mutation.actor
        );
        self.wake.notify_one();
        Ok(id)
    }

    /// Committed list of a class with the current limit
    pub async fn class_view(&self, tier: TierId, class: ClassId) -> Result<ClassView> {
        let mut conn = self.pool.acquire().await?;
        let tier_row = conn
            .fetch_tier(tier)
            .await?
            .ok_or_else(|| Error::NotFound(format!("tier {}", tier)))?;
        let class_row = known_class(&mut conn, class).await?;
        let limit = conn.get_limit(tier, class).await?;

        let mut view = ClassView {
            tier: tier_row,
            class: class_row,
            limit,
            participants: Vec::new(),
            reserves: Vec::new(),
            not_participating: Vec::new(),
        };

        let mut rows = conn.load_class(tier, class).await?;
        rows.sort_by_key(|row| (row.admission_rank == 0, row.admission_rank, row.order_index));
        for row in rows {
            match row.placement(limit) {
                Placement::Participant => view.participants.push(row),
                Placement::Reserve => view.reserves.push(row),
                Placement::NotParticipating => view.not_participating.push(row),
            }
        }
        Ok(view)
    }

    pub async fn qualifier(&self, id: QualifierId) -> Result<Qualifier> {
        let mut conn = self.pool.acquire().await?;
        conn.fetch_qualifier(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("qualifier {}", id)))
    }

    pub async fn activity(&self, tier: TierId) -> Result<Vec<ActivityEntry>> {
        let mut conn = self.pool.acquire().await?;
        conn.activity_for_tier(tier).await
    }

    pub async fn worker_status(&self) -> Result<WorkerStatus> {
        let mut conn = self.pool.acquire().await?;
        Ok(WorkerStatus {
            high_water_mark: conn.high_water_mark().await?,
            pending: conn.pending_count().await?,
        })
    }
}

async fn open_tier(conn: &mut SqliteConnection, tier: TierId) -> Result<Tier> {
    let row = conn
        .fetch_tier(tier)
        .await?
        .ok_or_else(|| Error::NotFound(format!("tier {}", tier)))?;
    if row.is_closed {
        warn!("Mutation refused: tier {} is closed", tier);
        return Err(Error::TierClosed(tier.0));
    }
    Ok(row)
}

async fn known_class(conn: &mut SqliteConnection, class: ClassId) -> Result<CompetitionClass> {
    conn.fetch_class(class)
        .await?
        .ok_or_else(|| Error::NotFound(format!("class {}", class)))
}
