//! Narrow persistence contracts used by the transition functions
//!
//! Every trait is implemented for `sqlx::SqliteConnection`, so the same code
//! runs against a pooled connection (`&mut *conn`) or inside a transaction
//! (`&mut *tx`).

mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qualrank_common::db::{
    ActivityEntry, ClassId, CompetitionClass, MutationId, MutationRecord, NewMutation,
    NewQualifier, Qualifier, QualifierId, Tier, TierId, TierLevel,
};
use qualrank_common::Result;

#[async_trait]
pub trait QualifierStore {
    /// All rows of a class, withdrawn included
    async fn load_class(&mut self, tier: TierId, class: ClassId) -> Result<Vec<Qualifier>>;

    async fn fetch_qualifier(&mut self, id: QualifierId) -> Result<Option<Qualifier>>;

    async fn insert_qualifier(&mut self, row: &NewQualifier) -> Result<QualifierId>;

    async fn insert_qualifiers(&mut self, rows: &[NewQualifier]) -> Result<()>;

    /// Re-home a row; positions are left for the caller to repair
    async fn set_qualifier_class(&mut self, id: QualifierId, class: ClassId) -> Result<()>;

    /// Persist the mutable fields of one row
    async fn save_qualifier(&mut self, row: &Qualifier) -> Result<()>;

    /// Non-withdrawn rows ranked inside `limit`, best first
    async fn admitted_rows(&mut self, tier: TierId, class: ClassId, limit: i64)
        -> Result<Vec<Qualifier>>;
}

#[async_trait]
pub trait MutationStore {
    async fn append_mutation(&mut self, mutation: &NewMutation, created_at: DateTime<Utc>)
        -> Result<MutationId>;

    /// Unprocessed records after `after`, ordered by `(created_at, id)`
    async fn pending_after(&mut self, after: MutationId, limit: Option<usize>)
        -> Result<Vec<MutationId>>;

    async fn fetch_mutation(&mut self, id: MutationId) -> Result<Option<MutationRecord>>;

    /// Mark processed; false when another pass got there first
    async fn mark_processed(&mut self, id: MutationId, outcome: &str, at: DateTime<Utc>)
        -> Result<bool>;

    /// Leave the record unprocessed but remember why
    async fn record_failure(&mut self, id: MutationId, reason: &str) -> Result<()>;

    async fn pending_count(&mut self) -> Result<i64>;

    /// Highest id ever appended (0 when empty)
    async fn last_mutation_id(&mut self) -> Result<MutationId>;

    async fn high_water_mark(&mut self) -> Result<MutationId>;

    /// Move the mark to the end of the contiguous processed prefix
    async fn advance_high_water_mark(&mut self, at: DateTime<Utc>) -> Result<MutationId>;
}

#[async_trait]
pub trait LimitStore {
    /// Stored limit, or the class default when none was stored
    async fn get_limit(&mut self, tier: TierId, class: ClassId) -> Result<i64>;

    async fn stored_limit(&mut self, tier: TierId, class: ClassId) -> Result<Option<i64>>;

    async fn set_limit(&mut self, tier: TierId, class: ClassId, limit: i64) -> Result<()>;
}

#[async_trait]
pub trait TierLifecycle {
    async fn fetch_tier(&mut self, id: TierId) -> Result<Option<Tier>>;

    async fn create_tier(&mut self, name: &str, level: TierLevel, parent: Option<TierId>)
        -> Result<TierId>;

    async fn set_tier_closed(&mut self, id: TierId, closed: bool) -> Result<()>;

    /// Regional tiers feeding a national tier
    async fn child_tiers(&mut self, parent: TierId) -> Result<Vec<Tier>>;

    async fn fetch_class(&mut self, id: ClassId) -> Result<Option<CompetitionClass>>;

    async fn create_class(&mut self, description: &str, is_team: bool) -> Result<ClassId>;
}

#[async_trait]
pub trait ActivityLog {
    async fn log_activity(
        &mut self,
        tier: TierId,
        actor: &str,
        topic: &str,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;

    async fn activity_for_tier(&mut self, tier: TierId) -> Result<Vec<ActivityEntry>>;
}

/// Everything a transition function may touch
pub trait RankingStore: QualifierStore + LimitStore + TierLifecycle + ActivityLog + Send {}

impl<T> RankingStore for T where T: QualifierStore + LimitStore + TierLifecycle + ActivityLog + Send {}
