//! Shared fixtures for qualrank-engine integration tests
//!
//! Every fixture runs on its own in-memory database, except `on_disk`.

#![allow(dead_code)]

use qualrank_common::db::{
    init_database, open_in_memory, ClassId, MutationId, MutationRecord, Qualifier, TierId,
    TierLevel,
};
use qualrank_engine::eligibility::RawCandidate;
use qualrank_engine::ranking::invariants::check_class;
use qualrank_engine::store::{MutationStore, QualifierStore};
use qualrank_engine::{PassSummary, QualificationService, Worker, WorkerConfig};
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use std::path::Path;

pub const POOLS: [&str; 4] = ["North", "East", "South", "West"];

pub struct Fixture {
    pub pool: SqlitePool,
    pub service: QualificationService,
    pub worker: Worker,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_config(WorkerConfig::default()).await
    }

    pub async fn with_config(config: WorkerConfig) -> Self {
        let pool = open_in_memory().await.expect("in-memory database");
        Self::from_pool(pool, config)
    }

    /// WAL database file, for tests that need a second connection
    pub async fn on_disk(path: &Path) -> Self {
        let pool = init_database(path).await.expect("on-disk database");
        Self::from_pool(pool, WorkerConfig::default())
    }

    fn from_pool(pool: SqlitePool, config: WorkerConfig) -> Self {
        let worker = Worker::new(pool.clone(), config);
        let service = QualificationService::new(pool.clone(), worker.waker());
        Self {
            pool,
            service,
            worker,
        }
    }

    pub async fn regional_tier(&self, name: &str) -> TierId {
        self.service
            .create_tier(name, TierLevel::Regional, None)
            .await
            .unwrap()
    }

    pub async fn class(&self, description: &str) -> ClassId {
        self.service.create_class(description, false).await.unwrap()
    }

    /// Run one pass and check every class touched so far
    pub async fn pass(&self) -> PassSummary {
        let summary = self.worker.run_pass().await.expect("worker pass");
        self.assert_all_consistent().await;
        summary
    }

    pub async fn rows(&self, tier: TierId, class: ClassId) -> Vec<Qualifier> {
        let mut conn = self.pool.acquire().await.unwrap();
        conn.load_class(tier, class).await.unwrap()
    }

    /// Non-withdrawn row currently at `order_index`
    pub async fn row_at(&self, tier: TierId, class: ClassId, order_index: i64) -> Qualifier {
        self.rows(tier, class)
            .await
            .into_iter()
            .find(|row| !row.is_withdrawn() && row.order_index == order_index)
            .unwrap_or_else(|| panic!("no active row at position {}", order_index))
    }

    pub async fn row(&self, tier: TierId, class: ClassId, subject: &str) -> Qualifier {
        self.rows(tier, class)
            .await
            .into_iter()
            .find(|row| row.subject_id == subject)
            .unwrap_or_else(|| panic!("no row for {}", subject))
    }

    pub async fn mutation(&self, id: MutationId) -> MutationRecord {
        let mut conn = self.pool.acquire().await.unwrap();
        conn.fetch_mutation(id).await.unwrap().expect("mutation exists")
    }

    pub async fn assert_all_consistent(&self) {
        let pairs: Vec<(i64, i64)> =
            sqlx::query_as("SELECT DISTINCT tier_id, class_id FROM qualifiers")
                .fetch_all(&self.pool)
                .await
                .unwrap();
        for (tier, class) in pairs {
            let rows = self.rows(TierId(tier), ClassId(class)).await;
            if let Err(problem) = check_class(&rows) {
                panic!("tier {} class {} inconsistent: {}", tier, class, problem);
            }
        }
    }

    /// Seed a class from the four-pool candidate set and apply it
    pub async fn seeded_scenario_class(&self, limit: Option<i64>) -> (TierId, ClassId) {
        let tier = self.regional_tier("Region 101").await;
        let class = self.class("Recurve Men").await;
        if let Some(limit) = limit {
            self.service
                .enqueue_cut_change(tier, class, limit, "organizer")
                .await
                .unwrap();
        }
        self.service
            .enqueue_first_tier_seed(tier, class, scenario_candidates(), 6, "system")
            .await
            .unwrap();
        self.pass().await;
        (tier, class)
    }
}

/// 4 pools x 6 sporters; the sixth sporter of each pool has only 5 scores.
///
/// Sporter `i` of pool `p` averages `9.000 - 0.100 * i - 0.010 * p`, so the
/// pool champions are `p*-0` and every average is distinct.
pub fn scenario_candidates() -> Vec<RawCandidate> {
    let mut candidates = Vec::new();
    for (p, pool) in POOLS.iter().enumerate() {
        for i in 0..6i64 {
            let p = p as i64;
            candidates.push(RawCandidate {
                subject_id: format!("p{}-{}", p, i),
                home_org_id: 1000 + p,
                pool: pool.to_string(),
                average: Decimal::new(9000 - i * 100 - p * 10, 3),
                scores: vec![270; if i == 5 { 5 } else { 6 }],
            });
        }
    }
    candidates
}

pub fn positions(rows: &[Qualifier]) -> Vec<(String, i64, i64)> {
    let mut out: Vec<_> = rows
        .iter()
        .map(|row| (row.subject_id.clone(), row.order_index, row.admission_rank))
        .collect();
    out.sort();
    out
}
