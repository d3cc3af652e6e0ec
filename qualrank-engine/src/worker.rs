//! Mutation log worker
//!
//! Drains unprocessed mutation records oldest first, one transaction per
//! record. The worker is the only writer of ranking fields; exactly one
//! instance is expected to run against a database.
//!
//! Per-record policy:
//! - applied: effect and `is_processed` commit together
//! - invalid transition: marked processed as a no-op
//! - unknown target: marked processed as dropped, counted as failed
//! - tier closed / invariant violation / storage fault: rolled back, left
//!   unprocessed with `last_error` set, counted as failed
//! - storage conflict: retried once, then treated as a storage fault

use crate::error::TransitionError;
use crate::store::MutationStore;
use crate::transitions::{self, Applied};
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use qualrank_common::config::WorkerSection;
use qualrank_common::db::MutationId;
use qualrank_common::time;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Bounds for one pass and pacing for the monitor loop
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Records handled per pass; the rest wait for the next pass
    pub batch_limit: Option<usize>,
    /// Wall-clock budget per pass
    pub max_duration: Option<Duration>,
    /// Delay between checks for new records when not pinged
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_limit: None,
            max_duration: None,
            poll_interval: Duration::from_secs(3),
        }
    }
}

impl From<&WorkerSection> for WorkerConfig {
    fn from(section: &WorkerSection) -> Self {
        Self {
            batch_limit: section.batch_limit,
            max_duration: section.max_duration_secs.map(Duration::from_secs),
            poll_interval: Duration::from_secs(section.poll_interval_secs.max(1)),
        }
    }
}

/// Counts for one pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub applied: usize,
    /// Invalid transitions consumed as no-ops
    pub rejected: usize,
    /// Records whose target no longer exists
    pub dropped: usize,
    /// Records left unprocessed for a later pass or an operator
    pub deferred: usize,
    pub high_water_mark: i64,
}

impl PassSummary {
    pub fn count_applied(&self) -> usize {
        self.applied
    }

    pub fn count_failed(&self) -> usize {
        self.dropped + self.deferred
    }

    pub fn is_idle(&self) -> bool {
        self.applied + self.rejected + self.dropped + self.deferred == 0
    }
}

#[derive(Debug)]
enum RecordOutcome {
    Applied(Applied),
    Rejected(String),
    Dropped(String),
    Deferred(String),
    /// Another pass already consumed the record
    Skipped,
}

#[derive(Clone)]
pub struct Worker {
    pool: SqlitePool,
    config: WorkerConfig,
    wake: Arc<Notify>,
}

impl Worker {
    pub fn new(pool: SqlitePool, config: WorkerConfig) -> Self {
        Self::with_waker(pool, config, Arc::new(Notify::new()))
    }

    /// Share a waker with the enqueue side so pings cut the poll delay short
    pub fn with_waker(pool: SqlitePool, config: WorkerConfig, wake: Arc<Notify>) -> Self {
        Self { pool, config, wake }
    }

    pub fn waker(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// Drain pending records once. Safe to call repeatedly.
    pub async fn run_pass(&self) -> qualrank_common::Result<PassSummary> {
        let started = Instant::now();

        let pending = {
            let mut conn = self.pool.acquire().await?;
            let mark = conn.high_water_mark().await?;
            conn.pending_after(mark, self.config.batch_limit).await?
        };

        let mut summary = PassSummary::default();
        for (done, id) in pending.iter().enumerate() {
            if let Some(budget) = self.config.max_duration {
                if started.elapsed() >= budget {
                    info!(
                        "Pass time budget of {:?} used, {} records left for next pass",
                        budget,
                        pending.len() - done
                    );
                    break;
                }
            }

            match self.process_record(*id).await {
                RecordOutcome::Applied(applied) => {
                    info!(mutation = %id, "{}", applied);
                    summary.applied += 1;
                }
                RecordOutcome::Rejected(reason) => {
                    warn!(mutation = %id, "Mutation rejected: {}", reason);
                    summary.rejected += 1;
                }
                RecordOutcome::Dropped(reason) => {
                    warn!(mutation = %id, "Mutation dropped: {}", reason);
                    summary.dropped += 1;
                }
                RecordOutcome::Deferred(reason) => {
                    warn!(mutation = %id, "Mutation left unprocessed: {}", reason);
                    summary.deferred += 1;
                }
                RecordOutcome::Skipped => {
                    debug!(mutation = %id, "Mutation already processed");
                }
            }
        }

        let mut conn = self.pool.acquire().await?;
        summary.high_water_mark = conn.advance_high_water_mark(time::now()).await?.0;

        if !summary.is_idle() {
            info!(
                "Worker pass: {} applied, {} rejected, {} dropped, {} deferred (high water mark {}, {:?})",
                summary.applied,
                summary.rejected,
                summary.dropped,
                summary.deferred,
                summary.high_water_mark,
                started.elapsed()
            );
        }
        Ok(summary)
    }

    async fn process_record(&self, id: MutationId) -> RecordOutcome {
        let mut result = self.attempt(id).await;
        if let Err(TransitionError::StorageConflict(reason)) = &result {
            warn!(mutation = %id, "Storage conflict, retrying once: {}", reason);
            result = self.attempt(id).await;
        }

        match result {
            Ok(outcome) => outcome,
            Err(err) => {
                let reason = format!("{}: {}", err.tag(), err);
                match &err {
                    TransitionError::TierClosed(_) => {}
                    _ => error!(mutation = %id, "Mutation failed: {}", err),
                }
                if let Err(record_err) = self.record_failure(id, &reason).await {
                    error!(mutation = %id, "Could not record failure reason: {}", record_err);
                }
                RecordOutcome::Deferred(reason)
            }
        }
    }

    /// One transaction: re-check, apply, mark processed, commit
    async fn attempt(&self, id: MutationId) -> Result<RecordOutcome, TransitionError> {
        let mut tx = self.pool.begin().await?;
        let conn = &mut *tx;

        let record = match conn.fetch_mutation(id).await? {
            Some(record) if !record.is_processed => record,
            _ => return Ok(RecordOutcome::Skipped),
        };

        let now = time::now();
        match transitions::apply(conn, &record, now).await {
            Ok(applied) => {
                if !conn.mark_processed(id, &applied.to_string(), now).await? {
                    return Ok(RecordOutcome::Skipped);
                }
                tx.commit().await?;
                Ok(RecordOutcome::Applied(applied))
            }
            Err(err) if err.is_terminal() => {
                let outcome = format!("{}: {}", err.tag(), err);
                if !conn.mark_processed(id, &outcome, now).await? {
                    return Ok(RecordOutcome::Skipped);
                }
                tx.commit().await?;
                Ok(match err {
                    TransitionError::UnknownTarget(_) => RecordOutcome::Dropped(outcome),
                    _ => RecordOutcome::Rejected(outcome),
                })
            }
            // Dropping the transaction rolls back any partial effect
            Err(err) => Err(err),
        }
    }

    async fn record_failure(&self, id: MutationId, reason: &str) -> qualrank_common::Result<()> {
        let mut conn = self.pool.acquire().await?;
        conn.record_failure(id, reason).await
    }

    /// Run passes until `stop_at`: whenever a new record appears, when pinged,
    /// once at start, and on every poll while records are deferred.
    pub async fn run_until(&self, stop_at: DateTime<Utc>) {
        info!("Worker running until {}", stop_at.format("%Y-%m-%d %H:%M:%S"));
        let mut last_seen: Option<MutationId> = None;

        loop {
            if time::now() >= stop_at {
                break;
            }

            let latest = match self.latest_mutation().await {
                Ok(latest) => Some(latest),
                Err(e) => {
                    error!("Cannot read mutation log: {}", e);
                    None
                }
            };
            if latest.is_some() && latest != last_seen {
                match self.run_pass().await {
                    // deferred records are retried on the next poll
                    Ok(summary) if summary.deferred > 0 => last_seen = None,
                    Ok(_) => last_seen = latest,
                    Err(e) => error!("Worker pass failed: {}", e),
                }
            }

            let remaining = (stop_at - time::now()).to_std().unwrap_or(Duration::ZERO);
            let wait = remaining.min(self.config.poll_interval);
            tokio::select! {
                _ = self.wake.notified() => {
                    debug!("Worker pinged");
                    last_seen = None;
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!("Worker stopped");
    }

    async fn latest_mutation(&self) -> qualrank_common::Result<MutationId> {
        let mut conn = self.pool.acquire().await?;
        conn.last_mutation_id().await
    }
}

/// When the daemon should stop.
///
/// `duration` is minutes, or seconds with `quick`. `stop_exactly` names a
/// minute of the hour: when that minute comes before the regular stop time
/// the daemon stops at its start instead. The current minute never counts.
pub fn compute_stop_at(
    now: DateTime<Utc>,
    duration: u64,
    stop_exactly: Option<u32>,
    quick: bool,
) -> DateTime<Utc> {
    let span_len = i64::try_from(duration).unwrap_or(i64::MAX);
    if quick {
        return add_or_max(now, ChronoDuration::try_seconds(span_len));
    }

    let mut stop_at = add_or_max(now, ChronoDuration::try_minutes(span_len));

    if let Some(minute) = stop_exactly {
        let mut delta = i64::from(minute) - i64::from(now.minute());
        if delta < 0 {
            delta += 60;
        }
        if delta != 0 {
            let exact = now
                .checked_add_signed(ChronoDuration::minutes(delta))
                .and_then(|t| t.with_second(0))
                .and_then(|t| t.with_nanosecond(0));
            if let Some(exact) = exact {
                if exact < stop_at {
                    stop_at = exact;
                }
            }
        }
    }

    stop_at
}

fn add_or_max(now: DateTime<Utc>, span: Option<ChronoDuration>) -> DateTime<Utc> {
    span.and_then(|span| now.checked_add_signed(span))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
