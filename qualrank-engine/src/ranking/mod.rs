//! Ranking and re-sequencing of one class's qualification list
//!
//! Pure in-memory logic: the transition layer loads a class, runs one of
//! the operations below and writes back the rows reported as changed.
//!
//! Positions are kept dense over non-withdrawn rows: after every operation
//! their `order_index` and `admission_rank` are both exactly `1..=M`, in the
//! same relative order as before unless the operation explicitly moves a
//! row. A withdrawn row keeps the `order_index` it had when it withdrew.

pub mod invariants;
pub mod ordering;

pub use ordering::{admission_order, compare_strength, tiebreak_from_scores, Ranked};

use crate::error::TransitionError;
use qualrank_common::db::{
    ClassId, EligibleEntry, NewQualifier, ParticipationStatus, Qualifier, QualifierId, TierId,
};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// Build the initial list for a class.
///
/// Champions (non-empty `champion_label`) come first, ordered among
/// themselves, then everybody else. Positions run `1..=N`.
pub fn seed(
    tier_id: TierId,
    class_id: ClassId,
    eligible: Vec<EligibleEntry>,
    stamp: &str,
    actor: &str,
) -> Result<Vec<NewQualifier>, TransitionError> {
    let mut seen = HashSet::new();
    for entry in &eligible {
        if !seen.insert(entry.subject_id.as_str()) {
            return Err(TransitionError::InvalidTransition(format!(
                "subject {} listed twice in eligible set",
                entry.subject_id
            )));
        }
    }

    let (mut champions, mut others): (Vec<_>, Vec<_>) = eligible
        .into_iter()
        .partition(|entry| !entry.champion_label.is_empty());
    champions.sort_by(admission_order);
    others.sort_by(admission_order);

    let rows = champions
        .into_iter()
        .chain(others)
        .enumerate()
        .map(|(pos, entry)| {
            let order_index = pos as i64 + 1;
            let mut line = format!("Seeded by {} at position {}", actor, order_index);
            if !entry.champion_label.is_empty() {
                line.push_str(&format!(" ({})", entry.champion_label));
            }
            NewQualifier {
                tier_id,
                class_id,
                subject_id: entry.subject_id,
                home_org_id: entry.home_org_id,
                seed_value: entry.seed_value,
                tiebreak_key: entry.tiebreak_key,
                champion_label: entry.champion_label,
                order_index,
                audit_log: format!("{} {}\n", stamp, line),
            }
        })
        .collect();

    Ok(rows)
}

/// Result of a REGISTER on one row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// UNKNOWN row accepted its slot; position unchanged
    Confirmed,
    /// WITHDRAWN row re-entered the list at this rank
    Reentered { admission_rank: i64 },
}

/// Result of a WITHDRAW on one row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WithdrawOutcome {
    pub previous_rank: i64,
    /// Other rows whose rank moved as a side effect
    pub moved: usize,
}

/// All rows of one (tier, class), with change tracking.
///
/// A withdrawn row keeps its frozen `order_index`, so it can share that
/// value with an active row. Order rows by (withdrawn, `order_index`, id)
/// the way `new` does, never by `order_index` alone.
#[derive(Debug)]
pub struct ClassState {
    rows: Vec<Qualifier>,
    changed: BTreeSet<QualifierId>,
}

impl ClassState {
    pub fn new(mut rows: Vec<Qualifier>) -> Self {
        rows.sort_by(|a, b| {
            a.is_withdrawn()
                .cmp(&b.is_withdrawn())
                .then(a.order_index.cmp(&b.order_index))
                .then(a.id.cmp(&b.id))
        });
        Self {
            rows,
            changed: BTreeSet::new(),
        }
    }

    pub fn rows(&self) -> &[Qualifier] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: QualifierId) -> Option<&Qualifier> {
        self.rows.iter().find(|row| row.id == id)
    }

    /// Rows modified since load, in id order
    pub fn changed_rows(&self) -> Vec<&Qualifier> {
        self.rows
            .iter()
            .filter(|row| self.changed.contains(&row.id))
            .collect()
    }

    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty()
    }

    /// Append an audit line to one row without moving anything
    pub fn note(&mut self, id: QualifierId, stamp: &str, message: &str) -> Result<(), TransitionError> {
        let idx = self.index_of(id)?;
        self.rows[idx].append_audit(stamp, message);
        self.changed.insert(id);
        Ok(())
    }

    /// WITHDRAW: rank 0, position frozen, survivors close the gap
    pub fn withdraw(
        &mut self,
        id: QualifierId,
        stamp: &str,
        actor: &str,
    ) -> Result<WithdrawOutcome, TransitionError> {
        let idx = self.index_of(id)?;
        let row = &mut self.rows[idx];
        if row.is_withdrawn() {
            return Err(TransitionError::InvalidTransition(format!(
                "qualifier {} is already withdrawn",
                id
            )));
        }

        let previous_rank = row.admission_rank;
        row.participation = ParticipationStatus::Withdrawn;
        row.admission_rank = 0;
        row.append_audit(
            stamp,
            &format!(
                "Withdrawn by {} (was rank {}, position {} kept)",
                actor, previous_rank, row.order_index
            ),
        );
        let reason = format!("withdrawal of {}", row.subject_id);
        self.changed.insert(id);

        let order = self.survivor_order();
        let moved = self.resequence(&order, stamp, &reason);
        debug!(qualifier = %id, previous_rank, moved, "Withdrawal applied");

        Ok(WithdrawOutcome {
            previous_rank,
            moved,
        })
    }

    /// REGISTER: confirm an UNKNOWN row, or re-enter a WITHDRAWN row.
    ///
    /// A re-entering row never displaces a row inside the limit; see
    /// [`ClassState::entry_slot`] for where it lands.
    pub fn register(
        &mut self,
        id: QualifierId,
        limit: i64,
        stamp: &str,
        actor: &str,
    ) -> Result<RegisterOutcome, TransitionError> {
        let idx = self.index_of(id)?;

        match self.rows[idx].participation {
            ParticipationStatus::Confirmed => Err(TransitionError::InvalidTransition(format!(
                "qualifier {} is already confirmed",
                id
            ))),
            ParticipationStatus::Unknown => {
                let row = &mut self.rows[idx];
                row.participation = ParticipationStatus::Confirmed;
                row.append_audit(
                    stamp,
                    &format!("Confirmed by {} at rank {}", actor, row.admission_rank),
                );
                self.changed.insert(id);
                Ok(RegisterOutcome::Confirmed)
            }
            ParticipationStatus::Withdrawn => {
                let mut order = self.survivor_order();
                let insert_at = self.entry_slot(&order, idx, limit);
                let placement = if order.len() < limit_len(limit) {
                    "placed by average"
                } else {
                    "queued as reserve"
                };
                order.insert(insert_at, idx);

                let row = &mut self.rows[idx];
                row.participation = ParticipationStatus::Unknown;
                row.append_audit(stamp, &format!("Re-registered by {}, {}", actor, placement));
                let reason = format!("re-registration of {}", row.subject_id);
                self.changed.insert(id);

                self.resequence(&order, stamp, &reason);
                let admission_rank = self.rows[idx].admission_rank;
                debug!(qualifier = %id, admission_rank, limit, "Re-entry applied");

                Ok(RegisterOutcome::Reentered { admission_rank })
            }
        }
    }

    /// Re-apply dense numbering in the current order; returns rows that moved
    pub fn normalize(&mut self, stamp: &str, reason: &str) -> usize {
        let order = self.survivor_order();
        self.resequence(&order, stamp, reason)
    }

    /// EXTRA_ENTRY: move a freshly inserted active row to its slot by strength
    pub fn place_late_entry(
        &mut self,
        id: QualifierId,
        limit: i64,
        stamp: &str,
    ) -> Result<i64, TransitionError> {
        let idx = self.index_of(id)?;
        if self.rows[idx].is_withdrawn() {
            return Err(TransitionError::InvalidTransition(format!(
                "qualifier {} is withdrawn",
                id
            )));
        }

        let mut order = self.survivor_order();
        order.retain(|&other| other != idx);
        let insert_at = self.entry_slot(&order, idx, limit);
        order.insert(insert_at, idx);

        let reason = format!("late entry of {}", self.rows[idx].subject_id);
        self.changed.insert(id);
        self.resequence(&order, stamp, &reason);
        let admission_rank = self.rows[idx].admission_rank;
        debug!(qualifier = %id, admission_rank, limit, "Late entry placed");
        Ok(admission_rank)
    }

    /// Take a row out of this class; the remaining active rows close the gap
    pub fn remove(
        &mut self,
        id: QualifierId,
        stamp: &str,
        reason: &str,
    ) -> Result<(Qualifier, usize), TransitionError> {
        let idx = self.index_of(id)?;
        let row = self.rows.remove(idx);
        self.changed.remove(&id);
        let moved = self.normalize(stamp, reason);
        Ok((row, moved))
    }

    /// Re-rank the active rows from their ranking keys, champions first.
    ///
    /// Same ordering as [`seed`]; withdrawn rows stay out of the list.
    pub fn rebuild(&mut self, stamp: &str, reason: &str) -> usize {
        let mut order = self.survivor_order();
        order.sort_by(|&a, &b| {
            let (ra, rb) = (&self.rows[a], &self.rows[b]);
            rb.is_champion()
                .cmp(&ra.is_champion())
                .then_with(|| admission_order(ra, rb))
        });
        self.resequence(&order, stamp, reason)
    }

    fn index_of(&self, id: QualifierId) -> Result<usize, TransitionError> {
        self.rows
            .iter()
            .position(|row| row.id == id)
            .ok_or_else(|| TransitionError::UnknownTarget(format!("qualifier {}", id)))
    }

    /// Slot in `order` (active rows, candidate excluded) for a row entering the list.
    ///
    /// With a full list the row queues among the rows beyond `limit`, ahead of
    /// the first strictly weaker reserve. With fewer than `limit` active rows
    /// it goes right after the last row at least as strong, or to the front.
    fn entry_slot(&self, order: &[usize], idx: usize, limit: i64) -> usize {
        let candidate = &self.rows[idx];
        let cut = limit_len(limit);
        if order.len() < cut {
            order
                .iter()
                .rposition(|&other| {
                    compare_strength(&self.rows[other], candidate) != Ordering::Greater
                })
                .map(|pos| pos + 1)
                .unwrap_or(0)
        } else {
            order[cut..]
                .iter()
                .position(|&other| {
                    compare_strength(candidate, &self.rows[other]) == Ordering::Less
                })
                .map(|pos| pos + cut)
                .unwrap_or(order.len())
        }
    }

    /// Indices of non-withdrawn rows in their current relative order
    fn survivor_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.rows.len())
            .filter(|&idx| !self.rows[idx].is_withdrawn())
            .collect();
        order.sort_by(|&a, &b| {
            let (ra, rb) = (&self.rows[a], &self.rows[b]);
            ra.order_index.cmp(&rb.order_index).then(ra.id.cmp(&rb.id))
        });
        order
    }

    /// Assign positions `1..` following `order`
    fn resequence(&mut self, order: &[usize], stamp: &str, reason: &str) -> usize {
        let mut moved = 0;
        for (pos, &idx) in order.iter().enumerate() {
            let next = pos as i64 + 1;
            let row = &mut self.rows[idx];
            if row.order_index == next && row.admission_rank == next {
                continue;
            }
            let previous_rank = row.admission_rank;
            row.order_index = next;
            row.admission_rank = next;
            if previous_rank != next {
                row.append_audit(
                    stamp,
                    &format!("Rank {} -> {} after {}", previous_rank, next, reason),
                );
                moved += 1;
            }
            self.changed.insert(row.id);
        }
        moved
    }
}

fn limit_len(limit: i64) -> usize {
    usize::try_from(limit.max(0)).unwrap_or(0)
}
