//! Transition dispatch: one mutation record in, one class updated
//!
//! `apply` runs inside the worker's per-record transaction. It only writes
//! through the store it is given, so rolling the transaction back undoes
//! everything it did.

use crate::cascade;
use crate::error::TransitionError;
use crate::ranking::{self, invariants, ClassState, RegisterOutcome};
use crate::store::RankingStore;
use chrono::{DateTime, Utc};
use qualrank_common::db::{
    ClassId, CompetitionClass, EligibleEntry, MutationKind, MutationRecord, NewQualifier,
    Qualifier, Tier, TierId, TierLevel,
};
use qualrank_common::time::audit_stamp;
use serde::de::DeserializeOwned;
use std::fmt;
use tracing::debug;

/// What a successfully applied mutation did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Seeded { rows: usize },
    LimitChanged { old: i64, new: i64 },
    Withdrawn { previous_rank: i64, moved: usize },
    Confirmed,
    Reentered { admission_rank: i64 },
    Invited,
    Cascaded { rows: usize, regions: usize },
    LateEntry { admission_rank: i64 },
    Moved { from: ClassId, admission_rank: i64, moved: usize },
    Renumbered { moved: usize },
}

impl fmt::Display for Applied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Applied::Seeded { rows } => write!(f, "applied: seeded {} rows", rows),
            Applied::LimitChanged { old, new } => write!(f, "applied: limit {} -> {}", old, new),
            Applied::Withdrawn { previous_rank, moved } => write!(
                f,
                "applied: withdrawn from rank {}, {} rows moved",
                previous_rank, moved
            ),
            Applied::Confirmed => write!(f, "applied: confirmed"),
            Applied::Reentered { admission_rank } => {
                write!(f, "applied: re-entered at rank {}", admission_rank)
            }
            Applied::Invited => write!(f, "applied: invitation stamped"),
            Applied::Cascaded { rows, regions } => {
                write!(f, "applied: seeded {} rows from {} regions", rows, regions)
            }
            Applied::LateEntry { admission_rank } => {
                write!(f, "applied: late entry at rank {}", admission_rank)
            }
            Applied::Moved { from, admission_rank, moved } => write!(
                f,
                "applied: moved from class {} to rank {}, {} rows moved",
                from, admission_rank, moved
            ),
            Applied::Renumbered { moved } => write!(f, "applied: renumbered, {} rows moved", moved),
        }
    }
}

/// Apply one mutation record
pub async fn apply<S>(
    store: &mut S,
    record: &MutationRecord,
    now: DateTime<Utc>,
) -> Result<Applied, TransitionError>
where
    S: RankingStore + ?Sized,
{
    let tier = store
        .fetch_tier(record.tier_id)
        .await?
        .ok_or_else(|| TransitionError::UnknownTarget(format!("tier {}", record.tier_id)))?;
    if tier.is_closed {
        return Err(TransitionError::TierClosed(tier.id));
    }

    let stamp = audit_stamp(now);
    debug!(mutation = %record.id, kind = %record.kind, tier = %tier.id, "Applying mutation");

    let (class, applied) = match record.kind {
        MutationKind::Seed => {
            let class = require_class(store, record).await?;
            let eligible: Vec<EligibleEntry> = parse_payload(record)?;
            let rows = seed_class(store, tier.id, class.id, eligible, &stamp, &record.actor).await?;
            (class.id, Applied::Seeded { rows })
        }
        MutationKind::CutChange => {
            let class = require_class(store, record).await?;
            let applied = change_limit(store, &tier, &class, record, &stamp, now).await?;
            (class.id, applied)
        }
        MutationKind::Withdraw => {
            let target = require_qualifier(store, record).await?;
            let mut state = ClassState::new(store.load_class(target.tier_id, target.class_id).await?);
            match state.withdraw(target.id, &stamp, &record.actor) {
                Ok(outcome) => {
                    save_changes(store, &state).await?;
                    (
                        target.class_id,
                        Applied::Withdrawn {
                            previous_rank: outcome.previous_rank,
                            moved: outcome.moved,
                        },
                    )
                }
                Err(err) => return Err(reject(store, state, &target, "WITHDRAW", &stamp, err).await),
            }
        }
        MutationKind::Register => {
            let target = require_qualifier(store, record).await?;
            let limit = store.get_limit(target.tier_id, target.class_id).await?;
            let mut state = ClassState::new(store.load_class(target.tier_id, target.class_id).await?);
            match state.register(target.id, limit, &stamp, &record.actor) {
                Ok(outcome) => {
                    save_changes(store, &state).await?;
                    let applied = match outcome {
                        RegisterOutcome::Confirmed => Applied::Confirmed,
                        RegisterOutcome::Reentered { admission_rank } => {
                            Applied::Reentered { admission_rank }
                        }
                    };
                    (target.class_id, applied)
                }
                Err(err) => return Err(reject(store, state, &target, "REGISTER", &stamp, err).await),
            }
        }
        MutationKind::Invite => {
            let mut target = require_qualifier(store, record).await?;
            if target.is_withdrawn() {
                let message = format!("qualifier {} is withdrawn", target.id);
                target.append_audit(&stamp, &format!("INVITE ignored: {}", message));
                store.save_qualifier(&target).await?;
                return Err(TransitionError::InvalidTransition(message));
            }
            target.confirmation_requested_at = Some(now);
            target.append_audit(&stamp, &format!("Invitation requested by {}", record.actor));
            store.save_qualifier(&target).await?;
            (target.class_id, Applied::Invited)
        }
        MutationKind::Cascade => {
            if tier.level != TierLevel::National {
                return Err(TransitionError::InvalidTransition(format!(
                    "tier {} is not a national tier",
                    tier.id
                )));
            }
            let class = require_class(store, record).await?;
            let eligible = cascade::national_seed(store, &tier, class.id).await?;
            if eligible.is_empty() {
                return Err(TransitionError::InvalidTransition(format!(
                    "no admitted regional rows for class {}",
                    class.id
                )));
            }
            let regions = eligible.iter().filter(|e| !e.champion_label.is_empty()).count();
            let rows = seed_class(store, tier.id, class.id, eligible, &stamp, &record.actor).await?;
            store
                .log_activity(
                    tier.id,
                    &record.actor,
                    "cascade",
                    &format!(
                        "Class {} seeded with {} rows from {} regional lists",
                        class.description, rows, regions
                    ),
                    now,
                )
                .await?;
            (class.id, Applied::Cascaded { rows, regions })
        }
        MutationKind::ExtraEntry => {
            let class = require_class(store, record).await?;
            let entry: EligibleEntry = parse_payload(record)?;
            let admission_rank =
                add_late_entry(store, tier.id, &class, entry, &stamp, &record.actor).await?;
            (class.id, Applied::LateEntry { admission_rank })
        }
        MutationKind::MoveClass => {
            let target = require_qualifier(store, record).await?;
            let destination = require_class(store, record).await?;
            let applied = move_class(store, target, &destination, &stamp, record, now).await?;
            (destination.id, applied)
        }
        MutationKind::Renumber => {
            let class = require_class(store, record).await?;
            let mut state = ClassState::new(store.load_class(tier.id, class.id).await?);
            if state.is_empty() {
                return Err(TransitionError::InvalidTransition(format!(
                    "class {} of tier {} is not seeded",
                    class.id, tier.id
                )));
            }
            let moved = state.normalize(&stamp, &format!("renumbering by {}", record.actor));
            if state.has_changes() {
                save_changes(store, &state).await?;
            }
            (class.id, Applied::Renumbered { moved })
        }
    };

    verify_class(store, tier.id, class).await?;
    Ok(applied)
}

async fn require_class<S>(store: &mut S, record: &MutationRecord) -> Result<CompetitionClass, TransitionError>
where
    S: RankingStore + ?Sized,
{
    let class_id = record.class_id.ok_or_else(|| {
        TransitionError::InvalidTransition(format!("{} mutation without class", record.kind))
    })?;
    store
        .fetch_class(class_id)
        .await?
        .ok_or_else(|| TransitionError::UnknownTarget(format!("class {}", class_id)))
}

async fn require_qualifier<S>(store: &mut S, record: &MutationRecord) -> Result<Qualifier, TransitionError>
where
    S: RankingStore + ?Sized,
{
    let qualifier_id = record.qualifier_id.ok_or_else(|| {
        TransitionError::InvalidTransition(format!("{} mutation without qualifier", record.kind))
    })?;
    let qualifier = store
        .fetch_qualifier(qualifier_id)
        .await?
        .ok_or_else(|| TransitionError::UnknownTarget(format!("qualifier {}", qualifier_id)))?;
    if qualifier.tier_id != record.tier_id {
        return Err(TransitionError::UnknownTarget(format!(
            "qualifier {} is not in tier {}",
            qualifier_id, record.tier_id
        )));
    }
    Ok(qualifier)
}

fn parse_payload<T: DeserializeOwned>(record: &MutationRecord) -> Result<T, TransitionError> {
    let payload = record.payload.as_deref().ok_or_else(|| {
        TransitionError::InvalidTransition(format!("{} mutation without payload", record.kind))
    })?;
    serde_json::from_str(payload).map_err(|e| {
        TransitionError::InvalidTransition(format!("malformed {} payload: {}", record.kind, e))
    })
}

async fn seed_class<S>(
    store: &mut S,
    tier: TierId,
    class: ClassId,
    eligible: Vec<EligibleEntry>,
    stamp: &str,
    actor: &str,
) -> Result<usize, TransitionError>
where
    S: RankingStore + ?Sized,
{
    if !store.load_class(tier, class).await?.is_empty() {
        return Err(TransitionError::InvalidTransition(format!(
            "class {} of tier {} is already seeded",
            class, tier
        )));
    }
    let rows = ranking::seed(tier, class, eligible, stamp, actor)?;
    store.insert_qualifiers(&rows).await?;
    Ok(rows.len())
}

/// Insert a late qualifier and place it like a re-entering row
async fn add_late_entry<S>(
    store: &mut S,
    tier: TierId,
    class: &CompetitionClass,
    entry: EligibleEntry,
    stamp: &str,
    actor: &str,
) -> Result<i64, TransitionError>
where
    S: RankingStore + ?Sized,
{
    let rows = store.load_class(tier, class.id).await?;
    if rows.is_empty() {
        return Err(TransitionError::InvalidTransition(format!(
            "class {} of tier {} is not seeded",
            class.id, tier
        )));
    }
    if rows.iter().any(|row| row.subject_id == entry.subject_id) {
        return Err(TransitionError::InvalidTransition(format!(
            "subject {} is already listed in class {}",
            entry.subject_id, class.id
        )));
    }

    let active = rows.iter().filter(|row| !row.is_withdrawn()).count() as i64;
    let mut line = format!("Added late by {}", actor);
    if !entry.champion_label.is_empty() {
        line.push_str(&format!(" ({})", entry.champion_label));
    }
    let id = store
        .insert_qualifier(&NewQualifier {
            tier_id: tier,
            class_id: class.id,
            subject_id: entry.subject_id,
            home_org_id: entry.home_org_id,
            seed_value: entry.seed_value,
            tiebreak_key: entry.tiebreak_key,
            champion_label: entry.champion_label,
            order_index: active + 1,
            audit_log: format!("{} {}\n", stamp, line),
        })
        .await?;

    let limit = store.get_limit(tier, class.id).await?;
    let mut state = ClassState::new(store.load_class(tier, class.id).await?);
    let admission_rank = state.place_late_entry(id, limit, stamp)?;
    save_changes(store, &state).await?;
    Ok(admission_rank)
}

/// Re-home a row: the source closes its gap, the destination is re-ranked
async fn move_class<S>(
    store: &mut S,
    mut target: Qualifier,
    destination: &CompetitionClass,
    stamp: &str,
    record: &MutationRecord,
    now: DateTime<Utc>,
) -> Result<Applied, TransitionError>
where
    S: RankingStore + ?Sized,
{
    let source = store
        .fetch_class(target.class_id)
        .await?
        .ok_or_else(|| TransitionError::UnknownTarget(format!("class {}", target.class_id)))?;

    let refusal = if source.id == destination.id {
        Some(format!("qualifier {} is already in class {}", target.id, destination.id))
    } else if source.is_team != destination.is_team {
        Some(format!(
            "class {} and class {} hold different kinds of entries",
            source.id, destination.id
        ))
    } else if store
        .load_class(target.tier_id, destination.id)
        .await?
        .iter()
        .any(|row| row.subject_id == target.subject_id)
    {
        Some(format!(
            "subject {} is already listed in class {}",
            target.subject_id, destination.id
        ))
    } else {
        None
    };
    if let Some(message) = refusal {
        target.append_audit(stamp, &format!("MOVE_CLASS ignored: {}", message));
        store.save_qualifier(&target).await?;
        return Err(TransitionError::InvalidTransition(message));
    }

    let mut source_state = ClassState::new(store.load_class(target.tier_id, source.id).await?);
    let reason = format!("move of {} to {}", target.subject_id, destination.description);
    source_state.remove(target.id, stamp, &reason)?;
    save_changes(store, &source_state).await?;
    store.set_qualifier_class(target.id, destination.id).await?;
    verify_class(store, target.tier_id, source.id).await?;

    let mut state = ClassState::new(store.load_class(target.tier_id, destination.id).await?);
    state.note(
        target.id,
        stamp,
        &format!(
            "Moved from {} to {} by {}",
            source.description, destination.description, record.actor
        ),
    )?;
    let moved = state.rebuild(stamp, &format!("arrival of {}", target.subject_id));
    save_changes(store, &state).await?;
    let admission_rank = state.get(target.id).map(|row| row.admission_rank).unwrap_or(0);

    store
        .log_activity(
            target.tier_id,
            &record.actor,
            "move",
            &format!(
                "Subject {} moved from {} to {}",
                target.subject_id, source.description, destination.description
            ),
            now,
        )
        .await?;

    Ok(Applied::Moved {
        from: source.id,
        admission_rank,
        moved,
    })
}

async fn change_limit<S>(
    store: &mut S,
    tier: &Tier,
    class: &CompetitionClass,
    record: &MutationRecord,
    stamp: &str,
    now: DateTime<Utc>,
) -> Result<Applied, TransitionError>
where
    S: RankingStore + ?Sized,
{
    let new_limit = record.new_limit.ok_or_else(|| {
        TransitionError::InvalidTransition("CUT_CHANGE without new limit".to_string())
    })?;
    if new_limit < 1 {
        return Err(TransitionError::InvalidTransition(format!(
            "limit must be at least 1, got {}",
            new_limit
        )));
    }

    let current = store.get_limit(tier.id, class.id).await?;
    if current == new_limit {
        return Err(TransitionError::InvalidTransition(format!(
            "limit for class {} is already {}",
            class.id, new_limit
        )));
    }

    store.set_limit(tier.id, class.id, new_limit).await?;
    store
        .log_activity(
            tier.id,
            &record.actor,
            "limit",
            &format!(
                "Limit for class {} changed from {} to {}",
                class.description, current, new_limit
            ),
            now,
        )
        .await?;

    // The limit is a read-time threshold; this pass only repairs numbering
    let mut state = ClassState::new(store.load_class(tier.id, class.id).await?);
    let moved = state.normalize(stamp, "limit change");
    if moved > 0 {
        debug!(tier = %tier.id, class = %class.id, moved, "Numbering repaired during limit change");
    }
    if state.has_changes() {
        save_changes(store, &state).await?;
    }

    Ok(Applied::LimitChanged {
        old: current,
        new: new_limit,
    })
}

async fn save_changes<S>(store: &mut S, state: &ClassState) -> Result<(), TransitionError>
where
    S: RankingStore + ?Sized,
{
    for row in state.changed_rows() {
        store.save_qualifier(row).await?;
    }
    Ok(())
}

/// Record a rejected transition on the target row and hand the error back
async fn reject<S>(
    store: &mut S,
    mut state: ClassState,
    target: &Qualifier,
    kind: &str,
    stamp: &str,
    err: TransitionError,
) -> TransitionError
where
    S: RankingStore + ?Sized,
{
    let message = match err {
        TransitionError::InvalidTransition(message) => message,
        other => return other,
    };
    let note = format!("{} ignored: {}", kind, message);
    if let Err(note_err) = state.note(target.id, stamp, &note) {
        return note_err;
    }
    match save_changes(store, &state).await {
        Ok(()) => TransitionError::InvalidTransition(message),
        Err(save_err) => save_err,
    }
}

async fn verify_class<S>(store: &mut S, tier: TierId, class: ClassId) -> Result<(), TransitionError>
where
    S: RankingStore + ?Sized,
{
    let rows = store.load_class(tier, class).await?;
    invariants::check_class(&rows).map_err(|problem| {
        TransitionError::InvariantViolation(format!("tier {} class {}: {}", tier, class, problem))
    })
}
