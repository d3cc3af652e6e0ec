//! Database models
//!
//! Row types for the qualification ranking tables. Identifiers are thin
//! newtypes over the INTEGER primary keys so a tier id cannot be passed where
//! a class id is expected.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Championship instance (tournament x region, or tournament x nation)
    TierId
);
id_type!(
    /// Competition class (discipline / bow type / age group)
    ClassId
);
id_type!(
    /// Row in the qualifiers table
    QualifierId
);
id_type!(
    /// Row in the mutation log
    MutationId
);

/// Default admission cut-off for individual classes
pub const DEFAULT_INDIVIDUAL_LIMIT: i64 = 24;
/// Default admission cut-off for team classes
pub const DEFAULT_TEAM_LIMIT: i64 = 8;
/// Default admission cut-off for premier ("ERE") team classes
pub const DEFAULT_PREMIER_TEAM_LIMIT: i64 = 12;

/// Level of a tier in the championship cascade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TierLevel {
    Regional,
    National,
}

impl TierLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierLevel::Regional => "REGIONAL",
            TierLevel::National => "NATIONAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "REGIONAL" => Some(TierLevel::Regional),
            "NATIONAL" => Some(TierLevel::National),
            _ => None,
        }
    }
}

/// Tier row; `parent_id` links a regional tier to the national tier it feeds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tier {
    pub id: TierId,
    pub name: String,
    pub level: TierLevel,
    pub parent_id: Option<TierId>,
    pub is_closed: bool,
}

/// Competition class definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitionClass {
    pub id: ClassId,
    pub description: String,
    pub is_team: bool,
}

impl CompetitionClass {
    /// Cut-off used when no explicit limit was stored for a tier
    pub fn default_limit(&self) -> i64 {
        if !self.is_team {
            DEFAULT_INDIVIDUAL_LIMIT
        } else if self.description.contains("ERE") {
            DEFAULT_PREMIER_TEAM_LIMIT
        } else {
            DEFAULT_TEAM_LIMIT
        }
    }
}

/// Participation state of a qualifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipationStatus {
    /// Listed, neither confirmed nor withdrawn
    Unknown,
    /// Explicitly accepted its slot
    Confirmed,
    /// Explicitly declined or unregistered
    Withdrawn,
}

impl ParticipationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipationStatus::Unknown => "UNKNOWN",
            ParticipationStatus::Confirmed => "CONFIRMED",
            ParticipationStatus::Withdrawn => "WITHDRAWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UNKNOWN" => Some(ParticipationStatus::Unknown),
            "CONFIRMED" => Some(ParticipationStatus::Confirmed),
            "WITHDRAWN" => Some(ParticipationStatus::Withdrawn),
            _ => None,
        }
    }
}

/// How a reader must present a row, given the class limit at read time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    Participant,
    Reserve,
    NotParticipating,
}

/// One ranked entity (sporter+bow, or team) in one class of one tier
#[derive(Debug, Clone, Serialize)]
pub struct Qualifier {
    pub id: QualifierId,
    pub tier_id: TierId,
    pub class_id: ClassId,
    pub subject_id: String,
    /// Club at the time the list was frozen
    pub home_org_id: i64,
    pub seed_value: Decimal,
    pub tiebreak_key: String,
    pub champion_label: String,
    pub order_index: i64,
    pub admission_rank: i64,
    pub participation: ParticipationStatus,
    pub confirmation_requested_at: Option<DateTime<Utc>>,
    pub audit_log: String,
}

impl Qualifier {
    pub fn is_withdrawn(&self) -> bool {
        self.participation == ParticipationStatus::Withdrawn
    }

    pub fn is_champion(&self) -> bool {
        !self.champion_label.is_empty()
    }

    /// Append one line to the row's audit trail
    pub fn append_audit(&mut self, stamp: &str, message: &str) {
        self.audit_log.push_str(stamp);
        self.audit_log.push(' ');
        self.audit_log.push_str(message);
        self.audit_log.push('\n');
    }

    /// Read-time classification against the current class limit
    pub fn placement(&self, limit: i64) -> Placement {
        if self.admission_rank == 0 {
            Placement::NotParticipating
        } else if self.admission_rank <= limit {
            Placement::Participant
        } else {
            Placement::Reserve
        }
    }
}

/// Qualifier row as produced by SEED, before it has an id
#[derive(Debug, Clone)]
pub struct NewQualifier {
    pub tier_id: TierId,
    pub class_id: ClassId,
    pub subject_id: String,
    pub home_org_id: i64,
    pub seed_value: Decimal,
    pub tiebreak_key: String,
    pub champion_label: String,
    pub order_index: i64,
    pub audit_log: String,
}

/// Entry of the eligible set a SEED mutation carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibleEntry {
    pub subject_id: String,
    pub home_org_id: i64,
    pub seed_value: Decimal,
    pub tiebreak_key: String,
    #[serde(default)]
    pub champion_label: String,
}

/// Kind of a queued state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationKind {
    Seed,
    CutChange,
    Withdraw,
    Register,
    Invite,
    Cascade,
    /// Late qualifier added straight into the list
    ExtraEntry,
    /// Qualifier moved to another class of the same tier
    MoveClass,
    /// Ranks re-dealt along the current positions
    Renumber,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Seed => "SEED",
            MutationKind::CutChange => "CUT_CHANGE",
            MutationKind::Withdraw => "WITHDRAW",
            MutationKind::Register => "REGISTER",
            MutationKind::Invite => "INVITE",
            MutationKind::Cascade => "CASCADE",
            MutationKind::ExtraEntry => "EXTRA_ENTRY",
            MutationKind::MoveClass => "MOVE_CLASS",
            MutationKind::Renumber => "RENUMBER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SEED" => Some(MutationKind::Seed),
            "CUT_CHANGE" => Some(MutationKind::CutChange),
            "WITHDRAW" => Some(MutationKind::Withdraw),
            "REGISTER" => Some(MutationKind::Register),
            "INVITE" => Some(MutationKind::Invite),
            "CASCADE" => Some(MutationKind::Cascade),
            "EXTRA_ENTRY" => Some(MutationKind::ExtraEntry),
            "MOVE_CLASS" => Some(MutationKind::MoveClass),
            "RENUMBER" => Some(MutationKind::Renumber),
            _ => None,
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row of the mutation log
#[derive(Debug, Clone, Serialize)]
pub struct MutationRecord {
    pub id: MutationId,
    pub kind: MutationKind,
    pub tier_id: TierId,
    pub class_id: Option<ClassId>,
    pub qualifier_id: Option<QualifierId>,
    pub old_limit: Option<i64>,
    pub new_limit: Option<i64>,
    /// JSON payload (SEED eligible set, EXTRA_ENTRY entry)
    pub payload: Option<String>,
    pub actor: String,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub is_processed: bool,
    /// Result text once processed ("applied", "no-op: ...", "dropped: ...")
    pub outcome: Option<String>,
    /// Reason the record is still unprocessed after a failed attempt
    pub last_error: Option<String>,
}

/// Mutation about to be appended to the log
#[derive(Debug, Clone)]
pub struct NewMutation {
    pub kind: MutationKind,
    pub tier_id: TierId,
    pub class_id: Option<ClassId>,
    pub qualifier_id: Option<QualifierId>,
    pub old_limit: Option<i64>,
    pub new_limit: Option<i64>,
    pub payload: Option<String>,
    pub actor: String,
}

impl NewMutation {
    fn bare(kind: MutationKind, tier_id: TierId, actor: &str) -> Self {
        Self {
            kind,
            tier_id,
            class_id: None,
            qualifier_id: None,
            old_limit: None,
            new_limit: None,
            payload: None,
            actor: actor.to_string(),
        }
    }

    pub fn seed(
        tier_id: TierId,
        class_id: ClassId,
        eligible: &[EligibleEntry],
        actor: &str,
    ) -> crate::Result<Self> {
        let mut mutation = Self::bare(MutationKind::Seed, tier_id, actor);
        mutation.class_id = Some(class_id);
        mutation.payload = Some(serde_json::to_string(eligible)?);
        Ok(mutation)
    }

    pub fn cut_change(
        tier_id: TierId,
        class_id: ClassId,
        old_limit: i64,
        new_limit: i64,
        actor: &str,
    ) -> Self {
        let mut mutation = Self::bare(MutationKind::CutChange, tier_id, actor);
        mutation.class_id = Some(class_id);
        mutation.old_limit = Some(old_limit);
        mutation.new_limit = Some(new_limit);
        mutation
    }

    /// WITHDRAW / REGISTER / INVITE against one qualifier row
    pub fn for_qualifier(kind: MutationKind, qualifier: &Qualifier, actor: &str) -> Self {
        let mut mutation = Self::bare(kind, qualifier.tier_id, actor);
        mutation.class_id = Some(qualifier.class_id);
        mutation.qualifier_id = Some(qualifier.id);
        mutation
    }

    pub fn cascade(national_tier: TierId, class_id: ClassId, actor: &str) -> Self {
        let mut mutation = Self::bare(MutationKind::Cascade, national_tier, actor);
        mutation.class_id = Some(class_id);
        mutation
    }

    pub fn extra_entry(
        tier_id: TierId,
        class_id: ClassId,
        entry: &EligibleEntry,
        actor: &str,
    ) -> crate::Result<Self> {
        let mut mutation = Self::bare(MutationKind::ExtraEntry, tier_id, actor);
        mutation.class_id = Some(class_id);
        mutation.payload = Some(serde_json::to_string(entry)?);
        Ok(mutation)
    }

    /// `class_id` is the destination; the source is the row's current class
    pub fn move_class(qualifier: &Qualifier, target: ClassId, actor: &str) -> Self {
        let mut mutation = Self::bare(MutationKind::MoveClass, qualifier.tier_id, actor);
        mutation.class_id = Some(target);
        mutation.qualifier_id = Some(qualifier.id);
        mutation
    }

    pub fn renumber(tier_id: TierId, class_id: ClassId, actor: &str) -> Self {
        let mut mutation = Self::bare(MutationKind::Renumber, tier_id, actor);
        mutation.class_id = Some(class_id);
        mutation
    }
}

/// Tier-level audit entry (limit changes, list hand-offs)
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub actor: String,
    pub topic: String,
    pub message: String,
}
