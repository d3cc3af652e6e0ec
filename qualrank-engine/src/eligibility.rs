//! Eligible set for a first-tier SEED, built from prior-round results

use crate::ranking::{admission_order, tiebreak_from_scores};
use qualrank_common::db::EligibleEntry;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Scores a candidate needs in the prior round to be eligible
pub const DEFAULT_MIN_SCORES: usize = 6;

/// Prior-round result of one subject
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCandidate {
    pub subject_id: String,
    pub home_org_id: i64,
    /// Pool (region) the subject competed in
    pub pool: String,
    pub average: Decimal,
    pub scores: Vec<u32>,
}

/// Filter and label candidates.
///
/// Candidates with fewer than `min_scores` scores are dropped. The strongest
/// remaining candidate of each pool is labelled "Champion <pool>".
pub fn build_eligible(candidates: Vec<RawCandidate>, min_scores: usize) -> Vec<EligibleEntry> {
    let total = candidates.len();
    let mut entries: Vec<(String, EligibleEntry)> = candidates
        .into_iter()
        .filter(|c| c.scores.len() >= min_scores)
        .map(|c| {
            let entry = EligibleEntry {
                tiebreak_key: tiebreak_from_scores(&c.scores),
                subject_id: c.subject_id,
                home_org_id: c.home_org_id,
                seed_value: c.average,
                champion_label: String::new(),
            };
            (c.pool, entry)
        })
        .collect();

    let mut best_per_pool: BTreeMap<&str, usize> = BTreeMap::new();
    for (idx, (pool, entry)) in entries.iter().enumerate() {
        match best_per_pool.get(pool.as_str()) {
            Some(&best) if admission_order(entry, &entries[best].1).is_ge() => {}
            _ => {
                best_per_pool.insert(pool.as_str(), idx);
            }
        }
    }
    let champions: Vec<(usize, String)> = best_per_pool
        .into_iter()
        .map(|(pool, idx)| (idx, format!("Champion {}", pool)))
        .collect();
    for (idx, label) in champions {
        entries[idx].1.champion_label = label;
    }

    debug!(
        candidates = total,
        eligible = entries.len(),
        "Eligible set built"
    );
    entries.into_iter().map(|(_, entry)| entry).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(subject: &str, pool: &str, avg: &str, scores: usize) -> RawCandidate {
        RawCandidate {
            subject_id: subject.to_string(),
            home_org_id: 1000,
            pool: pool.to_string(),
            average: avg.parse().unwrap(),
            scores: vec![280; scores],
        }
    }

    #[test]
    fn test_insufficient_history_excluded() {
        let eligible = build_eligible(
            vec![
                candidate("a", "North", "9.100", 6),
                candidate("b", "North", "9.300", 5),
            ],
            DEFAULT_MIN_SCORES,
        );
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].subject_id, "a");
        assert_eq!(eligible[0].champion_label, "Champion North");
    }

    #[test]
    fn test_one_champion_per_pool() {
        let eligible = build_eligible(
            vec![
                candidate("a", "North", "9.100", 6),
                candidate("b", "North", "9.300", 6),
                candidate("c", "South", "8.000", 6),
                candidate("d", "South", "7.500", 6),
            ],
            DEFAULT_MIN_SCORES,
        );
        let labels: Vec<_> = eligible
            .iter()
            .map(|e| (e.subject_id.as_str(), e.champion_label.as_str()))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("a", ""),
                ("b", "Champion North"),
                ("c", "Champion South"),
                ("d", ""),
            ]
        );
    }

    #[test]
    fn test_tiebreak_built_from_scores() {
        let mut raw = candidate("a", "North", "9.100", 0);
        raw.scores = vec![270, 291, 285];
        let eligible = build_eligible(vec![raw], 3);
        assert_eq!(eligible[0].tiebreak_key, "291285270");
    }
}
