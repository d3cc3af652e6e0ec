//! Team entries
//!
//! A team is ranked like an individual once its seed value and tiebreak key
//! are derived from its members.

use qualrank_common::db::EligibleEntry;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Members counted towards the team seed value
pub const TEAM_SCORING_MEMBERS: usize = 3;

/// Scores a member needs before their average counts
pub const MIN_MEMBER_SCORES: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMember {
    pub subject_id: String,
    pub average: Decimal,
    pub score_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamEntry {
    pub team_id: String,
    pub home_org_id: i64,
    pub members: Vec<TeamMember>,
    #[serde(default)]
    pub champion_label: String,
}

impl TeamEntry {
    /// Averages of members with enough scores, best first
    fn qualifying_averages(&self) -> Vec<Decimal> {
        let mut averages: Vec<Decimal> = self
            .members
            .iter()
            .filter(|m| m.score_count >= MIN_MEMBER_SCORES)
            .map(|m| m.average)
            .collect();
        averages.sort_unstable_by(|a, b| b.cmp(a));
        averages
    }

    /// Sum of the three strongest qualifying averages; 0 with fewer than three
    pub fn seed_value(&self) -> Decimal {
        let averages = self.qualifying_averages();
        if averages.len() < TEAM_SCORING_MEMBERS {
            return Decimal::ZERO;
        }
        averages.iter().take(TEAM_SCORING_MEMBERS).copied().sum()
    }

    /// Qualifying averages best first, each as 5-digit thousandths
    pub fn tiebreak_key(&self) -> String {
        self.qualifying_averages()
            .iter()
            .map(|avg| {
                let thousandths = (*avg * Decimal::ONE_THOUSAND)
                    .trunc()
                    .to_i64()
                    .unwrap_or(0)
                    .clamp(0, 99_999);
                format!("{:05}", thousandths)
            })
            .collect()
    }

    pub fn into_eligible(self) -> EligibleEntry {
        EligibleEntry {
            seed_value: self.seed_value(),
            tiebreak_key: self.tiebreak_key(),
            subject_id: self.team_id,
            home_org_id: self.home_org_id,
            champion_label: self.champion_label,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str, avg: &str, scores: usize) -> TeamMember {
        TeamMember {
            subject_id: id.to_string(),
            average: avg.parse().unwrap(),
            score_count: scores,
        }
    }

    fn team(members: Vec<TeamMember>) -> TeamEntry {
        TeamEntry {
            team_id: "team-1".to_string(),
            home_org_id: 1050,
            members,
            champion_label: String::new(),
        }
    }

    #[test]
    fn test_seed_value_sums_three_strongest() {
        let entry = team(vec![
            member("a", "8.500", 6),
            member("b", "9.250", 6),
            member("c", "7.000", 6),
            member("d", "9.000", 6),
        ]);
        assert_eq!(entry.seed_value(), "26.750".parse::<Decimal>().unwrap());
    }

    #[test]
    fn test_seed_value_zero_below_three_members() {
        let entry = team(vec![member("a", "9.500", 6), member("b", "9.250", 6)]);
        assert_eq!(entry.seed_value(), Decimal::ZERO);
    }

    #[test]
    fn test_member_without_enough_scores_ignored() {
        let entry = team(vec![
            member("a", "9.500", 6),
            member("b", "9.250", 2),
            member("c", "9.000", 6),
        ]);
        assert_eq!(entry.seed_value(), Decimal::ZERO);
        assert_eq!(entry.tiebreak_key(), "0950009000");
    }

    #[test]
    fn test_into_eligible_uses_team_id() {
        let entry = team(vec![
            member("a", "9.500", 6),
            member("b", "9.250", 6),
            member("c", "9.000", 6),
        ]);
        let eligible = entry.into_eligible();
        assert_eq!(eligible.subject_id, "team-1");
        assert_eq!(eligible.tiebreak_key, "095000925009000");
        assert_eq!(eligible.seed_value, "27.750".parse::<Decimal>().unwrap());
    }
}
