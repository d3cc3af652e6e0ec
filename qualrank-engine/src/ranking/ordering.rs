//! Admission ordering
//!
//! Best first: higher `seed_value`, then higher `tiebreak_key` (fixed-width
//! score fields compare numerically as strings), then `subject_id` ascending
//! so that fully tied entries still land in a deterministic order.

use qualrank_common::db::{EligibleEntry, Qualifier};
use rust_decimal::Decimal;
use std::cmp::Ordering;

/// Anything that can be placed in a qualification list
pub trait Ranked {
    fn seed_value(&self) -> Decimal;
    fn tiebreak_key(&self) -> &str;
    fn subject_id(&self) -> &str;
}

impl Ranked for Qualifier {
    fn seed_value(&self) -> Decimal {
        self.seed_value
    }

    fn tiebreak_key(&self) -> &str {
        &self.tiebreak_key
    }

    fn subject_id(&self) -> &str {
        &self.subject_id
    }
}

impl Ranked for EligibleEntry {
    fn seed_value(&self) -> Decimal {
        self.seed_value
    }

    fn tiebreak_key(&self) -> &str {
        &self.tiebreak_key
    }

    fn subject_id(&self) -> &str {
        &self.subject_id
    }
}

/// Compare on the ranking keys only; `Less` means `a` is stronger
pub fn compare_strength<A: Ranked + ?Sized, B: Ranked + ?Sized>(a: &A, b: &B) -> Ordering {
    b.seed_value()
        .cmp(&a.seed_value())
        .then_with(|| b.tiebreak_key().cmp(a.tiebreak_key()))
}

/// Full admission ordering; `Less` means `a` is placed before `b`
pub fn admission_order<A: Ranked + ?Sized, B: Ranked + ?Sized>(a: &A, b: &B) -> Ordering {
    compare_strength(a, b).then_with(|| a.subject_id().cmp(b.subject_id()))
}

/// Tiebreak key from individual scores: best first, each zero-padded to 3 digits
pub fn tiebreak_from_scores(scores: &[u32]) -> String {
    let mut sorted = scores.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    sorted.iter().map(|score| format!("{:03}", score)).collect()
}
