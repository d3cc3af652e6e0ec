//! Regional to national list hand-off
//!
//! The national list for a class is seeded from every child regional tier's
//! admitted rows (ranked inside the regional limit, not withdrawn). The best
//! ranked of those rows per region carries "Champion <region>" into the
//! national seed; labels from the regional seed are not carried over.

use crate::error::TransitionError;
use crate::store::RankingStore;
use qualrank_common::db::{ClassId, EligibleEntry, Tier};
use tracing::debug;

pub async fn national_seed<S>(
    store: &mut S,
    national: &Tier,
    class: ClassId,
) -> Result<Vec<EligibleEntry>, TransitionError>
where
    S: RankingStore + ?Sized,
{
    let regions = store.child_tiers(national.id).await?;
    let mut eligible = Vec::new();

    for region in regions {
        let limit = store.get_limit(region.id, class).await?;
        let admitted = store.admitted_rows(region.id, class, limit).await?;
        debug!(
            region = %region.id,
            class = %class,
            limit,
            admitted = admitted.len(),
            "Collecting regional list"
        );

        for (pos, row) in admitted.into_iter().enumerate() {
            let champion_label = if pos == 0 {
                format!("Champion {}", region.name)
            } else {
                String::new()
            };
            eligible.push(EligibleEntry {
                subject_id: row.subject_id,
                home_org_id: row.home_org_id,
                seed_value: row.seed_value,
                tiebreak_key: row.tiebreak_key,
                champion_label,
            });
        }
    }

    Ok(eligible)
}
