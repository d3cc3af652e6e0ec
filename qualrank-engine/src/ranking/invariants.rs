//! Consistency checks run on a class after every transition

use qualrank_common::db::{ParticipationStatus, Qualifier};

/// Verify one class's rows.
///
/// - `admission_rank == 0` exactly for withdrawn rows
/// - non-withdrawn `order_index` values are exactly `1..=M`
/// - non-withdrawn `admission_rank` equals `order_index`
///
/// Returns a description of every violation found.
pub fn check_class(rows: &[Qualifier]) -> Result<(), String> {
    let mut problems = Vec::new();
    let mut positions = Vec::new();

    for row in rows {
        let withdrawn = row.participation == ParticipationStatus::Withdrawn;
        if withdrawn != (row.admission_rank == 0) {
            problems.push(format!(
                "qualifier {} has rank {} with status {}",
                row.id,
                row.admission_rank,
                row.participation.as_str()
            ));
        }
        if withdrawn {
            continue;
        }
        if row.admission_rank != row.order_index {
            problems.push(format!(
                "qualifier {} has rank {} but order {}",
                row.id, row.admission_rank, row.order_index
            ));
        }
        positions.push(row.order_index);
    }

    positions.sort_unstable();
    for (expected, actual) in (1..).zip(positions.iter()) {
        if *actual != expected {
            problems.push(format!(
                "order_index sequence broken at position {}: found {}",
                expected, actual
            ));
            break;
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems.join("; "))
    }
}
