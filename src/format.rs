use itertools::Itertools;

use crate::data::{AssignmentRecord, ErrorBody};
use crate::error::TimetableError;
use crate::index::ConstraintIndex;
use crate::model::Problem;
use crate::solver::Schedule;

/// Flattens a schedule into table rows, ordered by class (input order) and
/// then by slot (day, period).
pub fn records(
    problem: &Problem,
    index: &ConstraintIndex,
    schedule: &Schedule,
) -> Vec<AssignmentRecord> {
    let slot_rank: Vec<usize> = {
        let mut rank = vec![usize::MAX; problem.slots.len()];
        for (pos, &slot) in index.available_slots.iter().enumerate() {
            rank[slot] = pos;
        }
        rank
    };

    schedule
        .lessons
        .iter()
        .sorted_by_key(|lesson| (lesson.class, slot_rank[lesson.slot]))
        .map(|lesson| AssignmentRecord {
            class: problem.classes[lesson.class].name.clone(),
            staff: problem.staff[lesson.staff].name.clone(),
            subject: problem.subject_name(lesson.subject).to_string(),
            slot: problem.slots[lesson.slot].name.clone(),
        })
        .collect()
}

/// The body shown in the caller's error banner.
pub fn error_body(error: &TimetableError) -> ErrorBody {
    ErrorBody {
        error: error.public_message(),
        kind: error.kind().to_string(),
    }
}
