use std::collections::HashMap;

use uuid::Uuid;

use crate::models::{Teacher, Weekday};
use crate::workload::WorkloadIndex;

/// Duties handed out so far in one pass, keyed by teacher.
#[derive(Debug, Clone, Default)]
pub struct DutyTally {
    counts: HashMap<Uuid, u32>,
}

impl DutyTally {
    pub fn count(&self, teacher_id: Uuid) -> u32 {
        self.counts.get(&teacher_id).copied().unwrap_or(0)
    }

    pub fn record(&mut self, teacher_id: Uuid) {
        *self.counts.entry(teacher_id).or_insert(0) += 1;
    }
}

/// Teachers still under their weekly cap, in roster order.
///
/// With `school_id`, only teachers affiliated with that school qualify.
pub fn eligible<'a>(
    teachers: &'a [Teacher],
    tally: &DutyTally,
    school_id: Option<Uuid>,
) -> Vec<&'a Teacher> {
    teachers
        .iter()
        .filter(|teacher| tally.count(teacher.id) < teacher.weekly_duty_limit)
        .filter(|teacher| school_id.map_or(true, |school| teacher.serves(school)))
        .collect()
}

/// Picks the teacher with the fewest duties, then the lightest teaching day.
///
/// Ties keep roster order: the earliest candidate wins.
pub fn select<'a>(
    candidates: &[&'a Teacher],
    tally: &DutyTally,
    index: &WorkloadIndex,
    day: Weekday,
) -> Option<&'a Teacher> {
    candidates
        .iter()
        .copied()
        .min_by_key(|teacher| (tally.count(teacher.id), index.hours(teacher.id, day)))
}
