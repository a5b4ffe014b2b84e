use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Classroom, DutyAssignment, Teacher, Weekday};
use crate::selection::{eligible, select, DutyTally};
use crate::workload::WorkloadIndex;

/// Classrooms grouped by school, schools in order of first appearance.
pub fn group_by_school(classrooms: &[Classroom]) -> Vec<(Uuid, Vec<&Classroom>)> {
    let mut groups: Vec<(Uuid, Vec<&Classroom>)> = Vec::new();
    for classroom in classrooms {
        match groups.iter_mut().find(|(school, _)| *school == classroom.school_id) {
            Some((_, rooms)) => rooms.push(classroom),
            None => groups.push((classroom.school_id, vec![classroom])),
        }
    }
    groups
}

/// Builds a fresh draft batch for one week.
///
/// Each school only draws on its affiliated teachers, but the tally is shared
/// so a teacher serving several schools still hits one weekly cap.
pub fn generate_batch(
    week_number: i32,
    teachers: &[Teacher],
    index: &WorkloadIndex,
    classrooms: &[Classroom],
    created_at: DateTime<Utc>,
) -> Vec<DutyAssignment> {
    let mut tally = DutyTally::default();
    let mut claimed: HashSet<(Uuid, Weekday)> = HashSet::new();
    let mut batch = Vec::new();

    for (school_id, rooms) in group_by_school(classrooms) {
        for day in Weekday::ALL {
            for room in &rooms {
                if claimed.contains(&(room.id, day)) {
                    continue;
                }

                let candidates = eligible(teachers, &tally, Some(school_id));
                let Some(chosen) = select(&candidates, &tally, index, day) else {
                    debug!(%school_id, classroom = %room.id, %day, "no eligible teacher, slot left open");
                    continue;
                };

                batch.push(DutyAssignment::draft(
                    chosen.id,
                    room.id,
                    day,
                    week_number,
                    created_at,
                ));
                tally.record(chosen.id);
                claimed.insert((room.id, day));
            }
        }
    }

    batch
}

/// Re-runs selection over an approved batch, keeping each row's slot.
///
/// Candidates are drawn from the whole roster regardless of school. Rows
/// nobody can cover are dropped.
pub fn transform_batch(
    sources: &[DutyAssignment],
    teachers: &[Teacher],
    index: &WorkloadIndex,
    created_at: DateTime<Utc>,
) -> Vec<DutyAssignment> {
    let mut tally = DutyTally::default();
    let mut batch = Vec::with_capacity(sources.len());

    for source in sources {
        let candidates = eligible(teachers, &tally, None);
        let Some(chosen) = select(&candidates, &tally, index, source.day) else {
            warn!(source = %source.id, day = %source.day, "no eligible teacher, dropping transformed row");
            continue;
        };

        let mut assignment = DutyAssignment::draft(
            chosen.id,
            source.classroom_id,
            source.day,
            source.week_number,
            created_at,
        );
        assignment.transformed_from = Some(source.id);
        tally.record(chosen.id);
        batch.push(assignment);
    }

    batch
}
