use std::collections::HashMap;

use uuid::Uuid;

use crate::models::{Advisory, DutyAssignment, Teacher};
use crate::workload::WorkloadIndex;

pub const HEAVY_DAY_HOURS: u8 = 7;

/// Flags duties that land on a teacher's heavy teaching day.
pub fn advise(
    assignments: &[DutyAssignment],
    teachers: &[Teacher],
    index: &WorkloadIndex,
) -> Vec<Advisory> {
    let names: HashMap<Uuid, &str> = teachers
        .iter()
        .map(|teacher| (teacher.id, teacher.name.as_str()))
        .collect();

    assignments
        .iter()
        .filter_map(|assignment| {
            let hours = index.hours(assignment.teacher_id, assignment.day);
            if hours < HEAVY_DAY_HOURS {
                return None;
            }

            let name = names
                .get(&assignment.teacher_id)
                .map(|name| name.to_string())
                .unwrap_or_else(|| assignment.teacher_id.to_string());
            Some(Advisory {
                teacher_id: assignment.teacher_id,
                day: assignment.day,
                hours,
                message: format!(
                    "{name} teaches {hours} hours on {} and also has duty; consider a swap",
                    assignment.day
                ),
            })
        })
        .collect()
}
