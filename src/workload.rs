use std::collections::HashMap;

use uuid::Uuid;

use crate::models::{TeacherWorkload, Weekday, WEEKDAY_COUNT};

/// Teaching hours per (teacher, weekday); unknown teachers teach zero hours.
#[derive(Debug, Clone, Default)]
pub struct WorkloadIndex {
    hours: HashMap<Uuid, [u8; WEEKDAY_COUNT]>,
}

impl WorkloadIndex {
    pub fn build(workloads: &[TeacherWorkload]) -> Self {
        let hours = workloads
            .iter()
            .map(|workload| (workload.teacher_id, workload.hours))
            .collect();
        Self { hours }
    }

    pub fn hours(&self, teacher_id: Uuid, day: Weekday) -> u8 {
        self.hours
            .get(&teacher_id)
            .map_or(0, |week| week[day.index()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_index_defaults_to_zero() {
        let index = WorkloadIndex::build(&[]);
        for day in Weekday::ALL {
            assert_eq!(index.hours(Uuid::new_v4(), day), 0);
        }
    }

    #[test]
    fn looks_up_hours_by_weekday() {
        let teacher = Uuid::new_v4();
        let workload = TeacherWorkload::new(teacher, &[1, 2, 3, 8, 0]).unwrap();
        let index = WorkloadIndex::build(&[workload]);

        assert_eq!(index.hours(teacher, Weekday::ALL[0]), 1);
        assert_eq!(index.hours(teacher, Weekday::ALL[3]), 8);
        assert_eq!(index.hours(teacher, Weekday::ALL[4]), 0);
        assert_eq!(index.hours(Uuid::new_v4(), Weekday::ALL[3]), 0);
    }
}
