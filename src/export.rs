use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use uuid::Uuid;

use crate::models::{
    ArchiveEntry, Classroom, DateWindow, DutyAssignment, DutyStatistic, School, Teacher, Weekday,
    WEEKDAY_COUNT,
};

pub const BLANK_CELL: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridRow {
    pub school: String,
    pub location: String,
    pub cells: [String; WEEKDAY_COUNT],
}

/// Week overview: one row per classroom, one column per weekday.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeekGrid {
    pub week_number: i32,
    pub rows: Vec<GridRow>,
}

/// The row in force for each slot of one week, in stored order.
///
/// A row named as another row's `transformed_from` is superseded. Otherwise a
/// draft beats any approved row, a later approval beats an earlier one, and
/// ties go to the row stored last.
pub fn current_roster(assignments: &[DutyAssignment]) -> Vec<DutyAssignment> {
    let superseded: HashSet<Uuid> = assignments.iter().filter_map(|a| a.transformed_from).collect();
    let rank = |position: usize, row: &DutyAssignment| (!row.approved, row.approved_at, position);

    let mut winners: HashMap<(Uuid, Weekday), (usize, &DutyAssignment)> = HashMap::new();
    for (position, row) in assignments.iter().enumerate() {
        if superseded.contains(&row.id) {
            continue;
        }
        match winners.entry(row.slot()) {
            Entry::Vacant(entry) => {
                entry.insert((position, row));
            }
            Entry::Occupied(mut entry) => {
                let (held, current) = *entry.get();
                if rank(position, row) > rank(held, current) {
                    entry.insert((position, row));
                }
            }
        }
    }

    let mut current: Vec<(usize, &DutyAssignment)> = winners.into_values().collect();
    current.sort_unstable_by_key(|(position, _)| *position);
    current.into_iter().map(|(_, row)| row.clone()).collect()
}

/// Approved rows still in force; drafts are ignored.
pub fn current_approved(assignments: &[DutyAssignment]) -> Vec<DutyAssignment> {
    let approved: Vec<DutyAssignment> = assignments.iter().filter(|a| a.approved).cloned().collect();
    current_roster(&approved)
}

pub fn build_grid(
    week_number: i32,
    assignments: &[DutyAssignment],
    teachers: &[Teacher],
    classrooms: &[Classroom],
    schools: &[School],
) -> WeekGrid {
    let teacher_names: HashMap<Uuid, &str> =
        teachers.iter().map(|t| (t.id, t.name.as_str())).collect();
    let school_names: HashMap<Uuid, &str> =
        schools.iter().map(|s| (s.id, s.name.as_str())).collect();
    let mut cells: HashMap<(Uuid, Weekday), &str> = HashMap::new();
    for assignment in assignments.iter().filter(|a| a.week_number == week_number) {
        let name = teacher_names
            .get(&assignment.teacher_id)
            .copied()
            .unwrap_or(BLANK_CELL);
        cells.insert(assignment.slot(), name);
    }

    let rows = classrooms
        .iter()
        .map(|room| GridRow {
            school: school_names
                .get(&room.school_id)
                .map(|name| name.to_string())
                .unwrap_or_default(),
            location: room.label(),
            cells: Weekday::ALL.map(|day| {
                cells
                    .get(&(room.id, day))
                    .copied()
                    .unwrap_or(BLANK_CELL)
                    .to_string()
            }),
        })
        .collect();

    WeekGrid { week_number, rows }
}

pub fn write_grid_csv(grid: &WeekGrid, path: &Path) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec!["school", "location"];
    header.extend(Weekday::ALL.iter().map(|day| day.name()));
    writer.write_record(&header)?;

    for row in &grid.rows {
        let mut record = vec![row.school.as_str(), row.location.as_str()];
        record.extend(row.cells.iter().map(String::as_str));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

/// Approved history grouped by week, newest week first.
pub fn archive(assignments: &[DutyAssignment]) -> Vec<ArchiveEntry> {
    let mut weeks: BTreeMap<i32, ArchiveEntry> = BTreeMap::new();
    for assignment in assignments.iter().filter(|a| a.approved) {
        let entry = weeks
            .entry(assignment.week_number)
            .or_insert_with(|| ArchiveEntry {
                week_number: assignment.week_number,
                count: 0,
                approved_at: None,
                transformed_from: None,
            });
        entry.count += 1;
        entry.approved_at = entry.approved_at.max(assignment.approved_at);
        if entry.transformed_from.is_none() {
            entry.transformed_from = assignment.transformed_from;
        }
    }
    weeks.into_values().rev().collect()
}

/// Approved duty days per (teacher, classroom) within the approval window.
pub fn statistics(
    assignments: &[DutyAssignment],
    teachers: &[Teacher],
    classrooms: &[Classroom],
    window: DateWindow,
) -> Vec<DutyStatistic> {
    let teacher_names: HashMap<Uuid, &str> =
        teachers.iter().map(|t| (t.id, t.name.as_str())).collect();
    let room_names: HashMap<Uuid, &str> =
        classrooms.iter().map(|c| (c.id, c.name.as_str())).collect();

    let mut stats: HashMap<(Uuid, Uuid), DutyStatistic> = HashMap::new();
    for assignment in assignments.iter().filter(|a| a.approved) {
        let Some(approved_at) = assignment.approved_at else {
            continue;
        };
        if !window.contains(approved_at.date_naive()) {
            continue;
        }

        let entry = stats
            .entry((assignment.teacher_id, assignment.classroom_id))
            .or_insert_with(|| DutyStatistic {
                teacher_id: assignment.teacher_id,
                teacher_name: teacher_names
                    .get(&assignment.teacher_id)
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| assignment.teacher_id.to_string()),
                classroom_id: assignment.classroom_id,
                classroom_name: room_names
                    .get(&assignment.classroom_id)
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| assignment.classroom_id.to_string()),
                total_days: 0,
                weeks: Vec::new(),
            });
        entry.total_days += 1;
        if !entry.weeks.contains(&assignment.week_number) {
            entry.weeks.push(assignment.week_number);
        }
    }

    let mut values: Vec<DutyStatistic> = stats.into_values().collect();
    for value in &mut values {
        value.weeks.sort_unstable();
    }
    values.sort_by(|a, b| {
        b.total_days
            .cmp(&a.total_days)
            .then_with(|| a.teacher_name.cmp(&b.teacher_name))
            .then_with(|| a.classroom_name.cmp(&b.classroom_name))
    });
    values
}
