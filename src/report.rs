use std::fmt::Write;

use uuid::Uuid;

use crate::export::WeekGrid;
use crate::models::{Advisory, DutyAssignment, Teacher, Weekday};

#[derive(Debug, Clone)]
pub struct DutyLoad {
    pub teacher_name: String,
    pub duties: usize,
    pub limit: u32,
}

pub fn summarize_by_teacher(assignments: &[DutyAssignment], teachers: &[Teacher]) -> Vec<DutyLoad> {
    let count = |id: Uuid| assignments.iter().filter(|a| a.teacher_id == id).count();

    let mut loads: Vec<DutyLoad> = teachers
        .iter()
        .map(|teacher| DutyLoad {
            teacher_name: teacher.name.clone(),
            duties: count(teacher.id),
            limit: teacher.weekly_duty_limit,
        })
        .collect();

    loads.sort_by(|a, b| b.duties.cmp(&a.duties));
    loads
}

pub fn build_report(
    status: &str,
    grid: &WeekGrid,
    assignments: &[DutyAssignment],
    teachers: &[Teacher],
    advisories: &[Advisory],
) -> String {
    let loads = summarize_by_teacher(assignments, teachers);
    let slots = grid.rows.len() * Weekday::ALL.len();

    let mut output = String::new();

    let _ = writeln!(output, "# Duty Roster, Week {}", grid.week_number);
    let _ = writeln!(
        output,
        "Status: {} ({} of {} slots filled)",
        status,
        assignments.len(),
        slots
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Duty Load");

    if loads.is_empty() {
        let _ = writeln!(output, "No teachers on the roster.");
    } else {
        for load in loads.iter() {
            let _ = writeln!(
                output,
                "- {}: {} of {} duties",
                load.teacher_name, load.duties, load.limit
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Schedule");

    if grid.rows.is_empty() {
        let _ = writeln!(output, "No duty locations defined.");
    } else {
        let days: Vec<&str> = Weekday::ALL.iter().map(|d| d.name()).collect();
        let _ = writeln!(output, "| School | Location | {} |", days.join(" | "));
        let _ = writeln!(output, "|---|---|{}", "---|".repeat(days.len()));
        for row in grid.rows.iter() {
            let _ = writeln!(
                output,
                "| {} | {} | {} |",
                row.school,
                row.location,
                row.cells.join(" | ")
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Advisories");

    if advisories.is_empty() {
        let _ = writeln!(output, "No duties fall on heavy teaching days.");
    } else {
        for advisory in advisories.iter() {
            let _ = writeln!(output, "- {}", advisory.message);
        }
    }

    output
}
