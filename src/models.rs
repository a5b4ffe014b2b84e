use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DutyError;

pub const WEEKDAY_COUNT: usize = 5;
pub const MAX_DAILY_HOURS: u8 = 9;
pub const MAX_WEEK_NUMBER: i32 = 53;
pub const MIN_DUTY_YEAR: i32 = 2000;
pub const MAX_DUTY_YEAR: i32 = 2100;

/// School day of the week, 0 = Monday through 4 = Friday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct Weekday(u8);

impl Weekday {
    pub const ALL: [Weekday; WEEKDAY_COUNT] =
        [Weekday(0), Weekday(1), Weekday(2), Weekday(3), Weekday(4)];

    pub fn new(day: i32) -> Result<Self, DutyError> {
        match day {
            0..=4 => Ok(Weekday(day as u8)),
            _ => Err(DutyError::Validation(format!(
                "weekday must be between 0 and 4, got {day}"
            ))),
        }
    }

    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    pub fn as_i16(self) -> i16 {
        i16::from(self.0)
    }

    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "Monday",
            1 => "Tuesday",
            2 => "Wednesday",
            3 => "Thursday",
            _ => "Friday",
        }
    }
}

impl TryFrom<i32> for Weekday {
    type Error = DutyError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Weekday::new(value)
    }
}

impl From<Weekday> for i32 {
    fn from(day: Weekday) -> Self {
        i32::from(day.0)
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn validate_week(week_number: i32) -> Result<i32, DutyError> {
    if (1..=MAX_WEEK_NUMBER).contains(&week_number) {
        Ok(week_number)
    } else {
        Err(DutyError::Validation(format!(
            "week number must be between 1 and {MAX_WEEK_NUMBER}, got {week_number}"
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct School {
    pub id: Uuid,
    pub name: String,
    pub building: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Classroom {
    pub id: Uuid,
    pub school_id: Uuid,
    pub name: String,
    pub floor: i32,
}

impl Classroom {
    pub fn label(&self) -> String {
        format!("{} (floor {})", self.name, self.floor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Teacher {
    pub id: Uuid,
    pub name: String,
    pub school_ids: Vec<Uuid>,
    pub weekly_duty_limit: u32,
}

impl Teacher {
    pub fn serves(&self, school_id: Uuid) -> bool {
        self.school_ids.contains(&school_id)
    }
}

/// Teaching hours per weekday for one teacher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TeacherWorkload {
    pub id: Uuid,
    pub teacher_id: Uuid,
    pub hours: [u8; WEEKDAY_COUNT],
}

impl TeacherWorkload {
    pub fn new(teacher_id: Uuid, hours: &[i32]) -> Result<Self, DutyError> {
        if hours.len() != WEEKDAY_COUNT {
            return Err(DutyError::Validation(format!(
                "workload needs exactly {WEEKDAY_COUNT} daily hour counts, got {}",
                hours.len()
            )));
        }

        let mut daily = [0u8; WEEKDAY_COUNT];
        for (slot, &value) in daily.iter_mut().zip(hours) {
            *slot = u8::try_from(value)
                .ok()
                .filter(|h| *h <= MAX_DAILY_HOURS)
                .ok_or_else(|| {
                    DutyError::Validation(format!(
                        "daily hours must be between 0 and {MAX_DAILY_HOURS}, got {value}"
                    ))
                })?;
        }

        Ok(Self {
            id: Uuid::new_v4(),
            teacher_id,
            hours: daily,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DutyAssignment {
    pub id: Uuid,
    pub teacher_id: Uuid,
    pub classroom_id: Uuid,
    pub day: Weekday,
    pub week_number: i32,
    pub approved: bool,
    pub approved_at: Option<DateTime<Utc>>,
    pub transformed_from: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl DutyAssignment {
    pub fn draft(
        teacher_id: Uuid,
        classroom_id: Uuid,
        day: Weekday,
        week_number: i32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            teacher_id,
            classroom_id,
            day,
            week_number,
            approved: false,
            approved_at: None,
            transformed_from: None,
            created_at,
        }
    }

    pub fn slot(&self) -> (Uuid, Weekday) {
        (self.classroom_id, self.day)
    }
}

/// Kind of recurring whole-school duty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DutyType {
    Entrance,
    Exit,
    Yard,
}

impl DutyType {
    pub fn as_str(self) -> &'static str {
        match self {
            DutyType::Entrance => "entrance",
            DutyType::Exit => "exit",
            DutyType::Yard => "yard",
        }
    }
}

impl std::str::FromStr for DutyType {
    type Err = DutyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "entrance" => Ok(DutyType::Entrance),
            "exit" => Ok(DutyType::Exit),
            "yard" => Ok(DutyType::Yard),
            other => Err(DutyError::Validation(format!("unknown duty type {other:?}"))),
        }
    }
}

impl fmt::Display for DutyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A teacher's entrance, exit or yard duty dates within one month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchoolDuty {
    pub id: Uuid,
    pub teacher_id: Uuid,
    pub month: u32,
    pub year: i32,
    pub duty_type: DutyType,
    pub dates: Vec<NaiveDate>,
}

impl SchoolDuty {
    /// Validates the month and keeps the dates sorted and unique.
    pub fn new(
        teacher_id: Uuid,
        month: u32,
        year: i32,
        duty_type: DutyType,
        mut dates: Vec<NaiveDate>,
    ) -> Result<Self, DutyError> {
        validate_month(month, year)?;
        if dates.is_empty() {
            return Err(DutyError::Validation("school duty needs at least one date".to_string()));
        }
        if let Some(stray) = dates.iter().find(|d| d.month() != month || d.year() != year) {
            return Err(DutyError::Validation(format!(
                "date {stray} is outside {year}-{month:02}"
            )));
        }
        dates.sort_unstable();
        dates.dedup();

        Ok(Self {
            id: Uuid::new_v4(),
            teacher_id,
            month,
            year,
            duty_type,
            dates,
        })
    }
}

pub fn validate_month(month: u32, year: i32) -> Result<(), DutyError> {
    if !(1..=12).contains(&month) {
        return Err(DutyError::Validation(format!(
            "month must be between 1 and 12, got {month}"
        )));
    }
    if !(MIN_DUTY_YEAR..=MAX_DUTY_YEAR).contains(&year) {
        return Err(DutyError::Validation(format!(
            "year must be between {MIN_DUTY_YEAR} and {MAX_DUTY_YEAR}, got {year}"
        )));
    }
    Ok(())
}

/// Non-blocking note that a duty falls on a heavy teaching day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Advisory {
    pub teacher_id: Uuid,
    pub day: Weekday,
    pub hours: u8,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    pub assignments: Vec<DutyAssignment>,
    pub advisories: Vec<Advisory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveEntry {
    pub week_number: i32,
    pub count: usize,
    pub approved_at: Option<DateTime<Utc>>,
    pub transformed_from: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DutyStatistic {
    pub teacher_id: Uuid,
    pub teacher_name: String,
    pub classroom_id: Uuid,
    pub classroom_name: String,
    pub total_days: usize,
    pub weeks: Vec<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateWindow {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
    }
}

/// Everything a dry run needs, loaded from one JSON document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Snapshot {
    #[serde(default)]
    pub schools: Vec<School>,
    pub classrooms: Vec<Classroom>,
    pub teachers: Vec<Teacher>,
    #[serde(default)]
    pub workloads: Vec<TeacherWorkload>,
    #[serde(default)]
    pub assignments: Vec<DutyAssignment>,
    #[serde(default)]
    pub school_duties: Vec<SchoolDuty>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekday_rejects_weekend() {
        assert!(Weekday::new(4).is_ok());
        assert!(matches!(Weekday::new(5), Err(DutyError::Validation(_))));
        assert!(matches!(Weekday::new(-1), Err(DutyError::Validation(_))));
    }

    #[test]
    fn week_number_bounds() {
        assert_eq!(validate_week(1).unwrap(), 1);
        assert_eq!(validate_week(53).unwrap(), 53);
        assert!(validate_week(0).is_err());
        assert!(validate_week(54).is_err());
    }

    #[test]
    fn workload_requires_five_days_in_range() {
        let teacher = Uuid::new_v4();
        assert!(TeacherWorkload::new(teacher, &[1, 2, 3, 4, 5]).is_ok());
        assert!(TeacherWorkload::new(teacher, &[1, 2, 3, 4]).is_err());
        assert!(TeacherWorkload::new(teacher, &[1, 2, 3, 4, 10]).is_err());
        assert!(TeacherWorkload::new(teacher, &[1, 2, -1, 4, 5]).is_err());
    }

    #[test]
    fn teacher_json_rejects_unknown_fields() {
        let json = format!(
            r#"{{"id":"{}","name":"Ada","school_ids":[],"weekly_duty_limit":2,"nickname":"A"}}"#,
            Uuid::new_v4()
        );
        assert!(serde_json::from_str::<Teacher>(&json).is_err());
    }

    #[test]
    fn assignment_json_rejects_bad_weekday() {
        let json = format!(
            r#"{{"id":"{}","teacher_id":"{}","classroom_id":"{}","day":6,"week_number":3,
                "approved":false,"approved_at":null,"transformed_from":null,
                "created_at":"2026-01-05T08:00:00Z"}}"#,
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4()
        );
        assert!(serde_json::from_str::<DutyAssignment>(&json).is_err());
    }

    #[test]
    fn school_duty_dates_stay_in_month() {
        let teacher = Uuid::new_v4();
        let date = |d| NaiveDate::from_ymd_opt(2026, 3, d).unwrap();

        let duty = SchoolDuty::new(teacher, 3, 2026, DutyType::Yard, vec![date(12), date(2), date(12)])
            .unwrap();
        assert_eq!(duty.dates, vec![date(2), date(12)]);

        let stray = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        assert!(SchoolDuty::new(teacher, 3, 2026, DutyType::Exit, vec![date(2), stray]).is_err());
        assert!(SchoolDuty::new(teacher, 13, 2026, DutyType::Exit, vec![date(2)]).is_err());
        assert!(SchoolDuty::new(teacher, 3, 2026, DutyType::Entrance, Vec::new()).is_err());
    }

    #[test]
    fn duty_type_parses_lowercase_names() {
        assert_eq!("entrance".parse::<DutyType>().unwrap(), DutyType::Entrance);
        assert_eq!(DutyType::Yard.to_string(), "yard");
        assert!(matches!("gate".parse::<DutyType>(), Err(DutyError::Validation(_))));
    }

    #[test]
    fn weekday_column_value_is_lossless() {
        assert_eq!(Weekday::ALL[4].as_i16(), 4);
        assert_eq!(Weekday::ALL[0].as_i16(), 0);
    }

    #[test]
    fn demo_snapshot_parses() {
        let snapshot: Snapshot =
            serde_json::from_str(include_str!("../demos/snapshot.json")).unwrap();
        assert_eq!(snapshot.classrooms.len(), 2);
        assert_eq!(snapshot.teachers.len(), 3);
        assert_eq!(snapshot.workloads[1].hours[1], 8);
        assert!(snapshot.assignments.is_empty());
    }

    #[test]
    fn date_window_is_inclusive() {
        let window = DateWindow {
            from: NaiveDate::from_ymd_opt(2026, 1, 5),
            to: NaiveDate::from_ymd_opt(2026, 1, 9),
        };
        assert!(window.contains(NaiveDate::from_ymd_opt(2026, 1, 5).unwrap()));
        assert!(window.contains(NaiveDate::from_ymd_opt(2026, 1, 9).unwrap()));
        assert!(!window.contains(NaiveDate::from_ymd_opt(2026, 1, 10).unwrap()));
    }
}
