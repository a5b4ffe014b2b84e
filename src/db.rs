use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Row};
use uuid::Uuid;

use crate::error::{DutyError, DutyResult};
use crate::models::{
    Classroom, DutyAssignment, DutyType, School, SchoolDuty, Teacher, TeacherWorkload, Weekday,
};
use crate::store::{DutyStore, WeekGuard};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool, owner: Uuid) -> anyhow::Result<()> {
    let schools = vec![("Cumhuriyet Ilkokulu", "Block A"), ("Ataturk Ortaokulu", "Block B")];
    let mut school_ids = Vec::new();

    for (name, building) in schools {
        let id: Uuid = sqlx::query(
            r#"
            INSERT INTO duty_roster.schools (id, owner_id, name, building)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (owner_id, name) DO UPDATE
            SET building = EXCLUDED.building
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(owner)
        .bind(name)
        .bind(building)
        .fetch_one(pool)
        .await?
        .get("id");
        school_ids.push(id);
    }

    let classrooms = vec![
        (0, "Garden", 0),
        (0, "Ground Corridor", 0),
        (0, "First Floor Corridor", 1),
        (1, "Canteen", 0),
        (1, "Upper Corridor", 2),
    ];

    for (school, name, floor) in classrooms {
        sqlx::query(
            r#"
            INSERT INTO duty_roster.classrooms (id, owner_id, school_id, name, floor)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (school_id, name) DO UPDATE
            SET floor = EXCLUDED.floor
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(owner)
        .bind(school_ids[school])
        .bind(name)
        .bind(floor)
        .execute(pool)
        .await?;
    }

    let teachers = vec![
        ("Ayse Yilmaz", vec![0], 3, [6, 4, 7, 2, 5]),
        ("Mehmet Demir", vec![0, 1], 4, [3, 8, 2, 6, 4]),
        ("Elif Kaya", vec![0], 2, [7, 7, 3, 3, 1]),
        ("Can Ozturk", vec![1], 3, [2, 2, 5, 9, 0]),
        ("Zeynep Arslan", vec![1], 3, [4, 0, 6, 1, 7]),
    ];

    for (name, schools, limit, hours) in teachers {
        let affiliated: Vec<Uuid> = schools.iter().map(|i: &usize| school_ids[*i]).collect();
        let teacher_id: Uuid = sqlx::query(
            r#"
            INSERT INTO duty_roster.teachers (id, owner_id, name, school_ids, weekly_duty_limit)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (owner_id, name) DO UPDATE
            SET school_ids = EXCLUDED.school_ids, weekly_duty_limit = EXCLUDED.weekly_duty_limit
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(owner)
        .bind(name)
        .bind(affiliated)
        .bind(limit)
        .fetch_one(pool)
        .await?
        .get("id");

        let workload = TeacherWorkload::new(teacher_id, &hours)?;
        upsert_workload(pool, owner, &workload).await?;
    }

    Ok(())
}

async fn upsert_workload<'e, E>(
    executor: E,
    owner: Uuid,
    workload: &TeacherWorkload,
) -> DutyResult<u64>
where
    E: PgExecutor<'e>,
{
    let hours: Vec<i16> = workload.hours.iter().map(|h| i16::from(*h)).collect();
    let result = sqlx::query(
        r#"
        INSERT INTO duty_roster.teacher_workloads (id, owner_id, teacher_id, hours)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (teacher_id) DO UPDATE
        SET hours = EXCLUDED.hours
        "#,
    )
    .bind(workload.id)
    .bind(owner)
    .bind(workload.teacher_id)
    .bind(hours)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

pub async fn import_workloads(
    pool: &PgPool,
    owner: Uuid,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    #[serde(deny_unknown_fields)]
    struct CsvRow {
        teacher_name: String,
        monday: i32,
        tuesday: i32,
        wednesday: i32,
        thursday: i32,
        friday: i32,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut imported = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result?;
        let teacher_id: Uuid = sqlx::query(
            "SELECT id FROM duty_roster.teachers WHERE owner_id = $1 AND name = $2",
        )
        .bind(owner)
        .bind(&row.teacher_name)
        .fetch_optional(pool)
        .await?
        .map(|r| r.get::<Uuid, _>("id"))
        .ok_or_else(|| DutyError::NotFound(format!("teacher {:?}", row.teacher_name)))
        .with_context(|| format!("csv record {}", line + 1))?;

        let hours = [row.monday, row.tuesday, row.wednesday, row.thursday, row.friday];
        let workload = TeacherWorkload::new(teacher_id, &hours)
            .with_context(|| format!("csv record {}", line + 1))?;

        if upsert_workload(pool, owner, &workload).await? > 0 {
            imported += 1;
        }
    }

    Ok(imported)
}

/// PostgreSQL-backed duty store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn corrupt(what: &str, detail: impl std::fmt::Display) -> DutyError {
    DutyError::Validation(format!("stored {what} is invalid: {detail}"))
}

/// First key of the two-key advisory lock guarding an owner's week.
fn advisory_key(owner: Uuid) -> i32 {
    owner
        .as_bytes()
        .chunks_exact(4)
        .fold(0, |key, chunk| {
            key ^ i32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
        })
}

fn int_column(what: &str, value: u32) -> DutyResult<i32> {
    i32::try_from(value).map_err(|_| DutyError::Validation(format!("{what} {value} is too large")))
}

fn school_duty_from_row(row: &PgRow) -> DutyResult<SchoolDuty> {
    let month: i32 = row.get("month");
    let month = u32::try_from(month).map_err(|e| corrupt("school duty month", e))?;
    let duty_type: String = row.get("duty_type");
    let duty_type: DutyType = duty_type.parse().map_err(|e| corrupt("school duty", e))?;
    let dates: Vec<NaiveDate> = row.get("dates");

    let mut duty = SchoolDuty::new(row.get("teacher_id"), month, row.get("year"), duty_type, dates)
        .map_err(|e| corrupt("school duty", e))?;
    duty.id = row.get("id");
    Ok(duty)
}

fn assignment_from_row(row: &PgRow) -> DutyResult<DutyAssignment> {
    let day: i16 = row.get("day");
    Ok(DutyAssignment {
        id: row.get("id"),
        teacher_id: row.get("teacher_id"),
        classroom_id: row.get("classroom_id"),
        day: Weekday::new(i32::from(day)).map_err(|e| corrupt("assignment", e))?,
        week_number: row.get("week_number"),
        approved: row.get("approved"),
        approved_at: row.get("approved_at"),
        transformed_from: row.get("transformed_from"),
        created_at: row.get("created_at"),
    })
}

const ASSIGNMENT_COLUMNS: &str = "id, teacher_id, classroom_id, day, week_number, approved, \
     approved_at, transformed_from, created_at";

#[async_trait]
impl DutyStore for PgStore {
    async fn lock_week(&self, owner: Uuid, week_number: i32) -> DutyResult<WeekGuard> {
        // Released when the transaction ends, which dropping the guard triggers.
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
            .bind(advisory_key(owner))
            .bind(week_number)
            .execute(&mut *tx)
            .await?;
        Ok(WeekGuard::new(tx))
    }

    async fn schools(&self, owner: Uuid) -> DutyResult<Vec<School>> {
        let rows = sqlx::query(
            "SELECT id, name, building FROM duty_roster.schools WHERE owner_id = $1 ORDER BY seq",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| School {
                id: row.get("id"),
                name: row.get("name"),
                building: row.get("building"),
            })
            .collect())
    }

    async fn classrooms(&self, owner: Uuid) -> DutyResult<Vec<Classroom>> {
        let rows = sqlx::query(
            "SELECT id, school_id, name, floor FROM duty_roster.classrooms \
             WHERE owner_id = $1 ORDER BY seq",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Classroom {
                id: row.get("id"),
                school_id: row.get("school_id"),
                name: row.get("name"),
                floor: row.get("floor"),
            })
            .collect())
    }

    async fn teachers(&self, owner: Uuid) -> DutyResult<Vec<Teacher>> {
        let rows = sqlx::query(
            "SELECT id, name, school_ids, weekly_duty_limit FROM duty_roster.teachers \
             WHERE owner_id = $1 ORDER BY seq",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        let mut teachers = Vec::with_capacity(rows.len());
        for row in rows {
            let limit: i32 = row.get("weekly_duty_limit");
            teachers.push(Teacher {
                id: row.get("id"),
                name: row.get("name"),
                school_ids: row.get("school_ids"),
                weekly_duty_limit: u32::try_from(limit).map_err(|e| corrupt("duty limit", e))?,
            });
        }
        Ok(teachers)
    }

    async fn workloads(&self, owner: Uuid) -> DutyResult<Vec<TeacherWorkload>> {
        let rows = sqlx::query(
            "SELECT id, teacher_id, hours FROM duty_roster.teacher_workloads WHERE owner_id = $1",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        let mut workloads = Vec::with_capacity(rows.len());
        for row in rows {
            let hours: Vec<i16> = row.get("hours");
            let hours: Vec<i32> = hours.into_iter().map(i32::from).collect();
            let mut workload = TeacherWorkload::new(row.get("teacher_id"), &hours)
                .map_err(|e| corrupt("workload", e))?;
            workload.id = row.get("id");
            workloads.push(workload);
        }
        Ok(workloads)
    }

    async fn save_school(&self, owner: Uuid, school: &School) -> DutyResult<()> {
        sqlx::query(
            r#"
            INSERT INTO duty_roster.schools (id, owner_id, name, building)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, building = EXCLUDED.building
            WHERE duty_roster.schools.owner_id = EXCLUDED.owner_id
            "#,
        )
        .bind(school.id)
        .bind(owner)
        .bind(&school.name)
        .bind(&school.building)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_school(&self, owner: Uuid, id: Uuid) -> DutyResult<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM duty_roster.schools WHERE owner_id = $1 AND id = $2")
            .bind(owner)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            "UPDATE duty_roster.teachers SET school_ids = array_remove(school_ids, $2) \
             WHERE owner_id = $1",
        )
        .bind(owner)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn save_classroom(&self, owner: Uuid, classroom: &Classroom) -> DutyResult<()> {
        sqlx::query(
            r#"
            INSERT INTO duty_roster.classrooms (id, owner_id, school_id, name, floor)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET school_id = EXCLUDED.school_id, name = EXCLUDED.name, floor = EXCLUDED.floor
            WHERE duty_roster.classrooms.owner_id = EXCLUDED.owner_id
            "#,
        )
        .bind(classroom.id)
        .bind(owner)
        .bind(classroom.school_id)
        .bind(&classroom.name)
        .bind(classroom.floor)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_classroom(&self, owner: Uuid, id: Uuid) -> DutyResult<bool> {
        let result =
            sqlx::query("DELETE FROM duty_roster.classrooms WHERE owner_id = $1 AND id = $2")
                .bind(owner)
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_teacher(&self, owner: Uuid, teacher: &Teacher) -> DutyResult<()> {
        sqlx::query(
            r#"
            INSERT INTO duty_roster.teachers (id, owner_id, name, school_ids, weekly_duty_limit)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                school_ids = EXCLUDED.school_ids,
                weekly_duty_limit = EXCLUDED.weekly_duty_limit
            WHERE duty_roster.teachers.owner_id = EXCLUDED.owner_id
            "#,
        )
        .bind(teacher.id)
        .bind(owner)
        .bind(&teacher.name)
        .bind(teacher.school_ids.clone())
        .bind(int_column("weekly duty limit", teacher.weekly_duty_limit)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_teacher(&self, owner: Uuid, id: Uuid) -> DutyResult<bool> {
        // Workloads go with the teacher through the foreign key.
        let result = sqlx::query("DELETE FROM duty_roster.teachers WHERE owner_id = $1 AND id = $2")
            .bind(owner)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_workload(&self, owner: Uuid, workload: &TeacherWorkload) -> DutyResult<()> {
        upsert_workload(&self.pool, owner, workload).await?;
        Ok(())
    }

    async fn assignments(
        &self,
        owner: Uuid,
        week_number: Option<i32>,
        approved: Option<bool>,
    ) -> DutyResult<Vec<DutyAssignment>> {
        let query = format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM duty_roster.duty_assignments \
             WHERE owner_id = $1 \
             AND ($2::INTEGER IS NULL OR week_number = $2) \
             AND ($3::BOOLEAN IS NULL OR approved = $3) \
             ORDER BY seq"
        );
        let rows = sqlx::query(&query)
            .bind(owner)
            .bind(week_number)
            .bind(approved)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(assignment_from_row).collect()
    }

    async fn find_assignment(&self, owner: Uuid, id: Uuid) -> DutyResult<Option<DutyAssignment>> {
        let query = format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM duty_roster.duty_assignments \
             WHERE owner_id = $1 AND id = $2"
        );
        let row = sqlx::query(&query)
            .bind(owner)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(assignment_from_row).transpose()
    }

    async fn replace_drafts(
        &self,
        owner: Uuid,
        week_number: i32,
        batch: &[DutyAssignment],
    ) -> DutyResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM duty_roster.duty_assignments \
             WHERE owner_id = $1 AND week_number = $2 AND approved = FALSE",
        )
        .bind(owner)
        .bind(week_number)
        .execute(&mut *tx)
        .await?;

        for assignment in batch {
            insert_row(&mut *tx, owner, assignment).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn approve_drafts(
        &self,
        owner: Uuid,
        week_number: i32,
        at: DateTime<Utc>,
    ) -> DutyResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE duty_roster.duty_assignments
            SET approved = TRUE, approved_at = $3
            WHERE owner_id = $1 AND week_number = $2 AND approved = FALSE
            "#,
        )
        .bind(owner)
        .bind(week_number)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_assignment(&self, owner: Uuid, assignment: &DutyAssignment) -> DutyResult<()> {
        insert_row(&self.pool, owner, assignment).await
    }

    async fn update_assignment(&self, owner: Uuid, assignment: &DutyAssignment) -> DutyResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE duty_roster.duty_assignments
            SET teacher_id = $3, classroom_id = $4, day = $5
            WHERE owner_id = $1 AND id = $2
            "#,
        )
        .bind(owner)
        .bind(assignment.id)
        .bind(assignment.teacher_id)
        .bind(assignment.classroom_id)
        .bind(assignment.day.as_i16())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_assignment(&self, owner: Uuid, id: Uuid) -> DutyResult<bool> {
        let result =
            sqlx::query("DELETE FROM duty_roster.duty_assignments WHERE owner_id = $1 AND id = $2")
                .bind(owner)
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn school_duties(
        &self,
        owner: Uuid,
        month: Option<(u32, i32)>,
    ) -> DutyResult<Vec<SchoolDuty>> {
        let (month, year) = match month {
            Some((month, year)) => (Some(int_column("month", month)?), Some(year)),
            None => (None, None),
        };
        let rows = sqlx::query(
            r#"
            SELECT id, teacher_id, month, year, duty_type, dates
            FROM duty_roster.school_duties
            WHERE owner_id = $1
              AND ($2::INTEGER IS NULL OR month = $2)
              AND ($3::INTEGER IS NULL OR year = $3)
            ORDER BY seq
            "#,
        )
        .bind(owner)
        .bind(month)
        .bind(year)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(school_duty_from_row).collect()
    }

    async fn insert_school_duty(&self, owner: Uuid, duty: &SchoolDuty) -> DutyResult<()> {
        sqlx::query(
            r#"
            INSERT INTO duty_roster.school_duties
            (id, owner_id, teacher_id, month, year, duty_type, dates)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(duty.id)
        .bind(owner)
        .bind(duty.teacher_id)
        .bind(int_column("month", duty.month)?)
        .bind(duty.year)
        .bind(duty.duty_type.as_str())
        .bind(duty.dates.clone())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_school_duty(&self, owner: Uuid, id: Uuid) -> DutyResult<bool> {
        let result =
            sqlx::query("DELETE FROM duty_roster.school_duties WHERE owner_id = $1 AND id = $2")
                .bind(owner)
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}

async fn insert_row<'e, E>(executor: E, owner: Uuid, assignment: &DutyAssignment) -> DutyResult<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO duty_roster.duty_assignments
        (id, owner_id, teacher_id, classroom_id, day, week_number, approved,
         approved_at, transformed_from, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(assignment.id)
    .bind(owner)
    .bind(assignment.teacher_id)
    .bind(assignment.classroom_id)
    .bind(assignment.day.as_i16())
    .bind(assignment.week_number)
    .bind(assignment.approved)
    .bind(assignment.approved_at)
    .bind(assignment.transformed_from)
    .bind(assignment.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advisory_key_is_stable_per_owner() {
        let owner = Uuid::from_u128(0x0123_4567_89ab_cdef_0011_2233_4455_6677);
        assert_eq!(advisory_key(owner), advisory_key(owner));
        assert_eq!(advisory_key(Uuid::nil()), 0);
        assert_ne!(advisory_key(owner), advisory_key(Uuid::from_u128(1)));
    }

    #[test]
    fn oversized_values_are_rejected_before_binding() {
        assert_eq!(int_column("month", 12).unwrap(), 12);
        assert!(matches!(
            int_column("weekly duty limit", u32::MAX),
            Err(DutyError::Validation(_))
        ));
    }
}
