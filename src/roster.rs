use chrono::NaiveDate;
use tracing::info;
use uuid::Uuid;

use crate::error::{DutyError, DutyResult};
use crate::models::{
    validate_month, Classroom, DutyType, School, SchoolDuty, Teacher, TeacherWorkload,
};
use crate::service::DutyService;
use crate::store::DutyStore;

/// Changes to a teacher; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct TeacherChanges {
    pub name: Option<String>,
    pub school_ids: Option<Vec<Uuid>>,
    pub weekly_duty_limit: Option<u32>,
}

fn required(what: &str, value: &str) -> DutyResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DutyError::Validation(format!("{what} must not be empty")));
    }
    Ok(trimmed.to_string())
}

impl<S: DutyStore> DutyService<S> {
    pub async fn add_school(&self, owner: Uuid, name: &str, building: &str) -> DutyResult<School> {
        let name = required("school name", name)?;
        let schools = self.store().schools(owner).await?;
        if schools.iter().any(|s| s.name == name) {
            return Err(DutyError::Validation(format!("school {name:?} already exists")));
        }

        let school = School {
            id: Uuid::new_v4(),
            name,
            building: building.trim().to_string(),
        };
        self.store().save_school(owner, &school).await?;
        info!(%owner, school = %school.id, "added school");
        Ok(school)
    }

    /// Refuses while classrooms still belong to the school.
    pub async fn remove_school(&self, owner: Uuid, id: Uuid) -> DutyResult<()> {
        let classrooms = self.store().classrooms(owner).await?;
        let remaining = classrooms.iter().filter(|c| c.school_id == id).count();
        if remaining > 0 {
            return Err(DutyError::Validation(format!(
                "school {id} still has {remaining} classrooms"
            )));
        }
        if !self.store().delete_school(owner, id).await? {
            return Err(DutyError::NotFound(format!("school {id}")));
        }
        info!(%owner, school = %id, "removed school");
        Ok(())
    }

    pub async fn add_classroom(
        &self,
        owner: Uuid,
        school_id: Uuid,
        name: &str,
        floor: i32,
    ) -> DutyResult<Classroom> {
        let name = required("classroom name", name)?;
        let schools = self.store().schools(owner).await?;
        if !schools.iter().any(|s| s.id == school_id) {
            return Err(DutyError::NotFound(format!("school {school_id}")));
        }
        let classrooms = self.store().classrooms(owner).await?;
        if classrooms
            .iter()
            .any(|c| c.school_id == school_id && c.name == name)
        {
            return Err(DutyError::Validation(format!(
                "classroom {name:?} already exists in school {school_id}"
            )));
        }

        let classroom = Classroom {
            id: Uuid::new_v4(),
            school_id,
            name,
            floor,
        };
        self.store().save_classroom(owner, &classroom).await?;
        info!(%owner, classroom = %classroom.id, "added classroom");
        Ok(classroom)
    }

    /// Refuses while any duty, draft or approved, points at the classroom.
    pub async fn remove_classroom(&self, owner: Uuid, id: Uuid) -> DutyResult<()> {
        let assignments = self.store().assignments(owner, None, None).await?;
        if assignments.iter().any(|a| a.classroom_id == id) {
            return Err(DutyError::Validation(format!(
                "classroom {id} has recorded duties"
            )));
        }
        if !self.store().delete_classroom(owner, id).await? {
            return Err(DutyError::NotFound(format!("classroom {id}")));
        }
        info!(%owner, classroom = %id, "removed classroom");
        Ok(())
    }

    pub async fn add_teacher(
        &self,
        owner: Uuid,
        name: &str,
        school_ids: Vec<Uuid>,
        weekly_duty_limit: u32,
    ) -> DutyResult<Teacher> {
        let name = required("teacher name", name)?;
        self.ensure_teacher_name_free(owner, &name, None).await?;
        self.ensure_schools_exist(owner, &school_ids).await?;

        let teacher = Teacher {
            id: Uuid::new_v4(),
            name,
            school_ids,
            weekly_duty_limit,
        };
        self.store().save_teacher(owner, &teacher).await?;
        info!(%owner, teacher = %teacher.id, "added teacher");
        Ok(teacher)
    }

    pub async fn update_teacher(
        &self,
        owner: Uuid,
        id: Uuid,
        changes: TeacherChanges,
    ) -> DutyResult<Teacher> {
        let mut teacher = self
            .store()
            .teachers(owner)
            .await?
            .into_iter()
            .find(|t| t.id == id)
            .ok_or_else(|| DutyError::NotFound(format!("teacher {id}")))?;

        if let Some(name) = changes.name {
            let name = required("teacher name", &name)?;
            self.ensure_teacher_name_free(owner, &name, Some(id)).await?;
            teacher.name = name;
        }
        if let Some(school_ids) = changes.school_ids {
            self.ensure_schools_exist(owner, &school_ids).await?;
            teacher.school_ids = school_ids;
        }
        if let Some(limit) = changes.weekly_duty_limit {
            teacher.weekly_duty_limit = limit;
        }

        self.store().save_teacher(owner, &teacher).await?;
        info!(%owner, teacher = %id, "updated teacher");
        Ok(teacher)
    }

    /// Refuses while the teacher holds week duties or school duties.
    pub async fn remove_teacher(&self, owner: Uuid, id: Uuid) -> DutyResult<()> {
        let assignments = self.store().assignments(owner, None, None).await?;
        if assignments.iter().any(|a| a.teacher_id == id) {
            return Err(DutyError::Validation(format!("teacher {id} has recorded duties")));
        }
        let duties = self.store().school_duties(owner, None).await?;
        if duties.iter().any(|d| d.teacher_id == id) {
            return Err(DutyError::Validation(format!("teacher {id} has school duties")));
        }
        if !self.store().delete_teacher(owner, id).await? {
            return Err(DutyError::NotFound(format!("teacher {id}")));
        }
        info!(%owner, teacher = %id, "removed teacher");
        Ok(())
    }

    pub async fn set_workload(
        &self,
        owner: Uuid,
        teacher_id: Uuid,
        hours: &[i32],
    ) -> DutyResult<TeacherWorkload> {
        self.ensure_teacher_exists(owner, teacher_id).await?;
        let workload = TeacherWorkload::new(teacher_id, hours)?;
        self.store().save_workload(owner, &workload).await?;
        Ok(workload)
    }

    pub async fn add_school_duty(
        &self,
        owner: Uuid,
        teacher_id: Uuid,
        month: u32,
        year: i32,
        duty_type: DutyType,
        dates: Vec<NaiveDate>,
    ) -> DutyResult<SchoolDuty> {
        let duty = SchoolDuty::new(teacher_id, month, year, duty_type, dates)?;
        self.ensure_teacher_exists(owner, teacher_id).await?;
        self.store().insert_school_duty(owner, &duty).await?;
        info!(%owner, duty = %duty.id, %duty_type, month, year, "added school duty");
        Ok(duty)
    }

    pub async fn school_duties(&self, owner: Uuid, month: u32, year: i32) -> DutyResult<Vec<SchoolDuty>> {
        validate_month(month, year)?;
        self.store().school_duties(owner, Some((month, year))).await
    }

    pub async fn remove_school_duty(&self, owner: Uuid, id: Uuid) -> DutyResult<()> {
        if !self.store().delete_school_duty(owner, id).await? {
            return Err(DutyError::NotFound(format!("school duty {id}")));
        }
        Ok(())
    }

    async fn ensure_teacher_exists(&self, owner: Uuid, id: Uuid) -> DutyResult<()> {
        let teachers = self.store().teachers(owner).await?;
        if !teachers.iter().any(|t| t.id == id) {
            return Err(DutyError::NotFound(format!("teacher {id}")));
        }
        Ok(())
    }

    async fn ensure_teacher_name_free(
        &self,
        owner: Uuid,
        name: &str,
        except: Option<Uuid>,
    ) -> DutyResult<()> {
        let teachers = self.store().teachers(owner).await?;
        if teachers
            .iter()
            .any(|t| t.name == name && Some(t.id) != except)
        {
            return Err(DutyError::Validation(format!("teacher {name:?} already exists")));
        }
        Ok(())
    }

    async fn ensure_schools_exist(&self, owner: Uuid, school_ids: &[Uuid]) -> DutyResult<()> {
        let schools = self.store().schools(owner).await?;
        if let Some(missing) = school_ids
            .iter()
            .find(|id| !schools.iter().any(|s| s.id == **id))
        {
            return Err(DutyError::NotFound(format!("school {missing}")));
        }
        Ok(())
    }
}
