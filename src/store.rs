use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::DutyResult;
use crate::models::{
    Classroom, DutyAssignment, School, SchoolDuty, Snapshot, Teacher, TeacherWorkload,
};

/// Exclusive hold on one (owner, week). Dropping it releases the week.
pub struct WeekGuard {
    _held: Box<dyn Send>,
}

impl WeekGuard {
    pub fn new(held: impl Send + 'static) -> Self {
        Self {
            _held: Box::new(held),
        }
    }
}

/// Owner-scoped persistence for rosters and duty assignments.
#[async_trait]
pub trait DutyStore: Send + Sync {
    /// Blocks until no other writer holds the week, across every process sharing the store.
    async fn lock_week(&self, owner: Uuid, week_number: i32) -> DutyResult<WeekGuard>;

    async fn schools(&self, owner: Uuid) -> DutyResult<Vec<School>>;

    async fn classrooms(&self, owner: Uuid) -> DutyResult<Vec<Classroom>>;

    async fn teachers(&self, owner: Uuid) -> DutyResult<Vec<Teacher>>;

    async fn workloads(&self, owner: Uuid) -> DutyResult<Vec<TeacherWorkload>>;

    /// Inserts the school or overwrites the one with the same id.
    async fn save_school(&self, owner: Uuid, school: &School) -> DutyResult<()>;

    /// Also drops the school from every teacher's affiliations.
    async fn delete_school(&self, owner: Uuid, id: Uuid) -> DutyResult<bool>;

    async fn save_classroom(&self, owner: Uuid, classroom: &Classroom) -> DutyResult<()>;

    async fn delete_classroom(&self, owner: Uuid, id: Uuid) -> DutyResult<bool>;

    async fn save_teacher(&self, owner: Uuid, teacher: &Teacher) -> DutyResult<()>;

    /// Removes the teacher together with their workload.
    async fn delete_teacher(&self, owner: Uuid, id: Uuid) -> DutyResult<bool>;

    /// One workload per teacher; a second save replaces the hours.
    async fn save_workload(&self, owner: Uuid, workload: &TeacherWorkload) -> DutyResult<()>;

    /// Assignments in insertion order, optionally narrowed by week and approval.
    async fn assignments(
        &self,
        owner: Uuid,
        week_number: Option<i32>,
        approved: Option<bool>,
    ) -> DutyResult<Vec<DutyAssignment>>;

    async fn find_assignment(&self, owner: Uuid, id: Uuid) -> DutyResult<Option<DutyAssignment>>;

    /// Drops the week's drafts and stores `batch` in their place, all or nothing.
    async fn replace_drafts(
        &self,
        owner: Uuid,
        week_number: i32,
        batch: &[DutyAssignment],
    ) -> DutyResult<()>;

    /// Marks every draft of the week approved at `at`; returns rows touched.
    async fn approve_drafts(
        &self,
        owner: Uuid,
        week_number: i32,
        at: DateTime<Utc>,
    ) -> DutyResult<u64>;

    async fn insert_assignment(&self, owner: Uuid, assignment: &DutyAssignment) -> DutyResult<()>;

    /// Returns false when no row with that id exists for the owner.
    async fn update_assignment(&self, owner: Uuid, assignment: &DutyAssignment) -> DutyResult<bool>;

    async fn delete_assignment(&self, owner: Uuid, id: Uuid) -> DutyResult<bool>;

    /// Monthly duties, optionally narrowed to one month of one year.
    async fn school_duties(
        &self,
        owner: Uuid,
        month: Option<(u32, i32)>,
    ) -> DutyResult<Vec<SchoolDuty>>;

    async fn insert_school_duty(&self, owner: Uuid, duty: &SchoolDuty) -> DutyResult<()>;

    async fn delete_school_duty(&self, owner: Uuid, id: Uuid) -> DutyResult<bool>;
}

/// One async mutex per (owner, week), for stores that live inside a single process.
#[derive(Debug, Default)]
pub struct WeekLocks {
    locks: Mutex<HashMap<(Uuid, i32), Arc<Mutex<()>>>>,
}

impl WeekLocks {
    pub async fn acquire(&self, owner: Uuid, week_number: i32) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Entries nobody holds or waits on are only referenced by the map.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry((owner, week_number)).or_default())
        };
        lock.lock_owned().await
    }
}

#[derive(Debug, Default)]
struct OwnerData {
    schools: Vec<School>,
    classrooms: Vec<Classroom>,
    teachers: Vec<Teacher>,
    workloads: Vec<TeacherWorkload>,
    assignments: Vec<DutyAssignment>,
    school_duties: Vec<SchoolDuty>,
}

/// In-process store used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    owners: Mutex<HashMap<Uuid, OwnerData>>,
    locks: WeekLocks,
}

impl MemoryStore {
    pub fn from_snapshot(owner: Uuid, snapshot: Snapshot) -> Self {
        let data = OwnerData {
            schools: snapshot.schools,
            classrooms: snapshot.classrooms,
            teachers: snapshot.teachers,
            workloads: snapshot.workloads,
            assignments: snapshot.assignments,
            school_duties: snapshot.school_duties,
        };
        Self {
            owners: Mutex::new(HashMap::from([(owner, data)])),
            locks: WeekLocks::default(),
        }
    }
}

fn upsert_by_id<T: Clone>(rows: &mut Vec<T>, row: &T, id: impl Fn(&T) -> Uuid) {
    match rows.iter_mut().find(|existing| id(existing) == id(row)) {
        Some(existing) => *existing = row.clone(),
        None => rows.push(row.clone()),
    }
}

fn remove_by_id<T>(rows: &mut Vec<T>, target: Uuid, id: impl Fn(&T) -> Uuid) -> bool {
    let before = rows.len();
    rows.retain(|row| id(row) != target);
    rows.len() < before
}

#[async_trait]
impl DutyStore for MemoryStore {
    async fn lock_week(&self, owner: Uuid, week_number: i32) -> DutyResult<WeekGuard> {
        Ok(WeekGuard::new(self.locks.acquire(owner, week_number).await))
    }

    async fn schools(&self, owner: Uuid) -> DutyResult<Vec<School>> {
        let owners = self.owners.lock().await;
        Ok(owners.get(&owner).map(|d| d.schools.clone()).unwrap_or_default())
    }

    async fn classrooms(&self, owner: Uuid) -> DutyResult<Vec<Classroom>> {
        let owners = self.owners.lock().await;
        Ok(owners.get(&owner).map(|d| d.classrooms.clone()).unwrap_or_default())
    }

    async fn teachers(&self, owner: Uuid) -> DutyResult<Vec<Teacher>> {
        let owners = self.owners.lock().await;
        Ok(owners.get(&owner).map(|d| d.teachers.clone()).unwrap_or_default())
    }

    async fn workloads(&self, owner: Uuid) -> DutyResult<Vec<TeacherWorkload>> {
        let owners = self.owners.lock().await;
        Ok(owners.get(&owner).map(|d| d.workloads.clone()).unwrap_or_default())
    }

    async fn save_school(&self, owner: Uuid, school: &School) -> DutyResult<()> {
        let mut owners = self.owners.lock().await;
        upsert_by_id(&mut owners.entry(owner).or_default().schools, school, |s| s.id);
        Ok(())
    }

    async fn delete_school(&self, owner: Uuid, id: Uuid) -> DutyResult<bool> {
        let mut owners = self.owners.lock().await;
        let Some(data) = owners.get_mut(&owner) else {
            return Ok(false);
        };
        if !remove_by_id(&mut data.schools, id, |s| s.id) {
            return Ok(false);
        }
        for teacher in &mut data.teachers {
            teacher.school_ids.retain(|school| *school != id);
        }
        Ok(true)
    }

    async fn save_classroom(&self, owner: Uuid, classroom: &Classroom) -> DutyResult<()> {
        let mut owners = self.owners.lock().await;
        upsert_by_id(&mut owners.entry(owner).or_default().classrooms, classroom, |c| c.id);
        Ok(())
    }

    async fn delete_classroom(&self, owner: Uuid, id: Uuid) -> DutyResult<bool> {
        let mut owners = self.owners.lock().await;
        Ok(owners
            .get_mut(&owner)
            .is_some_and(|d| remove_by_id(&mut d.classrooms, id, |c| c.id)))
    }

    async fn save_teacher(&self, owner: Uuid, teacher: &Teacher) -> DutyResult<()> {
        let mut owners = self.owners.lock().await;
        upsert_by_id(&mut owners.entry(owner).or_default().teachers, teacher, |t| t.id);
        Ok(())
    }

    async fn delete_teacher(&self, owner: Uuid, id: Uuid) -> DutyResult<bool> {
        let mut owners = self.owners.lock().await;
        let Some(data) = owners.get_mut(&owner) else {
            return Ok(false);
        };
        if !remove_by_id(&mut data.teachers, id, |t| t.id) {
            return Ok(false);
        }
        data.workloads.retain(|w| w.teacher_id != id);
        Ok(true)
    }

    async fn save_workload(&self, owner: Uuid, workload: &TeacherWorkload) -> DutyResult<()> {
        let mut owners = self.owners.lock().await;
        let workloads = &mut owners.entry(owner).or_default().workloads;
        match workloads
            .iter_mut()
            .find(|w| w.teacher_id == workload.teacher_id)
        {
            Some(existing) => existing.hours = workload.hours,
            None => workloads.push(workload.clone()),
        }
        Ok(())
    }

    async fn assignments(
        &self,
        owner: Uuid,
        week_number: Option<i32>,
        approved: Option<bool>,
    ) -> DutyResult<Vec<DutyAssignment>> {
        let owners = self.owners.lock().await;
        let Some(data) = owners.get(&owner) else {
            return Ok(Vec::new());
        };
        Ok(data
            .assignments
            .iter()
            .filter(|a| week_number.map_or(true, |week| a.week_number == week))
            .filter(|a| approved.map_or(true, |flag| a.approved == flag))
            .cloned()
            .collect())
    }

    async fn find_assignment(&self, owner: Uuid, id: Uuid) -> DutyResult<Option<DutyAssignment>> {
        let owners = self.owners.lock().await;
        Ok(owners
            .get(&owner)
            .and_then(|d| d.assignments.iter().find(|a| a.id == id).cloned()))
    }

    async fn replace_drafts(
        &self,
        owner: Uuid,
        week_number: i32,
        batch: &[DutyAssignment],
    ) -> DutyResult<()> {
        let mut owners = self.owners.lock().await;
        let data = owners.entry(owner).or_default();
        data.assignments
            .retain(|a| a.approved || a.week_number != week_number);
        data.assignments.extend_from_slice(batch);
        Ok(())
    }

    async fn approve_drafts(
        &self,
        owner: Uuid,
        week_number: i32,
        at: DateTime<Utc>,
    ) -> DutyResult<u64> {
        let mut owners = self.owners.lock().await;
        let Some(data) = owners.get_mut(&owner) else {
            return Ok(0);
        };
        let mut affected = 0;
        for assignment in data
            .assignments
            .iter_mut()
            .filter(|a| !a.approved && a.week_number == week_number)
        {
            assignment.approved = true;
            assignment.approved_at = Some(at);
            affected += 1;
        }
        Ok(affected)
    }

    async fn insert_assignment(&self, owner: Uuid, assignment: &DutyAssignment) -> DutyResult<()> {
        let mut owners = self.owners.lock().await;
        owners
            .entry(owner)
            .or_default()
            .assignments
            .push(assignment.clone());
        Ok(())
    }

    async fn update_assignment(&self, owner: Uuid, assignment: &DutyAssignment) -> DutyResult<bool> {
        let mut owners = self.owners.lock().await;
        let slot = owners
            .get_mut(&owner)
            .and_then(|d| d.assignments.iter_mut().find(|a| a.id == assignment.id));
        match slot {
            Some(existing) => {
                *existing = assignment.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_assignment(&self, owner: Uuid, id: Uuid) -> DutyResult<bool> {
        let mut owners = self.owners.lock().await;
        Ok(owners
            .get_mut(&owner)
            .is_some_and(|d| remove_by_id(&mut d.assignments, id, |a| a.id)))
    }

    async fn school_duties(
        &self,
        owner: Uuid,
        month: Option<(u32, i32)>,
    ) -> DutyResult<Vec<SchoolDuty>> {
        let owners = self.owners.lock().await;
        let Some(data) = owners.get(&owner) else {
            return Ok(Vec::new());
        };
        Ok(data
            .school_duties
            .iter()
            .filter(|d| month.map_or(true, |(m, y)| d.month == m && d.year == y))
            .cloned()
            .collect())
    }

    async fn insert_school_duty(&self, owner: Uuid, duty: &SchoolDuty) -> DutyResult<()> {
        let mut owners = self.owners.lock().await;
        owners
            .entry(owner)
            .or_default()
            .school_duties
            .push(duty.clone());
        Ok(())
    }

    async fn delete_school_duty(&self, owner: Uuid, id: Uuid) -> DutyResult<bool> {
        let mut owners = self.owners.lock().await;
        Ok(owners
            .get_mut(&owner)
            .is_some_and(|d| remove_by_id(&mut d.school_duties, id, |s| s.id)))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn week_locks_forget_released_weeks() {
        let locks = WeekLocks::default();
        let owner = Uuid::new_v4();

        for week in 1..=20 {
            drop(locks.acquire(owner, week).await);
        }
        let held = locks.acquire(owner, 21).await;
        assert_eq!(locks.locks.lock().await.len(), 1);
        drop(held);
    }

    #[tokio::test]
    async fn week_locks_keep_entries_in_use() {
        let locks = WeekLocks::default();
        let owner = Uuid::new_v4();

        let first = locks.acquire(owner, 3).await;
        let _other = locks.acquire(owner, 4).await;
        assert_eq!(locks.locks.lock().await.len(), 2);

        // Week 3 is still held, so a second caller has to wait for it.
        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.acquire(owner, 3)).await;
        assert!(blocked.is_err());

        drop(first);
        let again = tokio::time::timeout(Duration::from_millis(500), locks.acquire(owner, 3)).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn memory_lock_is_per_owner_and_week() {
        let store = MemoryStore::default();
        let owner = Uuid::new_v4();

        let _held = store.lock_week(owner, 7).await.unwrap();
        let other_week = tokio::time::timeout(Duration::from_millis(500), store.lock_week(owner, 8)).await;
        assert!(other_week.is_ok());
        let other_owner =
            tokio::time::timeout(Duration::from_millis(500), store.lock_week(Uuid::new_v4(), 7)).await;
        assert!(other_owner.is_ok());
        let same = tokio::time::timeout(Duration::from_millis(50), store.lock_week(owner, 7)).await;
        assert!(same.is_err());
    }

    #[tokio::test]
    async fn deleting_school_clears_affiliations() {
        let store = MemoryStore::default();
        let owner = Uuid::new_v4();
        let school = School {
            id: Uuid::new_v4(),
            name: "Cumhuriyet Ilkokulu".to_string(),
            building: "A".to_string(),
        };
        let teacher = Teacher {
            id: Uuid::new_v4(),
            name: "Elif".to_string(),
            school_ids: vec![school.id],
            weekly_duty_limit: 2,
        };
        store.save_school(owner, &school).await.unwrap();
        store.save_teacher(owner, &teacher).await.unwrap();

        assert!(store.delete_school(owner, school.id).await.unwrap());
        assert!(!store.delete_school(owner, school.id).await.unwrap());
        let teachers = store.teachers(owner).await.unwrap();
        assert!(teachers[0].school_ids.is_empty());
    }

    #[tokio::test]
    async fn saving_workload_twice_replaces_hours() {
        let store = MemoryStore::default();
        let owner = Uuid::new_v4();
        let teacher = Uuid::new_v4();

        store
            .save_workload(owner, &TeacherWorkload::new(teacher, &[1, 1, 1, 1, 1]).unwrap())
            .await
            .unwrap();
        store
            .save_workload(owner, &TeacherWorkload::new(teacher, &[2, 3, 4, 5, 6]).unwrap())
            .await
            .unwrap();

        let workloads = store.workloads(owner).await.unwrap();
        assert_eq!(workloads.len(), 1);
        assert_eq!(workloads[0].hours, [2, 3, 4, 5, 6]);
    }
}
