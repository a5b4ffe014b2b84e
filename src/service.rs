use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::advisory::advise;
use crate::error::{DutyError, DutyResult};
use crate::export::{self, WeekGrid};
use crate::generator::{generate_batch, transform_batch};
use crate::models::{
    validate_week, ArchiveEntry, DateWindow, DutyAssignment, DutyStatistic, GenerationOutcome,
    Teacher, Weekday,
};
use crate::report;
use crate::store::DutyStore;
use crate::workload::WorkloadIndex;

/// Duty roster operations on top of a store.
///
/// Every write to a week runs under the store's week lock.
pub struct DutyService<S> {
    store: S,
}

impl<S: DutyStore> DutyService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Rebuilds the week's draft batch from the current roster.
    pub async fn generate(&self, owner: Uuid, week_number: i32) -> DutyResult<GenerationOutcome> {
        let week_number = validate_week(week_number)?;
        let _guard = self.store.lock_week(owner, week_number).await?;

        let teachers = self.store.teachers(owner).await?;
        let workloads = self.store.workloads(owner).await?;
        let classrooms = self.store.classrooms(owner).await?;
        let index = WorkloadIndex::build(&workloads);

        let assignments = generate_batch(week_number, &teachers, &index, &classrooms, Utc::now());
        self.store
            .replace_drafts(owner, week_number, &assignments)
            .await?;
        let advisories = advise(&assignments, &teachers, &index);

        info!(
            %owner,
            week_number,
            assignments = assignments.len(),
            slots = classrooms.len() * Weekday::ALL.len(),
            advisories = advisories.len(),
            "generated duty drafts"
        );
        Ok(GenerationOutcome {
            assignments,
            advisories,
        })
    }

    /// Approves every draft of the week under one timestamp.
    pub async fn approve(&self, owner: Uuid, week_number: i32) -> DutyResult<u64> {
        let week_number = validate_week(week_number)?;
        let _guard = self.store.lock_week(owner, week_number).await?;

        let affected = self
            .store
            .approve_drafts(owner, week_number, Utc::now())
            .await?;
        info!(%owner, week_number, affected, "approved duty drafts");
        Ok(affected)
    }

    /// Derives a new draft batch from the week's approved duties still in force.
    pub async fn transform(&self, owner: Uuid, week_number: i32) -> DutyResult<Vec<DutyAssignment>> {
        let week_number = validate_week(week_number)?;
        let _guard = self.store.lock_week(owner, week_number).await?;

        let approved = self
            .store
            .assignments(owner, Some(week_number), Some(true))
            .await?;
        let sources = export::current_approved(&approved);
        if sources.is_empty() {
            return Err(DutyError::NotFound(format!(
                "approved assignments for week {week_number}"
            )));
        }

        let teachers = self.store.teachers(owner).await?;
        let index = WorkloadIndex::build(&self.store.workloads(owner).await?);
        let batch = transform_batch(&sources, &teachers, &index, Utc::now());
        self.store.replace_drafts(owner, week_number, &batch).await?;

        info!(
            %owner,
            week_number,
            sources = sources.len(),
            transformed = batch.len(),
            "transformed approved duties"
        );
        Ok(batch)
    }

    pub async fn assignments(
        &self,
        owner: Uuid,
        week_number: i32,
        approved: Option<bool>,
    ) -> DutyResult<Vec<DutyAssignment>> {
        let week_number = validate_week(week_number)?;
        self.store
            .assignments(owner, Some(week_number), approved)
            .await
    }

    /// Adds a hand-picked draft to a free slot.
    pub async fn assign(
        &self,
        owner: Uuid,
        week_number: i32,
        teacher_id: Uuid,
        classroom_id: Uuid,
        day: i32,
    ) -> DutyResult<DutyAssignment> {
        let week_number = validate_week(week_number)?;
        let day = Weekday::new(day)?;
        let _guard = self.store.lock_week(owner, week_number).await?;

        let teacher = self
            .ensure_roster_entries(owner, teacher_id, classroom_id)
            .await?;
        self.ensure_slot_free(owner, week_number, classroom_id, day, None)
            .await?;
        self.ensure_within_limit(owner, week_number, &teacher, (classroom_id, day), None)
            .await?;

        let assignment =
            DutyAssignment::draft(teacher_id, classroom_id, day, week_number, Utc::now());
        self.store.insert_assignment(owner, &assignment).await?;
        info!(%owner, week_number, assignment = %assignment.id, "added manual duty");
        Ok(assignment)
    }

    /// Edits a draft's teacher, classroom or day.
    pub async fn reassign(
        &self,
        owner: Uuid,
        id: Uuid,
        teacher_id: Uuid,
        classroom_id: Uuid,
        day: i32,
    ) -> DutyResult<DutyAssignment> {
        let day = Weekday::new(day)?;
        let week_number = self.draft_week(owner, id).await?;
        let _guard = self.store.lock_week(owner, week_number).await?;

        let mut assignment = self.editable_draft(owner, id).await?;
        let teacher = self
            .ensure_roster_entries(owner, teacher_id, classroom_id)
            .await?;
        self.ensure_slot_free(owner, week_number, classroom_id, day, Some(id))
            .await?;
        self.ensure_within_limit(owner, week_number, &teacher, (classroom_id, day), Some(id))
            .await?;

        assignment.teacher_id = teacher_id;
        assignment.classroom_id = classroom_id;
        assignment.day = day;
        if !self.store.update_assignment(owner, &assignment).await? {
            return Err(DutyError::NotFound(format!("assignment {id}")));
        }
        info!(%owner, week_number, assignment = %id, "updated manual duty");
        Ok(assignment)
    }

    pub async fn unassign(&self, owner: Uuid, id: Uuid) -> DutyResult<()> {
        let week_number = self.draft_week(owner, id).await?;
        let _guard = self.store.lock_week(owner, week_number).await?;

        self.editable_draft(owner, id).await?;
        if !self.store.delete_assignment(owner, id).await? {
            return Err(DutyError::NotFound(format!("assignment {id}")));
        }
        info!(%owner, week_number, assignment = %id, "removed duty");
        Ok(())
    }

    pub async fn archive(&self, owner: Uuid) -> DutyResult<Vec<ArchiveEntry>> {
        let approved = self.store.assignments(owner, None, Some(true)).await?;
        Ok(export::archive(&approved))
    }

    pub async fn statistics(&self, owner: Uuid, window: DateWindow) -> DutyResult<Vec<DutyStatistic>> {
        let approved = self.store.assignments(owner, None, Some(true)).await?;
        let teachers = self.store.teachers(owner).await?;
        let classrooms = self.store.classrooms(owner).await?;
        Ok(export::statistics(&approved, &teachers, &classrooms, window))
    }

    /// Grid of the week's approved duties still in force.
    pub async fn approved_grid(&self, owner: Uuid, week_number: i32) -> DutyResult<WeekGrid> {
        let approved = self.assignments(owner, week_number, Some(true)).await?;
        let current = export::current_approved(&approved);
        if current.is_empty() {
            return Err(DutyError::NotFound(format!(
                "approved assignments for week {week_number}"
            )));
        }
        self.grid_for(owner, week_number, &current).await
    }

    /// Markdown report of the week's drafts, or of its approved duties in force.
    pub async fn week_report(&self, owner: Uuid, week_number: i32) -> DutyResult<String> {
        let rows = self.assignments(owner, week_number, None).await?;
        let drafts: Vec<DutyAssignment> = rows.iter().filter(|a| !a.approved).cloned().collect();
        let (status, current) = if drafts.is_empty() {
            ("approved", export::current_approved(&rows))
        } else {
            ("draft", drafts)
        };
        if current.is_empty() {
            return Err(DutyError::NotFound(format!("assignments for week {week_number}")));
        }

        let teachers = self.store.teachers(owner).await?;
        let index = WorkloadIndex::build(&self.store.workloads(owner).await?);
        let advisories = advise(&current, &teachers, &index);
        let grid = self.grid_for(owner, week_number, &current).await?;
        Ok(report::build_report(
            status,
            &grid,
            &current,
            &teachers,
            &advisories,
        ))
    }

    pub async fn grid_for(
        &self,
        owner: Uuid,
        week_number: i32,
        assignments: &[DutyAssignment],
    ) -> DutyResult<WeekGrid> {
        let teachers = self.store.teachers(owner).await?;
        let classrooms = self.store.classrooms(owner).await?;
        let schools = self.store.schools(owner).await?;
        Ok(export::build_grid(
            week_number,
            assignments,
            &teachers,
            &classrooms,
            &schools,
        ))
    }

    async fn draft_week(&self, owner: Uuid, id: Uuid) -> DutyResult<i32> {
        self.store
            .find_assignment(owner, id)
            .await?
            .map(|a| a.week_number)
            .ok_or_else(|| DutyError::NotFound(format!("assignment {id}")))
    }

    async fn editable_draft(&self, owner: Uuid, id: Uuid) -> DutyResult<DutyAssignment> {
        let assignment = self
            .store
            .find_assignment(owner, id)
            .await?
            .ok_or_else(|| DutyError::NotFound(format!("assignment {id}")))?;
        if assignment.approved {
            return Err(DutyError::Validation(format!(
                "assignment {id} is approved and can no longer change"
            )));
        }
        Ok(assignment)
    }

    async fn ensure_roster_entries(
        &self,
        owner: Uuid,
        teacher_id: Uuid,
        classroom_id: Uuid,
    ) -> DutyResult<Teacher> {
        let teacher = self
            .store
            .teachers(owner)
            .await?
            .into_iter()
            .find(|t| t.id == teacher_id)
            .ok_or_else(|| DutyError::NotFound(format!("teacher {teacher_id}")))?;
        let classrooms = self.store.classrooms(owner).await?;
        if !classrooms.iter().any(|c| c.id == classroom_id) {
            return Err(DutyError::NotFound(format!("classroom {classroom_id}")));
        }
        Ok(teacher)
    }

    /// Counts the teacher's duties in the week as it stands once drafts are
    /// approved, leaving out the row being edited and the target slot.
    async fn ensure_within_limit(
        &self,
        owner: Uuid,
        week_number: i32,
        teacher: &Teacher,
        slot: (Uuid, Weekday),
        editing: Option<Uuid>,
    ) -> DutyResult<()> {
        let rows: Vec<DutyAssignment> = self
            .store
            .assignments(owner, Some(week_number), None)
            .await?
            .into_iter()
            .filter(|a| Some(a.id) != editing)
            .collect();
        let held = export::current_roster(&rows)
            .iter()
            .filter(|a| a.teacher_id == teacher.id && a.slot() != slot)
            .count();

        if u32::try_from(held).unwrap_or(u32::MAX) >= teacher.weekly_duty_limit {
            return Err(DutyError::Validation(format!(
                "{} already has {held} of {} duties in week {week_number}",
                teacher.name, teacher.weekly_duty_limit
            )));
        }
        Ok(())
    }

    async fn ensure_slot_free(
        &self,
        owner: Uuid,
        week_number: i32,
        classroom_id: Uuid,
        day: Weekday,
        ignore: Option<Uuid>,
    ) -> DutyResult<()> {
        let drafts = self
            .store
            .assignments(owner, Some(week_number), Some(false))
            .await?;
        let taken = drafts
            .iter()
            .any(|a| Some(a.id) != ignore && a.slot() == (classroom_id, day));
        if taken {
            return Err(DutyError::Validation(format!(
                "classroom {classroom_id} already has a duty on {day} in week {week_number}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::export::BLANK_CELL;
    use crate::models::{Classroom, School, Snapshot, TeacherWorkload};
    use crate::store::MemoryStore;

    struct Fixture {
        owner: Uuid,
        teachers: Vec<Teacher>,
        classrooms: Vec<Classroom>,
        service: Arc<DutyService<MemoryStore>>,
    }

    fn fixture(limits: &[u32], rooms: usize, workloads: &[(usize, [i32; 5])]) -> Fixture {
        let owner = Uuid::new_v4();
        let school = School {
            id: Uuid::new_v4(),
            name: "Merkez Ortaokulu".to_string(),
            building: "Main".to_string(),
        };
        let teachers: Vec<Teacher> = limits
            .iter()
            .enumerate()
            .map(|(i, limit)| Teacher {
                id: Uuid::new_v4(),
                name: format!("Teacher {i}"),
                school_ids: vec![school.id],
                weekly_duty_limit: *limit,
            })
            .collect();
        let classrooms: Vec<Classroom> = (0..rooms)
            .map(|i| Classroom {
                id: Uuid::new_v4(),
                school_id: school.id,
                name: format!("Room {i}"),
                floor: i as i32,
            })
            .collect();
        let workloads = workloads
            .iter()
            .map(|(teacher, hours)| TeacherWorkload::new(teachers[*teacher].id, hours).unwrap())
            .collect();
        let snapshot = Snapshot {
            schools: vec![school],
            classrooms: classrooms.clone(),
            teachers: teachers.clone(),
            workloads,
            assignments: Vec::new(),
            school_duties: Vec::new(),
        };

        Fixture {
            owner,
            teachers,
            classrooms,
            service: Arc::new(DutyService::new(MemoryStore::from_snapshot(owner, snapshot))),
        }
    }

    fn slots(batch: &[DutyAssignment]) -> Vec<(Uuid, Uuid, Weekday)> {
        batch
            .iter()
            .map(|a| (a.teacher_id, a.classroom_id, a.day))
            .collect()
    }

    #[tokio::test]
    async fn generate_twice_replaces_drafts_with_same_roster() {
        let fx = fixture(&[4, 4, 4], 2, &[(0, [3, 0, 0, 0, 0]), (1, [0, 5, 0, 0, 0])]);

        let first = fx.service.generate(fx.owner, 12).await.unwrap();
        let second = fx.service.generate(fx.owner, 12).await.unwrap();
        assert_eq!(slots(&first.assignments), slots(&second.assignments));

        let stored = fx.service.assignments(fx.owner, 12, None).await.unwrap();
        assert_eq!(stored.len(), second.assignments.len());
        let stored_ids: HashSet<Uuid> = stored.iter().map(|a| a.id).collect();
        assert!(second.assignments.iter().all(|a| stored_ids.contains(&a.id)));
    }

    #[tokio::test]
    async fn scenario_two_rooms_two_teachers() {
        let fx = fixture(&[5, 5], 2, &[]);
        let outcome = fx.service.generate(fx.owner, 1).await.unwrap();

        assert_eq!(outcome.assignments.len(), 10);
        for teacher in &fx.teachers {
            let count = outcome
                .assignments
                .iter()
                .filter(|a| a.teacher_id == teacher.id)
                .count();
            assert_eq!(count, 5);
        }
        assert!(outcome.advisories.is_empty());
    }

    #[tokio::test]
    async fn generation_reports_heavy_days() {
        let fx = fixture(&[5], 1, &[(0, [8, 0, 0, 7, 0])]);
        let outcome = fx.service.generate(fx.owner, 1).await.unwrap();
        assert_eq!(outcome.assignments.len(), 5);
        assert_eq!(outcome.advisories.len(), 2);
    }

    #[tokio::test]
    async fn approve_stamps_once_then_noops() {
        let fx = fixture(&[3, 3], 3, &[]);
        let outcome = fx.service.generate(fx.owner, 6).await.unwrap();
        assert_eq!(outcome.assignments.len(), 6);

        assert_eq!(fx.service.approve(fx.owner, 6).await.unwrap(), 6);
        let approved = fx.service.assignments(fx.owner, 6, Some(true)).await.unwrap();
        assert_eq!(approved.len(), 6);
        let stamps: HashSet<_> = approved.iter().map(|a| a.approved_at).collect();
        assert_eq!(stamps.len(), 1);
        assert!(stamps.iter().all(Option::is_some));

        assert_eq!(fx.service.approve(fx.owner, 6).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn regenerate_leaves_approved_history() {
        let fx = fixture(&[5, 5], 1, &[]);
        fx.service.generate(fx.owner, 2).await.unwrap();
        fx.service.approve(fx.owner, 2).await.unwrap();
        fx.service.generate(fx.owner, 2).await.unwrap();

        let approved = fx.service.assignments(fx.owner, 2, Some(true)).await.unwrap();
        let drafts = fx.service.assignments(fx.owner, 2, Some(false)).await.unwrap();
        assert_eq!(approved.len(), 5);
        assert_eq!(drafts.len(), 5);
    }

    #[tokio::test]
    async fn transform_without_approval_is_not_found() {
        let fx = fixture(&[5], 1, &[]);
        fx.service.generate(fx.owner, 3).await.unwrap();
        let before = fx.service.assignments(fx.owner, 3, None).await.unwrap();

        let err = fx.service.transform(fx.owner, 3).await.unwrap_err();
        assert!(matches!(err, DutyError::NotFound(_)));

        let after = fx.service.assignments(fx.owner, 3, None).await.unwrap();
        assert_eq!(slots(&before), slots(&after));
    }

    #[tokio::test]
    async fn transform_links_back_to_approved_batch() {
        let fx = fixture(&[5, 5], 2, &[]);
        fx.service.generate(fx.owner, 8).await.unwrap();
        fx.service.approve(fx.owner, 8).await.unwrap();
        let approved = fx.service.assignments(fx.owner, 8, Some(true)).await.unwrap();

        let batch = fx.service.transform(fx.owner, 8).await.unwrap();
        assert_eq!(batch.len(), approved.len());

        let source_ids: HashSet<Uuid> = approved.iter().map(|a| a.id).collect();
        let source_slots: HashSet<(Uuid, Weekday)> = approved.iter().map(DutyAssignment::slot).collect();
        for row in &batch {
            assert!(!row.approved);
            assert!(source_ids.contains(&row.transformed_from.unwrap()));
            assert!(source_slots.contains(&row.slot()));
        }

        let drafts = fx.service.assignments(fx.owner, 8, Some(false)).await.unwrap();
        assert_eq!(drafts.len(), batch.len());
    }

    #[tokio::test]
    async fn transform_drops_rows_nobody_can_cover() {
        let fx = fixture(&[5, 5], 2, &[]);
        fx.service.generate(fx.owner, 9).await.unwrap();
        fx.service.approve(fx.owner, 9).await.unwrap();

        // Shrink capacity after approval: the transform sees only 4 duties' worth.
        let owner = fx.owner;
        let mut teachers = fx.teachers.clone();
        for teacher in &mut teachers {
            teacher.weekly_duty_limit = 2;
        }
        let approved = fx.service.assignments(owner, 9, Some(true)).await.unwrap();
        let snapshot = Snapshot {
            schools: Vec::new(),
            classrooms: fx.classrooms.clone(),
            teachers,
            workloads: Vec::new(),
            assignments: approved.clone(),
            school_duties: Vec::new(),
        };
        let service = DutyService::new(MemoryStore::from_snapshot(owner, snapshot));

        let batch = service.transform(owner, 9).await.unwrap();
        assert_eq!(batch.len(), 4);
        assert!(batch.len() < approved.len());
    }

    #[tokio::test]
    async fn rejects_out_of_range_week() {
        let fx = fixture(&[1], 1, &[]);
        assert!(matches!(
            fx.service.generate(fx.owner, 0).await,
            Err(DutyError::Validation(_))
        ));
        assert!(matches!(
            fx.service.approve(fx.owner, 60).await,
            Err(DutyError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn manual_assignment_respects_slots_and_roster() {
        let fx = fixture(&[5, 5], 2, &[]);
        let teacher = fx.teachers[0].id;
        let room = fx.classrooms[0].id;

        let added = fx.service.assign(fx.owner, 4, teacher, room, 2).await.unwrap();
        assert!(!added.approved);

        let clash = fx.service.assign(fx.owner, 4, fx.teachers[1].id, room, 2).await;
        assert!(matches!(clash, Err(DutyError::Validation(_))));

        let unknown = fx.service.assign(fx.owner, 4, Uuid::new_v4(), room, 1).await;
        assert!(matches!(unknown, Err(DutyError::NotFound(_))));

        let weekend = fx.service.assign(fx.owner, 4, teacher, room, 5).await;
        assert!(matches!(weekend, Err(DutyError::Validation(_))));
    }

    #[tokio::test]
    async fn reassign_and_unassign_only_touch_drafts() {
        let fx = fixture(&[5, 5], 2, &[]);
        let added = fx
            .service
            .assign(fx.owner, 4, fx.teachers[0].id, fx.classrooms[0].id, 0)
            .await
            .unwrap();

        let moved = fx
            .service
            .reassign(fx.owner, added.id, fx.teachers[1].id, fx.classrooms[1].id, 3)
            .await
            .unwrap();
        assert_eq!(moved.teacher_id, fx.teachers[1].id);
        assert_eq!(moved.day, Weekday::ALL[3]);

        fx.service.approve(fx.owner, 4).await.unwrap();
        let frozen = fx
            .service
            .reassign(fx.owner, added.id, fx.teachers[0].id, fx.classrooms[0].id, 0)
            .await;
        assert!(matches!(frozen, Err(DutyError::Validation(_))));
        assert!(matches!(
            fx.service.unassign(fx.owner, added.id).await,
            Err(DutyError::Validation(_))
        ));
        assert!(matches!(
            fx.service.unassign(fx.owner, Uuid::new_v4()).await,
            Err(DutyError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unassign_removes_draft() {
        let fx = fixture(&[5], 1, &[]);
        let added = fx
            .service
            .assign(fx.owner, 4, fx.teachers[0].id, fx.classrooms[0].id, 1)
            .await
            .unwrap();
        fx.service.unassign(fx.owner, added.id).await.unwrap();
        assert!(fx.service.assignments(fx.owner, 4, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn archive_and_grid_follow_approvals() {
        let fx = fixture(&[5, 5], 2, &[]);
        fx.service.generate(fx.owner, 10).await.unwrap();
        assert!(matches!(
            fx.service.approved_grid(fx.owner, 10).await,
            Err(DutyError::NotFound(_))
        ));

        fx.service.approve(fx.owner, 10).await.unwrap();
        let archive = fx.service.archive(fx.owner).await.unwrap();
        assert_eq!(archive.len(), 1);
        assert_eq!(archive[0].count, 10);

        let grid = fx.service.approved_grid(fx.owner, 10).await.unwrap();
        assert_eq!(grid.rows.len(), 2);
        assert!(grid.rows.iter().all(|row| row.cells.iter().all(|c| c.starts_with("Teacher"))));

        let stats = fx.service.statistics(fx.owner, DateWindow::default()).await.unwrap();
        assert_eq!(stats.iter().map(|s| s.total_days).sum::<usize>(), 10);
    }

    #[tokio::test]
    async fn report_prefers_drafts_over_approved() {
        let fx = fixture(&[5, 5], 1, &[(0, [9, 0, 0, 0, 0])]);
        assert!(matches!(
            fx.service.week_report(fx.owner, 11).await,
            Err(DutyError::NotFound(_))
        ));

        fx.service.generate(fx.owner, 11).await.unwrap();
        let draft = fx.service.week_report(fx.owner, 11).await.unwrap();
        assert!(draft.contains("Status: draft (5 of 5 slots filled)"));

        fx.service.approve(fx.owner, 11).await.unwrap();
        let approved = fx.service.week_report(fx.owner, 11).await.unwrap();
        assert!(approved.contains("Status: approved"));
        assert!(approved.contains("| Merkez Ortaokulu | Room 0 (floor 0) |"));
    }

    #[tokio::test]
    async fn top_up_approval_keeps_the_whole_week() {
        let fx = fixture(&[3], 1, &[]);
        let outcome = fx.service.generate(fx.owner, 18).await.unwrap();
        assert_eq!(outcome.assignments.len(), 3);

        let wednesday = outcome
            .assignments
            .iter()
            .find(|a| a.day == Weekday::ALL[2])
            .unwrap();
        fx.service.unassign(fx.owner, wednesday.id).await.unwrap();
        assert_eq!(fx.service.approve(fx.owner, 18).await.unwrap(), 2);

        fx.service
            .assign(fx.owner, 18, fx.teachers[0].id, fx.classrooms[0].id, 3)
            .await
            .unwrap();
        assert_eq!(fx.service.approve(fx.owner, 18).await.unwrap(), 1);

        let grid = fx.service.approved_grid(fx.owner, 18).await.unwrap();
        let filled = grid.rows[0]
            .cells
            .iter()
            .filter(|c| c.as_str() != BLANK_CELL)
            .count();
        assert_eq!(filled, 3);
        assert_eq!(grid.rows[0].cells[2], BLANK_CELL);
        assert_eq!(grid.rows[0].cells[3], "Teacher 0");

        let report = fx.service.week_report(fx.owner, 18).await.unwrap();
        assert!(report.contains("Status: approved (3 of 5 slots filled)"));

        let batch = fx.service.transform(fx.owner, 18).await.unwrap();
        assert_eq!(batch.len(), 3);
    }

    #[tokio::test]
    async fn approved_transform_replaces_its_sources() {
        let fx = fixture(&[5, 5], 1, &[]);
        fx.service.generate(fx.owner, 22).await.unwrap();
        fx.service.approve(fx.owner, 22).await.unwrap();
        let batch = fx.service.transform(fx.owner, 22).await.unwrap();
        fx.service.approve(fx.owner, 22).await.unwrap();

        let again = fx.service.transform(fx.owner, 22).await.unwrap();
        let previous: HashSet<Uuid> = batch.iter().map(|a| a.id).collect();
        assert_eq!(again.len(), 5);
        assert!(again
            .iter()
            .all(|a| previous.contains(&a.transformed_from.unwrap())));
    }

    #[tokio::test]
    async fn manual_assignments_respect_weekly_limit() {
        let fx = fixture(&[1], 2, &[]);
        let teacher = fx.teachers[0].id;

        let first = fx
            .service
            .assign(fx.owner, 19, teacher, fx.classrooms[0].id, 0)
            .await
            .unwrap();
        let over = fx
            .service
            .assign(fx.owner, 19, teacher, fx.classrooms[1].id, 1)
            .await;
        assert!(matches!(over, Err(DutyError::Validation(_))));

        // Moving the only duty does not count it twice.
        fx.service
            .reassign(fx.owner, first.id, teacher, fx.classrooms[1].id, 4)
            .await
            .unwrap();
        assert_eq!(fx.service.assignments(fx.owner, 19, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn approved_duties_count_toward_weekly_limit() {
        let fx = fixture(&[3], 1, &[]);
        fx.service.generate(fx.owner, 20).await.unwrap();
        fx.service.approve(fx.owner, 20).await.unwrap();

        let over = fx
            .service
            .assign(fx.owner, 20, fx.teachers[0].id, fx.classrooms[0].id, 3)
            .await;
        assert!(matches!(over, Err(DutyError::Validation(_))));

        let next_week = fx
            .service
            .assign(fx.owner, 21, fx.teachers[0].id, fx.classrooms[0].id, 3)
            .await;
        assert!(next_week.is_ok());
    }

    #[tokio::test]
    async fn draft_over_approved_slot_does_not_double_count() {
        let fx = fixture(&[3], 1, &[]);
        fx.service.generate(fx.owner, 23).await.unwrap();
        fx.service.approve(fx.owner, 23).await.unwrap();

        // Monday is already this teacher's; a draft there replaces it on approval.
        let redo = fx
            .service
            .assign(fx.owner, 23, fx.teachers[0].id, fx.classrooms[0].id, 0)
            .await;
        assert!(redo.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn week_writes_wait_for_the_week_lock() {
        let fx = fixture(&[5, 5], 1, &[]);
        let guard = fx.service.store().lock_week(fx.owner, 14).await.unwrap();

        let service = Arc::clone(&fx.service);
        let owner = fx.owner;
        let mut pending = tokio::spawn(async move { service.generate(owner, 14).await });
        let blocked = tokio::time::timeout(Duration::from_millis(100), &mut pending).await;
        assert!(blocked.is_err());
        assert!(fx.service.assignments(fx.owner, 14, None).await.unwrap().is_empty());

        // Other weeks stay writable.
        fx.service.generate(fx.owner, 15).await.unwrap();

        drop(guard);
        let outcome = pending.await.unwrap().unwrap();
        assert_eq!(outcome.assignments.len(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_rebuilds_leave_one_draft_batch() {
        let fx = fixture(&[5, 5], 2, &[]);
        fx.service.generate(fx.owner, 16).await.unwrap();
        fx.service.approve(fx.owner, 16).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..8 {
            let service = Arc::clone(&fx.service);
            let owner = fx.owner;
            tasks.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    service.generate(owner, 16).await.map(|o| o.assignments.len())
                } else {
                    service.transform(owner, 16).await.map(|batch| batch.len())
                }
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 10);
        }

        let drafts = fx.service.assignments(fx.owner, 16, Some(false)).await.unwrap();
        assert_eq!(drafts.len(), 10);
        let slots: HashSet<(Uuid, Weekday)> = drafts.iter().map(DutyAssignment::slot).collect();
        assert_eq!(slots.len(), 10);
        let batches: HashSet<_> = drafts.iter().map(|a| a.created_at).collect();
        assert_eq!(batches.len(), 1);
        assert_eq!(
            fx.service.assignments(fx.owner, 16, Some(true)).await.unwrap().len(),
            10
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_assigns_claim_a_slot_once() {
        let fx = fixture(&[5, 5, 5, 5, 5, 5], 1, &[]);

        let mut tasks = Vec::new();
        for teacher in &fx.teachers {
            let service = Arc::clone(&fx.service);
            let (owner, teacher, room) = (fx.owner, teacher.id, fx.classrooms[0].id);
            tasks.push(tokio::spawn(async move {
                service.assign(owner, 17, teacher, room, 2).await
            }));
        }

        let mut claimed = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => claimed += 1,
                Err(err) => assert!(matches!(err, DutyError::Validation(_))),
            }
        }
        assert_eq!(claimed, 1);
        assert_eq!(fx.service.assignments(fx.owner, 17, None).await.unwrap().len(), 1);
    }
}
