//! Collaboration coordinator.
//!
//! A work order may carry several assignments. Its status is a pure function
//! of their timer states; assignments are never merged with each other.

use chrono::{DateTime, Utc};

use crate::model::{
    Assignment, AssignmentId, Collaborator, Job, JobSnapshot, TimerState, WorkOrderStatus,
};

/// Status implied by the assignments alone.
///
/// `completed` as soon as any mechanic completes, else `in_progress` if any
/// clock is open, else `idle`.
pub fn aggregate_status(assignments: &[Assignment]) -> WorkOrderStatus {
    if assignments.iter().any(|a| a.state.is_terminal()) {
        WorkOrderStatus::Completed
    } else if assignments.iter().any(|a| a.state.is_active()) {
        WorkOrderStatus::InProgress
    } else {
        WorkOrderStatus::Idle
    }
}

/// Derived status combined with any manual override. Status never moves
/// backwards, so the later of the two wins.
pub fn effective_status(job: &Job) -> WorkOrderStatus {
    let derived = aggregate_status(&job.assignments);
    match job.work_order.status_override {
        Some(manual) => derived.max(manual),
        None => derived,
    }
}

/// Once the job is complete, edits are frozen for every mechanic.
pub fn is_read_only(job: &Job) -> bool {
    effective_status(job) == WorkOrderStatus::Completed
}

/// When the first mechanic completed, if anyone has. Work stamped at or
/// before this moment happened while the job was still open.
pub fn frozen_at(job: &Job) -> Option<DateTime<Utc>> {
    job.assignments
        .iter()
        .filter(|a| a.state.is_terminal())
        .filter_map(|a| a.stamps.ended_at)
        .min()
}

/// Everyone on the job except the viewer.
pub fn collaborators(job: &Job, viewer: Option<AssignmentId>) -> Vec<Collaborator> {
    job.assignments
        .iter()
        .filter(|a| Some(a.id) != viewer)
        .map(|a| Collaborator {
            mechanic_id: a.mechanic_id.clone(),
            name: a.mechanic_name.clone(),
            submitted: a.submitted,
        })
        .collect()
}

/// Canonical view of a job for one assignment.
pub fn snapshot(job: &Job, viewer: Option<AssignmentId>) -> JobSnapshot {
    JobSnapshot {
        version: job.version(),
        status: effective_status(job),
        read_only: is_read_only(job),
        work_order: job.work_order.clone(),
        assignment: viewer.and_then(|id| job.assignment(id)).map(Assignment::view),
        collaborators: collaborators(job, viewer),
        line_items: job.line_items.values().cloned().collect(),
        inspection: job.inspection.clone(),
    }
}

/// Count of assignments in each timer state, for logs.
pub fn state_counts(assignments: &[Assignment]) -> [(TimerState, usize); 5] {
    let count = |s: TimerState| assignments.iter().filter(|a| a.state == s).count();
    [
        (TimerState::Idle, count(TimerState::Idle)),
        (TimerState::InProgress, count(TimerState::InProgress)),
        (TimerState::Paused, count(TimerState::Paused)),
        (TimerState::Traveling, count(TimerState::Traveling)),
        (TimerState::Completed, count(TimerState::Completed)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewWorkOrder, WorkOrderId};
    use chrono::Utc;

    fn with_state(state: TimerState) -> Assignment {
        let mut a = Assignment::new(WorkOrderId::new(), "m", "M");
        a.state = state;
        a
    }

    #[test]
    fn in_progress_beats_idle() {
        let a = [with_state(TimerState::InProgress), with_state(TimerState::Idle)];
        assert_eq!(aggregate_status(&a), WorkOrderStatus::InProgress);
    }

    #[test]
    fn any_completed_wins() {
        let a = [with_state(TimerState::Completed), with_state(TimerState::InProgress)];
        assert_eq!(aggregate_status(&a), WorkOrderStatus::Completed);
    }

    #[test]
    fn paused_and_traveling_count_as_in_progress() {
        assert_eq!(
            aggregate_status(&[with_state(TimerState::Paused)]),
            WorkOrderStatus::InProgress
        );
        assert_eq!(
            aggregate_status(&[with_state(TimerState::Traveling)]),
            WorkOrderStatus::InProgress
        );
        assert_eq!(aggregate_status(&[]), WorkOrderStatus::Idle);
    }

    #[test]
    fn override_never_moves_status_backwards() {
        let mut job = Job::new(NewWorkOrder::new("c-1", "brakes").into_work_order(Utc::now()));
        job.assignments.push(with_state(TimerState::InProgress));
        job.work_order.status_override = Some(WorkOrderStatus::Idle);
        assert_eq!(effective_status(&job), WorkOrderStatus::InProgress);

        job.work_order.status_override = Some(WorkOrderStatus::Completed);
        assert_eq!(effective_status(&job), WorkOrderStatus::Completed);
        assert!(is_read_only(&job));
    }

    #[test]
    fn snapshot_hides_viewer_from_collaborators() {
        let mut job = Job::new(NewWorkOrder::new("c-1", "brakes").into_work_order(Utc::now()));
        let me = Assignment::new(job.id(), "m-1", "Alex");
        let other = Assignment::new(job.id(), "m-2", "Sam");
        let me_id = me.id;
        job.assignments.push(me);
        job.assignments.push(other);

        let snap = snapshot(&job, Some(me_id));
        assert_eq!(snap.assignment.as_ref().map(|a| a.id), Some(me_id));
        assert_eq!(snap.collaborators.len(), 1);
        assert_eq!(snap.collaborators[0].name, "Sam");
    }
}
