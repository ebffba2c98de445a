//! Timer state machine for a single assignment.
//!
//! Transitions are pure: they take an assignment value and return the next
//! one plus the [`TimerEvent`] to append. The assignment's derived fields are
//! always recomputable by [`replay`]ing its events in timestamp order, which
//! is how the server absorbs actions that arrive out of order.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::model::{Assignment, TimerAction, TimerEvent, TimerState};

impl TimerState {
    /// Can `action` be applied from this state?
    pub fn accepts(self, action: TimerAction) -> bool {
        use TimerAction::*;
        use TimerState::*;
        matches!(
            (self, action),
            (Idle, Start)
                | (InProgress, Pause)
                | (InProgress, Depart)
                | (InProgress, Complete)
                | (Paused, Resume)
                | (Paused, Complete)     // auto-resumes first
                | (Traveling, Arrived)
                | (Traveling, Complete) // accrues travel first
        )
    }
}

/// Validate an action against the current state, returning an error if
/// disallowed.
fn validate_transition(from: TimerState, action: TimerAction) -> Result<()> {
    if from.accepts(action) {
        Ok(())
    } else {
        Err(Error::transition(from, action))
    }
}

/// Apply a new action to an assignment.
///
/// Returns the next assignment and the event recording the action. The input
/// is never mutated, so a rejected action leaves nothing behind.
pub fn transition(
    assignment: &Assignment,
    action: TimerAction,
    at: DateTime<Utc>,
    reason: Option<String>,
) -> Result<(Assignment, TimerEvent)> {
    let event = TimerEvent::new(assignment.id, action, at, reason);
    let next = apply_event(assignment, &event)?;
    Ok((next, event))
}

/// Fold one event into an assignment.
pub fn apply_event(assignment: &Assignment, event: &TimerEvent) -> Result<Assignment> {
    validate_transition(assignment.state, event.action)?;

    let at = event.timestamp;
    if let Some(last) = last_stamp(assignment) {
        if at < last {
            return Err(Error::InvalidTransition {
                from: assignment.state.to_string(),
                action: format!("{} at {at} (before last recorded action at {last})", event.action),
            });
        }
    }

    let mut next = assignment.clone();
    let stamps = &mut next.stamps;

    match event.action {
        TimerAction::Start => {
            stamps.started_at = Some(at);
            next.state = TimerState::InProgress;
        }
        TimerAction::Pause => {
            stamps.paused_at = Some(at);
            next.pause_reason = event.reason.clone();
            next.state = TimerState::Paused;
        }
        TimerAction::Resume => {
            next.total_paused_seconds += close_interval(&mut stamps.paused_at, at);
            stamps.resumed_at = Some(at);
            next.pause_reason = None;
            next.state = TimerState::InProgress;
        }
        TimerAction::Depart => {
            stamps.departed_at = Some(at);
            next.state = TimerState::Traveling;
        }
        TimerAction::Arrived => {
            next.total_travel_seconds += close_interval(&mut stamps.departed_at, at);
            stamps.arrived_at = Some(at);
            next.state = TimerState::InProgress;
        }
        TimerAction::Complete => {
            match assignment.state {
                TimerState::Paused => {
                    next.total_paused_seconds += close_interval(&mut stamps.paused_at, at);
                    stamps.resumed_at = Some(at);
                    next.pause_reason = None;
                }
                TimerState::Traveling => {
                    next.total_travel_seconds += close_interval(&mut stamps.departed_at, at);
                    stamps.arrived_at = Some(at);
                }
                _ => {}
            }
            stamps.ended_at = Some(at);
            next.submitted = true;
            next.state = TimerState::Completed;
        }
    }

    Ok(next)
}

/// Order events the way the server applies them: by device timestamp, ties
/// broken by arrival.
pub fn order_events(events: &mut [TimerEvent]) {
    events.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then(a.recorded_at.cmp(&b.recorded_at))
    });
}

/// Recompute an assignment from scratch by applying its events in order.
pub fn replay<'a>(
    assignment: &Assignment,
    events: impl IntoIterator<Item = &'a TimerEvent>,
) -> Result<Assignment> {
    let mut ordered: Vec<TimerEvent> = events
        .into_iter()
        .filter(|e| e.assignment_id == assignment.id)
        .cloned()
        .collect();
    order_events(&mut ordered);

    ordered
        .iter()
        .try_fold(assignment.reset(), |acc, event| apply_event(&acc, event))
}

/// Seconds between `started_at` and `ended_at` (or `now` if still open).
pub fn elapsed_seconds(assignment: &Assignment, now: DateTime<Utc>) -> i64 {
    let Some(started) = assignment.stamps.started_at else {
        return 0;
    };
    let end = assignment.stamps.ended_at.unwrap_or(now);
    (end - started).num_seconds().max(0)
}

/// Elapsed time minus paused time, counting a pause that is still open.
pub fn active_seconds(assignment: &Assignment, now: DateTime<Utc>) -> i64 {
    let open_pause = match (assignment.state, assignment.stamps.paused_at) {
        (TimerState::Paused, Some(paused)) => (now - paused).num_seconds().max(0),
        _ => 0,
    };
    (elapsed_seconds(assignment, now) - assignment.total_paused_seconds - open_pause).max(0)
}

/// Take an open interval start and return its non-negative length.
fn close_interval(start: &mut Option<DateTime<Utc>>, end: DateTime<Utc>) -> i64 {
    start
        .take()
        .map(|s| (end - s).num_seconds().max(0))
        .unwrap_or(0)
}

fn last_stamp(assignment: &Assignment) -> Option<DateTime<Utc>> {
    let s = &assignment.stamps;
    [
        s.started_at,
        s.paused_at,
        s.resumed_at,
        s.departed_at,
        s.arrived_at,
        s.ended_at,
    ]
    .into_iter()
    .flatten()
    .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorkOrderId;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 4, 8, 0, 0).unwrap()
    }

    fn fresh() -> Assignment {
        Assignment::new(WorkOrderId::new(), "m-1", "Alex")
    }

    fn step(a: &Assignment, action: TimerAction, minutes: i64) -> Assignment {
        transition(a, action, t0() + Duration::minutes(minutes), None)
            .unwrap()
            .0
    }

    #[test]
    fn pause_resume_complete_accounts_paused_time() {
        let a = step(&fresh(), TimerAction::Start, 0);
        let (a, _) = transition(
            &a,
            TimerAction::Pause,
            t0() + Duration::minutes(10),
            Some("waiting for part".into()),
        )
        .unwrap();
        assert_eq!(a.pause_reason.as_deref(), Some("waiting for part"));
        let a = step(&a, TimerAction::Resume, 25);
        let a = step(&a, TimerAction::Complete, 40);

        assert_eq!(a.state, TimerState::Completed);
        assert!(a.submitted);
        assert_eq!(a.total_paused_seconds, 900);
        assert_eq!(elapsed_seconds(&a, t0()), 2400);
        assert_eq!(active_seconds(&a, t0() + Duration::hours(5)), 1500);
        assert!(a.stamps.ended_at >= a.stamps.started_at);
    }

    #[test]
    fn pause_from_idle_or_completed_is_rejected() {
        let idle = fresh();
        let err = transition(&idle, TimerAction::Pause, t0(), None).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        let done = step(&step(&idle, TimerAction::Start, 0), TimerAction::Complete, 5);
        let before = done.clone();
        let err = transition(&done, TimerAction::Pause, t0() + Duration::minutes(6), None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(done, before);
    }

    #[test]
    fn start_twice_is_rejected() {
        let a = step(&fresh(), TimerAction::Start, 0);
        assert!(transition(&a, TimerAction::Start, t0(), None).is_err());
    }

    #[test]
    fn complete_from_paused_auto_resumes() {
        let a = step(&fresh(), TimerAction::Start, 0);
        let a = step(&a, TimerAction::Pause, 5);
        let a = step(&a, TimerAction::Complete, 15);
        assert_eq!(a.total_paused_seconds, 600);
        assert_eq!(a.stamps.paused_at, None);
        assert_eq!(a.state, TimerState::Completed);
    }

    #[test]
    fn travel_leg_accrues_travel_time() {
        let a = step(&fresh(), TimerAction::Start, 0);
        let a = step(&a, TimerAction::Depart, 5);
        assert_eq!(a.state, TimerState::Traveling);
        assert!(transition(&a, TimerAction::Pause, t0() + Duration::minutes(6), None).is_err());
        let a = step(&a, TimerAction::Arrived, 35);
        assert_eq!(a.total_travel_seconds, 1800);
        assert_eq!(a.state, TimerState::InProgress);
        assert!(a.stamps.arrived_at.is_some());
    }

    #[test]
    fn arrived_without_travel_is_rejected() {
        let a = step(&fresh(), TimerAction::Start, 0);
        assert!(transition(&a, TimerAction::Arrived, t0(), None).is_err());
    }

    #[test]
    fn action_before_last_stamp_is_rejected() {
        let a = step(&fresh(), TimerAction::Start, 30);
        let err = transition(&a, TimerAction::Pause, t0(), None).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[test]
    fn replay_orders_by_timestamp_not_arrival() {
        let base = fresh();
        let mk = |action, minutes| {
            TimerEvent::new(base.id, action, t0() + Duration::minutes(minutes), None)
        };
        // Arrival order differs from device order.
        let events = vec![
            mk(TimerAction::Resume, 25),
            mk(TimerAction::Start, 0),
            mk(TimerAction::Complete, 40),
            mk(TimerAction::Pause, 10),
        ];
        let a = replay(&base, &events).unwrap();
        assert_eq!(a.state, TimerState::Completed);
        assert_eq!(a.total_paused_seconds, 900);
    }

    #[test]
    fn paused_total_is_non_decreasing() {
        let mut a = step(&fresh(), TimerAction::Start, 0);
        let mut last = 0;
        for i in 0..5 {
            a = step(&a, TimerAction::Pause, 10 * i + 1);
            a = step(&a, TimerAction::Resume, 10 * i + 1 + i);
            assert!(a.total_paused_seconds >= last);
            last = a.total_paused_seconds;
        }
    }
}
