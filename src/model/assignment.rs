//! Assignments, timer state, and the timer event audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AssignmentId, WorkOrderId};

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// One mechanic on one work order. Mutated only by that mechanic's timer
/// actions; every derived field here is recomputable from its events.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub id: AssignmentId,
    pub work_order_id: WorkOrderId,
    pub mechanic_id: String,
    pub mechanic_name: String,
    pub token: AssignmentToken,
    pub submitted: bool,
    pub state: TimerState,
    pub stamps: TimerStamps,
    pub pause_reason: Option<String>,
    pub total_paused_seconds: i64,
    pub total_travel_seconds: i64,
}

impl Assignment {
    pub fn new(
        work_order_id: WorkOrderId,
        mechanic_id: impl Into<String>,
        mechanic_name: impl Into<String>,
    ) -> Self {
        Self {
            id: AssignmentId::new(),
            work_order_id,
            mechanic_id: mechanic_id.into(),
            mechanic_name: mechanic_name.into(),
            token: AssignmentToken::generate(),
            submitted: false,
            state: TimerState::Idle,
            stamps: TimerStamps::default(),
            pause_reason: None,
            total_paused_seconds: 0,
            total_travel_seconds: 0,
        }
    }

    /// This assignment with every derived field reset, as before its first
    /// event.
    pub fn reset(&self) -> Self {
        Self {
            submitted: false,
            state: TimerState::Idle,
            stamps: TimerStamps::default(),
            pause_reason: None,
            total_paused_seconds: 0,
            total_travel_seconds: 0,
            ..self.clone()
        }
    }

    /// Rebuild an assignment from its wire view, without a token. Used by
    /// clients to run the timer state machine locally.
    pub fn from_view(work_order_id: WorkOrderId, view: &AssignmentView) -> Self {
        Self {
            id: view.id,
            work_order_id,
            mechanic_id: view.mechanic_id.clone(),
            mechanic_name: view.mechanic_name.clone(),
            token: AssignmentToken(String::new()),
            submitted: view.submitted,
            state: view.state,
            stamps: view.stamps.clone(),
            pause_reason: view.pause_reason.clone(),
            total_paused_seconds: view.total_paused_seconds,
            total_travel_seconds: view.total_travel_seconds,
        }
    }

    pub fn view(&self) -> AssignmentView {
        AssignmentView {
            id: self.id,
            mechanic_id: self.mechanic_id.clone(),
            mechanic_name: self.mechanic_name.clone(),
            state: self.state,
            submitted: self.submitted,
            stamps: self.stamps.clone(),
            pause_reason: self.pause_reason.clone(),
            total_paused_seconds: self.total_paused_seconds,
            total_travel_seconds: self.total_travel_seconds,
        }
    }
}

/// Opaque bearer token mapping a request to exactly one assignment.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AssignmentToken(String);

impl AssignmentToken {
    pub fn generate() -> Self {
        Self(format!("asg_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for AssignmentToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Debug for AssignmentToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AssignmentToken(***)")
    }
}

/// The private timestamp map of an assignment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerStamps {
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub resumed_at: Option<DateTime<Utc>>,
    pub departed_at: Option<DateTime<Utc>>,
    pub arrived_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Wire view of an assignment. Never carries the token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentView {
    pub id: AssignmentId,
    pub mechanic_id: String,
    pub mechanic_name: String,
    pub state: TimerState,
    pub submitted: bool,
    #[serde(flatten)]
    pub stamps: TimerStamps,
    pub pause_reason: Option<String>,
    pub total_paused_seconds: i64,
    pub total_travel_seconds: i64,
}

/// Another mechanic on the same job, visible read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collaborator {
    pub mechanic_id: String,
    pub name: String,
    pub submitted: bool,
}

// ---------------------------------------------------------------------------
// Timer state
// ---------------------------------------------------------------------------

/// Lifecycle state of an assignment's timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerState {
    /// Not started.
    Idle,
    /// Clock running on site.
    InProgress,
    /// Clock stopped with a reason; paused time accrues.
    Paused,
    /// Driving to the site; travel time accrues.
    Traveling,
    /// Work ended. Terminal.
    Completed,
}

impl TimerState {
    /// Is the clock open (started and not completed)?
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TimerState::InProgress | TimerState::Paused | TimerState::Traveling
        )
    }

    pub fn is_terminal(self) -> bool {
        self == TimerState::Completed
    }
}

impl std::fmt::Display for TimerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TimerState::Idle => "idle",
            TimerState::InProgress => "in_progress",
            TimerState::Paused => "paused",
            TimerState::Traveling => "traveling",
            TimerState::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TimerState {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(TimerState::Idle),
            "in_progress" => Ok(TimerState::InProgress),
            "paused" => Ok(TimerState::Paused),
            "traveling" => Ok(TimerState::Traveling),
            "completed" => Ok(TimerState::Completed),
            _ => Err(crate::error::Error::Other(format!("unknown timer state: {s}"))),
        }
    }
}

/// A timer action dispatched by a mechanic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerAction {
    Start,
    Pause,
    Resume,
    Depart,
    #[serde(alias = "arrive")]
    Arrived,
    Complete,
}

impl std::fmt::Display for TimerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TimerAction::Start => "start",
            TimerAction::Pause => "pause",
            TimerAction::Resume => "resume",
            TimerAction::Depart => "depart",
            TimerAction::Arrived => "arrived",
            TimerAction::Complete => "complete",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TimerAction {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(TimerAction::Start),
            "pause" => Ok(TimerAction::Pause),
            "resume" => Ok(TimerAction::Resume),
            "depart" => Ok(TimerAction::Depart),
            "arrived" | "arrive" => Ok(TimerAction::Arrived),
            "complete" => Ok(TimerAction::Complete),
            _ => Err(crate::error::Error::Other(format!("unknown timer action: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Immutable audit record of one timer action. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerEvent {
    pub id: Uuid,
    pub assignment_id: AssignmentId,
    pub action: TimerAction,
    /// When the action happened on the device.
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
    /// When the server received it. Breaks ties between equal timestamps.
    pub recorded_at: DateTime<Utc>,
}

impl TimerEvent {
    pub fn new(
        assignment_id: AssignmentId,
        action: TimerAction,
        timestamp: DateTime<Utc>,
        reason: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            assignment_id,
            action,
            timestamp,
            reason,
            recorded_at: timestamp,
        }
    }

    /// Same action at the same instant for the same assignment.
    pub fn same_occurrence(&self, other: &TimerEvent) -> bool {
        self.assignment_id == other.assignment_id
            && self.action == other.action
            && self.timestamp == other.timestamp
    }
}

/// Body of a timer request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerCommand {
    pub action: TimerAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Device time of the action. Absent means "now" on the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<DateTime<Utc>>,
}

impl TimerCommand {
    pub fn new(action: TimerAction) -> Self {
        Self {
            action,
            reason: None,
            at: None,
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = Some(at);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrival_parses_in_either_tense() {
        assert_eq!("arrived".parse::<TimerAction>().unwrap(), TimerAction::Arrived);
        assert_eq!("arrive".parse::<TimerAction>().unwrap(), TimerAction::Arrived);
        let from_json: TimerAction = serde_json::from_str("\"arrive\"").unwrap();
        assert_eq!(from_json, TimerAction::Arrived);
        assert_eq!(TimerAction::Arrived.to_string(), "arrived");
        assert!("land".parse::<TimerAction>().is_err());
    }
}
