//! Core data model.
//!
//! A work order is one field-service job. Mechanics are attached to it
//! through assignments, each carrying its own timer. Parts used on the job
//! are line items, and at most one PM inspection report hangs off it.
//! [`Job`] is the aggregate persisted and locked as a unit.

pub mod assignment;
pub mod inspection;
pub mod line_item;
pub mod mutation;
pub mod work_order;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use assignment::*;
pub use inspection::*;
pub use line_item::*;
pub use mutation::*;
pub use work_order::*;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }
    };
}

uuid_id!(
    /// Newtype for work order IDs.
    WorkOrderId
);
uuid_id!(
    /// Newtype for assignment IDs.
    AssignmentId
);
uuid_id!(
    /// Newtype for PM inspection IDs.
    InspectionId
);

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

/// The unit of locking and persistence: a work order with everything that
/// hangs off it.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub work_order: WorkOrder,
    pub assignments: Vec<Assignment>,
    /// Append-only audit trail for every assignment on this work order.
    pub events: Vec<TimerEvent>,
    pub line_items: BTreeMap<ProductId, LineItem>,
    pub inspection: Option<PmInspection>,
}

impl Job {
    pub fn new(work_order: WorkOrder) -> Self {
        Self {
            work_order,
            assignments: Vec::new(),
            events: Vec::new(),
            line_items: BTreeMap::new(),
            inspection: None,
        }
    }

    pub fn id(&self) -> WorkOrderId {
        self.work_order.id
    }

    pub fn version(&self) -> u64 {
        self.work_order.version
    }

    pub fn assignment(&self, id: AssignmentId) -> Option<&Assignment> {
        self.assignments.iter().find(|a| a.id == id)
    }

    pub fn assignment_mut(&mut self, id: AssignmentId) -> Option<&mut Assignment> {
        self.assignments.iter_mut().find(|a| a.id == id)
    }

    /// Events recorded for one assignment, in storage order.
    pub fn events_for(&self, id: AssignmentId) -> impl Iterator<Item = &TimerEvent> {
        self.events.iter().filter(move |e| e.assignment_id == id)
    }
}

/// The canonical state returned to a client after every request. Scoped to
/// the viewing assignment: other mechanics appear only as collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub version: u64,
    pub status: WorkOrderStatus,
    pub read_only: bool,
    pub work_order: WorkOrder,
    /// The viewer's own assignment, if the viewer is a mechanic on the job.
    pub assignment: Option<AssignmentView>,
    pub collaborators: Vec<Collaborator>,
    pub line_items: Vec<LineItem>,
    pub inspection: Option<PmInspection>,
}

impl JobSnapshot {
    pub fn line_item(&self, product_id: &ProductId) -> Option<&LineItem> {
        self.line_items.iter().find(|li| &li.product_id == product_id)
    }
}
