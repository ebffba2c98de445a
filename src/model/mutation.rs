//! Mutations: the unit a client sends, the server applies, and the offline
//! queue buffers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    AdjustOutcome, AssignmentView, DetailsPatch, InspectionId, InspectionSubmission,
    PartAdjustment, PmInspection, ProductId, TimerCommand, WorkOrder, WorkOrderStatus,
};

/// Client-generated key letting the server recognise a replayed mutation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(pub String);

impl IdempotencyKey {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Body of a status override request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCommand {
    pub status: WorkOrderStatus,
}

/// Any change a mechanic can make to a work order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Mutation {
    Timer(TimerCommand),
    Status(StatusCommand),
    Details(DetailsPatch),
    Parts(PartAdjustment),
    Inspection(InspectionSubmission),
}

/// Discriminant of [`Mutation`], used for logs, metrics and queue collapsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Timer,
    Status,
    Details,
    Parts,
    Inspection,
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MutationKind::Timer => "timer",
            MutationKind::Status => "status",
            MutationKind::Details => "details",
            MutationKind::Parts => "parts",
            MutationKind::Inspection => "inspection",
        };
        write!(f, "{s}")
    }
}

/// What a mutation is aimed at within its work order. Two queued mutations
/// with the same target may be collapsed into the later one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MutationTarget {
    Timer,
    Status,
    Details,
    Part(ProductId),
    Inspection,
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::Timer(_) => MutationKind::Timer,
            Mutation::Status(_) => MutationKind::Status,
            Mutation::Details(_) => MutationKind::Details,
            Mutation::Parts(_) => MutationKind::Parts,
            Mutation::Inspection(_) => MutationKind::Inspection,
        }
    }

    pub fn target(&self) -> MutationTarget {
        match self {
            Mutation::Timer(_) => MutationTarget::Timer,
            Mutation::Status(_) => MutationTarget::Status,
            Mutation::Details(_) => MutationTarget::Details,
            Mutation::Parts(p) => MutationTarget::Part(p.product_id.clone()),
            Mutation::Inspection(_) => MutationTarget::Inspection,
        }
    }
}

/// A mutation as sent to the sync controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRequest {
    pub idempotency_key: Option<IdempotencyKey>,
    /// Version the client based its edit on. When set and stale, the request
    /// is refused with a conflict instead of applied.
    pub expected_version: Option<u64>,
    pub mutation: Mutation,
}

impl MutationRequest {
    pub fn new(mutation: Mutation) -> Self {
        Self {
            idempotency_key: None,
            expected_version: None,
            mutation,
        }
    }

    pub fn idempotency_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    pub fn expected_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

/// Per-kind result of an applied mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Ack {
    Timer { assignment: AssignmentView },
    Status { status: WorkOrderStatus },
    Details { work_order: Box<WorkOrder> },
    Parts(AdjustOutcome),
    /// The report as stored, so clients can show it without a refetch.
    Inspection {
        inspection_id: InspectionId,
        report: Box<PmInspection>,
    },
}

/// Successful response from the sync controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationResponse {
    /// Work order version after the mutation.
    pub version: u64,
    /// True when this response was served from an idempotency receipt
    /// rather than freshly applied.
    #[serde(default)]
    pub replayed: bool,
    pub ack: Ack,
}
