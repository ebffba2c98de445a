//! Metric instrument factories for fieldsync.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"fieldsync"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for fieldsync instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("fieldsync")
}

/// Counter: mutations handled by the sync controller.
/// Labels: `kind`, `result` ("ok" | "replayed" | "conflict" | "rejected" | "error").
pub fn mutations_applied() -> Counter<u64> {
    meter()
        .u64_counter("fieldsync.mutations")
        .with_description("Number of mutations handled by the sync controller")
        .build()
}

/// Counter: optimistic-concurrency conflicts returned to clients.
pub fn sync_conflicts() -> Counter<u64> {
    meter()
        .u64_counter("fieldsync.sync.conflicts")
        .with_description("Number of version conflicts returned to clients")
        .build()
}

/// Counter: assignment timer transitions.
/// Labels: `from`, `to`.
pub fn timer_transitions() -> Counter<u64> {
    meter()
        .u64_counter("fieldsync.timer.transitions")
        .with_description("Number of assignment timer transitions")
        .build()
}

/// Counter: line items removed because their quantity reached zero or
/// they were cleared.
pub fn line_items_deleted() -> Counter<u64> {
    meter()
        .u64_counter("fieldsync.line_items.deleted")
        .with_description("Number of line items deleted by the reconciler")
        .build()
}

/// Counter: PM inspections stored (created or replaced).
pub fn inspections_submitted() -> Counter<u64> {
    meter()
        .u64_counter("fieldsync.inspections.submitted")
        .with_description("Number of PM inspections stored")
        .build()
}

/// Counter: client replay outcomes.
/// Labels: `outcome` ("acked" | "dropped" | "rebased" | "deferred").
pub fn replay_outcomes() -> Counter<u64> {
    meter()
        .u64_counter("fieldsync.replay.outcomes")
        .with_description("Outcomes of offline queue replay attempts")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("fieldsync.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
