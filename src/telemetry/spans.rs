//! Mutation span helpers.
//!
//! Provides span creation and timer-transition recording for mutations
//! flowing through the sync controller.

use tracing::Span;
use uuid::Uuid;

/// Start a span for one mutation against a work order.
///
/// The `timer.state` field is declared empty and can be filled via
/// [`record_timer_transition`].
pub fn start_mutation_span(kind: &str, work_order_id: &Uuid) -> Span {
    tracing::info_span!(
        "mutation.apply",
        "mutation.kind" = kind,
        "work_order.id" = %work_order_id,
        "timer.state" = tracing::field::Empty,
    )
}

/// Record a timer transition on the given span.
pub fn record_timer_transition(span: &Span, from: &str, to: &str) {
    span.record("timer.state", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "timer_transition");
    });
}
