//! Telemetry initialization and span helpers.

use uuid::Uuid;

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be installed once per process, so a
    // second init in the same binary may return Err; that is acceptable.
    let config = fieldsync::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "fieldsync-test".to_string(),
        log_level: "debug".to_string(),
    };
    let _guard = fieldsync::telemetry::init_telemetry(config);
}

#[test]
fn mutation_span_records_timer_transition() {
    let id = Uuid::new_v4();
    let span = fieldsync::telemetry::spans::start_mutation_span("timer", &id);
    fieldsync::telemetry::spans::record_timer_transition(&span, "idle", "in_progress");
}

#[test]
fn metric_instruments_build_without_a_provider() {
    use fieldsync::telemetry::metrics;
    use opentelemetry::KeyValue;

    metrics::mutations_applied().add(1, &[KeyValue::new("kind", "parts")]);
    metrics::sync_conflicts().add(1, &[]);
    metrics::replay_outcomes().add(1, &[KeyValue::new("outcome", "acked")]);
    metrics::operation_duration_ms().record(1.5, &[KeyValue::new("operation", "test")]);
}
