//! Metrics for the watcher
//!
//! Recorded through the `metrics` facade; installing an exporter is left to
//! the embedding application.

use metrics::{counter, histogram};
use std::time::Duration;

/// Metric names
pub mod names {
    // Stream metrics
    pub const EVENTS_YIELDED_TOTAL: &str = "s3watcher_events_yielded_total";
    pub const DUPLICATES_SUPPRESSED_TOTAL: &str = "s3watcher_duplicates_suppressed_total";
    pub const DECODE_WARNINGS_TOTAL: &str = "s3watcher_decode_warnings_total";

    // Queue metrics
    pub const MESSAGES_RECEIVED_TOTAL: &str = "s3watcher_messages_received_total";
    pub const MESSAGES_ACKED_TOTAL: &str = "s3watcher_messages_acked_total";
    pub const RECEIVE_DURATION_SECONDS: &str = "s3watcher_receive_duration_seconds";
    pub const POLL_RETRIES_TOTAL: &str = "s3watcher_poll_retries_total";

    // Lifecycle metrics
    pub const TEARDOWN_FAILURES_TOTAL: &str = "s3watcher_teardown_failures_total";
}

pub fn record_event_yielded(kind: &'static str) {
    counter!(names::EVENTS_YIELDED_TOTAL, "kind" => kind).increment(1);
}

pub fn record_duplicate_suppressed() {
    counter!(names::DUPLICATES_SUPPRESSED_TOTAL).increment(1);
}

pub fn record_decode_warning(reason: &'static str) {
    counter!(names::DECODE_WARNINGS_TOTAL, "reason" => reason).increment(1);
}

/// Record one completed receive call
pub fn record_receive(messages: usize, elapsed: Duration) {
    counter!(names::MESSAGES_RECEIVED_TOTAL).increment(messages as u64);
    histogram!(names::RECEIVE_DURATION_SECONDS).record(elapsed.as_secs_f64());
}

pub fn record_ack() {
    counter!(names::MESSAGES_ACKED_TOTAL).increment(1);
}

pub fn record_retry(operation: &'static str) {
    counter!(names::POLL_RETRIES_TOTAL, "operation" => operation).increment(1);
}

pub fn record_teardown_failure(step: &'static str) {
    counter!(names::TEARDOWN_FAILURES_TOTAL, "step" => step).increment(1);
}
