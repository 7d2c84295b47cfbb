//! Metrics for the dispatch engine
//!
//! Recorded through the `metrics` facade; the embedding process decides which
//! exporter (if any) to install.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

use cv_common::Outcome;

/// Record a batch returned by a route's provider
pub fn record_messages_fetched(route: &str, count: usize) {
    counter!(
        "cv_messages_fetched_total",
        "route" => route.to_string()
    )
    .increment(count as u64);
}

/// Record a failed fetch (fatal to the run)
pub fn record_fetch_error(route: &str) {
    counter!(
        "cv_fetch_errors_total",
        "route" => route.to_string()
    )
    .increment(1);
}

/// Record a message reaching a terminal outcome
pub fn record_message_processed(route: &str, outcome: Outcome, duration: Duration) {
    counter!(
        "cv_messages_processed_total",
        "route" => route.to_string(),
        "result" => outcome.as_str()
    )
    .increment(1);

    histogram!(
        "cv_delivery_duration_seconds",
        "route" => route.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a delivery that failed and went through the error handler
pub fn record_delivery_error(route: &str) {
    counter!(
        "cv_delivery_errors_total",
        "route" => route.to_string()
    )
    .increment(1);
}

/// Update the unfinished-entries gauge of the work queue
pub fn set_queue_unfinished(count: usize) {
    gauge!("cv_queue_unfinished").set(count as f64);
}
