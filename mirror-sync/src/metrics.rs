//! Prometheus metrics for mirror synchronization

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, HistogramVec,
    IntCounter, IntCounterVec,
};

lazy_static! {
    /// Events processed, by kind and outcome (applied / duplicate / conflict)
    pub static ref EVENTS_PROCESSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "mirror_events_processed_total",
        "Events processed by the reconciler",
        &["kind", "outcome"]
    )
    .unwrap();

    /// Event application duration
    pub static ref APPLY_DURATION: HistogramVec = register_histogram_vec!(
        "mirror_apply_duration_seconds",
        "Event application duration in seconds",
        &["kind"]
    )
    .unwrap();

    /// Full resynchronization passes
    pub static ref RESYNC_RUNS_TOTAL: IntCounter = register_int_counter!(
        "mirror_resync_runs_total",
        "Full resynchronization passes"
    )
    .unwrap();

    /// Mirror rows corrected by resync
    pub static ref RESYNC_CORRECTIONS_TOTAL: IntCounter = register_int_counter!(
        "mirror_resync_corrections_total",
        "Mirror rows corrected during resynchronization"
    )
    .unwrap();

    /// Sequence gaps observed on the event stream
    pub static ref SEQUENCE_GAPS_TOTAL: IntCounter = register_int_counter!(
        "mirror_sequence_gaps_total",
        "Sequence gaps detected on the event stream"
    )
    .unwrap();
}
