//! Metric helpers for the network server.
//!
//! This module defines metric names and helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. Without the `metrics` feature
//! the helpers compile to nothing.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Counter of frames received, labelled by message type.
pub const FRAMES_RECEIVED: &str = "loraserver_frames_received_total";
/// Counter of dropped items, labelled by error kind.
pub const PROCESSING_ERRORS: &str = "loraserver_processing_errors_total";
/// Counter of join-accepts handed to the gateway backend.
pub const JOIN_ACCEPTS: &str = "loraserver_join_accepts_total";
/// Counter of payloads added to a device queue, labelled by queue.
pub const PAYLOADS_QUEUED: &str = "loraserver_payloads_queued_total";
/// Counter of worker panics, labelled by pipeline.
pub const WORKER_PANICS: &str = "loraserver_worker_panics_total";
/// Gauge of running workers, labelled by pipeline.
pub const WORKERS_ACTIVE: &str = "loraserver_workers_active";

/// Record a received frame.
pub fn inc_frames_received(mtype: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_RECEIVED, "mtype" => mtype).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = mtype;
}

/// Record a dropped item.
pub fn inc_processing_errors(kind: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(PROCESSING_ERRORS, "kind" => kind).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = kind;
}

pub fn inc_join_accepts() {
    #[cfg(feature = "metrics")]
    counter!(JOIN_ACCEPTS).increment(1);
}

/// Record a payload added to the `queue` of a device.
pub fn inc_payloads_queued(queue: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(PAYLOADS_QUEUED, "queue" => queue).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = queue;
}

pub fn inc_worker_panics(pipeline: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(WORKER_PANICS, "pipeline" => pipeline).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = pipeline;
}

/// Increment the running workers gauge of `pipeline`.
pub fn inc_workers(pipeline: &'static str) {
    #[cfg(feature = "metrics")]
    gauge!(WORKERS_ACTIVE, "pipeline" => pipeline).increment(1.0);
    #[cfg(not(feature = "metrics"))]
    let _ = pipeline;
}

/// Decrement the running workers gauge of `pipeline`.
pub fn dec_workers(pipeline: &'static str) {
    #[cfg(feature = "metrics")]
    gauge!(WORKERS_ACTIVE, "pipeline" => pipeline).decrement(1.0);
    #[cfg(not(feature = "metrics"))]
    let _ = pipeline;
}
