// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the edge device.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding process chooses the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `attendance_edge_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `operation`: enqueue, ack, nack, upload
//! - `status` / `outcome`: success, failure, rejected, invalid
//! - `circuit`: service name guarded by a breaker

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

use crate::resilience::circuit_breaker::CircuitState;

// ═══════════════════════════════════════════════════════════════════════════
// SCANS - Foreground capture loop
// ═══════════════════════════════════════════════════════════════════════════

/// Record the outcome of one scan lifecycle
pub fn record_scan_decision(decision: &str) {
    counter!(
        "attendance_edge_scans_total",
        "decision" => decision.to_string()
    )
    .increment(1);
}

/// Record how long a capture window actually ran
pub fn record_capture_duration(duration: Duration) {
    histogram!("attendance_edge_capture_seconds").record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// QUEUE - Durable outbound queue
// ═══════════════════════════════════════════════════════════════════════════

/// Record a queue operation
pub fn record_queue_operation(operation: &str, status: &str) {
    counter!(
        "attendance_edge_queue_operations_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record the size of a dequeued batch
pub fn record_batch_size(count: usize) {
    histogram!("attendance_edge_queue_batch_size").record(count as f64);
}

/// Set pending and archived queue depth
pub fn set_queue_depth(pending: u64, archived: u64) {
    gauge!("attendance_edge_queue_pending").set(pending as f64);
    gauge!("attendance_edge_queue_archived").set(archived as f64);
}

/// Record records moved to the archive after exhausting retries
pub fn record_archived(count: u64) {
    counter!("attendance_edge_queue_archived_total").increment(count);
}

/// Record data corruption detection
pub fn record_corruption(store: &str) {
    counter!(
        "attendance_edge_corruption_detected_total",
        "store" => store.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// CIRCUIT BREAKER - Resilience metrics
// ═══════════════════════════════════════════════════════════════════════════

/// Set circuit breaker state (0 = closed, 1 = half-open, 2 = open)
pub fn set_circuit_state(circuit: &str, state: CircuitState) {
    gauge!(
        "attendance_edge_circuit_breaker_state",
        "circuit" => circuit.to_string()
    )
    .set(state as u8 as f64);
}

/// Record circuit breaker call outcome
pub fn record_circuit_breaker_call(circuit: &str, outcome: &str) {
    counter!(
        "attendance_edge_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a circuit breaker state transition
pub fn record_circuit_transition(circuit: &str, from: CircuitState, to: CircuitState) {
    counter!(
        "attendance_edge_circuit_breaker_transitions_total",
        "circuit" => circuit.to_string(),
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// CONNECTIVITY
// ═══════════════════════════════════════════════════════════════════════════

/// Record one probe attempt
pub fn record_connectivity_probe(method: &str, ok: bool) {
    let status = if ok { "success" } else { "failure" };
    counter!(
        "attendance_edge_connectivity_probes_total",
        "method" => method.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Set network reachability (1 = online, 0 = offline)
pub fn set_online(online: bool) {
    gauge!("attendance_edge_online").set(if online { 1.0 } else { 0.0 });
}

// ═══════════════════════════════════════════════════════════════════════════
// SYNC WORKER
// ═══════════════════════════════════════════════════════════════════════════

/// Record how a sync pass ended (clean, failed, offline, idle)
pub fn record_sync_tick(outcome: &str) {
    counter!(
        "attendance_edge_sync_ticks_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record an upload and whether it was acknowledged
pub fn record_upload(status: &str) {
    counter!(
        "attendance_edge_uploads_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record an exhausted-retry alert
pub fn record_exhausted_alert(count: u64) {
    counter!("attendance_edge_exhausted_alerts_total").increment(1);
    counter!("attendance_edge_exhausted_records_total").increment(count);
}

/// Track worker state transitions
pub fn set_worker_state(state: &str) {
    counter!(
        "attendance_edge_worker_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(operation: &str, duration: Duration) {
    histogram!(
        "attendance_edge_operation_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Records elapsed time for an operation on drop.
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.operation, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use std::collections::HashMap;

    fn counters(recorder: &DebuggingRecorder, record: impl FnOnce()) -> HashMap<String, u64> {
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(recorder, record);

        let mut totals = HashMap::new();
        for (key, _, _, value) in snapshotter.snapshot().into_vec() {
            if let DebugValue::Counter(v) = value {
                *totals.entry(key.key().name().to_string()).or_insert(0) += v;
            }
        }
        totals
    }

    #[test]
    fn test_counters_reach_recorder() {
        let recorder = DebuggingRecorder::new();
        let totals = counters(&recorder, || {
            record_queue_operation("enqueue", "success");
            record_queue_operation("enqueue", "success");
            record_archived(3);
            record_circuit_transition("cloud_api", CircuitState::Closed, CircuitState::Open);
        });

        assert_eq!(totals["attendance_edge_queue_operations_total"], 2);
        assert_eq!(totals["attendance_edge_queue_archived_total"], 3);
        assert_eq!(totals["attendance_edge_circuit_breaker_transitions_total"], 1);
    }

    #[test]
    fn test_helpers_without_recorder_do_not_panic() {
        record_scan_decision("accepted");
        record_capture_duration(Duration::from_secs(5));
        set_queue_depth(4, 1);
        set_circuit_state("cloud_api", CircuitState::HalfOpen);
        record_connectivity_probe("dns", false);
        set_online(true);
        record_sync_tick("clean");
        record_upload("success");
        record_exhausted_alert(2);
        set_worker_state("idle");
        let _timer = LatencyTimer::new("upload");
    }
}
