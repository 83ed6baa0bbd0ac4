// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic attendance-edge usage example.
//!
//! Demonstrates:
//! 1. Wiring the scanner, queue, breaker, connectivity monitor and worker
//! 2. Scanning students (accepted, late, duplicate, unknown, no face)
//! 3. Draining the queue against a cloud that fails at first
//! 4. Reading queue and circuit status
//! 5. Displaying captured metrics
//! 6. Clean shutdown
//!
//! Everything runs in memory; no network or files are touched.
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use attendance_edge::config::QueueConfig;
use attendance_edge::queue::QueueRecord;
use attendance_edge::resilience::ConnectivityProbe;
use attendance_edge::scanner::{DetectorError, FaceBox, Frame, FrameSource};
use attendance_edge::{
    AttendanceStateMachine, CircuitRegistry, CloudClient, CloudError, ConnectivityMonitor,
    EdgeConfig, LogFeedback, ManualClock, MemoryLocalStore, MemoryRoster,
    ScheduleAdmissionController, Student, SyncQueue, SyncWorker,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use tokio::sync::watch;

/// Camera that sees one face per frame, or none.
struct DemoCamera {
    face: bool,
    frames: u32,
}

#[async_trait]
impl FrameSource for DemoCamera {
    async fn next_frame(&mut self) -> Result<Option<Frame>, DetectorError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.frames += 1;
        let faces = if self.face { vec![FaceBox::new(40, 30, 120, 150)] } else { Vec::new() };
        Ok(Some(Frame::new(format!("frame-{:04}", self.frames), faces)))
    }
}

/// Cloud that refuses the first few uploads, then accepts everything.
struct FlakyCloud {
    failures_left: AtomicU32,
    next_id: AtomicU32,
}

#[async_trait]
impl CloudClient for FlakyCloud {
    async fn upload(&self, _record: &QueueRecord) -> Result<String, CloudError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(CloudError::Connect("connection refused".into()));
        }
        Ok(format!("att-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1000))
    }
}

struct AlwaysOnline;

#[async_trait]
impl ConnectivityProbe for AlwaysOnline {
    fn method(&self) -> &'static str {
        "demo"
    }

    async fn probe(&self) -> bool {
        true
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║          attendance-edge: Basic Usage Example                 ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and wire components
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Configuring attendance-edge...");

    let mut config = EdgeConfig::default();
    config.queue = QueueConfig::in_memory();
    config.capture.window_ms = 500;
    config.capture.rejection_display_ms = 200;
    config.sync.interval_secs = 1;
    config.sync.base_delay_ms = 100;
    config.circuit.failure_threshold = 2;
    config.circuit.timeout_ms = 500;
    config.validate()?;

    let today = chrono::Local::now().date_naive();
    let clock = Arc::new(ManualClock::new(
        today.and_hms_opt(7, 5, 0).ok_or("invalid demo time")?,
    ));

    let queue = Arc::new(SyncQueue::open(&config.queue, clock.clone()).await?);
    let local = Arc::new(MemoryLocalStore::new());
    let roster = Arc::new(MemoryRoster::with_students([
        Student::new("2024-0117", "Ana Cruz"),
        Student::new("2024-0342", "Ben Reyes"),
        Student::new("2024-0519", "Carla Santos"),
    ]));

    let mut scanner = AttendanceStateMachine::new(
        ScheduleAdmissionController::new(&config.schedule)?,
        config.capture.clone(),
        roster,
        local.clone(),
        queue.clone(),
        Arc::new(LogFeedback),
        clock.clone(),
    );
    println!("   ✅ Scanner ready, state: {}", scanner.state());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Scan students
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Scanning...");

    let scans: [(&str, u32, &str, bool); 6] = [
        ("07:05 on time", 5, "2024-0117", true),
        ("07:20 late", 20, "2024-0342", true),
        ("07:22 duplicate", 22, "2024-0342", true),
        ("07:23 JSON badge", 23, r#"{"student_id":"2024-0519"}"#, true),
        ("07:24 unknown badge", 24, "9999-0000", true),
        ("07:25 face hidden", 25, "2024-0117", false),
    ];
    for (label, minute, qr, face) in scans {
        clock.set(today.and_hms_opt(7, minute, 0).ok_or("invalid demo time")?);
        let mut camera = DemoCamera { face, frames: 0 };
        let decision = scanner.handle_scan(qr, &mut camera).await;
        println!("   └─ {label:<22} → {}", decision.as_str());
    }

    let status = queue.status().await?;
    println!("   📬 Queue: {} pending, {} archived", status.pending_count, status.archived_count);

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Drain the queue in the background
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🚀 Starting sync worker (cloud refuses the first 3 uploads)...");

    let circuits = CircuitRegistry::new((&config.circuit).into());
    let cloud = Arc::new(FlakyCloud {
        failures_left: AtomicU32::new(3),
        next_id: AtomicU32::new(0),
    });
    let worker = Arc::new(SyncWorker::new(
        queue.clone(),
        local.clone(),
        cloud.clone(),
        circuits.get(cloud.service_name()),
        Arc::new(ConnectivityMonitor::with_probes(
            vec![Box::new(AlwaysOnline)],
            config.connectivity.check_interval(),
        )),
        clock.clone(),
        &config.queue,
        &config.sync,
    ));

    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn({
        let worker = worker.clone();
        async move { worker.run(stop_rx).await }
    });

    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let status = queue.status().await?;
        println!(
            "   └─ worker={} pending={} failures={}",
            worker.state(),
            status.pending_count,
            worker.consecutive_failures()
        );
        if status.pending_count == 0 {
            break;
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Status interfaces
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📊 Status:");
    let status = queue.status().await?;
    println!("   ┌─ Queue");
    println!("   │  └─ Pending: {}", status.pending_count);
    println!("   │  └─ Archived: {}", status.archived_count);
    for circuit in circuits.statuses() {
        println!("   ├─ Circuit '{}'", circuit.name);
        println!("   │  └─ State: {}", circuit.state);
        println!("   │  └─ Failures: {}", circuit.failure_count);
        println!("   │  └─ In state for: {:.1}s", circuit.state_uptime_seconds());
    }
    println!("   └─ Attendance log");
    for row in local.all() {
        println!(
            "      └─ #{} {} {} {} {} synced={} cloud_id={}",
            row.id,
            row.event.student_id,
            row.event.scan_type,
            row.event.session,
            row.event.status,
            row.synced,
            row.cloud_record_id.as_deref().unwrap_or("-")
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Dump raw metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    stop_tx.send(true)?;
    handle.await?;
    queue.close().await;
    println!("   ✅ Shutdown complete! Worker: {}", worker.state());

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Dump all captured metrics, grouped by kind.
fn dump_metrics(snapshotter: &Snapshotter) {
    let snapshot = snapshotter.snapshot();

    let mut counters: Vec<_> = vec![];
    let mut gauges: Vec<_> = vec![];
    let mut histograms: Vec<_> = vec![];

    for (composite_key, _, _, value) in snapshot.into_vec() {
        let (_, key) = composite_key.into_parts();
        let name = key.name().to_string();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        match value {
            DebugValue::Counter(v) => counters.push((name, label_str, v)),
            DebugValue::Gauge(v) => gauges.push((name, label_str, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, label_str, count, sum));
            }
        }
    }

    counters.sort();
    gauges.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    histograms.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    if !counters.is_empty() {
        println!("   ┌─ Counters (cumulative)");
        for (name, labels, value) in &counters {
            println!("   │  └─ {}{} = {}", name, labels, value);
        }
    }
    if !gauges.is_empty() {
        println!("   ├─ Gauges (current value)");
        for (name, labels, value) in &gauges {
            println!("   │  └─ {}{} = {:.2}", name, labels, value);
        }
    }
    if !histograms.is_empty() {
        println!("   └─ Histograms (distributions)");
        for (name, labels, count, sum) in &histograms {
            println!("      └─ {}{} count={} sum={:.4}", name, labels, count, sum);
        }
    }
    if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
}
