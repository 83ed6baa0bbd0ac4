//! # Attendance Edge
//!
//! Reliability layer for an attendance capture device: scans are admitted,
//! recorded locally and delivered to the cloud whenever the network allows.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Foreground: capture loop                    │
//! │  • QR → roster → ScheduleAdmissionController                │
//! │  • Face capture window, largest face wins                   │
//! │  • Local write, then enqueue (never touches the network)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                     (durable SQLite queue)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Background: SyncWorker                      │
//! │  • Gated by ConnectivityMonitor                             │
//! │  • Uploads through a per-service CircuitBreaker             │
//! │  • Ack / nack, pass-level backoff, archive after max tries  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The two sides share nothing but the queue. A dead endpoint slows the
//! worker, never the scanner.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use attendance_edge::{
//!     AttendanceStateMachine, EdgeConfig, LogFeedback, MemoryLocalStore, MemoryRoster,
//!     ScheduleAdmissionController, Student, SyncQueue, SystemClock,
//! };
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EdgeConfig::default();
//! config.validate()?;
//!
//! let clock = Arc::new(SystemClock);
//! let queue = Arc::new(SyncQueue::open(&config.queue, clock.clone()).await?);
//! let roster = Arc::new(MemoryRoster::with_students([Student::new("2024-0117", "Ana Cruz")]));
//!
//! let mut scanner = AttendanceStateMachine::new(
//!     ScheduleAdmissionController::new(&config.schedule)?,
//!     config.capture.clone(),
//!     roster,
//!     Arc::new(MemoryLocalStore::new()),
//!     queue.clone(),
//!     Arc::new(LogFeedback),
//!     clock,
//! );
//! # let _ = &mut scanner;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`schedule`]: session windows, lateness and duplicate admission
//! - [`scanner`]: the scan lifecycle ([`AttendanceStateMachine`])
//! - [`queue`]: durable outbound queue ([`SyncQueue`])
//! - [`resilience`]: circuit breakers, connectivity checks, retry
//! - [`worker`]: background delivery ([`SyncWorker`])
//! - [`storage`]: collaborator contracts and their SQLite/memory/HTTP implementations

pub mod clock;
pub mod config;
pub mod event;
pub mod metrics;
pub mod queue;
pub mod resilience;
pub mod scanner;
pub mod schedule;
pub mod storage;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, EdgeConfig};
pub use event::{AttendanceEvent, LastScan, ScanType, Session, Status, Student};
pub use queue::{QueueError, QueueRecord, QueueStatus, RecordType, SyncQueue};
pub use resilience::{
    CircuitBreaker, CircuitConfig, CircuitError, CircuitRegistry, CircuitState, CircuitStatus,
    ConnectivityMonitor, RetryConfig,
};
pub use scanner::{
    AttendanceStateMachine, FeedbackSink, FrameSource, LogFeedback, ScanDecision, ScannerState,
    Signal,
};
pub use schedule::{Admission, ScheduleAdmissionController};
pub use storage::{
    CloudClient, CloudError, HttpCloudClient, LocalStore, MemoryLocalStore, MemoryRoster,
    RosterLookup, SqlLocalStore, SqlRoster, StorageError,
};
pub use worker::{AlertSink, LogAlertSink, SyncAlert, SyncWorker, TickReport, WorkerState};
pub use metrics::LatencyTimer;
