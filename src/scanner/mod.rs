// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Foreground scan lifecycle.
//!
//! ```text
//!            QR known + admitted                 window closed, face seen
//!  STANDBY ───────────────────────► CAPTURING ───────────────────────────► UPLOADING
//!     ▲  │                              │                                     │
//!     │  └─ unknown / duplicate         └─ window closed, no face             │
//!     │     (signal, display timeout)      (NO_FACE)                          │
//!     └───────────────────────────────────────────────────────────────────────┘
//!                     local write + enqueue (always returns to STANDBY)
//! ```
//!
//! One scan runs end to end before the next begins. Nothing here touches
//! the network: an accepted event is written locally and queued, and the
//! sync worker takes it from there.

mod capture;
mod qr;

pub use capture::{
    run_capture, Capture, CaptureSelection, DetectorError, FaceBox, Frame, FrameSource,
};
pub use qr::student_id_from_qr;

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::CaptureConfig;
use crate::event::{AttendanceEvent, ScanType, Status, Student};
use crate::queue::SyncQueue;
use crate::schedule::{Admission, DenyReason, ScheduleAdmissionController};
use crate::storage::{LocalStore, RosterLookup};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerState {
    Standby,
    Capturing,
    Uploading,
}

impl std::fmt::Display for ScannerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standby => write!(f, "standby"),
            Self::Capturing => write!(f, "capturing"),
            Self::Uploading => write!(f, "uploading"),
        }
    }
}

/// Feedback for the display/buzzer collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Admitted; the capture window is open
    CaptureStarted { student_id: String, scan_type: ScanType },
    Accepted { student: Student, scan_type: ScanType, status: Status },
    Unauthorized,
    Duplicate { remaining: ChronoDuration },
    NoFace,
    /// Local persistence failed; the scan was not recorded
    Error { message: String },
}

/// Receives [`Signal`]s. Must not block.
pub trait FeedbackSink: Send + Sync {
    fn signal(&self, signal: &Signal);
}

/// Writes signals to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFeedback;

impl FeedbackSink for LogFeedback {
    fn signal(&self, signal: &Signal) {
        match signal {
            Signal::Accepted { student, scan_type, status } => {
                info!(student_id = %student.student_id, %scan_type, %status, "Scan accepted")
            }
            Signal::Error { message } => error!(message, "Scan failed"),
            other => debug!(signal = ?other, "Scan feedback"),
        }
    }
}

/// Result of one scan lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanDecision {
    Accepted {
        local_record_id: i64,
        /// `None` when the event was stored locally but could not be queued
        queue_id: Option<i64>,
        event: AttendanceEvent,
    },
    RejectedUnauthorized,
    RejectedDuplicate,
    NoFace,
    PersistenceFailed,
}

impl ScanDecision {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted { .. } => "accepted",
            Self::RejectedUnauthorized => "rejected_unauthorized",
            Self::RejectedDuplicate => "rejected_duplicate",
            Self::NoFace => "no_face",
            Self::PersistenceFailed => "persistence_failed",
        }
    }

    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Drives one scan at a time from QR payload to queued event.
pub struct AttendanceStateMachine {
    schedule: ScheduleAdmissionController,
    capture: CaptureConfig,
    roster: Arc<dyn RosterLookup>,
    local: Arc<dyn LocalStore>,
    queue: Arc<SyncQueue>,
    feedback: Arc<dyn FeedbackSink>,
    clock: Arc<dyn Clock>,
    state: ScannerState,
}

impl AttendanceStateMachine {
    pub fn new(
        schedule: ScheduleAdmissionController,
        capture: CaptureConfig,
        roster: Arc<dyn RosterLookup>,
        local: Arc<dyn LocalStore>,
        queue: Arc<SyncQueue>,
        feedback: Arc<dyn FeedbackSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            schedule,
            capture,
            roster,
            local,
            queue,
            feedback,
            clock,
            state: ScannerState::Standby,
        }
    }

    #[must_use]
    pub fn state(&self) -> ScannerState {
        self.state
    }

    #[must_use]
    pub fn schedule(&self) -> &ScheduleAdmissionController {
        &self.schedule
    }

    fn enter(&mut self, next: ScannerState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "Scanner state change");
            self.state = next;
        }
    }

    /// Run one scan to completion. Always ends in STANDBY; errors are
    /// reported through the decision and the feedback sink, never returned.
    #[tracing::instrument(skip(self, frames))]
    pub async fn handle_scan(&mut self, qr_payload: &str, frames: &mut dyn FrameSource) -> ScanDecision {
        let decision = self.run_scan(qr_payload, frames).await;
        self.enter(ScannerState::Standby);
        crate::metrics::record_scan_decision(decision.as_str());
        decision
    }

    async fn run_scan(&mut self, qr_payload: &str, frames: &mut dyn FrameSource) -> ScanDecision {
        self.enter(ScannerState::Standby);
        let now = self.clock.now();

        let Some(student) = self.resolve_student(qr_payload).await else {
            self.reject(Signal::Unauthorized).await;
            return ScanDecision::RejectedUnauthorized;
        };

        let (scan_type, session) = self.schedule.expected_scan_type(now);
        let last = match self.local.last_scan(&student.student_id).await {
            Ok(last) => last,
            Err(e) => return self.persistence_failed(&student, e.to_string()),
        };

        let admission = self.schedule.should_allow_scan(last, scan_type, now);
        if let Admission::Denied(DenyReason::Cooldown { remaining }) = admission {
            info!(
                student_id = %student.student_id,
                %scan_type,
                remaining_secs = remaining.num_seconds(),
                "Duplicate scan rejected"
            );
            self.reject(Signal::Duplicate { remaining }).await;
            return ScanDecision::RejectedDuplicate;
        }
        debug!(student_id = %student.student_id, reason = admission.reason(), "Scan admitted");

        self.enter(ScannerState::Capturing);
        self.feedback.signal(&Signal::CaptureStarted {
            student_id: student.student_id.clone(),
            scan_type,
        });
        let started = Instant::now();
        let captured = run_capture(frames, self.capture.window()).await;
        crate::metrics::record_capture_duration(started.elapsed());

        let capture = match captured {
            Ok(Some(capture)) => capture,
            Ok(None) | Err(_) => {
                info!(student_id = %student.student_id, "No face captured");
                self.feedback.signal(&Signal::NoFace);
                return ScanDecision::NoFace;
            }
        };

        self.enter(ScannerState::Uploading);
        let status = self.schedule.determine_status(now, session, scan_type);
        let event = AttendanceEvent::new(&student.student_id, now, scan_type, session, status, qr_payload)
            .with_photo(capture.frame_ref);

        let local_record_id = match self.local.insert_attendance(&event).await {
            Ok(id) => id,
            Err(e) => return self.persistence_failed(&student, e.to_string()),
        };

        // Queued regardless of network state; delivery is the worker's job.
        let queue_id = match self.queue.enqueue_attendance(&event, local_record_id).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!(
                    student_id = %student.student_id,
                    local_record_id,
                    error = %e,
                    "Attendance stored locally but could not be queued for sync"
                );
                None
            }
        };

        info!(
            student_id = %student.student_id,
            %scan_type,
            %session,
            %status,
            local_record_id,
            "Attendance recorded"
        );
        self.feedback.signal(&Signal::Accepted {
            student,
            scan_type,
            status,
        });
        ScanDecision::Accepted {
            local_record_id,
            queue_id,
            event,
        }
    }

    /// Roster entry for the payload. Lookup failures fail closed.
    async fn resolve_student(&self, qr_payload: &str) -> Option<Student> {
        let Some(student_id) = student_id_from_qr(qr_payload) else {
            info!("Unreadable QR payload");
            return None;
        };
        match self.roster.find_student(&student_id).await {
            Ok(Some(student)) => Some(student),
            Ok(None) => {
                info!(%student_id, "Unknown student");
                None
            }
            Err(e) => {
                warn!(%student_id, error = %e, "Roster lookup failed, rejecting scan");
                None
            }
        }
    }

    /// Show a rejection and hold it on screen before listening again.
    async fn reject(&self, signal: Signal) {
        self.feedback.signal(&signal);
        sleep(self.capture.rejection_display()).await;
    }

    fn persistence_failed(&self, student: &Student, message: String) -> ScanDecision {
        error!(student_id = %student.student_id, error = %message, "Local attendance write failed");
        self.feedback.signal(&Signal::Error { message });
        ScanDecision::PersistenceFailed
    }
}
