//! Attendance event data structures.
//!
//! An [`AttendanceEvent`] is produced once per accepted scan and never
//! mutated afterwards. It is first written to local storage, then its JSON
//! form is queued for delivery to the cloud.
//!
//! # Example
//!
//! ```
//! use attendance_edge::{AttendanceEvent, ScanType, Session, Status};
//! use chrono::NaiveDate;
//!
//! let at = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap().and_hms_opt(7, 20, 0).unwrap();
//! let event = AttendanceEvent::new("S-1001", at, ScanType::Login, Session::Morning, Status::Late, "S-1001");
//!
//! assert_eq!(event.dedupe_key(), "S-1001:2026-10-16T07:20:00:login");
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A string did not name any variant of the target enum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            #[must_use]
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }
    };
}

/// Whether a scan opens or closes a student's presence in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    Login,
    Logout,
}

string_enum!(ScanType, "scan type", { Login => "login", Logout => "logout" });

/// Scheduled block of class time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Session {
    Morning,
    Afternoon,
    Unknown,
}

string_enum!(Session, "session", {
    Morning => "morning",
    Afternoon => "afternoon",
    Unknown => "unknown",
});

/// Attendance status recorded for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Present,
    Late,
    Absent,
    Excused,
}

string_enum!(Status, "status", {
    Present => "present",
    Late => "late",
    Absent => "absent",
    Excused => "excused",
});

/// A roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub student_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardian_contact: Option<String>,
}

impl Student {
    pub fn new(student_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            name: name.into(),
            section: None,
            guardian_contact: None,
        }
    }
}

/// The most recent scan recorded for a student.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastScan {
    pub timestamp: NaiveDateTime,
    pub scan_type: ScanType,
}

/// One accepted attendance scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub student_id: String,
    /// Local wall-clock time of the scan
    pub timestamp: NaiveDateTime,
    pub scan_type: ScanType,
    pub session: Session,
    pub status: Status,
    /// Reference to the retained photo, if the capture produced one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_ref: Option<String>,
    /// Raw QR payload as scanned
    pub qr_payload: String,
}

impl AttendanceEvent {
    pub fn new(
        student_id: impl Into<String>,
        timestamp: NaiveDateTime,
        scan_type: ScanType,
        session: Session,
        status: Status,
        qr_payload: impl Into<String>,
    ) -> Self {
        Self {
            student_id: student_id.into(),
            timestamp,
            scan_type,
            session,
            status,
            photo_ref: None,
            qr_payload: qr_payload.into(),
        }
    }

    #[must_use]
    pub fn with_photo(mut self, photo_ref: impl Into<String>) -> Self {
        self.photo_ref = Some(photo_ref.into());
        self
    }

    /// Natural key the remote side deduplicates redeliveries on.
    #[must_use]
    pub fn dedupe_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.student_id,
            self.timestamp.format("%Y-%m-%dT%H:%M:%S"),
            self.scan_type
        )
    }

    /// JSON payload queued for upload, linked to the local row it came from.
    #[must_use]
    pub fn to_queue_payload(&self, local_record_id: i64) -> Value {
        json!({
            "local_record_id": local_record_id,
            "student_id": self.student_id,
            "timestamp": self.timestamp,
            "scan_type": self.scan_type,
            "session": self.session,
            "status": self.status,
            "photo_ref": self.photo_ref,
            "qr_payload": self.qr_payload,
            "dedupe_key": self.dedupe_key(),
        })
    }
}
