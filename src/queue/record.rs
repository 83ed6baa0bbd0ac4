//! Queue record types and payload validation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::event::{ScanType, Status, UnknownVariant};

/// Archive reason for records that used up their retry budget.
pub const REASON_EXHAUSTED: &str = "max_retries_exceeded";
/// Archive reason for rows whose payload no longer matches its hash.
pub const REASON_CORRUPT: &str = "corrupt";

/// A payload was refused at enqueue time. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("payload must be a JSON object")]
    NotAnObject,
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("field '{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Kind of outbound record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    Attendance,
}

impl RecordType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Attendance => "attendance",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "attendance" => Ok(Self::Attendance),
            other => Err(UnknownVariant {
                kind: "record type",
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle of a queue row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Pending,
    Archived,
}

/// One outbound record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRecord {
    pub id: i64,
    pub record_type: RecordType,
    /// JSON payload exactly as enqueued
    pub payload: String,
    pub priority: i32,
    pub retry_count: u32,
    /// Epoch millis
    pub created_at: i64,
    /// Epoch millis of the last failed attempt
    pub last_attempt: Option<i64>,
    pub error_message: Option<String>,
    pub state: RecordState,
}

impl QueueRecord {
    pub fn payload_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }

    /// Local attendance row this record was created from.
    #[must_use]
    pub fn local_record_id(&self) -> Option<i64> {
        self.payload_json().ok()?.get("local_record_id")?.as_i64()
    }

    /// Natural key (student + timestamp + scan type) for remote dedupe.
    #[must_use]
    pub fn dedupe_key(&self) -> Option<String> {
        let payload = self.payload_json().ok()?;
        if let Some(key) = payload.get("dedupe_key").and_then(Value::as_str) {
            return Some(key.to_string());
        }
        let student = payload.get("student_id")?.as_str()?;
        let timestamp = payload.get("timestamp")?.as_str()?;
        let scan_type = payload.get("scan_type").and_then(Value::as_str).unwrap_or("");
        Some(format!("{student}:{timestamp}:{scan_type}"))
    }
}

/// A record moved out of the active queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedRecord {
    pub archive_id: i64,
    pub record: QueueRecord,
    /// Epoch millis
    pub archived_at: i64,
    pub reason: String,
}

/// Queue depth snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStatus {
    pub pending_count: u64,
    pub archived_count: u64,
}

/// Check a payload before it may enter the store.
pub fn validate_payload(record_type: RecordType, payload: &Value) -> Result<(), ValidationError> {
    let object = payload.as_object().ok_or(ValidationError::NotAnObject)?;

    match record_type {
        RecordType::Attendance => {
            let student_id = required_str(object, "student_id")?;
            if student_id.trim().is_empty() {
                return Err(ValidationError::InvalidField {
                    field: "student_id",
                    reason: "must not be blank".to_string(),
                });
            }

            let timestamp = required_str(object, "timestamp")?;
            parse_timestamp(timestamp).ok_or_else(|| ValidationError::InvalidField {
                field: "timestamp",
                reason: format!("'{timestamp}' is not an ISO-8601 date-time"),
            })?;

            required_str(object, "status")?
                .parse::<Status>()
                .map_err(|e| ValidationError::InvalidField {
                    field: "status",
                    reason: e.to_string(),
                })?;

            if let Some(scan_type) = object.get("scan_type").filter(|v| !v.is_null()) {
                scan_type
                    .as_str()
                    .ok_or_else(|| ValidationError::InvalidField {
                        field: "scan_type",
                        reason: "must be a string".to_string(),
                    })?
                    .parse::<ScanType>()
                    .map_err(|e| ValidationError::InvalidField {
                        field: "scan_type",
                        reason: e.to_string(),
                    })?;
            }
        }
    }
    Ok(())
}

fn required_str<'a>(
    object: &'a serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, ValidationError> {
    match object.get(field) {
        None | Some(Value::Null) => Err(ValidationError::MissingField(field)),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ValidationError::InvalidField {
            field,
            reason: "must be a string".to_string(),
        }),
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_local()))
}

/// SHA-256 of the payload text, hex encoded.
pub(crate) fn payload_hash(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}
