//! Collaborator contracts consumed by the scanner and the sync worker.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use thiserror::Error;

use crate::event::{AttendanceEvent, LastScan, Student};
use crate::queue::QueueRecord;

/// Local persistence failure. Terminal for the scan that hit it.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("attendance record {0} not found")]
    NotFound(i64),
    #[error("local storage error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("roster lookup failed: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for RosterError {
    fn from(err: sqlx::Error) -> Self {
        RosterError::Backend(err.to_string())
    }
}

/// Failure talking to the cloud service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("server returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl CloudError {
    /// Whether retrying later may succeed. Every failure is still retried
    /// up to the queue's budget; this only classifies it for logs.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connect(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::InvalidResponse(_) => false,
        }
    }
}

/// An attendance row as held by local storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAttendance {
    pub id: i64,
    pub event: AttendanceEvent,
    pub synced: bool,
    pub cloud_record_id: Option<String>,
    pub sync_timestamp: Option<NaiveDateTime>,
}

/// Durable local attendance log.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Persist an accepted event, returning its local id.
    async fn insert_attendance(&self, event: &AttendanceEvent) -> Result<i64, StorageError>;

    /// Most recent scan for a student, if any.
    async fn last_scan(&self, student_id: &str) -> Result<Option<LastScan>, StorageError>;

    /// Record the server-assigned id once the cloud has acknowledged the row.
    async fn mark_synced(
        &self,
        id: i64,
        cloud_record_id: &str,
        synced_at: NaiveDateTime,
    ) -> Result<(), StorageError>;

    async fn attendance(&self, id: i64) -> Result<Option<StoredAttendance>, StorageError>;
}

#[async_trait]
pub trait RosterLookup: Send + Sync {
    async fn find_student(&self, student_id: &str) -> Result<Option<Student>, RosterError>;
}

/// Remote attendance service. Only the sync worker calls this, always
/// through a circuit breaker.
#[async_trait]
pub trait CloudClient: Send + Sync {
    /// Breaker key for this service
    fn service_name(&self) -> &str {
        "cloud_api"
    }

    /// Deliver one queued record, returning the server-assigned id.
    async fn upload(&self, record: &QueueRecord) -> Result<String, CloudError>;
}
