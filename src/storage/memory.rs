use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use dashmap::DashMap;

use super::traits::{LocalStore, RosterError, RosterLookup, StorageError, StoredAttendance};
use crate::event::{AttendanceEvent, LastScan, Student};

/// Attendance log held in memory, for tests and demos.
pub struct MemoryLocalStore {
    rows: DashMap<i64, StoredAttendance>,
    next_id: AtomicI64,
}

impl MemoryLocalStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every stored row, oldest first.
    #[must_use]
    pub fn all(&self) -> Vec<StoredAttendance> {
        let mut rows: Vec<StoredAttendance> = self.rows.iter().map(|r| r.value().clone()).collect();
        rows.sort_by_key(|r| r.id);
        rows
    }
}

impl Default for MemoryLocalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn insert_attendance(&self, event: &AttendanceEvent) -> Result<i64, StorageError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.rows.insert(
            id,
            StoredAttendance {
                id,
                event: event.clone(),
                synced: false,
                cloud_record_id: None,
                sync_timestamp: None,
            },
        );
        Ok(id)
    }

    async fn last_scan(&self, student_id: &str) -> Result<Option<LastScan>, StorageError> {
        Ok(self
            .rows
            .iter()
            .filter(|r| r.event.student_id == student_id)
            .max_by_key(|r| (r.event.timestamp, r.id))
            .map(|r| LastScan {
                timestamp: r.event.timestamp,
                scan_type: r.event.scan_type,
            }))
    }

    async fn mark_synced(
        &self,
        id: i64,
        cloud_record_id: &str,
        synced_at: NaiveDateTime,
    ) -> Result<(), StorageError> {
        let mut row = self.rows.get_mut(&id).ok_or(StorageError::NotFound(id))?;
        row.synced = true;
        row.cloud_record_id = Some(cloud_record_id.to_string());
        row.sync_timestamp = Some(synced_at);
        Ok(())
    }

    async fn attendance(&self, id: i64) -> Result<Option<StoredAttendance>, StorageError> {
        Ok(self.rows.get(&id).map(|r| r.value().clone()))
    }
}

/// Fixed roster held in memory.
pub struct MemoryRoster {
    students: DashMap<String, Student>,
}

impl MemoryRoster {
    #[must_use]
    pub fn new() -> Self {
        Self {
            students: DashMap::new(),
        }
    }

    pub fn with_students(students: impl IntoIterator<Item = Student>) -> Self {
        let roster = Self::new();
        for student in students {
            roster.insert(student);
        }
        roster
    }

    pub fn insert(&self, student: Student) {
        self.students.insert(student.student_id.clone(), student);
    }
}

impl Default for MemoryRoster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RosterLookup for MemoryRoster {
    async fn find_student(&self, student_id: &str) -> Result<Option<Student>, RosterError> {
        Ok(self.students.get(student_id).map(|s| s.value().clone()))
    }
}
