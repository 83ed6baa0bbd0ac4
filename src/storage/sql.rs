// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite attendance log and roster.
//!
//! Both share the queue's pool so the whole device state lives in one file:
//! ```sql
//! CREATE TABLE attendance (
//!   id INTEGER PRIMARY KEY AUTOINCREMENT,
//!   student_id TEXT NOT NULL,
//!   timestamp TEXT NOT NULL,      -- local time, ISO-8601
//!   scan_type TEXT NOT NULL,
//!   session TEXT NOT NULL,
//!   status TEXT NOT NULL,
//!   photo_ref TEXT,
//!   qr_payload TEXT NOT NULL,
//!   synced INTEGER NOT NULL DEFAULT 0,
//!   cloud_record_id TEXT,         -- set only on ack
//!   sync_timestamp TEXT           -- set only on ack
//! )
//! ```

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::debug;

use super::traits::{LocalStore, RosterError, RosterLookup, StorageError, StoredAttendance};
use crate::event::{AttendanceEvent, LastScan, Student};

/// Fixed-width so text order matches time order.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

fn format_ts(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_ts(raw: &str) -> Result<NaiveDateTime, StorageError> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|e| StorageError::Backend(format!("bad timestamp '{raw}': {e}")))
}

fn parse_enum<T>(raw: &str) -> Result<T, StorageError>
where
    T: std::str::FromStr<Err = crate::event::UnknownVariant>,
{
    raw.parse().map_err(|e: crate::event::UnknownVariant| StorageError::Backend(e.to_string()))
}

pub struct SqlLocalStore {
    pool: SqlitePool,
}

impl SqlLocalStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, StorageError> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS attendance (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                student_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                scan_type TEXT NOT NULL,
                session TEXT NOT NULL,
                status TEXT NOT NULL,
                photo_ref TEXT,
                qr_payload TEXT NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0,
                cloud_record_id TEXT,
                sync_timestamp TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_attendance_student_time ON attendance (student_id, timestamp)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Rows not yet acknowledged by the cloud.
    pub async fn unsynced_count(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attendance WHERE synced = 0")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

fn attendance_from_row(row: &SqliteRow) -> Result<StoredAttendance, StorageError> {
    let timestamp: String = row.try_get("timestamp")?;
    let scan_type: String = row.try_get("scan_type")?;
    let session: String = row.try_get("session")?;
    let status: String = row.try_get("status")?;
    let sync_timestamp: Option<String> = row.try_get("sync_timestamp")?;
    let synced: i64 = row.try_get("synced")?;

    Ok(StoredAttendance {
        id: row.try_get("id")?,
        event: AttendanceEvent {
            student_id: row.try_get("student_id")?,
            timestamp: parse_ts(&timestamp)?,
            scan_type: parse_enum(&scan_type)?,
            session: parse_enum(&session)?,
            status: parse_enum(&status)?,
            photo_ref: row.try_get("photo_ref")?,
            qr_payload: row.try_get("qr_payload")?,
        },
        synced: synced != 0,
        cloud_record_id: row.try_get("cloud_record_id")?,
        sync_timestamp: sync_timestamp.as_deref().map(parse_ts).transpose()?,
    })
}

#[async_trait]
impl LocalStore for SqlLocalStore {
    async fn insert_attendance(&self, event: &AttendanceEvent) -> Result<i64, StorageError> {
        let id = sqlx::query(
            "INSERT INTO attendance (student_id, timestamp, scan_type, session, status, photo_ref, qr_payload) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.student_id)
        .bind(format_ts(event.timestamp))
        .bind(event.scan_type.as_str())
        .bind(event.session.as_str())
        .bind(event.status.as_str())
        .bind(&event.photo_ref)
        .bind(&event.qr_payload)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        debug!(id, student_id = %event.student_id, "Attendance row written");
        Ok(id)
    }

    async fn last_scan(&self, student_id: &str) -> Result<Option<LastScan>, StorageError> {
        let row = sqlx::query(
            "SELECT timestamp, scan_type FROM attendance WHERE student_id = ? \
             ORDER BY timestamp DESC, id DESC LIMIT 1",
        )
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<LastScan, StorageError> {
            let timestamp: String = row.try_get("timestamp")?;
            let scan_type: String = row.try_get("scan_type")?;
            Ok(LastScan {
                timestamp: parse_ts(&timestamp)?,
                scan_type: parse_enum(&scan_type)?,
            })
        })
        .transpose()
    }

    async fn mark_synced(
        &self,
        id: i64,
        cloud_record_id: &str,
        synced_at: NaiveDateTime,
    ) -> Result<(), StorageError> {
        let updated = sqlx::query(
            "UPDATE attendance SET synced = 1, cloud_record_id = ?, sync_timestamp = ? WHERE id = ?",
        )
        .bind(cloud_record_id)
        .bind(format_ts(synced_at))
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(StorageError::NotFound(id));
        }
        Ok(())
    }

    async fn attendance(&self, id: i64) -> Result<Option<StoredAttendance>, StorageError> {
        let row = sqlx::query("SELECT * FROM attendance WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(attendance_from_row).transpose()
    }
}

/// Roster backed by a `students` table.
pub struct SqlRoster {
    pool: SqlitePool,
}

impl SqlRoster {
    pub async fn new(pool: SqlitePool) -> Result<Self, RosterError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS students (
                student_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                section TEXT,
                guardian_contact TEXT
            )
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    /// Insert or replace a roster entry.
    pub async fn upsert_student(&self, student: &Student) -> Result<(), RosterError> {
        sqlx::query(
            "INSERT INTO students (student_id, name, section, guardian_contact) VALUES (?, ?, ?, ?) \
             ON CONFLICT(student_id) DO UPDATE SET name = excluded.name, section = excluded.section, \
             guardian_contact = excluded.guardian_contact",
        )
        .bind(&student.student_id)
        .bind(&student.name)
        .bind(&student.section)
        .bind(&student.guardian_contact)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RosterLookup for SqlRoster {
    async fn find_student(&self, student_id: &str) -> Result<Option<Student>, RosterError> {
        let row = sqlx::query(
            "SELECT student_id, name, section, guardian_contact FROM students WHERE student_id = ?",
        )
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<Student, RosterError> {
            Ok(Student {
                student_id: row.try_get("student_id")?,
                name: row.try_get("name")?,
                section: row.try_get("section")?,
                guardian_contact: row.try_get("guardian_contact")?,
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ScanType, Session, Status};
    use chrono::NaiveDate;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 16)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn event(student: &str, ts: NaiveDateTime, scan_type: ScanType) -> AttendanceEvent {
        AttendanceEvent::new(student, ts, scan_type, Session::Morning, Status::Present, student)
    }

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let store = SqlLocalStore::new(pool().await).await.unwrap();
        let original = event("S-1", at(7, 20), ScanType::Login).with_photo("photos/S-1.jpg");

        let id = store.insert_attendance(&original).await.unwrap();
        let stored = store.attendance(id).await.unwrap().unwrap();

        assert_eq!(stored.event, original);
        assert!(!stored.synced);
        assert_eq!(stored.cloud_record_id, None);
        assert_eq!(store.unsynced_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_last_scan_is_most_recent() {
        let store = SqlLocalStore::new(pool().await).await.unwrap();
        store.insert_attendance(&event("S-1", at(7, 20), ScanType::Login)).await.unwrap();
        store.insert_attendance(&event("S-1", at(11, 45), ScanType::Logout)).await.unwrap();
        store.insert_attendance(&event("S-2", at(12, 0), ScanType::Login)).await.unwrap();

        let last = store.last_scan("S-1").await.unwrap().unwrap();
        assert_eq!(last.timestamp, at(11, 45));
        assert_eq!(last.scan_type, ScanType::Logout);
        assert!(store.last_scan("S-9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_synced_sets_cloud_fields() {
        let store = SqlLocalStore::new(pool().await).await.unwrap();
        let id = store.insert_attendance(&event("S-1", at(7, 20), ScanType::Login)).await.unwrap();

        store.mark_synced(id, "cloud-77", at(7, 30)).await.unwrap();

        let stored = store.attendance(id).await.unwrap().unwrap();
        assert!(stored.synced);
        assert_eq!(stored.cloud_record_id.as_deref(), Some("cloud-77"));
        assert_eq!(stored.sync_timestamp, Some(at(7, 30)));
        assert!(matches!(store.mark_synced(999, "x", at(8, 0)).await, Err(StorageError::NotFound(999))));
    }

    #[tokio::test]
    async fn test_roster_upsert_and_lookup() {
        let roster = SqlRoster::new(pool().await).await.unwrap();
        let mut student = Student::new("S-1", "Ana Cruz");
        roster.upsert_student(&student).await.unwrap();

        student.section = Some("10-B".into());
        roster.upsert_student(&student).await.unwrap();

        assert_eq!(roster.find_student("S-1").await.unwrap(), Some(student));
        assert_eq!(roster.find_student("S-2").await.unwrap(), None);
    }
}
