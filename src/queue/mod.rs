// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable outbound queue backed by SQLite.
//!
//! Every accepted attendance event lands here after its local write. The
//! sync worker drains the queue towards the cloud:
//!
//! ```text
//!   enqueue ──► sync_queue ──dequeue_batch──► upload ──ok──► ack (row deleted)
//!                   ▲                            │
//!                   └──────── nack (retry_count+1) ◄─ err
//!                   │
//!                   └─ retry_count >= max ──archive_exhausted──► sync_queue_archive
//! ```
//!
//! Delivery is at-least-once: a row only disappears on [`SyncQueue::ack`],
//! so a crash between dequeue and ack redelivers the record on the next run.
//! Rows are never hard-deleted for any other reason; exhausted and corrupt
//! rows move to the archive table.

mod lock;
mod record;

pub use lock::StoreLock;
pub use record::{
    validate_payload, ArchivedRecord, QueueRecord, QueueStatus, RecordState, RecordType,
    ValidationError, REASON_CORRUPT, REASON_EXHAUSTED,
};

use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::QueueConfig;
use crate::event::AttendanceEvent;
use crate::resilience::retry::{retry, RetryConfig};
use record::payload_hash;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid payload: {0}")]
    Validation(#[from] ValidationError),
    #[error("queue backend error: {0}")]
    Backend(String),
    #[error("queue store is locked by another process ({path})")]
    Locked { path: String },
    #[error("queue record {0} not found")]
    NotFound(i64),
    #[error("queue record {0} failed its integrity check")]
    Corrupt(i64),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        QueueError::Backend(err.to_string())
    }
}

/// Counters since startup, for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub total_enqueued: u64,
    pub total_acked: u64,
    pub total_nacked: u64,
    pub total_archived: u64,
}

const QUEUE_COLUMNS: &str =
    "id, record_type, payload, payload_hash, priority, retry_count, created_at, last_attempt, error_message";

/// Durable queue of pending outbound records.
pub struct SyncQueue {
    pool: SqlitePool,
    /// Path to SQLite file (for display)
    path: String,
    clock: Arc<dyn Clock>,
    default_priority: i32,
    /// Serializes writers inside the process
    write_lock: Mutex<()>,
    /// Held for the queue's lifetime when configured
    store_lock: Option<StoreLock>,
    total_enqueued: AtomicU64,
    total_acked: AtomicU64,
    total_nacked: AtomicU64,
    total_archived: AtomicU64,
}

impl SyncQueue {
    /// Open (or create) the queue store.
    ///
    /// Connecting uses the startup retry preset so a store that is briefly
    /// busy does not fail boot, while a bad path still fails fast.
    #[tracing::instrument(skip(config, clock), fields(path = %config.path))]
    pub async fn open(config: &QueueConfig, clock: Arc<dyn Clock>) -> Result<Self, QueueError> {
        config
            .validate()
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        let store_lock = if config.lock_file && !config.is_in_memory() {
            Some(StoreLock::acquire(Path::new(&config.path))?)
        } else {
            None
        };

        let options = if config.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(&config.path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
        };
        let options = options.busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        // An in-memory database exists per connection, so it gets exactly one
        // connection that is never recycled.
        let (max_connections, recycle) = if config.is_in_memory() {
            (1, false)
        } else {
            (config.max_connections, true)
        };

        let pool = retry("queue_connect", &RetryConfig::startup(), || {
            let options = options.clone();
            async move {
                let mut pool_options = SqlitePoolOptions::new().max_connections(max_connections);
                if !recycle {
                    pool_options = pool_options.idle_timeout(None).max_lifetime(None);
                }
                pool_options.connect_with(options).await.map_err(QueueError::from)
            }
        })
        .await?;

        let queue = Self {
            pool,
            path: config.path.clone(),
            clock,
            default_priority: config.default_priority,
            write_lock: Mutex::new(()),
            store_lock,
            total_enqueued: AtomicU64::new(0),
            total_acked: AtomicU64::new(0),
            total_nacked: AtomicU64::new(0),
            total_archived: AtomicU64::new(0),
        };
        queue.init_schema().await?;

        let status = queue.status().await?;
        if status.pending_count > 0 {
            warn!(pending = status.pending_count, "Queue has records from previous run, will redeliver");
        }
        info!(
            path = %queue.path,
            pending = status.pending_count,
            archived = status.archived_count,
            locked = queue.store_lock.is_some(),
            "Sync queue opened"
        );
        Ok(queue)
    }

    /// Connection pool, shared with the local SQLite collaborators.
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Close the pool. The queue is unusable afterwards.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn init_schema(&self) -> Result<(), QueueError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS sync_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                record_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                payload_hash TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                retry_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                last_attempt INTEGER,
                error_message TEXT
            )
            "#,
            "DROP INDEX IF EXISTS idx_sync_queue_order",
            // Rowids only grow, so id order is enqueue order even when the wall clock steps back.
            "CREATE INDEX IF NOT EXISTS idx_sync_queue_fifo ON sync_queue (priority DESC, id ASC)",
            r#"
            CREATE TABLE IF NOT EXISTS sync_queue_archive (
                archive_id INTEGER PRIMARY KEY AUTOINCREMENT,
                id INTEGER NOT NULL,
                record_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                payload_hash TEXT NOT NULL,
                priority INTEGER NOT NULL,
                retry_count INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                last_attempt INTEGER,
                error_message TEXT,
                archived_at INTEGER NOT NULL,
                reason TEXT NOT NULL
            )
            "#,
        ];
        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Validate and store a record. Returns its id.
    pub async fn enqueue(
        &self,
        record_type: RecordType,
        payload: &Value,
        priority: i32,
    ) -> Result<i64, QueueError> {
        if let Err(e) = validate_payload(record_type, payload) {
            crate::metrics::record_queue_operation("enqueue", "invalid");
            warn!(record_type = %record_type, error = %e, "Rejected malformed queue payload");
            return Err(e.into());
        }

        let payload = serde_json::to_string(payload)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;
        let hash = payload_hash(&payload);
        let now = self.clock.now_millis();

        let _guard = self.write_lock.lock().await;
        let id = sqlx::query(
            "INSERT INTO sync_queue (record_type, payload, payload_hash, priority, retry_count, created_at) VALUES (?, ?, ?, ?, 0, ?)",
        )
        .bind(record_type.as_str())
        .bind(&payload)
        .bind(&hash)
        .bind(priority)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_queue_operation("enqueue", "success");
        debug!(id, record_type = %record_type, priority, "Record enqueued");
        Ok(id)
    }

    /// Queue an attendance event at the configured default priority.
    pub async fn enqueue_attendance(
        &self,
        event: &AttendanceEvent,
        local_record_id: i64,
    ) -> Result<i64, QueueError> {
        self.enqueue(
            RecordType::Attendance,
            &event.to_queue_payload(local_record_id),
            self.default_priority,
        )
        .await
    }

    /// Records still eligible for delivery, highest priority first and FIFO
    /// within a priority.
    ///
    /// Rows whose payload fails its integrity hash are moved to the archive
    /// instead of being returned.
    pub async fn dequeue_batch(&self, limit: u32, max_retries: u32) -> Result<Vec<QueueRecord>, QueueError> {
        let _guard = self.write_lock.lock().await;

        let rows = sqlx::query(&format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE retry_count < ? \
             ORDER BY priority DESC, id ASC LIMIT ?"
        ))
        .bind(i64::from(max_retries))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let stored_hash: String = row.try_get("payload_hash")?;
            let record = match record_from_row(row, RecordState::Pending) {
                Ok(record) if payload_hash(&record.payload) == stored_hash => record,
                Ok(record) => {
                    self.quarantine(record.id, "payload hash mismatch").await?;
                    continue;
                }
                Err(e) => {
                    let id: i64 = row.try_get("id")?;
                    self.quarantine(id, &e.to_string()).await?;
                    continue;
                }
            };
            records.push(record);
        }

        crate::metrics::record_batch_size(records.len());
        Ok(records)
    }

    /// Move a single unreadable row to the archive. Caller holds the write lock.
    async fn quarantine(&self, id: i64, detail: &str) -> Result<(), QueueError> {
        error!(id, detail, "Corrupt queue row moved to archive");
        crate::metrics::record_corruption("queue");

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "INSERT INTO sync_queue_archive ({QUEUE_COLUMNS}, archived_at, reason) \
             SELECT {QUEUE_COLUMNS}, ?, ? FROM sync_queue WHERE id = ?"
        ))
        .bind(self.clock.now_millis())
        .bind(REASON_CORRUPT)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM sync_queue WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.total_archived.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Permanently remove a delivered record.
    pub async fn ack(&self, id: i64) -> Result<(), QueueError> {
        let _guard = self.write_lock.lock().await;
        let deleted = sqlx::query("DELETE FROM sync_queue WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(QueueError::NotFound(id));
        }

        self.total_acked.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_queue_operation("ack", "success");
        debug!(id, "Record acknowledged");
        Ok(())
    }

    /// Record a failed delivery attempt. The record stays queued.
    pub async fn nack(&self, id: i64, error_message: &str) -> Result<(), QueueError> {
        let _guard = self.write_lock.lock().await;
        let updated = sqlx::query(
            "UPDATE sync_queue SET retry_count = retry_count + 1, last_attempt = ?, error_message = ? WHERE id = ?",
        )
        .bind(self.clock.now_millis())
        .bind(error_message)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(QueueError::NotFound(id));
        }

        self.total_nacked.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_queue_operation("nack", "success");
        debug!(id, error = error_message, "Record nacked");
        Ok(())
    }

    /// Atomically move every record with `retry_count >= max_retries` to the
    /// archive. Returns how many moved.
    pub async fn archive_exhausted(&self, max_retries: u32) -> Result<u64, QueueError> {
        let _guard = self.write_lock.lock().await;
        let threshold = i64::from(max_retries);

        let mut tx = self.pool.begin().await?;
        let moved = sqlx::query(&format!(
            "INSERT INTO sync_queue_archive ({QUEUE_COLUMNS}, archived_at, reason) \
             SELECT {QUEUE_COLUMNS}, ?, ? FROM sync_queue WHERE retry_count >= ?"
        ))
        .bind(self.clock.now_millis())
        .bind(REASON_EXHAUSTED)
        .bind(threshold)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let deleted = sqlx::query("DELETE FROM sync_queue WHERE retry_count >= ?")
            .bind(threshold)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if moved != deleted {
            // Dropping the transaction rolls both statements back.
            return Err(QueueError::Backend(format!(
                "archive mismatch: copied {moved} rows but removed {deleted}"
            )));
        }
        tx.commit().await?;

        if moved > 0 {
            self.total_archived.fetch_add(moved, Ordering::Relaxed);
            crate::metrics::record_archived(moved);
            warn!(moved, max_retries, "Archived records that exhausted their retries");
        }
        Ok(moved)
    }

    /// Pending and archived counts.
    pub async fn status(&self) -> Result<QueueStatus, QueueError> {
        let pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue")
            .fetch_one(&self.pool)
            .await?;
        let archived: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue_archive")
            .fetch_one(&self.pool)
            .await?;

        let status = QueueStatus {
            pending_count: u64::try_from(pending).unwrap_or_default(),
            archived_count: u64::try_from(archived).unwrap_or_default(),
        };
        crate::metrics::set_queue_depth(status.pending_count, status.archived_count);
        Ok(status)
    }

    /// Counters since the queue was opened.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            total_enqueued: self.total_enqueued.load(Ordering::Relaxed),
            total_acked: self.total_acked.load(Ordering::Relaxed),
            total_nacked: self.total_nacked.load(Ordering::Relaxed),
            total_archived: self.total_archived.load(Ordering::Relaxed),
        }
    }

    /// Fetch one pending record.
    ///
    /// A row whose payload no longer matches its hash is reported as
    /// [`QueueError::Corrupt`] and left in place; the next
    /// [`dequeue_batch`](Self::dequeue_batch) quarantines it.
    pub async fn get(&self, id: i64) -> Result<Option<QueueRecord>, QueueError> {
        let Some(row) = sqlx::query(&format!("SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let stored_hash: String = row.try_get("payload_hash")?;
        let record = record_from_row(&row, RecordState::Pending)?;
        if payload_hash(&record.payload) != stored_hash {
            return Err(QueueError::Corrupt(id));
        }
        Ok(Some(record))
    }

    /// Most recently archived records first.
    pub async fn archived(&self, limit: u32) -> Result<Vec<ArchivedRecord>, QueueError> {
        let rows = sqlx::query(&format!(
            "SELECT archive_id, archived_at, reason, {QUEUE_COLUMNS} FROM sync_queue_archive \
             ORDER BY archived_at DESC, archive_id DESC LIMIT ?"
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ArchivedRecord, QueueError> {
                Ok(ArchivedRecord {
                    archive_id: row.try_get("archive_id")?,
                    archived_at: row.try_get("archived_at")?,
                    reason: row.try_get("reason")?,
                    record: record_from_row(row, RecordState::Archived)?,
                })
            })
            .collect()
    }

    /// Operator action: put an archived record back in the queue with a
    /// fresh retry budget. Returns the new queue id.
    ///
    /// The record goes to the back of its priority tier. Rows that fail
    /// their integrity hash or payload validation stay in the archive.
    pub async fn requeue_archived(&self, archive_id: i64) -> Result<i64, QueueError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT record_type, payload, payload_hash, priority, created_at FROM sync_queue_archive WHERE archive_id = ?",
        )
        .bind(archive_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(QueueError::NotFound(archive_id))?;

        let payload: String = row.try_get("payload")?;
        let stored_hash: String = row.try_get("payload_hash")?;
        if payload_hash(&payload) != stored_hash {
            warn!(archive_id, "Refusing to requeue archived record with a mismatched hash");
            return Err(QueueError::Corrupt(archive_id));
        }
        let record_type: RecordType = row
            .try_get::<String, _>("record_type")?
            .parse()
            .map_err(|e: crate::event::UnknownVariant| QueueError::Serialization(e.to_string()))?;
        let value: Value =
            serde_json::from_str(&payload).map_err(|e| QueueError::Serialization(e.to_string()))?;
        validate_payload(record_type, &value)?;

        let id = sqlx::query(
            "INSERT INTO sync_queue (record_type, payload, payload_hash, priority, retry_count, created_at) VALUES (?, ?, ?, ?, 0, ?)",
        )
        .bind(record_type.as_str())
        .bind(&payload)
        .bind(&stored_hash)
        .bind(row.try_get::<i32, _>("priority")?)
        .bind(row.try_get::<i64, _>("created_at")?)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query("DELETE FROM sync_queue_archive WHERE archive_id = ?")
            .bind(archive_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(archive_id, id, "Archived record requeued");
        Ok(id)
    }
}

fn record_from_row(row: &SqliteRow, state: RecordState) -> Result<QueueRecord, QueueError> {
    let record_type: String = row.try_get("record_type")?;
    let retry_count: i64 = row.try_get("retry_count")?;
    Ok(QueueRecord {
        id: row.try_get("id")?,
        record_type: record_type
            .parse()
            .map_err(|e: crate::event::UnknownVariant| QueueError::Serialization(e.to_string()))?,
        payload: row.try_get("payload")?,
        priority: row.try_get("priority")?,
        retry_count: u32::try_from(retry_count).unwrap_or(u32::MAX),
        created_at: row.try_get("created_at")?,
        last_attempt: row.try_get("last_attempt")?,
        error_message: row.try_get("error_message")?,
        state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::event::{ScanType, Session, Status};
    use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
    use serde_json::json;
    use tempfile::tempdir;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 16)
            .unwrap()
            .and_hms_opt(7, 0, 0)
            .unwrap()
    }

    fn payload(student: &str) -> Value {
        json!({
            "student_id": student,
            "timestamp": "2026-10-16T07:20:00",
            "scan_type": "login",
            "status": "late",
        })
    }

    async fn memory_queue() -> (SyncQueue, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let queue = SyncQueue::open(&QueueConfig::in_memory(), clock.clone()).await.unwrap();
        (queue, clock)
    }

    #[tokio::test]
    async fn test_enqueue_then_dequeue_returns_identical_payload() {
        let (queue, _clock) = memory_queue().await;
        let original = payload("S-1");

        let id = queue.enqueue(RecordType::Attendance, &original, 0).await.unwrap();
        let batch = queue.dequeue_batch(10, 5).await.unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, id);
        assert_eq!(batch[0].payload, serde_json::to_string(&original).unwrap());
        assert_eq!(batch[0].retry_count, 0);
        assert_eq!(batch[0].state, RecordState::Pending);
    }

    #[tokio::test]
    async fn test_invalid_payload_never_enters_store() {
        let (queue, _clock) = memory_queue().await;

        let result = queue
            .enqueue(RecordType::Attendance, &json!({"student_id": "S-1"}), 0)
            .await;

        assert!(matches!(result, Err(QueueError::Validation(ValidationError::MissingField("timestamp")))));
        assert_eq!(queue.status().await.unwrap().pending_count, 0);
    }

    #[tokio::test]
    async fn test_dequeue_orders_by_priority_then_fifo() {
        let (queue, clock) = memory_queue().await;

        let low_first = queue.enqueue(RecordType::Attendance, &payload("A"), 0).await.unwrap();
        clock.advance(ChronoDuration::seconds(1));
        let high = queue.enqueue(RecordType::Attendance, &payload("B"), 5).await.unwrap();
        clock.advance(ChronoDuration::seconds(1));
        let low_second = queue.enqueue(RecordType::Attendance, &payload("C"), 0).await.unwrap();

        let ids: Vec<i64> = queue.dequeue_batch(10, 5).await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![high, low_first, low_second]);
    }

    #[tokio::test]
    async fn test_fifo_survives_clock_stepping_back() {
        let (queue, clock) = memory_queue().await;

        let first = queue.enqueue(RecordType::Attendance, &payload("A"), 0).await.unwrap();
        // DST fall-back or an NTP correction.
        clock.advance(ChronoDuration::minutes(-60));
        let second = queue.enqueue(RecordType::Attendance, &payload("B"), 0).await.unwrap();

        let ids: Vec<i64> = queue.dequeue_batch(10, 5).await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[tokio::test]
    async fn test_dequeue_respects_limit() {
        let (queue, _clock) = memory_queue().await;
        for i in 0..5 {
            queue.enqueue(RecordType::Attendance, &payload(&format!("S-{i}")), 0).await.unwrap();
        }
        assert_eq!(queue.dequeue_batch(2, 5).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_nack_increments_retry_and_keeps_record() {
        let (queue, clock) = memory_queue().await;
        let id = queue.enqueue(RecordType::Attendance, &payload("S-1"), 0).await.unwrap();

        clock.advance(ChronoDuration::seconds(30));
        queue.nack(id, "connection refused").await.unwrap();

        let record = queue.get(id).await.unwrap().unwrap();
        assert_eq!(record.retry_count, 1);
        assert_eq!(record.error_message.as_deref(), Some("connection refused"));
        assert_eq!(record.last_attempt, Some(clock.now_millis()));
        assert_eq!(queue.stats().total_nacked, 1);
    }

    #[tokio::test]
    async fn test_dequeue_skips_records_at_retry_limit() {
        let (queue, _clock) = memory_queue().await;
        let id = queue.enqueue(RecordType::Attendance, &payload("S-1"), 0).await.unwrap();
        for _ in 0..3 {
            queue.nack(id, "down").await.unwrap();
        }

        assert!(queue.dequeue_batch(10, 3).await.unwrap().is_empty());
        assert_eq!(queue.dequeue_batch(10, 4).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ack_removes_record() {
        let (queue, _clock) = memory_queue().await;
        let id = queue.enqueue(RecordType::Attendance, &payload("S-1"), 0).await.unwrap();

        queue.ack(id).await.unwrap();

        assert!(queue.get(id).await.unwrap().is_none());
        assert_eq!(queue.status().await.unwrap(), QueueStatus::default());
        assert!(matches!(queue.ack(id).await, Err(QueueError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_nack_unknown_record_is_not_found() {
        let (queue, _clock) = memory_queue().await;
        assert!(matches!(queue.nack(99, "x").await, Err(QueueError::NotFound(99))));
    }

    #[tokio::test]
    async fn test_archive_exhausted_moves_only_exhausted() {
        let (queue, _clock) = memory_queue().await;
        let exhausted = queue.enqueue(RecordType::Attendance, &payload("S-1"), 0).await.unwrap();
        let fresh = queue.enqueue(RecordType::Attendance, &payload("S-2"), 0).await.unwrap();
        for _ in 0..3 {
            queue.nack(exhausted, "timeout").await.unwrap();
        }
        queue.nack(fresh, "timeout").await.unwrap();

        assert_eq!(queue.archive_exhausted(3).await.unwrap(), 1);
        assert_eq!(queue.archive_exhausted(3).await.unwrap(), 0);

        let status = queue.status().await.unwrap();
        assert_eq!(status.pending_count, 1);
        assert_eq!(status.archived_count, 1);

        let archived = queue.archived(10).await.unwrap();
        assert_eq!(archived[0].record.id, exhausted);
        assert_eq!(archived[0].record.retry_count, 3);
        assert_eq!(archived[0].record.error_message.as_deref(), Some("timeout"));
        assert_eq!(archived[0].record.state, RecordState::Archived);
        assert_eq!(archived[0].reason, REASON_EXHAUSTED);
    }

    #[tokio::test]
    async fn test_requeue_archived_restores_budget() {
        let (queue, _clock) = memory_queue().await;
        let id = queue.enqueue(RecordType::Attendance, &payload("S-1"), 2).await.unwrap();
        queue.nack(id, "down").await.unwrap();
        queue.archive_exhausted(1).await.unwrap();

        let archive_id = queue.archived(1).await.unwrap()[0].archive_id;
        let new_id = queue.requeue_archived(archive_id).await.unwrap();

        let record = queue.get(new_id).await.unwrap().unwrap();
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.priority, 2);
        assert_eq!(queue.status().await.unwrap().archived_count, 0);
        assert!(matches!(queue.requeue_archived(archive_id).await, Err(QueueError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_corrupt_row_is_archived_not_returned() {
        let (queue, _clock) = memory_queue().await;
        let bad = queue.enqueue(RecordType::Attendance, &payload("S-1"), 0).await.unwrap();
        let good = queue.enqueue(RecordType::Attendance, &payload("S-2"), 0).await.unwrap();

        sqlx::query("UPDATE sync_queue SET payload = '{\"tampered\":true}' WHERE id = ?")
            .bind(bad)
            .execute(&queue.pool())
            .await
            .unwrap();

        let batch = queue.dequeue_batch(10, 5).await.unwrap();
        assert_eq!(batch.iter().map(|r| r.id).collect::<Vec<_>>(), vec![good]);

        let archived = queue.archived(10).await.unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].record.id, bad);
        assert_eq!(archived[0].reason, REASON_CORRUPT);
    }

    #[tokio::test]
    async fn test_requeue_refuses_quarantined_row() {
        let (queue, _clock) = memory_queue().await;
        let bad = queue.enqueue(RecordType::Attendance, &payload("S-1"), 0).await.unwrap();
        sqlx::query("UPDATE sync_queue SET payload = '{\"tampered\":true}' WHERE id = ?")
            .bind(bad)
            .execute(&queue.pool())
            .await
            .unwrap();
        assert!(queue.dequeue_batch(10, 5).await.unwrap().is_empty());
        let archive_id = queue.archived(1).await.unwrap()[0].archive_id;

        let result = queue.requeue_archived(archive_id).await;

        assert!(matches!(result, Err(QueueError::Corrupt(id)) if id == archive_id));
        assert!(queue.dequeue_batch(10, 5).await.unwrap().is_empty());
        assert_eq!(queue.status().await.unwrap(), QueueStatus { pending_count: 0, archived_count: 1 });
    }

    #[tokio::test]
    async fn test_requeue_refuses_invalid_payload_even_with_matching_hash() {
        let (queue, _clock) = memory_queue().await;
        let id = queue.enqueue(RecordType::Attendance, &payload("S-1"), 0).await.unwrap();
        queue.nack(id, "down").await.unwrap();
        queue.archive_exhausted(1).await.unwrap();

        let forged = r#"{"tampered":true}"#;
        sqlx::query("UPDATE sync_queue_archive SET payload = ?, payload_hash = ?")
            .bind(forged)
            .bind(payload_hash(forged))
            .execute(&queue.pool())
            .await
            .unwrap();
        let archive_id = queue.archived(1).await.unwrap()[0].archive_id;

        let result = queue.requeue_archived(archive_id).await;

        assert!(matches!(result, Err(QueueError::Validation(_))));
        assert_eq!(queue.status().await.unwrap().archived_count, 1);
    }

    #[tokio::test]
    async fn test_get_reports_tampered_row() {
        let (queue, _clock) = memory_queue().await;
        let id = queue.enqueue(RecordType::Attendance, &payload("S-1"), 0).await.unwrap();
        sqlx::query("UPDATE sync_queue SET payload = replace(payload, 'S-1', 'S-7') WHERE id = ?")
            .bind(id)
            .execute(&queue.pool())
            .await
            .unwrap();

        assert!(matches!(queue.get(id).await, Err(QueueError::Corrupt(bad)) if bad == id));
        assert_eq!(queue.status().await.unwrap().pending_count, 1);
    }

    #[tokio::test]
    async fn test_enqueue_attendance_links_local_row() {
        let (queue, _clock) = memory_queue().await;
        let event = AttendanceEvent::new("S-9", start(), ScanType::Login, Session::Morning, Status::Present, "S-9");

        let id = queue.enqueue_attendance(&event, 17).await.unwrap();
        let record = queue.get(id).await.unwrap().unwrap();

        assert_eq!(record.local_record_id(), Some(17));
        assert_eq!(record.dedupe_key(), Some(event.dedupe_key()));
    }

    #[tokio::test]
    async fn test_records_survive_restart() {
        let dir = tempdir().unwrap();
        let config = QueueConfig {
            path: dir.path().join("queue.db").to_string_lossy().to_string(),
            ..QueueConfig::default()
        };
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(start()));

        let id = {
            let queue = SyncQueue::open(&config, clock.clone()).await.unwrap();
            let id = queue.enqueue(RecordType::Attendance, &payload("S-1"), 0).await.unwrap();
            // Dequeued but never acked: the crash case.
            assert_eq!(queue.dequeue_batch(10, 5).await.unwrap().len(), 1);
            queue.close().await;
            id
        };

        let queue = SyncQueue::open(&config, clock).await.unwrap();
        let batch = queue.dequeue_batch(10, 5).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, id);
    }

    #[tokio::test]
    async fn test_second_open_of_locked_store_fails() {
        let dir = tempdir().unwrap();
        let config = QueueConfig {
            path: dir.path().join("queue.db").to_string_lossy().to_string(),
            ..QueueConfig::default()
        };
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(start()));

        let _first = SyncQueue::open(&config, clock.clone()).await.unwrap();
        let second = SyncQueue::open(&config, clock).await;
        assert!(matches!(second, Err(QueueError::Locked { .. })));
    }
}
