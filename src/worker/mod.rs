// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Background sync: drains the queue to the cloud.
//!
//! Each pass:
//! 1. Skip entirely when the network is unreachable (no retry is spent)
//! 2. Archive records whose retries are exhausted and raise an alert
//! 3. Dequeue a batch and upload each record through the circuit breaker
//! 4. Ack and mark the local row synced on success, nack on any failure
//!
//! A pass with failures grows the wait before the next pass
//! (`interval + min(base * 2^failures, max)`); a clean pass resets it.
//! The worker shares nothing with the scanner except the queue, so a slow
//! or dead endpoint never stalls capture.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::{QueueConfig, SyncConfig};
use crate::queue::{QueueError, QueueRecord, SyncQueue};
use crate::resilience::{CircuitBreaker, CircuitError, ConnectivityMonitor, RetryConfig};
use crate::storage::{CloudClient, CloudError, LocalStore};

/// Worker lifecycle, published on a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for the next pass
    Idle,
    Syncing,
    /// Last pass found the network unreachable
    Offline,
    /// Last pass had failures; the next wait includes backoff
    BackingOff,
    Stopped,
}

impl WorkerState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Offline => "offline",
            Self::BackingOff => "backing_off",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-fatal conditions an operator should hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAlert {
    /// Records moved to the archive after `max_retries` failed deliveries
    ExhaustedRetries { count: u64, max_retries: u32 },
}

pub trait AlertSink: Send + Sync {
    fn alert(&self, alert: &SyncAlert);
}

/// Logs alerts at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn alert(&self, alert: &SyncAlert) {
        match alert {
            SyncAlert::ExhaustedRetries { count, max_retries } => error!(
                count,
                max_retries,
                "Records exhausted their retries and were archived"
            ),
        }
    }
}

/// What one pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// The pass was skipped because the network was unreachable
    pub offline: bool,
    pub archived: u64,
    pub attempted: usize,
    pub uploaded: usize,
    /// Upload failed (error or timeout) and the record was nacked
    pub failed: usize,
    /// Breaker was open; the record was nacked without an upload
    pub rejected: usize,
}

impl TickReport {
    fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }

    /// A pass with any nacked record counts against the backoff.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.failed + self.rejected > 0
    }

    fn outcome(&self) -> &'static str {
        if self.offline {
            "offline"
        } else if self.is_failure() {
            "failed"
        } else if self.attempted == 0 {
            "idle"
        } else {
            "clean"
        }
    }
}

enum Delivery {
    Uploaded(String),
    Failed(CloudError),
    Rejected,
}

pub struct SyncWorker {
    queue: Arc<SyncQueue>,
    local: Arc<dyn LocalStore>,
    cloud: Arc<dyn CloudClient>,
    breaker: Arc<CircuitBreaker>,
    connectivity: Arc<ConnectivityMonitor>,
    clock: Arc<dyn Clock>,
    alerts: Arc<dyn AlertSink>,
    interval: Duration,
    upload_timeout: Duration,
    backoff: RetryConfig,
    batch_size: u32,
    max_retries: u32,
    consecutive_failures: AtomicU32,
    state: watch::Sender<WorkerState>,
}

impl SyncWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<SyncQueue>,
        local: Arc<dyn LocalStore>,
        cloud: Arc<dyn CloudClient>,
        breaker: Arc<CircuitBreaker>,
        connectivity: Arc<ConnectivityMonitor>,
        clock: Arc<dyn Clock>,
        queue_config: &QueueConfig,
        sync_config: &SyncConfig,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            queue,
            local,
            cloud,
            breaker,
            connectivity,
            clock,
            alerts: Arc::new(LogAlertSink),
            interval: sync_config.interval(),
            upload_timeout: sync_config.upload_timeout(),
            backoff: RetryConfig::from(sync_config),
            batch_size: queue_config.batch_size,
            max_retries: queue_config.max_retries,
            consecutive_failures: AtomicU32::new(0),
            state,
        }
    }

    #[must_use]
    pub fn with_alert_sink(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Breaker guarding uploads, for status reporting.
    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Failing passes in a row; offline passes neither add nor reset.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Wait before the next pass given the current failure streak.
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        match self.consecutive_failures() {
            0 => self.interval,
            failures => self.interval + self.backoff.delay_for_attempt(failures),
        }
    }

    fn set_state(&self, next: WorkerState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            debug!(state = %next, "Sync worker state change");
            crate::metrics::set_worker_state(next.as_str());
        }
    }

    /// One sync pass.
    ///
    /// Queue errors end the pass early; anything already acked stays acked
    /// and unacked records are redelivered next time.
    pub async fn tick(&self) -> Result<TickReport, QueueError> {
        if !self.connectivity.is_online(false).await {
            debug!("Network unreachable, skipping sync pass");
            self.set_state(WorkerState::Offline);
            crate::metrics::record_sync_tick("offline");
            return Ok(TickReport::offline());
        }

        self.set_state(WorkerState::Syncing);
        let result = self.drain().await;

        match &result {
            Ok(report) => {
                if report.is_failure() {
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                    warn!(
                        failed = report.failed,
                        rejected = report.rejected,
                        uploaded = report.uploaded,
                        failures,
                        "Sync pass had failures"
                    );
                } else {
                    self.consecutive_failures.store(0, Ordering::Release);
                    if report.attempted > 0 {
                        info!(uploaded = report.uploaded, "Sync pass complete");
                    }
                }
                crate::metrics::record_sync_tick(report.outcome());
            }
            Err(e) => {
                self.consecutive_failures.fetch_add(1, Ordering::AcqRel);
                error!(error = %e, "Sync pass aborted by queue error");
                crate::metrics::record_sync_tick("error");
            }
        }

        let next = if self.consecutive_failures() > 0 {
            WorkerState::BackingOff
        } else {
            WorkerState::Idle
        };
        self.set_state(next);
        result
    }

    async fn drain(&self) -> Result<TickReport, QueueError> {
        let mut report = TickReport::default();

        report.archived = self.queue.archive_exhausted(self.max_retries).await?;
        if report.archived > 0 {
            crate::metrics::record_exhausted_alert(report.archived);
            self.alerts.alert(&SyncAlert::ExhaustedRetries {
                count: report.archived,
                max_retries: self.max_retries,
            });
        }

        let batch = self.queue.dequeue_batch(self.batch_size, self.max_retries).await?;
        report.attempted = batch.len();
        if batch.is_empty() {
            return Ok(report);
        }
        debug!(batch = batch.len(), "Uploading queued records");

        for record in &batch {
            match self.deliver(record).await {
                Delivery::Uploaded(cloud_id) => {
                    crate::metrics::record_upload("success");
                    self.settle(record, &cloud_id).await?;
                    report.uploaded += 1;
                }
                Delivery::Failed(e) => {
                    crate::metrics::record_upload("failure");
                    warn!(
                        record_id = record.id,
                        retry_count = record.retry_count,
                        transient = e.is_transient(),
                        error = %e,
                        "Upload failed"
                    );
                    self.queue.nack(record.id, &e.to_string()).await?;
                    report.failed += 1;
                }
                Delivery::Rejected => {
                    crate::metrics::record_upload("rejected");
                    self.queue.nack(record.id, "circuit breaker open").await?;
                    report.rejected += 1;
                }
            }
        }

        if report.rejected > 0 {
            debug!(
                circuit = %self.breaker.name(),
                rejected = report.rejected,
                "Circuit open, records left for a later pass"
            );
        }
        Ok(report)
    }

    async fn deliver(&self, record: &QueueRecord) -> Delivery {
        let cloud = &self.cloud;
        let upload_timeout = self.upload_timeout;
        let _timer = crate::metrics::LatencyTimer::new("upload");

        let outcome = self
            .breaker
            .call(|| async move {
                match timeout(upload_timeout, cloud.upload(record)).await {
                    Ok(result) => result,
                    Err(_) => Err(CloudError::Timeout(upload_timeout)),
                }
            })
            .await;

        match outcome {
            Ok(cloud_id) => Delivery::Uploaded(cloud_id),
            Err(CircuitError::Inner(e)) => Delivery::Failed(e),
            Err(CircuitError::Rejected) => Delivery::Rejected,
        }
    }

    /// Ack the queue row, then flag the local attendance row.
    async fn settle(&self, record: &QueueRecord, cloud_id: &str) -> Result<(), QueueError> {
        self.queue.ack(record.id).await?;

        let Some(local_id) = record.local_record_id() else {
            warn!(record_id = record.id, "Uploaded record has no local attendance id");
            return Ok(());
        };
        if let Err(e) = self.local.mark_synced(local_id, cloud_id, self.clock.now()).await {
            // The upload stands; the local flag is advisory.
            warn!(record_id = record.id, local_id, error = %e, "Failed to mark attendance synced");
        }
        Ok(())
    }

    /// Run passes until `shutdown` turns true or its sender is dropped.
    ///
    /// Stop is checked before every pass and throughout every wait.
    /// Records dequeued but not yet acked stay pending in the store.
    #[tracing::instrument(skip_all, fields(circuit = %self.breaker.name()))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Sync worker running");

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Errors are already logged and counted in the backoff.
            let _ = self.tick().await;

            let wait = self.next_delay();
            if wait_or_stop(&mut shutdown, wait).await {
                break;
            }
        }

        self.set_state(WorkerState::Stopped);
        info!("Sync worker stopped");
    }
}

/// Sleep for `wait`, returning early with `true` when asked to stop.
async fn wait_or_stop(shutdown: &mut watch::Receiver<bool>, wait: Duration) -> bool {
    let deadline = Instant::now() + wait;
    loop {
        tokio::select! {
            () = sleep_until(deadline) => return false,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return true;
                }
            }
        }
    }
}
