//! Configuration for the edge device.
//!
//! Every section deserializes with per-field defaults, so a partial document
//! (or none at all) produces a working configuration. Values are checked
//! once by [`EdgeConfig::validate`] and by the constructors that consume
//! them; nothing is re-validated per call.
//!
//! # Example
//!
//! ```
//! use attendance_edge::EdgeConfig;
//!
//! // Minimal config (uses defaults)
//! let config = EdgeConfig::default();
//! assert_eq!(config.capture.window_ms, 5_000);
//! assert!(config.validate().is_ok());
//!
//! // Override a few knobs
//! let mut config = EdgeConfig::default();
//! config.queue.max_retries = 3;
//! config.schedule.duplicate_cooldown_minutes = 5;
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Rejected configuration. Raised at construction, never at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid time '{value}' for {field}: expected HH:MM or HH:MM:SS")]
    InvalidTime { field: String, value: String },

    #[error("{window} window ends ({end}) before it starts ({start})")]
    InvertedWindow {
        window: String,
        start: String,
        end: String,
    },

    #[error("{field} must not be negative (got {value})")]
    Negative { field: &'static str, value: i64 },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("sessions overlap: morning ends at {morning_end}, afternoon starts at {afternoon_start}")]
    OverlappingSessions {
        morning_end: String,
        afternoon_start: String,
    },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EdgeConfig {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub circuit: CircuitSettings,
    #[serde(default)]
    pub connectivity: ConnectivityConfig,
    #[serde(default)]
    pub cloud: CloudConfig,
}

impl EdgeConfig {
    /// Check every section, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        crate::schedule::ScheduleAdmissionController::new(&self.schedule)?;
        self.capture.validate()?;
        self.queue.validate()?;
        self.sync.validate()?;
        self.circuit.validate()?;
        self.connectivity.validate()?;
        self.cloud.validate()?;
        Ok(())
    }
}

fn non_zero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Zero { field });
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// SCHEDULE
// ═══════════════════════════════════════════════════════════════════════════

/// Times of one session, as `"HH:MM"` strings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionConfig {
    /// Scheduled class start (lateness is measured from here)
    pub class_start: String,
    pub class_end: String,
    pub login_start: String,
    pub login_end: String,
    pub logout_start: String,
    pub logout_end: String,
}

impl SessionConfig {
    pub fn morning() -> Self {
        Self {
            class_start: "07:00".into(),
            class_end: "12:00".into(),
            login_start: "06:30".into(),
            login_end: "07:30".into(),
            logout_start: "11:30".into(),
            logout_end: "12:30".into(),
        }
    }

    pub fn afternoon() -> Self {
        Self {
            class_start: "13:00".into(),
            class_end: "17:00".into(),
            login_start: "12:45".into(),
            login_end: "13:30".into(),
            logout_start: "16:30".into(),
            logout_end: "17:30".into(),
        }
    }
}

/// Session windows and admission thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "SessionConfig::morning")]
    pub morning: SessionConfig,
    #[serde(default = "SessionConfig::afternoon")]
    pub afternoon: SessionConfig,
    /// Minutes after class start before a login counts as late
    #[serde(default = "default_late_threshold_minutes")]
    pub late_threshold_minutes: i64,
    /// Minutes before the same scan type is accepted again in a session
    #[serde(default = "default_duplicate_cooldown_minutes")]
    pub duplicate_cooldown_minutes: i64,
}

fn default_late_threshold_minutes() -> i64 { 15 }
fn default_duplicate_cooldown_minutes() -> i64 { 5 }

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            morning: SessionConfig::morning(),
            afternoon: SessionConfig::afternoon(),
            late_threshold_minutes: default_late_threshold_minutes(),
            duplicate_cooldown_minutes: default_duplicate_cooldown_minutes(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CAPTURE
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// How long face capture runs after an admitted QR scan
    #[serde(default = "default_capture_window_ms")]
    pub window_ms: u64,
    /// How long a rejection stays on screen before listening resumes
    #[serde(default = "default_rejection_display_ms")]
    pub rejection_display_ms: u64,
}

fn default_capture_window_ms() -> u64 { 5_000 }
fn default_rejection_display_ms() -> u64 { 2_000 }

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            window_ms: default_capture_window_ms(),
            rejection_display_ms: default_rejection_display_ms(),
        }
    }
}

impl CaptureConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn rejection_display(&self) -> Duration {
        Duration::from_millis(self.rejection_display_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("capture.window_ms", self.window_ms)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// QUEUE
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// SQLite file holding the queue, archive and local attendance tables.
    /// `":memory:"` keeps everything in memory (tests only).
    #[serde(default = "default_queue_path")]
    pub path: String,
    /// Attempts before a record is archived
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Records fetched per sync pass
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Hold an advisory `<path>.lock` for the lifetime of the queue
    #[serde(default = "default_lock_file")]
    pub lock_file: bool,
    #[serde(default)]
    pub default_priority: i32,
}

fn default_queue_path() -> String { "./attendance_edge.db".to_string() }
fn default_max_retries() -> u32 { 5 }
fn default_batch_size() -> u32 { 50 }
fn default_max_connections() -> u32 { 4 }
fn default_busy_timeout_ms() -> u64 { 5_000 }
fn default_lock_file() -> bool { true }

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: default_queue_path(),
            max_retries: default_max_retries(),
            batch_size: default_batch_size(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
            lock_file: default_lock_file(),
            default_priority: 0,
        }
    }
}

impl QueueConfig {
    /// In-memory queue for tests and demos.
    pub fn in_memory() -> Self {
        Self {
            path: ":memory:".to_string(),
            lock_file: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.path == ":memory:"
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "queue.path",
                reason: "path is empty".to_string(),
            });
        }
        non_zero("queue.max_retries", u64::from(self.max_retries))?;
        non_zero("queue.batch_size", u64::from(self.batch_size))?;
        non_zero("queue.max_connections", u64::from(self.max_connections))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SYNC WORKER
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Seconds between sync passes when the last pass was clean
    #[serde(default = "default_sync_interval_secs")]
    pub interval_secs: u64,
    /// First backoff delay after a failing pass
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff ceiling
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    /// Per-upload deadline; an expired upload counts as a breaker failure
    #[serde(default = "default_upload_timeout_ms")]
    pub upload_timeout_ms: u64,
}

fn default_sync_interval_secs() -> u64 { 30 }
fn default_base_delay_ms() -> u64 { 1_000 }
fn default_max_delay_secs() -> u64 { 300 }
fn default_upload_timeout_ms() -> u64 { 15_000 }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sync_interval_secs(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
            upload_timeout_ms: default_upload_timeout_ms(),
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("sync.interval_secs", self.interval_secs)?;
        non_zero("sync.base_delay_ms", self.base_delay_ms)?;
        non_zero("sync.upload_timeout_ms", self.upload_timeout_ms)?;
        if Duration::from_secs(self.max_delay_secs) < Duration::from_millis(self.base_delay_ms) {
            return Err(ConfigError::Invalid {
                field: "sync.max_delay_secs",
                reason: "must be at least base_delay_ms".to_string(),
            });
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CIRCUIT BREAKER
// ═══════════════════════════════════════════════════════════════════════════

/// Serializable breaker settings, turned into a
/// [`crate::resilience::circuit_breaker::CircuitConfig`].
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_circuit_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_failure_threshold() -> u32 { 5 }
fn default_success_threshold() -> u32 { 2 }
fn default_circuit_timeout_ms() -> u64 { 60_000 }

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout_ms: default_circuit_timeout_ms(),
        }
    }
}

impl CircuitSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("circuit.failure_threshold", u64::from(self.failure_threshold))?;
        non_zero("circuit.success_threshold", u64::from(self.success_threshold))?;
        non_zero("circuit.timeout_ms", self.timeout_ms)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CONNECTIVITY
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectivityConfig {
    /// Seconds a probe result stays cached
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    #[serde(default = "default_dns_host")]
    pub dns_host: String,
    #[serde(default = "default_http_url")]
    pub http_url: String,
    #[serde(default = "default_tcp_host")]
    pub tcp_host: String,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

fn default_check_interval_secs() -> u64 { 30 }
fn default_dns_host() -> String { "www.google.com".to_string() }
fn default_http_url() -> String { "http://clients3.google.com/generate_204".to_string() }
fn default_tcp_host() -> String { "8.8.8.8".to_string() }
fn default_tcp_port() -> u16 { 53 }
fn default_probe_timeout_ms() -> u64 { 3_000 }

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            dns_host: default_dns_host(),
            http_url: default_http_url(),
            tcp_host: default_tcp_host(),
            tcp_port: default_tcp_port(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl ConnectivityConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("connectivity.probe_timeout_ms", self.probe_timeout_ms)?;
        non_zero("connectivity.tcp_port", u64::from(self.tcp_port))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CLOUD
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct CloudConfig {
    /// Base URL of the attendance API (e.g. "https://api.example.org/v1")
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 { 5_000 }
fn default_read_timeout_ms() -> u64 { 10_000 }

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl CloudConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("cloud.connect_timeout_ms", self.connect_timeout_ms)?;
        non_zero("cloud.read_timeout_ms", self.read_timeout_ms)
    }
}
