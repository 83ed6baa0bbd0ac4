//! Schedule-driven admission policy.
//!
//! [`ScheduleAdmissionController`] is pure: it reads no clock, does no I/O
//! and never suspends. Every decision is a function of the validated
//! schedule and the arguments passed in.
//!
//! ```text
//!  06:30      07:30            11:30      12:30   12:45     13:30           16:30     17:30
//!    |─login─|                   |─logout─|         |─login─|                 |─logout─|
//!    |<──────────── MORNING ────────────>|         |<─────────── AFTERNOON ──────────>|
//!                (between windows: LOGIN)                     (between windows: LOGIN)
//! ```

mod window;

pub use window::{SessionWindow, TimeRange};

use chrono::{Duration as ChronoDuration, NaiveDateTime, NaiveTime};

use crate::config::{ConfigError, ScheduleConfig};
use crate::event::{LastScan, ScanType, Session, Status};

/// Why a scan was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowReason {
    /// No earlier scan today
    FirstScanToday,
    /// The earlier scan belongs to another session
    DifferentSession,
    /// The earlier scan was of the other scan type
    DifferentScanType,
    /// Same session and scan type, but the cooldown has passed
    CooldownElapsed,
}

/// Why a scan was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Cooldown { remaining: ChronoDuration },
}

/// Outcome of [`ScheduleAdmissionController::should_allow_scan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed(AllowReason),
    Denied(DenyReason),
}

impl Admission {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }

    /// Short machine-readable reason, e.g. `"cooldown"`.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Allowed(AllowReason::FirstScanToday) => "first_scan_today",
            Self::Allowed(AllowReason::DifferentSession) => "different_session",
            Self::Allowed(AllowReason::DifferentScanType) => "different_scan_type",
            Self::Allowed(AllowReason::CooldownElapsed) => "cooldown_elapsed",
            Self::Denied(DenyReason::Cooldown { .. }) => "cooldown",
        }
    }
}

/// Stateless session/scan-type/lateness/duplicate policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleAdmissionController {
    morning: SessionWindow,
    afternoon: SessionWindow,
    late_threshold: ChronoDuration,
    cooldown: ChronoDuration,
}

impl ScheduleAdmissionController {
    /// Validate the schedule once. Any inverted window, overlapping pair of
    /// sessions or negative threshold fails construction.
    pub fn new(config: &ScheduleConfig) -> Result<Self, ConfigError> {
        let morning = SessionWindow::from_config(Session::Morning, &config.morning)?;
        let afternoon = SessionWindow::from_config(Session::Afternoon, &config.afternoon)?;

        if morning.span().end >= afternoon.span().start {
            return Err(ConfigError::OverlappingSessions {
                morning_end: morning.span().end.to_string(),
                afternoon_start: afternoon.span().start.to_string(),
            });
        }

        let late_threshold = non_negative_minutes("late_threshold_minutes", config.late_threshold_minutes)?;
        let cooldown = non_negative_minutes("duplicate_cooldown_minutes", config.duplicate_cooldown_minutes)?;

        Ok(Self {
            morning,
            afternoon,
            late_threshold,
            cooldown,
        })
    }

    #[must_use]
    pub fn window(&self, session: Session) -> Option<&SessionWindow> {
        match session {
            Session::Morning => Some(&self.morning),
            Session::Afternoon => Some(&self.afternoon),
            Session::Unknown => None,
        }
    }

    #[must_use]
    pub fn cooldown(&self) -> ChronoDuration {
        self.cooldown
    }

    #[must_use]
    pub fn late_threshold(&self) -> ChronoDuration {
        self.late_threshold
    }

    fn sessions(&self) -> [&SessionWindow; 2] {
        [&self.morning, &self.afternoon]
    }

    /// Session whose span (first login to last logout, inclusive) contains `t`.
    #[must_use]
    pub fn current_session(&self, t: NaiveDateTime) -> Session {
        let time = t.time();
        self.sessions()
            .into_iter()
            .find(|w| w.span().contains(time))
            .map_or(Session::Unknown, |w| w.session)
    }

    /// Scan type the device expects at `t`.
    ///
    /// Inside a login window this is LOGIN, inside a logout window LOGOUT.
    /// Between the two windows of a session the student is treated as not
    /// yet logged in. Outside every session the answer is `(LOGIN, UNKNOWN)`.
    #[must_use]
    pub fn expected_scan_type(&self, t: NaiveDateTime) -> (ScanType, Session) {
        let time = t.time();
        for window in self.sessions() {
            if window.login.contains(time) {
                return (ScanType::Login, window.session);
            }
            if window.logout.contains(time) {
                return (ScanType::Logout, window.session);
            }
            if window.span().contains(time) {
                return (ScanType::Login, window.session);
            }
        }
        (ScanType::Login, Session::Unknown)
    }

    /// Attendance status for a scan.
    ///
    /// A logout is always PRESENT. A login is LATE when strictly after class
    /// start plus the late threshold. Logins outside every session are
    /// PRESENT.
    #[must_use]
    pub fn determine_status(&self, t: NaiveDateTime, session: Session, scan_type: ScanType) -> Status {
        if scan_type == ScanType::Logout {
            return Status::Present;
        }
        let Some(window) = self.window(session) else {
            return Status::Present;
        };
        match late_after(window.class_start, self.late_threshold) {
            Some(deadline) if t.time() > deadline => Status::Late,
            _ => Status::Present,
        }
    }

    /// Duplicate/cooldown check against the student's previous scan.
    ///
    /// A scan is refused only when the previous scan happened today, in the
    /// same session, with the same scan type, less than the cooldown ago.
    #[must_use]
    pub fn should_allow_scan(
        &self,
        last: Option<LastScan>,
        current_scan_type: ScanType,
        now: NaiveDateTime,
    ) -> Admission {
        let Some(last) = last else {
            return Admission::Allowed(AllowReason::FirstScanToday);
        };
        if last.timestamp.date() != now.date() {
            return Admission::Allowed(AllowReason::FirstScanToday);
        }
        if self.current_session(last.timestamp) != self.current_session(now) {
            return Admission::Allowed(AllowReason::DifferentSession);
        }
        if last.scan_type != current_scan_type {
            return Admission::Allowed(AllowReason::DifferentScanType);
        }

        let elapsed = now - last.timestamp;
        if elapsed < self.cooldown {
            return Admission::Denied(DenyReason::Cooldown {
                remaining: self.cooldown - elapsed,
            });
        }
        Admission::Allowed(AllowReason::CooldownElapsed)
    }
}

fn non_negative_minutes(field: &'static str, minutes: i64) -> Result<ChronoDuration, ConfigError> {
    if minutes < 0 {
        return Err(ConfigError::Negative { field, value: minutes });
    }
    ChronoDuration::try_minutes(minutes).ok_or_else(|| ConfigError::Invalid {
        field,
        reason: format!("{minutes} minutes is out of range"),
    })
}

/// `start + threshold`, or `None` when that would run past midnight.
fn late_after(start: NaiveTime, threshold: ChronoDuration) -> Option<NaiveTime> {
    let (deadline, wrapped) = start.overflowing_add_signed(threshold);
    (wrapped == 0).then_some(deadline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 16)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn controller() -> ScheduleAdmissionController {
        ScheduleAdmissionController::new(&ScheduleConfig::default()).unwrap()
    }

    fn last(h: u32, m: u32, scan_type: ScanType) -> Option<LastScan> {
        Some(LastScan { timestamp: at(h, m), scan_type })
    }

    #[test]
    fn test_current_session_boundaries_are_inclusive() {
        let c = controller();
        assert_eq!(c.current_session(at(6, 30)), Session::Morning);
        assert_eq!(c.current_session(at(12, 30)), Session::Morning);
        assert_eq!(c.current_session(at(12, 40)), Session::Unknown);
        assert_eq!(c.current_session(at(12, 45)), Session::Afternoon);
        assert_eq!(c.current_session(at(17, 30)), Session::Afternoon);
        assert_eq!(c.current_session(at(5, 0)), Session::Unknown);
        assert_eq!(c.current_session(at(22, 0)), Session::Unknown);
    }

    #[test]
    fn test_expected_scan_type_by_window() {
        let c = controller();
        assert_eq!(c.expected_scan_type(at(7, 20)), (ScanType::Login, Session::Morning));
        assert_eq!(c.expected_scan_type(at(11, 45)), (ScanType::Logout, Session::Morning));
        assert_eq!(c.expected_scan_type(at(16, 45)), (ScanType::Logout, Session::Afternoon));
    }

    #[test]
    fn test_between_windows_defaults_to_login() {
        let c = controller();
        assert_eq!(c.expected_scan_type(at(9, 0)), (ScanType::Login, Session::Morning));
        assert_eq!(c.expected_scan_type(at(14, 0)), (ScanType::Login, Session::Afternoon));
    }

    #[test]
    fn test_after_hours_is_login_unknown() {
        let c = controller();
        assert_eq!(c.expected_scan_type(at(20, 0)), (ScanType::Login, Session::Unknown));
        assert_eq!(
            c.determine_status(at(20, 0), Session::Unknown, ScanType::Login),
            Status::Present
        );
    }

    #[test]
    fn test_lateness_is_strictly_after_threshold() {
        let c = controller();
        // class start 07:00 + 15m
        assert_eq!(c.determine_status(at(7, 15), Session::Morning, ScanType::Login), Status::Present);
        assert_eq!(c.determine_status(at(7, 16), Session::Morning, ScanType::Login), Status::Late);
        assert_eq!(c.determine_status(at(7, 20), Session::Morning, ScanType::Login), Status::Late);
    }

    #[test]
    fn test_logout_is_always_present() {
        let c = controller();
        assert_eq!(c.determine_status(at(11, 59), Session::Morning, ScanType::Logout), Status::Present);
        assert_eq!(c.determine_status(at(17, 29), Session::Afternoon, ScanType::Logout), Status::Present);
    }

    #[test]
    fn test_first_scan_is_allowed() {
        let c = controller();
        let decision = c.should_allow_scan(None, ScanType::Login, at(7, 0));
        assert_eq!(decision, Admission::Allowed(AllowReason::FirstScanToday));
    }

    #[test]
    fn test_scan_from_yesterday_counts_as_first() {
        let c = controller();
        let yesterday = at(7, 20) - ChronoDuration::days(1);
        let decision = c.should_allow_scan(
            Some(LastScan { timestamp: yesterday, scan_type: ScanType::Login }),
            ScanType::Login,
            at(7, 21),
        );
        assert_eq!(decision.reason(), "first_scan_today");
    }

    #[test]
    fn test_same_type_inside_cooldown_is_denied() {
        let c = controller();
        let decision = c.should_allow_scan(last(7, 20, ScanType::Login), ScanType::Login, at(7, 22));

        assert!(!decision.is_allowed());
        assert_eq!(decision.reason(), "cooldown");
        assert_eq!(
            decision,
            Admission::Denied(DenyReason::Cooldown { remaining: ChronoDuration::minutes(3) })
        );
    }

    #[test]
    fn test_different_scan_type_unlocks_inside_cooldown() {
        let c = controller();
        let decision = c.should_allow_scan(last(7, 20, ScanType::Login), ScanType::Logout, at(7, 21));
        assert_eq!(decision, Admission::Allowed(AllowReason::DifferentScanType));
    }

    #[test]
    fn test_different_session_unlocks_inside_cooldown() {
        let config = ScheduleConfig {
            duplicate_cooldown_minutes: 120,
            ..ScheduleConfig::default()
        };
        let c = ScheduleAdmissionController::new(&config).unwrap();

        let decision = c.should_allow_scan(last(12, 20, ScanType::Logout), ScanType::Logout, at(12, 50));
        assert_eq!(decision, Admission::Allowed(AllowReason::DifferentSession));
    }

    #[test]
    fn test_cooldown_boundary_allows() {
        let c = controller();
        let decision = c.should_allow_scan(last(7, 20, ScanType::Login), ScanType::Login, at(7, 25));
        assert_eq!(decision, Admission::Allowed(AllowReason::CooldownElapsed));
    }

    #[test]
    fn test_inverted_window_fails_construction() {
        let mut config = ScheduleConfig::default();
        config.morning.login_end = "06:00".into();

        let err = ScheduleAdmissionController::new(&config).unwrap_err();
        assert!(matches!(err, ConfigError::InvertedWindow { .. }));
    }

    #[test]
    fn test_negative_late_threshold_fails_construction() {
        let config = ScheduleConfig {
            late_threshold_minutes: -5,
            ..ScheduleConfig::default()
        };
        assert_eq!(
            ScheduleAdmissionController::new(&config),
            Err(ConfigError::Negative { field: "late_threshold_minutes", value: -5 })
        );
    }

    #[test]
    fn test_overlapping_sessions_fail_construction() {
        let mut config = ScheduleConfig::default();
        config.afternoon = SessionConfig {
            login_start: "12:00".into(),
            ..SessionConfig::afternoon()
        };
        assert!(matches!(
            ScheduleAdmissionController::new(&config),
            Err(ConfigError::OverlappingSessions { .. })
        ));
    }

    #[test]
    fn test_bad_time_string_fails_construction() {
        let mut config = ScheduleConfig::default();
        config.morning.class_start = "7am".into();
        assert!(matches!(
            ScheduleAdmissionController::new(&config),
            Err(ConfigError::InvalidTime { .. })
        ));
    }
}
