//! Validated session windows.

use chrono::NaiveTime;

use crate::config::{ConfigError, SessionConfig};
use crate::event::Session;

/// Inclusive time-of-day range with `end > start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeRange {
    fn new(window: String, start: NaiveTime, end: NaiveTime) -> Result<Self, ConfigError> {
        if end <= start {
            return Err(ConfigError::InvertedWindow {
                window,
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    #[must_use]
    pub fn contains(&self, t: NaiveTime) -> bool {
        self.start <= t && t <= self.end
    }
}

/// One session's class hours and scan windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWindow {
    pub session: Session,
    pub class_start: NaiveTime,
    pub class_end: NaiveTime,
    pub login: TimeRange,
    pub logout: TimeRange,
}

impl SessionWindow {
    pub(crate) fn from_config(session: Session, config: &SessionConfig) -> Result<Self, ConfigError> {
        let field = |name: &str| format!("{session}.{name}");

        let class_start = parse_time(&field("class_start"), &config.class_start)?;
        let class_end = parse_time(&field("class_end"), &config.class_end)?;
        TimeRange::new(field("class"), class_start, class_end)?;

        let login = TimeRange::new(
            field("login"),
            parse_time(&field("login_start"), &config.login_start)?,
            parse_time(&field("login_end"), &config.login_end)?,
        )?;
        let logout = TimeRange::new(
            field("logout"),
            parse_time(&field("logout_start"), &config.logout_start)?,
            parse_time(&field("logout_end"), &config.logout_end)?,
        )?;

        // Logout must not open before the login window closes.
        if logout.start < login.end {
            return Err(ConfigError::InvertedWindow {
                window: field("login_end..logout_start"),
                start: login.end.to_string(),
                end: logout.start.to_string(),
            });
        }

        Ok(Self {
            session,
            class_start,
            class_end,
            login,
            logout,
        })
    }

    /// From the first login to the last logout.
    #[must_use]
    pub fn span(&self) -> TimeRange {
        TimeRange {
            start: self.login.start,
            end: self.logout.end,
        }
    }
}

fn parse_time(field: &str, value: &str) -> Result<NaiveTime, ConfigError> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| ConfigError::InvalidTime {
            field: field.to_string(),
            value: value.to_string(),
        })
}
