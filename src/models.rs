//! Value types shared by the checkers, the confirmation state machine and the scheduler.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorType {
    Http,
    Tcp,
    Ping,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for MonitorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorType::Http => write!(f, "http"),
            MonitorType::Tcp => write!(f, "tcp"),
            MonitorType::Ping => write!(f, "ping"),
            MonitorType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Outcome of a single protocol check, before retry confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Up,
    Down,
    Degraded,
}

impl CheckStatus {
    pub fn is_failure(self) -> bool {
        matches!(self, CheckStatus::Down | CheckStatus::Degraded)
    }
}

/// Publicly visible, confirmed state of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    Pending,
    Up,
    Down,
    Degraded,
    Maintenance,
}

impl From<CheckStatus> for MonitorStatus {
    fn from(status: CheckStatus) -> Self {
        match status {
            CheckStatus::Up => MonitorStatus::Up,
            CheckStatus::Down => MonitorStatus::Down,
            CheckStatus::Degraded => MonitorStatus::Degraded,
        }
    }
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MonitorStatus::Pending => "pending",
            MonitorStatus::Up => "up",
            MonitorStatus::Down => "down",
            MonitorStatus::Degraded => "degraded",
            MonitorStatus::Maintenance => "maintenance",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub status: CheckStatus,
    pub response_time_ms: Option<u64>,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl CheckResult {
    pub fn up(response_time_ms: u64, status_code: Option<u16>) -> Self {
        Self {
            status: CheckStatus::Up,
            response_time_ms: Some(response_time_ms),
            status_code,
            error_message: None,
            checked_at: Utc::now(),
        }
    }

    pub fn down(
        response_time_ms: Option<u64>,
        status_code: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status: CheckStatus::Down,
            response_time_ms,
            status_code,
            error_message: Some(message.into()),
            checked_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: CheckStatus) -> Self {
        self.status = status;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaintenanceFrequency {
    Daily,
    Weekly,
    Monthly,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceSchedule {
    #[serde(default)]
    pub enabled: bool,
    /// `HH:MM`, local time.
    pub start_time: String,
    /// `HH:MM`, local time. Earlier than `start_time` means the window wraps past midnight.
    pub end_time: String,
    pub frequency: MaintenanceFrequency,
    /// Sunday = 0 .. Saturday = 6.
    #[serde(default)]
    pub days_of_week: Vec<u8>,
    #[serde(default)]
    pub day_of_month: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorShare {
    pub user_id: i32,
    #[serde(default)]
    pub notify: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Monitor {
    pub id: i32,
    pub name: String,
    pub monitor_type: MonitorType,
    pub target: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
    #[serde(default)]
    pub expected_status_codes: Vec<String>,
    #[serde(default)]
    pub degraded_threshold_ms: Option<u64>,
    #[serde(default)]
    pub maintenance_mode: bool,
    #[serde(default)]
    pub maintenance_schedule: Option<MaintenanceSchedule>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub user_id: i32,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub webhook_config: Option<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

impl Monitor {
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |reason: &str| EngineError::InvalidMonitor {
            id: self.id,
            reason: reason.to_string(),
        };
        if self.interval_seconds == 0 {
            return Err(invalid("interval must be positive"));
        }
        if self.timeout_seconds == 0 {
            return Err(invalid("timeout must be positive"));
        }
        match self.monitor_type {
            MonitorType::Http if self.target.trim().is_empty() => {
                Err(invalid("http monitor requires a target URL"))
            }
            MonitorType::Tcp if self.port.is_none() => Err(invalid("tcp monitor requires a port")),
            _ => Ok(()),
        }
    }

    /// Parsed form of `expected_status_codes`; `200-299` when none are configured.
    pub fn status_code_matchers(&self) -> Vec<StatusCodeMatcher> {
        let matchers: Vec<StatusCodeMatcher> = self
            .expected_status_codes
            .iter()
            .filter_map(|entry| match StatusCodeMatcher::parse(entry) {
                Some(matcher) => Some(matcher),
                None => {
                    warn!(
                        monitor_id = self.id,
                        entry = %entry,
                        "Ignoring unparseable expected status code."
                    );
                    None
                }
            })
            .collect();
        if matchers.is_empty() {
            vec![StatusCodeMatcher::Range(200, 299)]
        } else {
            matchers
        }
    }
}

/// One entry of an http monitor's accepted status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCodeMatcher {
    Exact(u16),
    /// Inclusive on both ends.
    Range(u16, u16),
}

impl StatusCodeMatcher {
    pub fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim();
        match entry.split_once('-') {
            Some((low, high)) => {
                let low = low.trim().parse().ok()?;
                let high = high.trim().parse().ok()?;
                (low <= high).then_some(StatusCodeMatcher::Range(low, high))
            }
            None => entry.parse().ok().map(StatusCodeMatcher::Exact),
        }
    }

    pub fn matches(&self, code: u16) -> bool {
        match *self {
            StatusCodeMatcher::Exact(expected) => code == expected,
            StatusCodeMatcher::Range(low, high) => (low..=high).contains(&code),
        }
    }
}

pub fn status_code_accepted(matchers: &[StatusCodeMatcher], code: u16) -> bool {
    matchers.iter().any(|m| m.matches(code))
}

#[cfg(test)]
pub(crate) fn test_monitor(id: i32, monitor_type: MonitorType) -> Monitor {
    Monitor {
        id,
        name: format!("monitor-{id}"),
        monitor_type,
        target: "127.0.0.1".to_string(),
        port: Some(80),
        interval_seconds: 10,
        timeout_seconds: 5,
        expected_status_codes: Vec::new(),
        degraded_threshold_ms: None,
        maintenance_mode: false,
        maintenance_schedule: None,
        is_active: true,
        user_id: 1,
        icon: None,
        webhook_config: None,
    }
}
