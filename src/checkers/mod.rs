//! Protocol checkers: one best-effort HTTP, TCP or ICMP attempt per call.
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::collaborators::HistoryStore;
use crate::degraded::{DEGRADED_SAMPLE_WINDOW, classify_slow_response};
use crate::error::EngineError;
use crate::models::{CheckResult, Monitor, MonitorType};

pub mod http;
pub mod ping;
pub mod tcp;

/// Performs a single check of a monitor and normalizes the outcome.
#[async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, monitor: &Monitor) -> CheckResult;
}

pub struct ProtocolChecker {
    http_client: reqwest::Client,
    history: Arc<dyn HistoryStore>,
}

impl ProtocolChecker {
    pub fn new(history: Arc<dyn HistoryStore>) -> Result<Self, EngineError> {
        Ok(Self {
            http_client: http::build_client()?,
            history,
        })
    }

    /// Applies the degraded escalation to a successful check.
    async fn finalize_success(
        &self,
        monitor: &Monitor,
        elapsed_ms: u64,
        status_code: Option<u16>,
    ) -> CheckResult {
        let result = CheckResult::up(elapsed_ms, status_code);
        let Some(threshold_ms) = monitor.degraded_threshold_ms else {
            return result;
        };
        if elapsed_ms <= threshold_ms {
            return result;
        }

        match self
            .history
            .get_recent_checks(monitor.id, DEGRADED_SAMPLE_WINDOW)
            .await
        {
            Ok(recent) => {
                let status = classify_slow_response(&recent, threshold_ms);
                debug!(
                    monitor_id = monitor.id,
                    elapsed_ms,
                    threshold_ms,
                    status = ?status,
                    "Slow response classified."
                );
                result.with_status(status)
            }
            Err(e) => {
                warn!(
                    monitor_id = monitor.id,
                    error = %e,
                    "Could not load recent checks; keeping slow check as up."
                );
                result
            }
        }
    }
}

pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

pub(crate) fn monitor_timeout(monitor: &Monitor) -> Duration {
    Duration::from_secs(monitor.timeout_seconds.max(1))
}

#[async_trait]
impl Checker for ProtocolChecker {
    async fn check(&self, monitor: &Monitor) -> CheckResult {
        let start = Instant::now();
        let timeout = monitor_timeout(monitor);

        let outcome = match monitor.monitor_type {
            MonitorType::Http => {
                let matchers = monitor.status_code_matchers();
                http::check(&self.http_client, &monitor.target, timeout, &matchers).await
            }
            MonitorType::Tcp => match monitor.port {
                Some(port) => tcp::check(&monitor.target, port, timeout).await,
                None => Err(ProbeFailure::new(None, "No port configured")),
            },
            MonitorType::Ping => ping::check(&monitor.target, timeout).await,
            MonitorType::Unknown => Err(ProbeFailure::new(None, "Unknown monitor type")),
        };
        let elapsed = elapsed_ms(start);

        match outcome {
            Ok(status_code) => self.finalize_success(monitor, elapsed, status_code).await,
            Err(failure) => {
                let response_time = failure.status_code.map(|_| elapsed);
                CheckResult::down(response_time, failure.status_code, failure.message)
            }
        }
    }
}

/// Why a single probe did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeFailure {
    /// Set when the target answered, but not acceptably.
    pub status_code: Option<u16>,
    pub message: String,
}

impl ProbeFailure {
    pub fn new(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
        }
    }
}

/// `Ok` carries the protocol status code, when the protocol has one.
pub type ProbeOutcome = Result<Option<u16>, ProbeFailure>;
