//! Turns the stream of raw check results into a confirmed monitor status.
//!
//! Everything here is synchronous: the scheduler gathers the raw result, the
//! network gate answer and the maintenance flag first, then applies a tick
//! to the monitor's [`PollerState`] in one step.
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{CheckResult, MonitorStatus};

/// Consecutive counted failures needed before a failure is confirmed.
pub const RETRY_THRESHOLD: u32 = 3;

/// Ephemeral per-monitor scheduling state; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollerState {
    pub last_check: Option<DateTime<Utc>>,
    pub status: MonitorStatus,
    /// Only read by the staleness watchdog.
    pub consecutive_failures: u32,
    pub retry_count: u32,
}

impl Default for PollerState {
    fn default() -> Self {
        Self {
            last_check: None,
            status: MonitorStatus::Pending,
            consecutive_failures: 0,
            retry_count: 0,
        }
    }
}

/// A confirmed status change worth reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTransition {
    pub old_status: MonitorStatus,
    pub new_status: MonitorStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The local network was unreachable; nothing changed.
    Suppressed,
    /// Failure counted but the threshold is not reached yet.
    Retrying { retry_count: u32 },
    /// Status stays as it was, or changed silently.
    Steady { status: MonitorStatus },
    Transitioned(StatusTransition),
}

impl TickOutcome {
    pub fn transition(&self) -> Option<StatusTransition> {
        match self {
            TickOutcome::Transitioned(t) => Some(*t),
            _ => None,
        }
    }
}

/// Inputs gathered before a tick is applied.
#[derive(Debug, Clone, Copy)]
pub struct TickContext {
    pub network_healthy: bool,
    pub in_maintenance: bool,
    pub now: DateTime<Utc>,
}

impl PollerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, raw: &CheckResult, ctx: TickContext) -> TickOutcome {
        self.last_check = Some(ctx.now);

        if raw.status.is_failure() {
            if !ctx.network_healthy {
                return TickOutcome::Suppressed;
            }

            self.retry_count = self.retry_count.saturating_add(1);
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            if self.retry_count < RETRY_THRESHOLD {
                return TickOutcome::Retrying {
                    retry_count: self.retry_count,
                };
            }

            let confirmed = if ctx.in_maintenance {
                MonitorStatus::Maintenance
            } else {
                MonitorStatus::from(raw.status)
            };
            return self.settle(confirmed, true);
        }

        self.retry_count = 0;
        self.consecutive_failures = 0;
        let confirmed = if ctx.in_maintenance {
            MonitorStatus::Maintenance
        } else {
            MonitorStatus::Up
        };
        // A recovery is only reportable when the failure had been confirmed.
        let notifiable = matches!(self.status, MonitorStatus::Down | MonitorStatus::Degraded);
        self.settle(confirmed, notifiable)
    }

    fn settle(&mut self, confirmed: MonitorStatus, notifiable: bool) -> TickOutcome {
        let old_status = self.status;
        self.status = confirmed;
        if notifiable && old_status != confirmed {
            TickOutcome::Transitioned(StatusTransition {
                old_status,
                new_status: confirmed,
            })
        } else {
            TickOutcome::Steady { status: confirmed }
        }
    }
}

/// Semantic event key for a transition, if it should reach humans at all.
pub fn event_key(transition: &StatusTransition) -> Option<&'static str> {
    match (transition.old_status, transition.new_status) {
        (_, MonitorStatus::Down) => Some("serviceDown"),
        (MonitorStatus::Down, MonitorStatus::Up) => Some("serviceUp"),
        (_, MonitorStatus::Degraded) => Some("serviceDegraded"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CheckStatus;

    fn ctx(network_healthy: bool, in_maintenance: bool) -> TickContext {
        TickContext {
            network_healthy,
            in_maintenance,
            now: Utc::now(),
        }
    }

    fn down() -> CheckResult {
        CheckResult::down(None, None, "connection refused")
    }

    fn up() -> CheckResult {
        CheckResult::up(42, Some(200))
    }

    fn degraded() -> CheckResult {
        CheckResult::up(900, Some(200)).with_status(CheckStatus::Degraded)
    }

    #[test]
    fn third_counted_failure_confirms_down() {
        let mut state = PollerState::new();
        state.apply(&up(), ctx(true, false));
        assert_eq!(state.status, MonitorStatus::Up);

        assert_eq!(
            state.apply(&down(), ctx(true, false)),
            TickOutcome::Retrying { retry_count: 1 }
        );
        assert_eq!(
            state.apply(&down(), ctx(true, false)),
            TickOutcome::Retrying { retry_count: 2 }
        );
        assert_eq!(state.status, MonitorStatus::Up);

        let outcome = state.apply(&down(), ctx(true, false));
        assert_eq!(
            outcome.transition(),
            Some(StatusTransition {
                old_status: MonitorStatus::Up,
                new_status: MonitorStatus::Down,
            })
        );
        assert_eq!(state.status, MonitorStatus::Down);

        // Further failures do not re-announce.
        assert_eq!(
            state.apply(&down(), ctx(true, false)),
            TickOutcome::Steady {
                status: MonitorStatus::Down
            }
        );
    }

    #[test]
    fn unhealthy_network_never_counts() {
        let mut state = PollerState::new();
        for _ in 0..20 {
            assert_eq!(state.apply(&down(), ctx(false, false)), TickOutcome::Suppressed);
        }
        assert_eq!(state.retry_count, 0);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.status, MonitorStatus::Pending);
        assert!(state.last_check.is_some());
    }

    #[test]
    fn suppressed_ticks_do_not_break_the_streak() {
        let mut state = PollerState::new();
        state.apply(&down(), ctx(true, false));
        state.apply(&down(), ctx(false, false));
        state.apply(&down(), ctx(true, false));
        assert_eq!(state.retry_count, 2);
        assert!(state.apply(&down(), ctx(true, false)).transition().is_some());
    }

    #[test]
    fn single_up_resets_retry_counter() {
        let mut state = PollerState::new();
        state.apply(&down(), ctx(true, false));
        state.apply(&down(), ctx(true, false));
        state.apply(&up(), ctx(true, false));
        assert_eq!(state.retry_count, 0);

        state.apply(&down(), ctx(true, false));
        state.apply(&down(), ctx(true, false));
        assert_eq!(state.status, MonitorStatus::Up);
    }

    #[test]
    fn recovery_after_confirmation_is_notifiable() {
        let mut state = PollerState::new();
        for _ in 0..3 {
            state.apply(&down(), ctx(true, false));
        }
        assert_eq!(state.status, MonitorStatus::Down);

        let outcome = state.apply(&up(), ctx(true, false));
        let transition = outcome.transition().unwrap();
        assert_eq!(transition.old_status, MonitorStatus::Down);
        assert_eq!(transition.new_status, MonitorStatus::Up);
        assert_eq!(event_key(&transition), Some("serviceUp"));
    }

    #[test]
    fn recovery_during_retry_phase_is_silent() {
        let mut state = PollerState::new();
        state.apply(&up(), ctx(true, false));
        state.apply(&down(), ctx(true, false));
        state.apply(&down(), ctx(true, false));
        let outcome = state.apply(&up(), ctx(true, false));
        assert_eq!(outcome, TickOutcome::Steady { status: MonitorStatus::Up });
    }

    #[test]
    fn first_up_from_pending_updates_status_silently() {
        let mut state = PollerState::new();
        let outcome = state.apply(&up(), ctx(true, false));
        assert!(outcome.transition().is_none());
        assert_eq!(state.status, MonitorStatus::Up);
    }

    #[test]
    fn degraded_confirms_as_degraded() {
        let mut state = PollerState::new();
        state.apply(&up(), ctx(true, false));
        state.apply(&degraded(), ctx(true, false));
        state.apply(&degraded(), ctx(true, false));
        let transition = state.apply(&degraded(), ctx(true, false)).transition().unwrap();
        assert_eq!(transition.new_status, MonitorStatus::Degraded);
        assert_eq!(event_key(&transition), Some("serviceDegraded"));

        // Degraded -> up is reportable but carries no event key.
        let transition = state.apply(&up(), ctx(true, false)).transition().unwrap();
        assert_eq!(transition.new_status, MonitorStatus::Up);
        assert_eq!(event_key(&transition), None);
    }

    #[test]
    fn maintenance_overrides_confirmed_failure() {
        let mut state = PollerState::new();
        state.apply(&up(), ctx(true, false));
        for _ in 0..2 {
            state.apply(&down(), ctx(true, true));
        }
        let transition = state.apply(&down(), ctx(true, true)).transition().unwrap();
        assert_eq!(transition.new_status, MonitorStatus::Maintenance);
        assert_eq!(event_key(&transition), None);

        // Up while still in the window stays maintenance, silently.
        let outcome = state.apply(&up(), ctx(true, true));
        assert_eq!(
            outcome,
            TickOutcome::Steady {
                status: MonitorStatus::Maintenance
            }
        );
    }

    #[test]
    fn down_to_maintenance_on_up_is_a_transition() {
        let mut state = PollerState::new();
        for _ in 0..3 {
            state.apply(&down(), ctx(true, false));
        }
        let transition = state.apply(&up(), ctx(true, true)).transition().unwrap();
        assert_eq!(transition.new_status, MonitorStatus::Maintenance);
    }
}
