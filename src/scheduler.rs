//! Owns one timer task per monitor and drives the confirmation state machine.
use chrono::{DateTime, Duration as ChronoDuration, Local, TimeZone, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::checkers::{Checker, ProtocolChecker};
use crate::collaborators::{Collaborators, HistoryStore, ScheduledJob};
use crate::config::EngineConfig;
use crate::confirmation::{PollerState, TickContext, TickOutcome};
use crate::error::EngineError;
use crate::maintenance::is_under_maintenance;
use crate::models::{CheckResult, Monitor, MonitorStatus};
use crate::notifier::StatusChangeNotifier;

/// A monitor whose last check is older than this many intervals is reported as stuck.
pub const STALE_INTERVAL_FACTOR: i64 = 5;
/// The engine counts as healthy while the watchdog has run within this window.
pub const LIVENESS_WINDOW_SECONDS: i64 = 120;

pub const PRUNE_HISTORY_JOB: &str = "prune-check-history";
pub const PRUNE_AGGREGATES_JOB: &str = "prune-maintenance-aggregates";
const HOURLY_CRON: &str = "0 * * * *";

struct MonitorEntry {
    monitor: Monitor,
    state: PollerState,
    /// Bumped on every registration of the same monitor id.
    generation: u64,
    registered_at: DateTime<Utc>,
    handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MonitorEntry {
    fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            if tx.send(()).is_err() {
                debug!(monitor_id = self.monitor.id, "Monitor task already finished.");
            }
        }
    }
}

struct Watchdog {
    handle: JoinHandle<()>,
    shutdown_tx: oneshot::Sender<()>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSnapshot {
    pub monitor_id: i32,
    pub name: String,
    pub status: MonitorStatus,
    pub last_check: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub running: bool,
    pub healthy: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub monitors: Vec<MonitorSnapshot>,
}

struct EngineInner {
    collaborators: Collaborators,
    checker: Arc<dyn Checker>,
    notifier: StatusChangeNotifier,
    entries: DashMap<i32, MonitorEntry>,
    running: AtomicBool,
    last_heartbeat_ms: AtomicI64,
    next_generation: AtomicU64,
    watchdog_interval: Duration,
    /// Serializes start/stop and holds the watchdog while running.
    lifecycle: Mutex<Option<Watchdog>>,
}

/// The monitoring engine. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct MonitorEngine {
    inner: Arc<EngineInner>,
}

impl MonitorEngine {
    pub fn new(
        collaborators: Collaborators,
        checker: Arc<dyn Checker>,
        config: &EngineConfig,
    ) -> Self {
        let notifier = StatusChangeNotifier::new(
            collaborators.broadcaster.clone(),
            collaborators.batcher.clone(),
            collaborators.preferences.clone(),
            collaborators.monitors.clone(),
            config.instance_name.clone(),
        );
        Self {
            inner: Arc::new(EngineInner {
                collaborators,
                checker,
                notifier,
                entries: DashMap::new(),
                running: AtomicBool::new(false),
                last_heartbeat_ms: AtomicI64::new(0),
                next_generation: AtomicU64::new(1),
                watchdog_interval: config.watchdog_interval(),
                lifecycle: Mutex::new(None),
            }),
        }
    }

    /// Builds an engine that uses the real HTTP/TCP/ping checkers.
    pub fn with_protocol_checker(
        collaborators: Collaborators,
        config: &EngineConfig,
    ) -> Result<Self, EngineError> {
        let checker = Arc::new(ProtocolChecker::new(collaborators.history.clone())?);
        Ok(Self::new(collaborators, checker, config))
    }

    /// Loads every enabled monitor and starts polling it.
    ///
    /// On failure the engine is left stopped.
    pub async fn start(&self) -> Result<(), EngineError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if self.inner.running.load(Ordering::SeqCst) {
            return Err(EngineError::AlreadyRunning);
        }

        if let Err(e) = self.inner.collaborators.network.check_network_health().await {
            error!(error = %e, "Failed to start network health probe; engine stays stopped.");
            return Err(e);
        }
        let monitors = match self.inner.collaborators.monitors.get_enabled_monitors().await {
            Ok(monitors) => monitors,
            Err(e) => {
                error!(error = %e, "Failed to load monitors; engine stays stopped.");
                return Err(e);
            }
        };

        self.inner.running.store(true, Ordering::SeqCst);
        self.inner.touch_heartbeat();

        let total = monitors.len();
        for monitor in monitors {
            let monitor_id = monitor.id;
            if let Err(e) = self.inner.register(monitor) {
                warn!(monitor_id, error = %e, "Skipping monitor that failed to register.");
            }
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run_watchdog(
            self.inner.clone(),
            self.inner.watchdog_interval,
            shutdown_rx,
        ));
        *lifecycle = Some(Watchdog {
            handle,
            shutdown_tx,
        });

        for job in pruning_jobs(self.inner.collaborators.history.clone()) {
            let job_id = job.id.clone();
            if let Err(e) = self.inner.collaborators.jobs.register_job(job).await {
                error!(job_id = %job_id, error = %e, "Failed to register pruning job.");
            }
        }

        info!(
            registered = self.inner.entries.len(),
            total, "Monitor engine started."
        );
        Ok(())
    }

    /// Cancels every timer, releases all poller state and unregisters the pruning jobs.
    pub async fn stop(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(watchdog) = lifecycle.take() {
            if watchdog.shutdown_tx.send(()).is_err() {
                warn!("Watchdog task had already exited.");
            }
            if let Err(e) = watchdog.handle.await {
                warn!(error = %e, "Watchdog task did not shut down cleanly.");
            }
        }

        let ids: Vec<i32> = self.inner.entries.iter().map(|e| *e.key()).collect();
        for monitor_id in ids {
            self.inner.deregister(monitor_id);
        }

        for job_id in [PRUNE_HISTORY_JOB, PRUNE_AGGREGATES_JOB] {
            if let Err(e) = self.inner.collaborators.jobs.unregister_job(job_id).await {
                error!(job_id = job_id, error = %e, "Failed to unregister pruning job.");
            }
        }
        info!("Monitor engine stopped.");
    }

    pub async fn restart(&self) -> Result<(), EngineError> {
        self.stop().await;
        self.start().await
    }

    /// Registers the monitor, replacing any earlier registration of the same id.
    pub async fn add_monitor(&self, monitor: Monitor) -> Result<(), EngineError> {
        if !self.inner.running.load(Ordering::SeqCst) {
            return Err(EngineError::NotRunning);
        }
        self.inner.register(monitor)
    }

    /// Returns whether the monitor was registered.
    pub async fn remove_monitor(&self, monitor_id: i32) -> bool {
        let removed = self.inner.deregister(monitor_id);
        if removed {
            info!(monitor_id, "Removed monitor.");
        }
        removed
    }

    pub async fn update_monitor(&self, monitor: Monitor) -> Result<(), EngineError> {
        if monitor.is_active {
            self.add_monitor(monitor).await
        } else {
            self.remove_monitor(monitor.id).await;
            Ok(())
        }
    }

    /// Runs one check outside the schedule; poller state is not touched.
    pub async fn test_monitor(&self, monitor: &Monitor) -> Result<CheckResult, EngineError> {
        monitor.validate()?;
        Ok(self.inner.checker.check(monitor).await)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn is_healthy(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        let last = self.inner.last_heartbeat_ms.load(Ordering::SeqCst);
        Utc::now().timestamp_millis() - last < LIVENESS_WINDOW_SECONDS * 1000
    }

    pub fn monitor_state(&self, monitor_id: i32) -> Option<PollerState> {
        self.inner
            .entries
            .get(&monitor_id)
            .map(|entry| entry.state.clone())
    }

    pub fn get_status(&self) -> EngineStatus {
        let mut monitors: Vec<MonitorSnapshot> = self
            .inner
            .entries
            .iter()
            .map(|entry| MonitorSnapshot {
                monitor_id: entry.monitor.id,
                name: entry.monitor.name.clone(),
                status: entry.state.status,
                last_check: entry.state.last_check,
                retry_count: entry.state.retry_count,
                consecutive_failures: entry.state.consecutive_failures,
            })
            .collect();
        monitors.sort_by_key(|m| m.monitor_id);

        let last_ms = self.inner.last_heartbeat_ms.load(Ordering::SeqCst);
        EngineStatus {
            running: self.is_running(),
            healthy: self.is_healthy(),
            last_heartbeat: (last_ms > 0)
                .then(|| Utc.timestamp_millis_opt(last_ms).single())
                .flatten(),
            monitors,
        }
    }
}

impl EngineInner {
    fn touch_heartbeat(&self) {
        self.last_heartbeat_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    fn register(self: &Arc<Self>, monitor: Monitor) -> Result<(), EngineError> {
        monitor.validate()?;
        let monitor_id = monitor.id;
        let period = Duration::from_secs(monitor.interval_seconds);
        self.deregister(monitor_id);

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.entries.insert(
            monitor_id,
            MonitorEntry {
                monitor,
                state: PollerState::new(),
                generation,
                registered_at: Utc::now(),
                handle: None,
                shutdown_tx: Some(shutdown_tx),
            },
        );

        let handle = tokio::spawn(run_monitor_loop(
            self.clone(),
            monitor_id,
            generation,
            period,
            shutdown_rx,
        ));
        if let Some(mut entry) = self.entries.get_mut(&monitor_id) {
            if entry.generation == generation {
                entry.handle = Some(handle);
            }
        }
        info!(monitor_id, interval_secs = period.as_secs(), "Registered monitor.");
        Ok(())
    }

    fn deregister(&self, monitor_id: i32) -> bool {
        match self.entries.remove(&monitor_id) {
            Some((_, mut entry)) => {
                entry.shutdown();
                true
            }
            None => false,
        }
    }

    /// Only removes the entry if it still belongs to `generation`.
    fn deregister_generation(&self, monitor_id: i32, generation: u64) {
        if let Some((_, mut entry)) = self
            .entries
            .remove_if(&monitor_id, |_, entry| entry.generation == generation)
        {
            entry.shutdown();
        }
    }

    async fn run_tick(&self, monitor_id: i32, generation: u64) -> Result<(), EngineError> {
        let monitor = match self
            .collaborators
            .monitors
            .get_monitor_by_id(monitor_id)
            .await?
        {
            Some(monitor) if monitor.is_active => monitor,
            Some(_) => {
                info!(monitor_id, "Monitor was disabled; deregistering.");
                self.deregister_generation(monitor_id, generation);
                return Ok(());
            }
            None => {
                warn!(monitor_id, "Monitor record no longer exists; deregistering.");
                self.deregister_generation(monitor_id, generation);
                return Ok(());
            }
        };

        let result = self.checker.check(&monitor).await;

        let network_healthy = if result.status.is_failure() {
            if let Err(e) = self.collaborators.network.check_network_health().await {
                warn!(
                    monitor_id,
                    error = %e,
                    "Network health probe failed; using last known state."
                );
            }
            self.collaborators.network.is_network_healthy()
        } else {
            true
        };
        let in_maintenance = is_under_maintenance(&monitor, Local::now().naive_local());

        let outcome = {
            let Some(mut entry) = self.entries.get_mut(&monitor_id) else {
                debug!(monitor_id, "Monitor removed while checking; dropping result.");
                return Ok(());
            };
            if entry.generation != generation {
                debug!(monitor_id, "Monitor re-registered while checking; dropping result.");
                return Ok(());
            }
            entry.monitor = monitor.clone();
            entry.state.apply(
                &result,
                TickContext {
                    network_healthy,
                    in_maintenance,
                    now: Utc::now(),
                },
            )
        };

        if let Err(e) = self.collaborators.history.record_check(monitor_id, &result).await {
            error!(monitor_id, error = %e, "Failed to record check result.");
        }
        if in_maintenance {
            if let Err(e) = self
                .collaborators
                .history
                .update_maintenance_aggregate(monitor_id)
                .await
            {
                error!(monitor_id, error = %e, "Failed to update maintenance aggregate.");
            }
        }

        match outcome {
            TickOutcome::Suppressed => {
                warn!(
                    monitor_id,
                    error = ?result.error_message,
                    "Local network unreachable; check failure ignored."
                );
            }
            TickOutcome::Retrying { retry_count } => {
                debug!(
                    monitor_id,
                    retry_count,
                    raw = ?result.status,
                    "Check failed; still retrying."
                );
            }
            TickOutcome::Steady { status } => {
                debug!(monitor_id, status = %status, "Check complete.");
            }
            TickOutcome::Transitioned(transition) => {
                self.notifier
                    .notify(&monitor, transition, &result, in_maintenance)
                    .await?;
            }
        }
        Ok(())
    }

    fn watchdog_pass(&self) {
        let now = Utc::now();
        for entry in self.entries.iter() {
            let monitor_id = entry.monitor.id;
            if entry.handle.as_ref().is_some_and(|h| h.is_finished()) {
                error!(monitor_id, "Monitor task exited unexpectedly.");
                continue;
            }
            let Some(limit) = stale_limit(entry.monitor.interval_seconds) else {
                continue;
            };
            let last = entry.state.last_check.unwrap_or(entry.registered_at);
            if now - last > limit {
                warn!(
                    monitor_id,
                    last_check = %last,
                    consecutive_failures = entry.state.consecutive_failures,
                    "Monitor has not been checked for over {} intervals; its timer may be stuck.",
                    STALE_INTERVAL_FACTOR
                );
            }
        }
        self.touch_heartbeat();
    }
}

/// `None` when the interval is too long for the limit to be representable.
fn stale_limit(interval_seconds: u64) -> Option<ChronoDuration> {
    i64::try_from(interval_seconds)
        .ok()
        .and_then(|secs| secs.checked_mul(STALE_INTERVAL_FACTOR))
        .and_then(ChronoDuration::try_seconds)
}

async fn run_monitor_loop(
    inner: Arc<EngineInner>,
    monitor_id: i32,
    generation: u64,
    period: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    // The first tick completes immediately.
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown_rx => {
                debug!(monitor_id, "Monitor task shutting down.");
                break;
            }

            _ = ticker.tick() => {
                if let Err(e) = inner.run_tick(monitor_id, generation).await {
                    error!(monitor_id, error = %e, "Monitor tick failed; skipping.");
                }
            }
        }
    }
}

async fn run_watchdog(
    inner: Arc<EngineInner>,
    period: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown_rx => break,

            _ = ticker.tick() => inner.watchdog_pass(),
        }
    }
}

fn pruning_jobs(history: Arc<dyn HistoryStore>) -> Vec<ScheduledJob> {
    let history_for_checks = history.clone();
    let history_for_aggregates = history;
    vec![
        ScheduledJob {
            id: PRUNE_HISTORY_JOB.to_string(),
            cron_expression: HOURLY_CRON.to_string(),
            execute: Arc::new(move || -> BoxFuture<'static, ()> {
                let history = history_for_checks.clone();
                Box::pin(async move {
                    if let Err(e) = history.prune_history().await {
                        error!(error = %e, "Failed to prune check history.");
                    }
                })
            }),
        },
        ScheduledJob {
            id: PRUNE_AGGREGATES_JOB.to_string(),
            cron_expression: HOURLY_CRON.to_string(),
            execute: Arc::new(move || -> BoxFuture<'static, ()> {
                let history = history_for_aggregates.clone();
                Box::pin(async move {
                    if let Err(e) = history.prune_aggregates().await {
                        error!(error = %e, "Failed to prune maintenance aggregates.");
                    }
                })
            }),
        },
    ]
}
