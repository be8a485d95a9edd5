//! In-process stores and notification glue used by the binary and the tests.
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{debug, info};

use super::{HistoryStore, MonitorStore, NotificationBatcher, PreferenceResolver};
use crate::error::EngineError;
use crate::models::{CheckResult, Monitor, MonitorShare};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceAggregate {
    pub checks: u64,
    pub last_updated: DateTime<Utc>,
}

/// Keeps a bounded, per-monitor ring of recent results.
pub struct MemoryHistoryStore {
    per_monitor_limit: usize,
    retention: ChronoDuration,
    checks: DashMap<i32, VecDeque<CheckResult>>,
    maintenance: DashMap<i32, MaintenanceAggregate>,
}

impl MemoryHistoryStore {
    pub fn new(per_monitor_limit: usize, retention: ChronoDuration) -> Self {
        Self {
            per_monitor_limit: per_monitor_limit.max(1),
            retention,
            checks: DashMap::new(),
            maintenance: DashMap::new(),
        }
    }

    pub fn check_count(&self, monitor_id: i32) -> usize {
        self.checks.get(&monitor_id).map(|c| c.len()).unwrap_or(0)
    }

    pub fn maintenance_aggregate(&self, monitor_id: i32) -> Option<MaintenanceAggregate> {
        self.maintenance.get(&monitor_id).map(|a| *a)
    }
}

impl Default for MemoryHistoryStore {
    fn default() -> Self {
        Self::new(1_000, ChronoDuration::days(1))
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn record_check(&self, monitor_id: i32, result: &CheckResult) -> Result<(), EngineError> {
        let mut entries = self.checks.entry(monitor_id).or_default();
        entries.push_front(result.clone());
        entries.truncate(self.per_monitor_limit);
        Ok(())
    }

    async fn update_maintenance_aggregate(&self, monitor_id: i32) -> Result<(), EngineError> {
        let now = Utc::now();
        self.maintenance
            .entry(monitor_id)
            .and_modify(|a| {
                a.checks += 1;
                a.last_updated = now;
            })
            .or_insert(MaintenanceAggregate {
                checks: 1,
                last_updated: now,
            });
        Ok(())
    }

    async fn get_recent_checks(
        &self,
        monitor_id: i32,
        limit: usize,
    ) -> Result<Vec<CheckResult>, EngineError> {
        Ok(self
            .checks
            .get(&monitor_id)
            .map(|entries| entries.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn prune_history(&self) -> Result<(), EngineError> {
        let cutoff = Utc::now() - self.retention;
        let mut removed = 0usize;
        for mut entries in self.checks.iter_mut() {
            let before = entries.len();
            entries.retain(|r| r.checked_at >= cutoff);
            removed += before - entries.len();
        }
        self.checks.retain(|_, entries| !entries.is_empty());
        debug!(removed, "Pruned check history.");
        Ok(())
    }

    async fn prune_aggregates(&self) -> Result<(), EngineError> {
        let cutoff = Utc::now() - self.retention;
        self.maintenance.retain(|_, a| a.last_updated >= cutoff);
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct MonitorFileEntry {
    #[serde(flatten)]
    monitor: Monitor,
    #[serde(default)]
    shares: Vec<MonitorShare>,
}

#[derive(Debug, Default, Deserialize)]
struct MonitorFile {
    #[serde(default)]
    monitors: Vec<MonitorFileEntry>,
}

/// Reads monitors from a TOML file on every call, so edits apply on the next tick.
pub struct FileMonitorStore {
    path: PathBuf,
}

impl FileMonitorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<MonitorFile, EngineError> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            EngineError::Store(format!("failed to read {}: {e}", self.path.display()))
        })?;
        Ok(toml::from_str(&contents)?)
    }
}

#[async_trait]
impl MonitorStore for FileMonitorStore {
    async fn get_enabled_monitors(&self) -> Result<Vec<Monitor>, EngineError> {
        let file = self.load().await?;
        let monitors: Vec<Monitor> = file
            .monitors
            .into_iter()
            .map(|entry| entry.monitor)
            .filter(|m| m.is_active)
            .collect();
        info!(path = %self.path.display(), count = monitors.len(), "Loaded enabled monitors.");
        Ok(monitors)
    }

    async fn get_monitor_by_id(&self, monitor_id: i32) -> Result<Option<Monitor>, EngineError> {
        let file = self.load().await?;
        Ok(file
            .monitors
            .into_iter()
            .map(|entry| entry.monitor)
            .find(|m| m.id == monitor_id))
    }

    async fn get_monitor_shares(&self, monitor_id: i32) -> Result<Vec<MonitorShare>, EngineError> {
        let file = self.load().await?;
        Ok(file
            .monitors
            .into_iter()
            .find(|entry| entry.monitor.id == monitor_id)
            .map(|entry| entry.shares)
            .unwrap_or_default())
    }
}

/// Monitor store backed by a map; callers mutate it directly.
#[derive(Default)]
pub struct MemoryMonitorStore {
    monitors: RwLock<HashMap<i32, (Monitor, Vec<MonitorShare>)>>,
}

impl MemoryMonitorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, monitor: Monitor, shares: Vec<MonitorShare>) {
        if let Ok(mut guard) = self.monitors.write() {
            guard.insert(monitor.id, (monitor, shares));
        }
    }

    pub fn remove(&self, monitor_id: i32) {
        if let Ok(mut guard) = self.monitors.write() {
            guard.remove(&monitor_id);
        }
    }

    fn read<T>(
        &self,
        f: impl FnOnce(&HashMap<i32, (Monitor, Vec<MonitorShare>)>) -> T,
    ) -> Result<T, EngineError> {
        self.monitors
            .read()
            .map(|guard| f(&guard))
            .map_err(|_| EngineError::Store("monitor map lock poisoned".to_string()))
    }
}

#[async_trait]
impl MonitorStore for MemoryMonitorStore {
    async fn get_enabled_monitors(&self) -> Result<Vec<Monitor>, EngineError> {
        self.read(|map| {
            let mut monitors: Vec<Monitor> = map
                .values()
                .filter(|(m, _)| m.is_active)
                .map(|(m, _)| m.clone())
                .collect();
            monitors.sort_by_key(|m| m.id);
            monitors
        })
    }

    async fn get_monitor_by_id(&self, monitor_id: i32) -> Result<Option<Monitor>, EngineError> {
        self.read(|map| map.get(&monitor_id).map(|(m, _)| m.clone()))
    }

    async fn get_monitor_shares(&self, monitor_id: i32) -> Result<Vec<MonitorShare>, EngineError> {
        self.read(|map| {
            map.get(&monitor_id)
                .map(|(_, shares)| shares.clone())
                .unwrap_or_default()
        })
    }
}

/// Logs each queued notification; stands in for a real delivery pipeline.
#[derive(Debug, Default)]
pub struct LoggingNotificationBatcher;

#[async_trait]
impl NotificationBatcher for LoggingNotificationBatcher {
    async fn add(
        &self,
        user_id: i32,
        monitor_id: i32,
        status: &str,
        monitor_name: &str,
        icon_id: Option<&str>,
        instance_name: &str,
    ) -> Result<(), EngineError> {
        info!(
            user_id,
            monitor_id,
            status = %status,
            monitor_name = %monitor_name,
            icon_id = ?icon_id,
            instance = %instance_name,
            "Queued monitor notification."
        );
        Ok(())
    }
}

/// Owners always receive events; shared users receive them once they opted in.
#[derive(Debug, Default)]
pub struct OwnerAndOptInResolver;

#[async_trait]
impl PreferenceResolver for OwnerAndOptInResolver {
    async fn user_wants_event(
        &self,
        _user_id: i32,
        _service_key: &str,
        _event_key: &str,
        _is_owner: bool,
        _webhook_config: Option<&serde_json::Value>,
    ) -> Result<bool, EngineError> {
        // Shared users reach this point only after their per-share notify flag was checked.
        Ok(true)
    }
}
