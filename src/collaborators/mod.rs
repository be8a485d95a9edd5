//! Contracts for everything the engine consumes but does not own.
//!
//! The engine only ever talks to these traits. The submodules provide
//! in-process implementations used by the `uptime-monitor` binary.
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

use crate::error::EngineError;
use crate::models::{CheckResult, Monitor, MonitorShare};

pub mod broadcaster;
pub mod jobs;
pub mod memory;
pub mod network;

/// Persistence for raw check results and maintenance aggregates.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn record_check(&self, monitor_id: i32, result: &CheckResult) -> Result<(), EngineError>;

    async fn update_maintenance_aggregate(&self, monitor_id: i32) -> Result<(), EngineError>;

    /// Newest first, scoped to `monitor_id` only.
    async fn get_recent_checks(
        &self,
        monitor_id: i32,
        limit: usize,
    ) -> Result<Vec<CheckResult>, EngineError>;

    async fn prune_history(&self) -> Result<(), EngineError>;

    async fn prune_aggregates(&self) -> Result<(), EngineError>;
}

#[async_trait]
pub trait MonitorStore: Send + Sync {
    async fn get_enabled_monitors(&self) -> Result<Vec<Monitor>, EngineError>;

    async fn get_monitor_by_id(&self, monitor_id: i32) -> Result<Option<Monitor>, EngineError>;

    async fn get_monitor_shares(&self, monitor_id: i32) -> Result<Vec<MonitorShare>, EngineError>;
}

/// Tracks whether the monitoring host itself can reach its gateway.
#[async_trait]
pub trait NetworkHealthGate: Send + Sync {
    /// Runs a fresh probe and updates the last known state.
    async fn check_network_health(&self) -> Result<(), EngineError>;

    fn is_network_healthy(&self) -> bool;
}

pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Clone)]
pub struct ScheduledJob {
    pub id: String,
    pub cron_expression: String,
    pub execute: JobFn,
}

impl fmt::Debug for ScheduledJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledJob")
            .field("id", &self.id)
            .field("cron_expression", &self.cron_expression)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait JobRegistry: Send + Sync {
    async fn register_job(&self, job: ScheduledJob) -> Result<(), EngineError>;

    async fn unregister_job(&self, job_id: &str) -> Result<(), EngineError>;
}

/// Fire-and-forget push to connected clients.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, channel: &str, payload: serde_json::Value);
}

/// Queues a per-recipient notification; delivery is not this crate's concern.
#[async_trait]
pub trait NotificationBatcher: Send + Sync {
    async fn add(
        &self,
        user_id: i32,
        monitor_id: i32,
        status: &str,
        monitor_name: &str,
        icon_id: Option<&str>,
        instance_name: &str,
    ) -> Result<(), EngineError>;
}

#[async_trait]
pub trait PreferenceResolver: Send + Sync {
    async fn user_wants_event(
        &self,
        user_id: i32,
        service_key: &str,
        event_key: &str,
        is_owner: bool,
        webhook_config: Option<&serde_json::Value>,
    ) -> Result<bool, EngineError>;
}

/// Everything the engine needs from the outside world, bundled for construction.
#[derive(Clone)]
pub struct Collaborators {
    pub history: Arc<dyn HistoryStore>,
    pub monitors: Arc<dyn MonitorStore>,
    pub network: Arc<dyn NetworkHealthGate>,
    pub jobs: Arc<dyn JobRegistry>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub batcher: Arc<dyn NotificationBatcher>,
    pub preferences: Arc<dyn PreferenceResolver>,
}
