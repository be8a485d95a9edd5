//! Bridges confirmed transitions to the broadcast and notification collaborators.
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::collaborators::{
    Broadcaster, MonitorStore, NotificationBatcher, PreferenceResolver,
};
use crate::confirmation::{StatusTransition, event_key};
use crate::error::EngineError;
use crate::models::{CheckResult, Monitor, MonitorStatus};

pub const STATUS_CHANNEL: &str = "monitor-status";
/// Preference key under which monitor events are configured.
pub const SERVICE_KEY: &str = "monitors";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangePayload {
    pub monitor_id: i32,
    pub monitor_name: String,
    pub old_status: MonitorStatus,
    pub new_status: MonitorStatus,
    pub response_time_ms: Option<u64>,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

pub struct StatusChangeNotifier {
    broadcaster: Arc<dyn Broadcaster>,
    batcher: Arc<dyn NotificationBatcher>,
    preferences: Arc<dyn PreferenceResolver>,
    monitors: Arc<dyn MonitorStore>,
    instance_name: String,
}

impl StatusChangeNotifier {
    pub fn new(
        broadcaster: Arc<dyn Broadcaster>,
        batcher: Arc<dyn NotificationBatcher>,
        preferences: Arc<dyn PreferenceResolver>,
        monitors: Arc<dyn MonitorStore>,
        instance_name: impl Into<String>,
    ) -> Self {
        Self {
            broadcaster,
            batcher,
            preferences,
            monitors,
            instance_name: instance_name.into(),
        }
    }

    /// Broadcasts the change and, outside maintenance, queues per-recipient notifications.
    ///
    /// Returns the number of recipients a notification was queued for.
    pub async fn notify(
        &self,
        monitor: &Monitor,
        transition: StatusTransition,
        result: &CheckResult,
        in_maintenance: bool,
    ) -> Result<usize, EngineError> {
        let payload = StatusChangePayload {
            monitor_id: monitor.id,
            monitor_name: monitor.name.clone(),
            old_status: transition.old_status,
            new_status: transition.new_status,
            response_time_ms: result.response_time_ms,
            error_message: result.error_message.clone(),
            timestamp: result.checked_at,
        };
        self.broadcaster
            .broadcast(STATUS_CHANNEL, serde_json::to_value(&payload)?);

        if in_maintenance {
            debug!(monitor_id = monitor.id, "In maintenance; notification suppressed.");
            return Ok(0);
        }
        let Some(event) = event_key(&transition) else {
            return Ok(0);
        };

        info!(
            monitor_id = monitor.id,
            event = event,
            old = %transition.old_status,
            new = %transition.new_status,
            "Monitor status changed."
        );

        let status = transition.new_status.to_string();
        let mut queued = 0;

        let owner = self
            .preferences
            .user_wants_event(
                monitor.user_id,
                SERVICE_KEY,
                event,
                true,
                monitor.webhook_config.as_ref(),
            )
            .await;
        if Self::resolved(monitor, monitor.user_id, owner) {
            self.queue(monitor.user_id, monitor, &status).await?;
            queued += 1;
        }

        let shares = self.monitors.get_monitor_shares(monitor.id).await?;
        for share in shares
            .iter()
            .filter(|s| s.notify && s.user_id != monitor.user_id)
        {
            let wants = self
                .preferences
                .user_wants_event(share.user_id, SERVICE_KEY, event, false, None)
                .await;
            if Self::resolved(monitor, share.user_id, wants) {
                self.queue(share.user_id, monitor, &status).await?;
                queued += 1;
            }
        }
        Ok(queued)
    }

    /// A failed lookup skips that recipient only.
    fn resolved(monitor: &Monitor, user_id: i32, wants: Result<bool, EngineError>) -> bool {
        match wants {
            Ok(wants) => wants,
            Err(e) => {
                error!(
                    monitor_id = monitor.id,
                    user_id,
                    error = %e,
                    "Failed to resolve user preference."
                );
                false
            }
        }
    }

    async fn queue(
        &self,
        user_id: i32,
        monitor: &Monitor,
        status: &str,
    ) -> Result<(), EngineError> {
        self.batcher
            .add(
                user_id,
                monitor.id,
                status,
                &monitor.name,
                monitor.icon.as_deref(),
                &self.instance_name,
            )
            .await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::collaborators::{Broadcaster, NotificationBatcher, PreferenceResolver};
    use crate::error::EngineError;

    #[derive(Default)]
    pub struct RecordingBroadcaster {
        pub messages: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl Broadcaster for RecordingBroadcaster {
        fn broadcast(&self, channel: &str, payload: serde_json::Value) {
            self.messages
                .lock()
                .unwrap()
                .push((channel.to_string(), payload));
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Queued {
        pub user_id: i32,
        pub monitor_id: i32,
        pub status: String,
        pub instance_name: String,
    }

    #[derive(Default)]
    pub struct RecordingBatcher {
        pub queued: Mutex<Vec<Queued>>,
    }

    #[async_trait]
    impl NotificationBatcher for RecordingBatcher {
        async fn add(
            &self,
            user_id: i32,
            monitor_id: i32,
            status: &str,
            _monitor_name: &str,
            _icon_id: Option<&str>,
            instance_name: &str,
        ) -> Result<(), EngineError> {
            self.queued.lock().unwrap().push(Queued {
                user_id,
                monitor_id,
                status: status.to_string(),
                instance_name: instance_name.to_string(),
            });
            Ok(())
        }
    }

    /// Records every event key it is asked about; refuses users in `muted`
    /// and fails the lookup for users in `broken`.
    #[derive(Default)]
    pub struct RecordingResolver {
        pub muted: Vec<i32>,
        pub broken: Vec<i32>,
        pub events: Mutex<Vec<(i32, String, bool)>>,
    }

    #[async_trait]
    impl PreferenceResolver for RecordingResolver {
        async fn user_wants_event(
            &self,
            user_id: i32,
            _service_key: &str,
            event_key: &str,
            is_owner: bool,
            _webhook_config: Option<&serde_json::Value>,
        ) -> Result<bool, EngineError> {
            self.events
                .lock()
                .unwrap()
                .push((user_id, event_key.to_string(), is_owner));
            if self.broken.contains(&user_id) {
                return Err(EngineError::Store(format!("no preferences for user {user_id}")));
            }
            Ok(!self.muted.contains(&user_id))
        }
    }
}
