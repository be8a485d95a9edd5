use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, error};

use super::Broadcaster;

/// JSON-serialized `{ "type": channel, "payload": .. }` messages.
pub type StatusUpdateMsg = String;

/// Pushes status updates to every subscribed live-update client.
#[derive(Debug, Clone)]
pub struct ResultBroadcaster {
    updates_tx: broadcast::Sender<StatusUpdateMsg>,
}

impl ResultBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (updates_tx, _) = broadcast::channel(capacity.max(1));
        Self { updates_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdateMsg> {
        self.updates_tx.subscribe()
    }
}

impl Broadcaster for ResultBroadcaster {
    fn broadcast(&self, channel: &str, payload: serde_json::Value) {
        let message_content = json!({
            "type": channel,
            "payload": payload,
        });
        match serde_json::to_string(&message_content) {
            Ok(json_string) => {
                let receiver_count = self.updates_tx.receiver_count();
                if receiver_count == 0 {
                    debug!(channel = channel, "No active receivers, skipping broadcast.");
                    return;
                }
                if let Err(e) = self.updates_tx.send(json_string) {
                    error!(
                        channel = channel,
                        error = %e,
                        "Failed to broadcast status update to {} receivers.",
                        receiver_count
                    );
                } else {
                    debug!(
                        channel = channel,
                        "Broadcasted status update to {} receivers.",
                        receiver_count
                    );
                }
            }
            Err(e) => {
                error!(channel = channel, error = %e, "Failed to serialize status update message.");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_typed_envelope() {
        let broadcaster = ResultBroadcaster::new(8);
        let mut rx = broadcaster.subscribe();
        broadcaster.broadcast("monitor-status", json!({ "monitorId": 4 }));

        let raw = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["type"], "monitor-status");
        assert_eq!(value["payload"]["monitorId"], 4);
    }

    #[test]
    fn broadcasting_without_receivers_is_harmless() {
        let broadcaster = ResultBroadcaster::new(0);
        broadcaster.broadcast("monitor-status", json!({}));
    }
}
