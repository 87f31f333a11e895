//! NotificationDispatcher - Alert Fan-out
//!
//! ## Responsibilities
//!
//! - In-app broadcast over the connection hub
//! - Webhook delivery with bounded retry
//! - Mobile push hand-off to the transport collaborator
//!
//! The rule engine decides *what* fires; this module owns *how* each channel
//! delivers it. A failed channel reports an `ActionDelivery` error and never
//! affects other channels or the rule's trigger bookkeeping.

use crate::alert_engine::AlertAction;
use crate::error::{Error, Result};
use crate::models::PipelineFailure;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Webhook retry policy
const WEBHOOK_ATTEMPTS: u32 = 3;
const WEBHOOK_BACKOFF_BASE_MS: u64 = 500;
const WEBHOOK_ATTEMPT_TIMEOUT_SECS: u64 = 5;

/// One fired alert, as seen by broadcast and push channels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertNotification {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub event_id: Uuid,
    pub camera_id: String,
    pub description: String,
    pub confidence: f32,
    pub detected_object_types: Vec<String>,
    pub group_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

/// Webhook POST body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event_id: Uuid,
    pub camera_id: String,
    pub description: String,
    pub confidence: f32,
    pub detected_object_types: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl WebhookPayload {
    fn from_notification(n: &AlertNotification) -> Self {
        Self {
            event_id: n.event_id,
            camera_id: n.camera_id.clone(),
            description: n.description.clone(),
            confidence: n.confidence,
            detected_object_types: n.detected_object_types.clone(),
            timestamp: n.timestamp,
        }
    }
}

/// Hub message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum HubMessage {
    AlertTriggered(AlertNotification),
    PipelineFailure(PipelineFailure),
}

/// In-app broadcast hub
///
/// Clients register for a stream of serialized hub messages; the UI layer owns
/// the actual socket plumbing.
pub struct BroadcastHub {
    connections: RwLock<HashMap<Uuid, mpsc::UnboundedSender<String>>>,
    connection_count: AtomicU64,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
        }
    }

    /// Register a new client
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        self.connections.write().await.insert(id, tx);
        self.connection_count.fetch_add(1, Ordering::Relaxed);
        tracing::info!(connection_id = %id, "Broadcast client connected");

        (id, rx)
    }

    /// Unregister a client
    pub async fn unregister(&self, id: &Uuid) {
        if self.connections.write().await.remove(id).is_some() {
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
            tracing::info!(connection_id = %id, "Broadcast client disconnected");
        }
    }

    /// Broadcast a message to all clients
    pub async fn broadcast(&self, message: HubMessage) {
        let json = match serde_json::to_string(&message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize hub message");
                return;
            }
        };

        let connections = self.connections.read().await;
        for (id, tx) in connections.iter() {
            if let Err(e) = tx.send(json.clone()) {
                tracing::warn!(connection_id = %id, error = %e, "Failed to send hub message");
            }
        }
    }

    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Mobile push transport, owned by the notification infrastructure
#[async_trait]
pub trait PushRelay: Send + Sync {
    async fn push(&self, user_ids: &[String], notification: &AlertNotification) -> Result<()>;
}

/// NotificationDispatcher instance
pub struct NotificationDispatcher {
    hub: Arc<BroadcastHub>,
    client: reqwest::Client,
    push_relay: Option<Arc<dyn PushRelay>>,
}

impl NotificationDispatcher {
    /// Create new NotificationDispatcher
    pub fn new(hub: Arc<BroadcastHub>, push_relay: Option<Arc<dyn PushRelay>>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(WEBHOOK_ATTEMPT_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            hub,
            client,
            push_relay,
        }
    }

    pub fn hub(&self) -> Arc<BroadcastHub> {
        self.hub.clone()
    }

    /// Deliver one action for a fired rule
    pub async fn dispatch(
        &self,
        action: &AlertAction,
        notification: &AlertNotification,
    ) -> Result<()> {
        match action {
            AlertAction::Broadcast => {
                self.hub
                    .broadcast(HubMessage::AlertTriggered(notification.clone()))
                    .await;
                Ok(())
            }
            AlertAction::Webhook { url, headers } => {
                self.send_webhook(url, headers, notification).await
            }
            AlertAction::Push { user_ids } => match &self.push_relay {
                Some(relay) => relay.push(user_ids, notification).await.map_err(|e| {
                    Error::ActionDelivery {
                        channel: "push".to_string(),
                        message: e.to_string(),
                    }
                }),
                None => Err(Error::ActionDelivery {
                    channel: "push".to_string(),
                    message: "no push relay configured".to_string(),
                }),
            },
        }
    }

    /// POST the webhook payload: 3 attempts, exponential backoff, 5s each
    async fn send_webhook(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        notification: &AlertNotification,
    ) -> Result<()> {
        let payload = WebhookPayload::from_notification(notification);
        let mut last_error = String::new();

        for attempt in 0..WEBHOOK_ATTEMPTS {
            if attempt > 0 {
                let delay = Duration::from_millis(WEBHOOK_BACKOFF_BASE_MS * 2u64.pow(attempt - 1));
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(url).json(&payload);
            for (name, value) in headers {
                request = request.header(name, value);
            }

            match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(url = %url, attempt = attempt + 1, "Webhook delivered");
                    return Ok(());
                }
                Ok(resp) => {
                    last_error = format!("HTTP {}", resp.status());
                    tracing::warn!(
                        url = %url,
                        attempt = attempt + 1,
                        status = %resp.status(),
                        "Webhook attempt failed"
                    );
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(
                        url = %url,
                        attempt = attempt + 1,
                        error = %e,
                        "Webhook attempt failed"
                    );
                }
            }
        }

        Err(Error::ActionDelivery {
            channel: "webhook".to_string(),
            message: format!("{} attempts failed, last: {}", WEBHOOK_ATTEMPTS, last_error),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification() -> AlertNotification {
        AlertNotification {
            rule_id: Uuid::new_v4(),
            rule_name: "person-at-door".to_string(),
            event_id: Uuid::new_v4(),
            camera_id: "cam-1".to_string(),
            description: "A person stands at the door.".to_string(),
            confidence: 0.9,
            detected_object_types: vec!["person".to_string()],
            group_id: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_registered_clients() {
        let hub = Arc::new(BroadcastHub::new());
        let (id, mut rx) = hub.register().await;

        let dispatcher = NotificationDispatcher::new(hub.clone(), None);
        dispatcher
            .dispatch(&AlertAction::Broadcast, &notification())
            .await
            .unwrap();

        let raw = rx.recv().await.unwrap();
        let msg: HubMessage = serde_json::from_str(&raw).unwrap();
        match msg {
            HubMessage::AlertTriggered(n) => assert_eq!(n.camera_id, "cam-1"),
            other => panic!("unexpected message: {:?}", other),
        }

        hub.unregister(&id).await;
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_push_without_relay_is_delivery_failure() {
        let dispatcher = NotificationDispatcher::new(Arc::new(BroadcastHub::new()), None);
        let err = dispatcher
            .dispatch(
                &AlertAction::Push {
                    user_ids: vec!["user-1".to_string()],
                },
                &notification(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ActionDelivery { .. }));
    }

    #[test]
    fn test_webhook_payload_shape() {
        let n = notification();
        let payload = WebhookPayload::from_notification(&n);
        let json = serde_json::to_value(&payload).unwrap();
        for key in [
            "event_id",
            "camera_id",
            "description",
            "confidence",
            "detected_object_types",
            "timestamp",
        ] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        // Rule metadata stays out of the webhook body
        assert!(json.get("rule_name").is_none());
    }
}
