//! Notification queue seam.
//!
//! The upstream topic carries instance state-change notifications; at
//! startup the control plane creates a queue, subscribes it to the topic,
//! and long-polls it for the process lifetime. Messages are at-least-once:
//! anything received must be explicitly deleted or it will be redelivered.

use std::time::Duration;

use async_trait::async_trait;

use super::error::CloudError;

/// A message received from the notification queue.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Raw message body (the outer topic envelope, JSON-encoded).
    pub body: String,

    /// Opaque handle used to delete this delivery.
    pub receipt_handle: String,
}

/// Durable notification queue operations.
#[async_trait]
pub trait NotificationQueue: Send + Sync {
    /// Create a fresh queue for this process and return its URL.
    async fn create_queue(&self) -> Result<String, CloudError>;

    /// Subscribe the queue to the upstream notification topic, returning
    /// the subscription identifier.
    async fn subscribe(&self, topic: &str, queue_url: &str) -> Result<String, CloudError>;

    /// Long-poll for at most one message, waiting up to `wait` for one to
    /// become available. Returns `None` when the wait elapses empty.
    async fn receive_message(
        &self,
        queue_url: &str,
        wait: Duration,
    ) -> Result<Option<QueueMessage>, CloudError>;

    /// Acknowledge a delivery so it is not redelivered.
    async fn delete_message(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), CloudError>;

    /// Remove the topic subscription.
    async fn unsubscribe(&self, subscription: &str) -> Result<(), CloudError>;

    /// Delete the queue itself.
    async fn delete_queue(&self, queue_url: &str) -> Result<(), CloudError>;
}
