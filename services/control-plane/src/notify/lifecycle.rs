//! Notification subsystem lifecycle.
//!
//! Pairs process-start resource creation (queue + topic subscription +
//! consumer task) with process-exit teardown. The composition root
//! constructs exactly one [`NotifierHandle`] per process; the handle owns
//! the queue/subscription pair for its whole lifetime.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cloud::{CloudError, MetadataResolver, NotificationQueue};
use crate::notify::consumer::{ConsumerStatus, QueueConsumer};
use crate::notify::registry::{SubscriptionRegistry, DEFAULT_SUBSCRIBER_CAPACITY};

/// Tunables for the fan-out subsystem.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Long-poll wait per receive call. Also bounds how long a stop
    /// request can take to be observed.
    pub poll_wait: Duration,

    /// Per-subscription event buffer.
    pub subscriber_capacity: usize,

    /// Extra time beyond the poll wait to allow the consumer task to
    /// finish during shutdown.
    pub shutdown_grace: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            poll_wait: Duration::from_secs(20),
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Running fan-out subsystem: the provisioned queue resources plus the
/// consumer task driving them.
pub struct NotifierHandle {
    queue: Arc<dyn NotificationQueue>,
    queue_url: String,
    subscription: String,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    status: ConsumerStatus,
    join_timeout: Duration,
}

impl NotifierHandle {
    /// Provision the queue/subscription pair and start the consumer.
    ///
    /// If the subscription fails after the queue was created, the queue is
    /// deleted again (best effort) before the error propagates.
    pub async fn start(
        queue: Arc<dyn NotificationQueue>,
        resolver: Arc<dyn MetadataResolver>,
        registry: Arc<SubscriptionRegistry>,
        topic: &str,
        config: NotifierConfig,
    ) -> Result<Self, CloudError> {
        let queue_url = queue.create_queue().await?;
        let subscription = match queue.subscribe(topic, &queue_url).await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(error = %e, queue_url = %queue_url, "Subscribe failed; removing queue");
                if let Err(cleanup) = queue.delete_queue(&queue_url).await {
                    warn!(error = %cleanup, queue_url = %queue_url, "Cleanup of unsubscribed queue failed");
                }
                return Err(e);
            }
        };
        info!(queue_url = %queue_url, subscription = %subscription, topic, "Notification queue provisioned");

        let consumer = QueueConsumer::new(
            queue.clone(),
            queue_url.clone(),
            resolver,
            registry,
            config.poll_wait,
        );
        let status = consumer.status();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(consumer.run(shutdown_rx));

        Ok(Self {
            queue,
            queue_url,
            subscription,
            shutdown_tx,
            task,
            status,
            join_timeout: config.poll_wait + config.shutdown_grace,
        })
    }

    pub fn status(&self) -> ConsumerStatus {
        self.status.clone()
    }

    /// Stop the consumer and tear the queue resources down.
    ///
    /// Stopping is cooperative and bounded by the poll wait; teardown of
    /// the subscription and queue is attempted regardless of whether the
    /// task finished in time.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if tokio::time::timeout(self.join_timeout, self.task).await.is_err() {
            warn!(
                timeout_secs = self.join_timeout.as_secs(),
                "Notification consumer did not stop in time"
            );
        }

        if let Err(e) = self.queue.unsubscribe(&self.subscription).await {
            warn!(error = %e, "Failed to remove topic subscription");
        }
        if let Err(e) = self.queue.delete_queue(&self.queue_url).await {
            warn!(error = %e, "Failed to delete notification queue");
        }
        info!("Notification subsystem shut down");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use crate::cloud::{LocalCloud, QueueMessage};

    use super::*;

    const TOPIC: &str = "desktop-events";

    fn test_config() -> NotifierConfig {
        NotifierConfig {
            poll_wait: Duration::from_millis(50),
            ..NotifierConfig::default()
        }
    }

    #[tokio::test]
    async fn start_and_shutdown_pair_resource_lifecycles() {
        let cloud = Arc::new(LocalCloud::new(TOPIC));
        let registry = Arc::new(SubscriptionRegistry::default());

        let handle = NotifierHandle::start(
            cloud.clone(),
            cloud.clone(),
            registry,
            TOPIC,
            test_config(),
        )
        .await
        .unwrap();
        assert_eq!(cloud.queue_count().await, 1);
        assert_eq!(cloud.subscription_count().await, 1);

        let status = handle.status();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while !status.is_running() {
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        handle.shutdown().await;
        assert_eq!(cloud.queue_count().await, 0);
        assert_eq!(cloud.subscription_count().await, 0);
        assert!(!status.is_running());
    }

    /// Queue front-end whose subscribe call always fails.
    struct SubscribeFails {
        inner: LocalCloud,
        queue_deleted: AtomicBool,
    }

    #[async_trait]
    impl NotificationQueue for SubscribeFails {
        async fn create_queue(&self) -> Result<String, CloudError> {
            self.inner.create_queue().await
        }

        async fn subscribe(&self, _topic: &str, _queue_url: &str) -> Result<String, CloudError> {
            Err(CloudError::Transport("subscribe rejected".to_string()))
        }

        async fn receive_message(
            &self,
            queue_url: &str,
            wait: Duration,
        ) -> Result<Option<QueueMessage>, CloudError> {
            self.inner.receive_message(queue_url, wait).await
        }

        async fn delete_message(
            &self,
            queue_url: &str,
            receipt_handle: &str,
        ) -> Result<(), CloudError> {
            self.inner.delete_message(queue_url, receipt_handle).await
        }

        async fn unsubscribe(&self, subscription: &str) -> Result<(), CloudError> {
            self.inner.unsubscribe(subscription).await
        }

        async fn delete_queue(&self, queue_url: &str) -> Result<(), CloudError> {
            self.queue_deleted.store(true, Ordering::SeqCst);
            self.inner.delete_queue(queue_url).await
        }
    }

    #[tokio::test]
    async fn failed_subscribe_rolls_back_the_queue() {
        let cloud = Arc::new(LocalCloud::new(TOPIC));
        let queue = Arc::new(SubscribeFails {
            inner: LocalCloud::new(TOPIC),
            queue_deleted: AtomicBool::new(false),
        });
        let registry = Arc::new(SubscriptionRegistry::default());

        let result = NotifierHandle::start(
            queue.clone(),
            cloud,
            registry,
            TOPIC,
            test_config(),
        )
        .await;

        assert!(matches!(result, Err(CloudError::Transport(_))));
        assert!(queue.queue_deleted.load(Ordering::SeqCst));
        assert_eq!(queue.inner.queue_count().await, 0);
    }
}
