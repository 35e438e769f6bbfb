//! Notification queue consumer.
//!
//! Drives the receive → decode → enrich → broadcast → acknowledge cycle
//! for the process lifetime. Failures local to a single message are
//! absorbed here and never surface past the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use vdesk_events::{Notification, StateChangeEvent};

use crate::cloud::{MetadataResolver, NotificationQueue};
use crate::notify::registry::SubscriptionRegistry;
use crate::notify::tag_cache::TagCache;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Observable liveness of the consumer loop, fed to readiness checks.
#[derive(Clone, Default)]
pub struct ConsumerStatus {
    running: Arc<AtomicBool>,
}

impl ConsumerStatus {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Clears the running flag when the loop exits, however it exits.
struct RunningGuard(Arc<AtomicBool>);

impl RunningGuard {
    fn set(status: &ConsumerStatus) -> Self {
        status.running.store(true, Ordering::SeqCst);
        Self(status.running.clone())
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Long-polls the notification queue and fans received state changes out
/// to the subscription registry.
pub struct QueueConsumer {
    queue: Arc<dyn NotificationQueue>,
    queue_url: String,
    registry: Arc<SubscriptionRegistry>,
    tag_cache: TagCache,
    poll_wait: Duration,
    status: ConsumerStatus,
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn NotificationQueue>,
        queue_url: String,
        resolver: Arc<dyn MetadataResolver>,
        registry: Arc<SubscriptionRegistry>,
        poll_wait: Duration,
    ) -> Self {
        Self {
            queue,
            queue_url,
            registry,
            tag_cache: TagCache::new(resolver),
            poll_wait,
            status: ConsumerStatus::default(),
        }
    }

    pub fn status(&self) -> ConsumerStatus {
        self.status.clone()
    }

    /// Run until the stop flag is observed.
    ///
    /// The flag is checked once per iteration: shutdown is cooperative and
    /// non-preemptive, taking effect only after the in-flight long poll
    /// returns. Transport failures back off and retry instead of
    /// terminating the loop.
    #[instrument(skip_all, fields(queue_url = %self.queue_url))]
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) {
        info!("Starting notification consumer");
        let _running = RunningGuard::set(&self.status);
        let mut backoff = INITIAL_BACKOFF;

        while !*shutdown.borrow() {
            let message = match self
                .queue
                .receive_message(&self.queue_url, self.poll_wait)
                .await
            {
                Ok(Some(message)) => {
                    backoff = INITIAL_BACKOFF;
                    message
                }
                Ok(None) => {
                    backoff = INITIAL_BACKOFF;
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, backoff_secs = backoff.as_secs(), "Receive failed; backing off");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            };

            self.process_message(&message.body).await;

            // Delete whether or not processing succeeded: an unprocessable
            // message must not loop back around as a redelivery.
            if let Err(e) = self
                .queue
                .delete_message(&self.queue_url, &message.receipt_handle)
                .await
            {
                warn!(error = %e, "Delete failed; upstream will redeliver this message");
            }
        }

        info!("Notification consumer stopped");
    }

    async fn process_message(&mut self, body: &str) {
        let notification = match Notification::decode(body) {
            Ok(notification) => notification,
            Err(e) => {
                warn!(error = %e, "Discarding undecodable notification");
                return;
            }
        };

        if !notification.is_state_change() {
            debug!(detail_type = %notification.detail_type, "Ignoring notification of unrelated type");
            return;
        }

        let detail = match notification.state_change_detail() {
            Ok(detail) => detail,
            Err(e) => {
                warn!(error = %e, "Discarding malformed state-change notification");
                return;
            }
        };
        info!(instance_id = %detail.instance_id, state = %detail.state, "Instance state change received");

        let metadata = match self.tag_cache.resolve(&detail.instance_id).await {
            Ok(Some(metadata)) => metadata,
            Ok(None) => {
                warn!(instance_id = %detail.instance_id, "No metadata for instance; dropping event");
                return;
            }
            Err(e) => {
                warn!(instance_id = %detail.instance_id, error = %e, "Metadata lookup failed; dropping event");
                return;
            }
        };

        let event = StateChangeEvent::new(metadata.desktop_id, detail.state, detail.instance_id);
        let delivered = self.registry.broadcast(&metadata.username, &event);
        debug!(username = %metadata.username, delivered, "Broadcast state change");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use crate::cloud::{CloudError, InstanceMetadata, LocalCloud};

    use super::*;

    const TOPIC: &str = "desktop-events";

    #[derive(Default)]
    struct CountingResolver {
        calls: AtomicUsize,
        known: std::sync::Mutex<HashMap<String, InstanceMetadata>>,
    }

    impl CountingResolver {
        fn insert(&self, instance_id: &str, username: &str, desktop_id: &str) {
            self.known.lock().unwrap().insert(
                instance_id.to_string(),
                InstanceMetadata {
                    instance_id: instance_id.to_string(),
                    username: username.to_string(),
                    desktop_id: desktop_id.to_string(),
                    tags: HashMap::new(),
                },
            );
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MetadataResolver for CountingResolver {
        async fn resolve(
            &self,
            instance_id: &str,
        ) -> Result<Option<InstanceMetadata>, CloudError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.known.lock().unwrap().get(instance_id).cloned())
        }
    }

    struct Harness {
        cloud: Arc<LocalCloud>,
        resolver: Arc<CountingResolver>,
        registry: Arc<SubscriptionRegistry>,
        shutdown_tx: watch::Sender<bool>,
        task: tokio::task::JoinHandle<()>,
    }

    impl Harness {
        async fn start() -> Self {
            let cloud = Arc::new(LocalCloud::new(TOPIC));
            let queue_url = cloud.create_queue().await.unwrap();
            cloud.subscribe(TOPIC, &queue_url).await.unwrap();

            let resolver = Arc::new(CountingResolver::default());
            let registry = Arc::new(SubscriptionRegistry::default());
            let consumer = QueueConsumer::new(
                cloud.clone(),
                queue_url,
                resolver.clone(),
                registry.clone(),
                Duration::from_millis(50),
            );
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let task = tokio::spawn(consumer.run(shutdown_rx));
            Self {
                cloud,
                resolver,
                registry,
                shutdown_tx,
                task,
            }
        }

        async fn wait_for_drain(&self) {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
            loop {
                if self.cloud.pending_messages().await == 0
                    && self.cloud.in_flight_messages().await == 0
                {
                    return;
                }
                assert!(
                    tokio::time::Instant::now() < deadline,
                    "queue did not drain in time"
                );
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        async fn stop(self) {
            self.shutdown_tx.send(true).unwrap();
            tokio::time::timeout(Duration::from_secs(1), self.task)
                .await
                .expect("consumer should stop after its current poll")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn matching_event_is_broadcast_and_message_deleted() {
        let harness = Harness::start().await;
        harness.resolver.insert("i-123", "alice", "d1");
        let (_id, mut rx) = harness.registry.register("alice");

        harness.cloud.publish_state_change("i-123", "running").await;

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event should arrive")
            .unwrap();
        assert_eq!(event, StateChangeEvent::new("d1", "running", "i-123"));

        harness.wait_for_drain().await;
        harness.stop().await;
    }

    #[tokio::test]
    async fn repeated_events_hit_resolver_once() {
        let harness = Harness::start().await;
        harness.resolver.insert("i-123", "alice", "d1");
        let (_id, mut rx) = harness.registry.register("alice");

        harness.cloud.publish_state_change("i-123", "pending").await;
        harness.cloud.publish_state_change("i-123", "running").await;

        for _ in 0..2 {
            tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("event should arrive")
                .unwrap();
        }
        assert_eq!(harness.resolver.calls(), 1);
        harness.stop().await;
    }

    #[tokio::test]
    async fn unrelated_notification_is_deleted_without_resolver_call() {
        let harness = Harness::start().await;

        harness
            .cloud
            .publish(&serde_json::json!({
                "detail-type": "EC2 Spot Instance Interruption Warning",
                "detail": { "instance-id": "i-123" },
            }))
            .await;

        harness.wait_for_drain().await;
        assert_eq!(harness.resolver.calls(), 0);
        harness.stop().await;
    }

    #[tokio::test]
    async fn undecodable_message_is_deleted() {
        let harness = Harness::start().await;

        harness.cloud.publish(&serde_json::json!("not an object")).await;

        harness.wait_for_drain().await;
        harness.stop().await;
    }

    #[tokio::test]
    async fn unknown_instance_event_is_dropped_but_deleted() {
        let harness = Harness::start().await;
        let (_id, mut rx) = harness.registry.register("alice");

        harness.cloud.publish_state_change("i-404", "running").await;

        harness.wait_for_drain().await;
        assert_eq!(harness.resolver.calls(), 1);
        assert!(rx.try_recv().is_err());
        harness.stop().await;
    }

    #[tokio::test]
    async fn status_tracks_loop_lifetime() {
        let cloud = Arc::new(LocalCloud::new(TOPIC));
        let queue_url = cloud.create_queue().await.unwrap();
        let consumer = QueueConsumer::new(
            cloud.clone(),
            queue_url,
            Arc::new(CountingResolver::default()),
            Arc::new(SubscriptionRegistry::default()),
            Duration::from_millis(20),
        );
        let status = consumer.status();
        assert!(!status.is_running());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(consumer.run(shutdown_rx));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while !status.is_running() {
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("consumer should stop after its current poll")
            .unwrap();
        assert!(!status.is_running());
    }
}
