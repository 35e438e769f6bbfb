//! In-process implementation of the cloud collaborator seams.
//!
//! `LocalCloud` backs dev mode and the test suite: a topic/queue pair with
//! at-least-once delivery semantics, a seedable instance inventory and
//! catalog, and a provisioner that records instances directly and emits the
//! matching state-change notifications. Everything lives in one mutex so
//! the semantics stay easy to audit.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use vdesk_events::INSTANCE_STATE_CHANGE;

use super::catalog::{CatalogStore, EntitlementGrant, MachineDef};
use super::directory::{DesktopInstance, InstanceDirectory};
use super::error::CloudError;
use super::provisioner::{DesktopProvisioner, LaunchRequest};
use super::queue::{NotificationQueue, QueueMessage};
use super::resolver::{InstanceMetadata, MetadataResolver, TAG_DESKTOP_ID, TAG_USERNAME};

#[derive(Debug, Default)]
struct LocalQueue {
    pending: VecDeque<String>,
    in_flight: HashMap<String, String>,
}

#[derive(Debug, Clone)]
struct LocalSubscription {
    topic: String,
    queue_url: String,
}

#[derive(Debug, Clone)]
struct LocalInstance {
    instance_id: String,
    desktop_id: String,
    username: String,
    dns: String,
    launch_time: DateTime<Utc>,
    state: String,
    screen_geometry: String,
    machine_def_id: String,
}

#[derive(Default)]
struct LocalState {
    queues: HashMap<String, LocalQueue>,
    subscriptions: HashMap<String, LocalSubscription>,
    instances: HashMap<String, LocalInstance>,
    group_roles: HashMap<String, Vec<String>>,
    role_entitlements: HashMap<String, Vec<EntitlementGrant>>,
    machine_defs: HashMap<String, MachineDef>,
    next_id: u64,
}

impl LocalState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-process cloud backend.
pub struct LocalCloud {
    topic: String,
    state: Mutex<LocalState>,
    message_added: Notify,
}

impl LocalCloud {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            state: Mutex::new(LocalState::default()),
            message_added: Notify::new(),
        }
    }

    /// The topic this backend publishes instance notifications to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn seed_group(&self, group: impl Into<String>, roles: Vec<String>) {
        let mut state = self.state.lock().await;
        state.group_roles.insert(group.into(), roles);
    }

    pub async fn seed_entitlement(&self, role: impl Into<String>, grant: EntitlementGrant) {
        let mut state = self.state.lock().await;
        state.role_entitlements.entry(role.into()).or_default().push(grant);
    }

    pub async fn seed_machine_def(&self, def: MachineDef) {
        let mut state = self.state.lock().await;
        state.machine_defs.insert(def.machine_def_id.clone(), def);
    }

    /// Insert an instance directly, bypassing the provisioner.
    pub async fn seed_instance(
        &self,
        instance_id: impl Into<String>,
        desktop_id: impl Into<String>,
        username: impl Into<String>,
        state_name: impl Into<String>,
        screen_geometry: impl Into<String>,
        machine_def_id: impl Into<String>,
    ) {
        let instance_id = instance_id.into();
        let instance = LocalInstance {
            dns: format!("{instance_id}.internal"),
            instance_id: instance_id.clone(),
            desktop_id: desktop_id.into(),
            username: username.into(),
            launch_time: Utc::now(),
            state: state_name.into(),
            screen_geometry: screen_geometry.into(),
            machine_def_id: machine_def_id.into(),
        };
        let mut state = self.state.lock().await;
        state.instances.insert(instance_id, instance);
    }

    /// Publish a raw notification payload to the backend's topic.
    ///
    /// The payload is wrapped in the topic envelope and lands on every
    /// queue currently subscribed to the topic.
    pub async fn publish(&self, payload: &serde_json::Value) {
        let body = serde_json::json!({ "Message": payload.to_string() }).to_string();
        let mut state = self.state.lock().await;
        let targets: Vec<String> = state
            .subscriptions
            .values()
            .filter(|sub| sub.topic == self.topic)
            .map(|sub| sub.queue_url.clone())
            .collect();
        for queue_url in targets {
            if let Some(queue) = state.queues.get_mut(&queue_url) {
                queue.pending.push_back(body.clone());
            }
        }
        self.message_added.notify_waiters();
    }

    /// Publish an instance state-change notification.
    pub async fn publish_state_change(&self, instance_id: &str, state_name: &str) {
        self.publish(&serde_json::json!({
            "detail-type": INSTANCE_STATE_CHANGE,
            "detail": { "instance-id": instance_id, "state": state_name },
        }))
        .await;
    }

    /// Messages waiting for delivery, across all queues.
    pub async fn pending_messages(&self) -> usize {
        let state = self.state.lock().await;
        state.queues.values().map(|q| q.pending.len()).sum()
    }

    /// Messages received but not yet deleted, across all queues.
    pub async fn in_flight_messages(&self) -> usize {
        let state = self.state.lock().await;
        state.queues.values().map(|q| q.in_flight.len()).sum()
    }

    /// Number of queues currently provisioned.
    pub async fn queue_count(&self) -> usize {
        let state = self.state.lock().await;
        state.queues.len()
    }

    /// Number of live topic subscriptions.
    pub async fn subscription_count(&self) -> usize {
        let state = self.state.lock().await;
        state.subscriptions.len()
    }
}

#[async_trait]
impl NotificationQueue for LocalCloud {
    async fn create_queue(&self) -> Result<String, CloudError> {
        let mut state = self.state.lock().await;
        let queue_url = format!("local://queues/desktop-events-{}", state.next_id());
        state.queues.insert(queue_url.clone(), LocalQueue::default());
        Ok(queue_url)
    }

    async fn subscribe(&self, topic: &str, queue_url: &str) -> Result<String, CloudError> {
        let mut state = self.state.lock().await;
        if !state.queues.contains_key(queue_url) {
            return Err(CloudError::QueueNotFound(queue_url.to_string()));
        }
        let subscription = format!("local://subscriptions/{}", state.next_id());
        state.subscriptions.insert(
            subscription.clone(),
            LocalSubscription {
                topic: topic.to_string(),
                queue_url: queue_url.to_string(),
            },
        );
        Ok(subscription)
    }

    async fn receive_message(
        &self,
        queue_url: &str,
        wait: Duration,
    ) -> Result<Option<QueueMessage>, CloudError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            // Register for wakeups before checking the queue, otherwise a
            // publish landing between the check and the wait is lost.
            let notified = self.message_added.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                let queue = state
                    .queues
                    .get_mut(queue_url)
                    .ok_or_else(|| CloudError::QueueNotFound(queue_url.to_string()))?;
                if let Some(body) = queue.pending.pop_front() {
                    let receipt_handle = Uuid::new_v4().to_string();
                    queue.in_flight.insert(receipt_handle.clone(), body.clone());
                    return Ok(Some(QueueMessage {
                        body,
                        receipt_handle,
                    }));
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }

    async fn delete_message(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), CloudError> {
        let mut state = self.state.lock().await;
        let queue = state
            .queues
            .get_mut(queue_url)
            .ok_or_else(|| CloudError::QueueNotFound(queue_url.to_string()))?;
        queue
            .in_flight
            .remove(receipt_handle)
            .map(|_| ())
            .ok_or_else(|| CloudError::UnknownReceipt(receipt_handle.to_string()))
    }

    async fn unsubscribe(&self, subscription: &str) -> Result<(), CloudError> {
        let mut state = self.state.lock().await;
        state
            .subscriptions
            .remove(subscription)
            .map(|_| ())
            .ok_or_else(|| CloudError::SubscriptionNotFound(subscription.to_string()))
    }

    async fn delete_queue(&self, queue_url: &str) -> Result<(), CloudError> {
        let mut state = self.state.lock().await;
        state
            .queues
            .remove(queue_url)
            .map(|_| ())
            .ok_or_else(|| CloudError::QueueNotFound(queue_url.to_string()))
    }
}

#[async_trait]
impl MetadataResolver for LocalCloud {
    async fn resolve(&self, instance_id: &str) -> Result<Option<InstanceMetadata>, CloudError> {
        let state = self.state.lock().await;
        let Some(instance) = state.instances.get(instance_id) else {
            return Ok(None);
        };
        let tags = HashMap::from([
            (TAG_USERNAME.to_string(), instance.username.clone()),
            (TAG_DESKTOP_ID.to_string(), instance.desktop_id.clone()),
            ("MachineType".to_string(), "Desktop".to_string()),
            ("MachineDef".to_string(), instance.machine_def_id.clone()),
            (
                "ScreenGeometry".to_string(),
                instance.screen_geometry.clone(),
            ),
        ]);
        Ok(InstanceMetadata::from_tags(instance_id, tags))
    }
}

#[async_trait]
impl InstanceDirectory for LocalCloud {
    async fn instances_for_user(
        &self,
        username: &str,
    ) -> Result<Vec<DesktopInstance>, CloudError> {
        let state = self.state.lock().await;
        let mut instances: Vec<DesktopInstance> = state
            .instances
            .values()
            .filter(|i| i.username == username)
            .map(|i| DesktopInstance {
                desktop_id: i.desktop_id.clone(),
                instance_id: i.instance_id.clone(),
                dns: i.dns.clone(),
                launch_time: i.launch_time,
                state: i.state.clone(),
                screen_geometry: i.screen_geometry.clone(),
                machine_def_id: i.machine_def_id.clone(),
            })
            .collect();
        instances.sort_by(|a, b| a.desktop_id.cmp(&b.desktop_id));
        Ok(instances)
    }
}

#[async_trait]
impl CatalogStore for LocalCloud {
    async fn group_role_map(&self) -> Result<HashMap<String, Vec<String>>, CloudError> {
        let state = self.state.lock().await;
        Ok(state.group_roles.clone())
    }

    async fn entitlements_for_role(
        &self,
        role: &str,
    ) -> Result<Vec<EntitlementGrant>, CloudError> {
        let state = self.state.lock().await;
        Ok(state.role_entitlements.get(role).cloned().unwrap_or_default())
    }

    async fn machine_def(
        &self,
        machine_def_id: &str,
    ) -> Result<Option<MachineDef>, CloudError> {
        let state = self.state.lock().await;
        Ok(state.machine_defs.get(machine_def_id).cloned())
    }
}

#[async_trait]
impl DesktopProvisioner for LocalCloud {
    async fn create_desktop(&self, request: &LaunchRequest) -> Result<(), CloudError> {
        let instance_id = {
            let mut state = self.state.lock().await;
            let instance_id = format!("i-local{:08x}", state.next_id());
            let instance = LocalInstance {
                dns: format!("{instance_id}.internal"),
                instance_id: instance_id.clone(),
                desktop_id: request.desktop_id.clone(),
                username: request.machine_username.clone(),
                launch_time: Utc::now(),
                state: "pending".to_string(),
                screen_geometry: request.screen_geometry.clone(),
                machine_def_id: request.machine_def.machine_def_id.clone(),
            };
            state.instances.insert(instance_id.clone(), instance);
            instance_id
        };
        self.publish_state_change(&instance_id, "pending").await;
        Ok(())
    }

    async fn destroy_desktop(&self, request: &LaunchRequest) -> Result<(), CloudError> {
        let instance_id = {
            let mut state = self.state.lock().await;
            let Some(instance) = state
                .instances
                .values_mut()
                .find(|i| i.desktop_id == request.desktop_id)
            else {
                return Ok(());
            };
            instance.state = "shutting-down".to_string();
            instance.instance_id.clone()
        };
        self.publish_state_change(&instance_id, "shutting-down").await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn published_messages_reach_subscribed_queues_once() {
        let cloud = LocalCloud::new("desktop-events");
        let queue_url = cloud.create_queue().await.unwrap();
        cloud.subscribe("desktop-events", &queue_url).await.unwrap();

        cloud.publish_state_change("i-1", "running").await;

        let message = cloud
            .receive_message(&queue_url, Duration::from_millis(50))
            .await
            .unwrap()
            .expect("message should be available");
        assert_eq!(cloud.in_flight_messages().await, 1);

        cloud
            .delete_message(&queue_url, &message.receipt_handle)
            .await
            .unwrap();
        assert_eq!(cloud.in_flight_messages().await, 0);
        assert_eq!(cloud.pending_messages().await, 0);
    }

    #[tokio::test]
    async fn receive_returns_none_when_wait_elapses() {
        let cloud = LocalCloud::new("desktop-events");
        let queue_url = cloud.create_queue().await.unwrap();

        let received = cloud
            .receive_message(&queue_url, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn receive_wakes_on_publish_during_poll() {
        let cloud = std::sync::Arc::new(LocalCloud::new("desktop-events"));
        let queue_url = cloud.create_queue().await.unwrap();
        cloud.subscribe("desktop-events", &queue_url).await.unwrap();

        let publisher = cloud.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish_state_change("i-1", "running").await;
        });

        let received = cloud
            .receive_message(&queue_url, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(received.is_some());
    }

    #[tokio::test]
    async fn delete_with_unknown_receipt_fails() {
        let cloud = LocalCloud::new("desktop-events");
        let queue_url = cloud.create_queue().await.unwrap();
        let result = cloud.delete_message(&queue_url, "nope").await;
        assert!(matches!(result, Err(CloudError::UnknownReceipt(_))));
    }
}
