//! Application state shared across request handlers.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cloud::{CatalogStore, DesktopProvisioner, InstanceDirectory};
use crate::notify::{ConsumerStatus, SubscriptionRegistry};

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    registry: Arc<SubscriptionRegistry>,
    catalog: Arc<dyn CatalogStore>,
    directory: Arc<dyn InstanceDirectory>,
    provisioner: Arc<dyn DesktopProvisioner>,
    role_map: HashMap<String, Vec<String>>,
    consumer_status: ConsumerStatus,
}

impl AppState {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        catalog: Arc<dyn CatalogStore>,
        directory: Arc<dyn InstanceDirectory>,
        provisioner: Arc<dyn DesktopProvisioner>,
        role_map: HashMap<String, Vec<String>>,
        consumer_status: ConsumerStatus,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                registry,
                catalog,
                directory,
                provisioner,
                role_map,
                consumer_status,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.registry
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogStore> {
        &self.inner.catalog
    }

    pub fn directory(&self) -> &Arc<dyn InstanceDirectory> {
        &self.inner.directory
    }

    pub fn provisioner(&self) -> &Arc<dyn DesktopProvisioner> {
        &self.inner.provisioner
    }

    pub fn consumer_status(&self) -> &ConsumerStatus {
        &self.inner.consumer_status
    }

    /// Map directory groups to platform roles using the group→role table
    /// cached at startup. Unknown groups contribute nothing; the result is
    /// deduplicated and sorted.
    pub fn roles_for_groups(&self, groups: &[String]) -> Vec<String> {
        let mut roles: Vec<String> = groups
            .iter()
            .filter_map(|group| self.inner.role_map.get(group))
            .flatten()
            .cloned()
            .collect();
        roles.sort();
        roles.dedup();
        roles
    }
}
