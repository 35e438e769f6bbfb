//! Memoization of instance metadata lookups.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::cloud::{CloudError, InstanceMetadata, MetadataResolver};

/// Caches metadata per instance id so repeated events about the same
/// instance hit the resolver at most once.
///
/// Written only by the queue consumer's single worker, so a plain map is
/// enough. Entries are never evicted: tags are assumed immutable for an
/// instance's lifetime, and a cached entry stays authoritative for the
/// rest of the process run.
pub struct TagCache {
    resolver: Arc<dyn MetadataResolver>,
    entries: HashMap<String, InstanceMetadata>,
}

impl TagCache {
    pub fn new(resolver: Arc<dyn MetadataResolver>) -> Self {
        Self {
            resolver,
            entries: HashMap::new(),
        }
    }

    /// Resolve metadata for `instance_id`, consulting the resolver only on
    /// a cache miss. A not-found result is returned without caching, so a
    /// transiently-missing instance can still resolve later.
    pub async fn resolve(
        &mut self,
        instance_id: &str,
    ) -> Result<Option<InstanceMetadata>, CloudError> {
        if let Some(metadata) = self.entries.get(instance_id) {
            return Ok(Some(metadata.clone()));
        }

        match self.resolver.resolve(instance_id).await? {
            Some(metadata) => {
                debug!(instance_id, username = %metadata.username, "Caching instance metadata");
                self.entries.insert(instance_id.to_string(), metadata.clone());
                Ok(Some(metadata))
            }
            None => Ok(None),
        }
    }

    /// Number of cached instances.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
