//! Instance metadata seam.

use std::collections::HashMap;

use async_trait::async_trait;

use super::error::CloudError;

/// Tag keys the platform stamps onto every desktop instance.
pub(crate) const TAG_USERNAME: &str = "Username";
pub(crate) const TAG_DESKTOP_ID: &str = "DesktopId";

/// Descriptive attributes of a desktop instance, derived from its tags.
///
/// Immutable once created: the platform assumes tags do not change during
/// an instance's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceMetadata {
    /// Cloud instance identifier.
    pub instance_id: String,

    /// Owning username.
    pub username: String,

    /// Platform-assigned desktop identifier.
    pub desktop_id: String,

    /// Remaining tags, verbatim.
    pub tags: HashMap<String, String>,
}

impl InstanceMetadata {
    /// Build metadata from a raw tag map.
    ///
    /// Returns `None` when the owning-username or desktop-id tags are
    /// absent; an instance without them is not a desktop this platform
    /// manages.
    pub fn from_tags(
        instance_id: impl Into<String>,
        mut tags: HashMap<String, String>,
    ) -> Option<Self> {
        let username = tags.remove(TAG_USERNAME)?;
        let desktop_id = tags.remove(TAG_DESKTOP_ID)?;
        Some(Self {
            instance_id: instance_id.into(),
            username,
            desktop_id,
            tags,
        })
    }
}

/// Resolves an instance identifier to its descriptive attributes.
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    /// Look up metadata for an instance. Returns `None` when the instance
    /// is unknown or is not a managed desktop.
    async fn resolve(&self, instance_id: &str) -> Result<Option<InstanceMetadata>, CloudError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_tags_extracts_identity() {
        let tags = HashMap::from([
            (TAG_USERNAME.to_string(), "alice".to_string()),
            (TAG_DESKTOP_ID.to_string(), "d1".to_string()),
            ("ScreenGeometry".to_string(), "1920x1080".to_string()),
        ]);

        let meta = InstanceMetadata::from_tags("i-123", tags).unwrap();
        assert_eq!(meta.username, "alice");
        assert_eq!(meta.desktop_id, "d1");
        assert_eq!(meta.tags.get("ScreenGeometry").unwrap(), "1920x1080");
    }

    #[test]
    fn from_tags_rejects_unmanaged_instances() {
        let tags = HashMap::from([(TAG_USERNAME.to_string(), "alice".to_string())]);
        assert!(InstanceMetadata::from_tags("i-123", tags).is_none());
    }
}
