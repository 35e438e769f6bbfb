//! Instance directory seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::CloudError;

/// A desktop instance as reported by the cloud inventory.
#[derive(Debug, Clone)]
pub struct DesktopInstance {
    /// Platform-assigned desktop identifier.
    pub desktop_id: String,

    /// Cloud instance identifier.
    pub instance_id: String,

    /// Private DNS name clients connect to.
    pub dns: String,

    /// When the instance was launched.
    pub launch_time: DateTime<Utc>,

    /// Current instance state.
    pub state: String,

    /// Configured screen geometry.
    pub screen_geometry: String,

    /// Machine definition the instance was launched from.
    pub machine_def_id: String,
}

/// Lists the desktop instances belonging to a user.
#[async_trait]
pub trait InstanceDirectory: Send + Sync {
    async fn instances_for_user(
        &self,
        username: &str,
    ) -> Result<Vec<DesktopInstance>, CloudError>;
}
