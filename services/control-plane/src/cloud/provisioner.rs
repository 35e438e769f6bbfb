//! Desktop provisioning seam.
//!
//! Provisioning and termination run as asynchronous jobs in the
//! surrounding infrastructure; the control plane only submits them. The
//! resulting instance appears in the directory (and starts emitting
//! state-change notifications) once the job has done its work.

use async_trait::async_trait;

use super::catalog::MachineDef;
use super::error::CloudError;

/// Everything a provisioning job needs to launch or tear down one desktop.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub desktop_id: String,
    pub machine_username: String,
    pub screen_geometry: String,
    pub machine_def: MachineDef,
}

/// Submits desktop launch and teardown jobs.
#[async_trait]
pub trait DesktopProvisioner: Send + Sync {
    async fn create_desktop(&self, request: &LaunchRequest) -> Result<(), CloudError>;

    async fn destroy_desktop(&self, request: &LaunchRequest) -> Result<(), CloudError>;
}
