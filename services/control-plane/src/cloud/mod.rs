//! Cloud collaborator seams.
//!
//! Everything the control plane needs from the surrounding infrastructure
//! (the notification queue/topic pair, instance metadata, the machine
//! catalog, and the provisioning workflow) is reached through the traits
//! in this module. The service itself never talks to a cloud SDK; adapters
//! implement these traits out of tree. [`LocalCloud`] is the in-process
//! implementation used by dev mode and the test suite.

mod catalog;
mod directory;
mod error;
mod local;
mod provisioner;
mod queue;
mod resolver;

pub use catalog::{CatalogStore, EntitlementGrant, MachineDef};
pub use directory::{DesktopInstance, InstanceDirectory};
pub use error::CloudError;
pub use local::LocalCloud;
pub use provisioner::{DesktopProvisioner, LaunchRequest};
pub use queue::{NotificationQueue, QueueMessage};
pub use resolver::{InstanceMetadata, MetadataResolver};
