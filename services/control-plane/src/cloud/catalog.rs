//! Machine catalog and role mapping seam.
//!
//! The catalog holds the platform's static configuration: which directory
//! groups map to which roles, what each role is entitled to run, and the
//! launch parameters of each machine definition.

use std::collections::HashMap;

use async_trait::async_trait;

use super::error::CloudError;

/// Launch parameters for one machine definition.
#[derive(Debug, Clone)]
pub struct MachineDef {
    pub machine_def_id: String,

    /// Base image the instance boots from.
    pub ami_id: String,

    /// Cloud instance type.
    pub instance_type: String,

    /// Base64-encoded boot script handed to the instance.
    pub user_data: String,
}

/// One role's entitlement to a machine definition.
#[derive(Debug, Clone)]
pub struct EntitlementGrant {
    pub machine_def_id: String,

    /// How many concurrent instances of this definition the role allows.
    pub machine_count: u32,
}

/// Read access to the platform catalog.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// The directory-group to role mapping, fetched once at startup.
    async fn group_role_map(&self) -> Result<HashMap<String, Vec<String>>, CloudError>;

    /// Entitlement grants attached to a role. Unknown roles yield an empty
    /// list.
    async fn entitlements_for_role(
        &self,
        role: &str,
    ) -> Result<Vec<EntitlementGrant>, CloudError>;

    /// Look up a machine definition by id.
    async fn machine_def(&self, machine_def_id: &str)
        -> Result<Option<MachineDef>, CloudError>;
}
