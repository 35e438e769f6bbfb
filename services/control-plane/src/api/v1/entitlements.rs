//! Entitlement API endpoints.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::state::AppState;

/// Create entitlement routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/", get(list_entitlements))
}

/// One role grant, flattened with the caller's current usage.
#[derive(Debug, Serialize)]
pub struct EntitlementResponse {
    pub machine_def_id: String,
    pub total_allowed_instances: u32,
    pub current_instances: usize,
}

/// Response for listing entitlements.
#[derive(Debug, Serialize)]
pub struct EntitlementsResponse {
    pub items: Vec<EntitlementResponse>,
}

/// List the caller's entitlements with remaining capacity.
///
/// GET /v1/entitlements
async fn list_entitlements(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<EntitlementsResponse>, ApiError> {
    let request_id = ctx.request_id.clone();
    let roles = state.roles_for_groups(&ctx.groups);

    let instances = state
        .directory()
        .instances_for_user(&ctx.username)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;

    let mut items = Vec::new();
    for role in &roles {
        let grants = state
            .catalog()
            .entitlements_for_role(role)
            .await
            .map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;
        for grant in grants {
            let current_instances = instances
                .iter()
                .filter(|i| i.machine_def_id == grant.machine_def_id)
                .count();
            items.push(EntitlementResponse {
                machine_def_id: grant.machine_def_id,
                total_allowed_instances: grant.machine_count,
                current_instances,
            });
        }
    }

    Ok(Json(EntitlementsResponse { items }))
}
