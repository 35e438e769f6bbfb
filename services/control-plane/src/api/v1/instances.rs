//! Instance API endpoints.
//!
//! Request/response glue over the instance directory and the provisioning
//! workflow. Provisioning is asynchronous: a successful POST/DELETE means
//! a job was submitted, not that the instance exists or is gone.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::cloud::{DesktopInstance, EntitlementGrant, LaunchRequest};
use crate::state::AppState;

const VALID_GEOMETRIES: &[&str] = &["1920x1080", "1280x720"];
const DESKTOP_ID_LEN: usize = 8;

/// Create instance routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_instances).post(create_instance))
        .route("/{desktop_id}", get(get_instance).delete(delete_instance))
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Request to provision a new desktop instance.
#[derive(Debug, Deserialize)]
pub struct CreateInstanceRequest {
    /// Must be `create`.
    pub action: String,

    /// Machine definition to launch from.
    pub machine_def_id: String,

    /// Requested screen geometry.
    pub screen_geometry: String,

    /// Optional caller-chosen desktop id; generated when absent.
    #[serde(default)]
    pub desktop_id: Option<String>,
}

/// Response for a single instance.
#[derive(Debug, Serialize)]
pub struct InstanceResponse {
    pub desktop_id: String,
    pub instance_id: String,
    pub dns: String,
    pub launch_time: DateTime<Utc>,
    pub state: String,
    pub screen_geometry: String,
    pub machine_def_id: String,
}

impl From<DesktopInstance> for InstanceResponse {
    fn from(instance: DesktopInstance) -> Self {
        Self {
            desktop_id: instance.desktop_id,
            instance_id: instance.instance_id,
            dns: instance.dns,
            launch_time: instance.launch_time,
            state: instance.state,
            screen_geometry: instance.screen_geometry,
            machine_def_id: instance.machine_def_id,
        }
    }
}

/// Response for listing instances.
#[derive(Debug, Serialize)]
pub struct ListInstancesResponse {
    pub items: Vec<InstanceResponse>,
}

/// Response for a submitted provision/teardown job.
#[derive(Debug, Serialize)]
pub struct ProvisionResponse {
    pub desktop_id: String,
    pub message: String,
}

// =============================================================================
// Handlers
// =============================================================================

/// List the caller's desktop instances.
///
/// GET /v1/instances
async fn list_instances(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<ListInstancesResponse>, ApiError> {
    let instances = state
        .directory()
        .instances_for_user(&ctx.username)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;

    Ok(Json(ListInstancesResponse {
        items: instances.into_iter().map(Into::into).collect(),
    }))
}

/// Fetch one of the caller's desktop instances.
///
/// GET /v1/instances/{desktop_id}
async fn get_instance(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(desktop_id): Path<String>,
) -> Result<Json<InstanceResponse>, ApiError> {
    let instance = find_instance(&state, &ctx, &desktop_id).await?;
    Ok(Json(instance.into()))
}

/// Submit a provisioning job for a new desktop instance.
///
/// POST /v1/instances
async fn create_instance(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(request): Json<CreateInstanceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();

    if request.action != "create" {
        return Err(
            ApiError::bad_request("invalid_action", "Invalid action").with_request_id(request_id)
        );
    }
    if !VALID_GEOMETRIES.contains(&request.screen_geometry.as_str()) {
        return Err(ApiError::bad_request(
            "invalid_screen_geometry",
            "Invalid screen geometry",
        )
        .with_request_id(request_id));
    }

    let grant = find_grant(&state, &ctx, &request.machine_def_id)
        .await?
        .ok_or_else(|| {
            ApiError::not_found("unknown_machine_def", "No matching machine_def found")
                .with_request_id(request_id.clone())
        })?;

    let instances = state
        .directory()
        .instances_for_user(&ctx.username)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;
    let current = instances
        .iter()
        .filter(|i| i.machine_def_id == grant.machine_def_id)
        .count();
    if current as u32 >= grant.machine_count {
        return Err(ApiError::conflict(
            "no_capacity",
            "No available capacity to start this instance",
        )
        .with_request_id(request_id));
    }

    let machine_def = state
        .catalog()
        .machine_def(&request.machine_def_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?
        .ok_or_else(|| {
            ApiError::not_found("unknown_machine_def", "No matching machine_def found")
                .with_request_id(request_id.clone())
        })?;

    let desktop_id = request
        .desktop_id
        .unwrap_or_else(|| random_desktop_id(DESKTOP_ID_LEN));
    let launch = LaunchRequest {
        desktop_id: desktop_id.clone(),
        machine_username: ctx.username.clone(),
        screen_geometry: request.screen_geometry.clone(),
        machine_def,
    };
    state
        .provisioner()
        .create_desktop(&launch)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id))?;

    info!(username = %ctx.username, desktop_id = %desktop_id, machine_def_id = %request.machine_def_id, "Submitted desktop launch");
    Ok((
        StatusCode::ACCEPTED,
        Json(ProvisionResponse {
            desktop_id,
            message: "created task to create instance".to_string(),
        }),
    ))
}

/// Submit a teardown job for one of the caller's desktop instances.
///
/// DELETE /v1/instances/{desktop_id}
async fn delete_instance(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(desktop_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();
    let instance = find_instance(&state, &ctx, &desktop_id).await?;

    let machine_def = state
        .catalog()
        .machine_def(&instance.machine_def_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?
        .ok_or_else(|| {
            ApiError::not_found("unknown_machine_def", "No matching machine_def found")
                .with_request_id(request_id.clone())
        })?;

    let launch = LaunchRequest {
        desktop_id: desktop_id.clone(),
        machine_username: ctx.username.clone(),
        screen_geometry: instance.screen_geometry.clone(),
        machine_def,
    };
    state
        .provisioner()
        .destroy_desktop(&launch)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id))?;

    info!(username = %ctx.username, desktop_id = %desktop_id, "Submitted desktop teardown");
    Ok((
        StatusCode::ACCEPTED,
        Json(ProvisionResponse {
            desktop_id,
            message: "created task to remove instance".to_string(),
        }),
    ))
}

// =============================================================================
// Helpers
// =============================================================================

async fn find_instance(
    state: &AppState,
    ctx: &RequestContext,
    desktop_id: &str,
) -> Result<DesktopInstance, ApiError> {
    let instances = state
        .directory()
        .instances_for_user(&ctx.username)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;
    instances
        .into_iter()
        .find(|i| i.desktop_id == desktop_id)
        .ok_or_else(|| {
            ApiError::not_found(
                "unknown_instance",
                format!("An instance with id '{desktop_id}' was not found"),
            )
            .with_request_id(ctx.request_id.clone())
        })
}

/// Find the caller's entitlement grant for a machine definition, across
/// all of their roles.
async fn find_grant(
    state: &AppState,
    ctx: &RequestContext,
    machine_def_id: &str,
) -> Result<Option<EntitlementGrant>, ApiError> {
    let mut selected = None;
    for role in state.roles_for_groups(&ctx.groups) {
        let grants = state
            .catalog()
            .entitlements_for_role(&role)
            .await
            .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;
        if let Some(grant) = grants.into_iter().find(|g| g.machine_def_id == machine_def_id) {
            selected = Some(grant);
        }
    }
    Ok(selected)
}

fn random_desktop_id(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| {
            let chars = b"abcdefghijklmnopqrstuvwxyz0123456789";
            chars[rng.random_range(0..chars.len())] as char
        })
        .collect()
}
