//! API v1 routes.

mod entitlements;
mod events;
mod instances;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::api::request_context::RequestContext;
use crate::state::AppState;

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/session", get(session))
        .nest("/entitlements", entitlements::routes())
        .nest("/instances", instances::routes())
        .nest("/events", events::routes())
}

/// Response describing the calling identity.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub status: String,
    pub username: String,
    pub roles: Vec<String>,
}

/// Who am I, and which roles did my groups map to?
///
/// GET /v1/session
async fn session(State(state): State<AppState>, ctx: RequestContext) -> Json<SessionResponse> {
    Json(SessionResponse {
        status: "okay".to_string(),
        roles: state.roles_for_groups(&ctx.groups),
        username: ctx.username,
    })
}
