//! Request-scoped context extracted from HTTP requests.
//!
//! The control plane runs behind an authenticating reverse proxy which
//! strips client-supplied identity headers and injects the verified
//! username and directory groups of the caller. Requests arriving without
//! those headers did not come through the proxy and are rejected.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use uuid::Uuid;

use crate::api::error::ApiError;

pub const REMOTE_USER_HEADER: &str = "x-remote-user";
pub const REMOTE_GROUPS_HEADER: &str = "x-remote-user-groups";

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,

    /// Verified username of the caller.
    pub username: String,

    /// Directory groups, space-separated in the header.
    pub groups: Vec<String>,
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = header_string(&parts.headers, "x-request-id")
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let Some(username) = header_string(&parts.headers, REMOTE_USER_HEADER) else {
            return Err(ApiError::bad_request(
                "missing_remote_user",
                "X-Remote-User header is missing",
            )
            .with_request_id(request_id));
        };

        let Some(groups) = header_string(&parts.headers, REMOTE_GROUPS_HEADER) else {
            return Err(ApiError::bad_request(
                "missing_remote_user_groups",
                "X-Remote-User-Groups header is missing",
            )
            .with_request_id(request_id));
        };

        let groups = groups.split_whitespace().map(str::to_string).collect();

        Ok(Self {
            request_id,
            username,
            groups,
        })
    }
}
