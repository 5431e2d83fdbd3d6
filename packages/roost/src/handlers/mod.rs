use axum::Json;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, post};
use axum::Router;
use serde_json::{Value, json};

use crate::AppState;
use crate::authz::Actor;
use crate::error::ControlError;
use panel_client::PanelError;

mod fleet;
mod health;
mod sessions;

pub(crate) use fleet::{admin_servers_handler, list_instances_handler};
pub(crate) use health::health_handler;
pub(crate) use sessions::{
    close_session_handler, dispatch_action_handler, get_session_handler, open_session_handler,
};

pub(crate) fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/instances", get(list_instances_handler))
        .route("/api/admin/servers", get(admin_servers_handler))
        .route("/api/instances/{id}/session", post(open_session_handler))
        .route("/api/instances/{id}/session", get(get_session_handler))
        .route(
            "/api/instances/{id}/session",
            delete(close_session_handler),
        )
        .route("/api/instances/{id}/actions", post(dispatch_action_handler))
}

pub(crate) type ApiError = (StatusCode, Json<Value>);

fn error_body(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

/// The fronting surface asserts who is driving the request; authentication
/// itself happens there, not here.
pub(crate) fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, ApiError> {
    let id = headers
        .get("x-actor-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| error_body(StatusCode::BAD_REQUEST, "missing x-actor-id header"))?;
    let roles = headers
        .get("x-actor-roles")
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    let platform_admin = headers
        .get("x-actor-admin")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);
    Ok(Actor {
        id: id.to_string(),
        roles,
        platform_admin,
    })
}

pub(crate) fn control_error_response(err: ControlError) -> ApiError {
    let status = match &err {
        ControlError::Denied => StatusCode::FORBIDDEN,
        ControlError::UnknownInstance(_) | ControlError::UnknownSession => StatusCode::NOT_FOUND,
        ControlError::InvalidAction(_) => StatusCode::BAD_REQUEST,
        ControlError::Panel(PanelError::MissingApplicationKey) => StatusCode::SERVICE_UNAVAILABLE,
        ControlError::Panel(_) => StatusCode::BAD_GATEWAY,
    };
    error_body(status, err.to_string())
}
