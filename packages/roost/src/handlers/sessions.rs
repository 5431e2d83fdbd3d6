use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ApiError, actor_from_headers, control_error_response};
use crate::AppState;
use crate::error::ControlError;
use crate::render::StatusView;
use crate::session::{ControlAction, SessionKey};

#[derive(Deserialize)]
pub(crate) struct SurfaceBody {
    pub surface: String,
}

#[derive(Deserialize)]
pub(crate) struct SurfaceQuery {
    pub surface: String,
}

#[derive(Deserialize)]
pub(crate) struct ActionBody {
    pub surface: String,
    pub action: String,
    #[serde(default)]
    pub command_text: Option<String>,
}

fn session_key(instance_id: &str, actor_id: &str, surface: &str) -> SessionKey {
    SessionKey {
        instance_id: instance_id.to_string(),
        actor_id: actor_id.to_string(),
        surface_id: surface.to_string(),
    }
}

fn parse_action(body: &ActionBody) -> Result<ControlAction, ControlError> {
    match body.action.as_str() {
        "start" => Ok(ControlAction::Start),
        "stop" => Ok(ControlAction::Stop),
        "restart" => Ok(ControlAction::Restart),
        "refresh" => Ok(ControlAction::Refresh),
        "command" => match body.command_text.as_deref() {
            Some(text) if !text.trim().is_empty() => {
                Ok(ControlAction::SendCommand(text.to_string()))
            }
            _ => Err(ControlError::InvalidAction(
                "command requires command_text".to_string(),
            )),
        },
        other => Err(ControlError::InvalidAction(other.to_string())),
    }
}

pub(crate) async fn open_session_handler(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SurfaceBody>,
) -> Result<Json<StatusView>, ApiError> {
    let actor = actor_from_headers(&headers)?;
    state
        .sessions
        .open(&instance_id, &actor, &body.surface)
        .await
        .map(Json)
        .map_err(control_error_response)
}

pub(crate) async fn get_session_handler(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    Query(query): Query<SurfaceQuery>,
    headers: HeaderMap,
) -> Result<Json<StatusView>, ApiError> {
    let actor = actor_from_headers(&headers)?;
    state
        .sessions
        .render(&session_key(&instance_id, &actor.id, &query.surface))
        .map(Json)
        .map_err(control_error_response)
}

pub(crate) async fn dispatch_action_handler(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ActionBody>,
) -> Result<Json<StatusView>, ApiError> {
    let actor = actor_from_headers(&headers)?;
    let action = parse_action(&body).map_err(control_error_response)?;
    state
        .sessions
        .dispatch(&session_key(&instance_id, &actor.id, &body.surface), &actor, action)
        .await
        .map(Json)
        .map_err(control_error_response)
}

pub(crate) async fn close_session_handler(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    Query(query): Query<SurfaceQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let actor = actor_from_headers(&headers)?;
    let closed = state
        .sessions
        .close(&session_key(&instance_id, &actor.id, &query.surface));
    Ok(Json(json!({ "closed": closed })))
}
