use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use serde_json::{Value, json};
use tracing::warn;

use super::{ApiError, actor_from_headers, error_body};
use crate::AppState;
use crate::authz;
use crate::render;

/// The configured fleet with a live snapshot per instance. Fetch failures
/// degrade that row to `unknown` rather than failing the listing.
pub(crate) async fn list_instances_handler(
    State(state): State<AppState>,
) -> Json<Vec<Value>> {
    let mut rows = Vec::new();
    for instance in state.sessions.instances() {
        let row = match state.panel.resources(&instance.id).await {
            Ok(snapshot) => json!({
                "id": instance.id,
                "name": instance.name,
                "address": instance.display_host,
                "state": snapshot.state.to_string(),
                "cpu": render::format_percent(snapshot.cpu_percent),
                "memory": render::format_bytes(snapshot.memory_bytes),
                "disk": render::format_bytes(snapshot.disk_bytes),
                "players": snapshot.connection_count,
            }),
            Err(e) => {
                warn!(instance = %instance.id, "fleet snapshot failed: {e}");
                json!({
                    "id": instance.id,
                    "name": instance.name,
                    "address": instance.display_host,
                    "state": "unknown",
                })
            }
        };
        rows.push(row);
    }
    Json(rows)
}

/// Panel-wide inventory, admin-gated and only available when the
/// application key is configured.
pub(crate) async fn admin_servers_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let actor = actor_from_headers(&headers)?;
    if !authz::is_admin(&actor, &state.admin) {
        return Err(error_body(StatusCode::FORBIDDEN, "admin access required"));
    }
    if !state.panel.has_application_key() {
        return Err(error_body(
            StatusCode::SERVICE_UNAVAILABLE,
            "application API key is not configured",
        ));
    }
    let servers = state
        .panel
        .list_servers()
        .await
        .map_err(|e| error_body(StatusCode::BAD_GATEWAY, e.to_string()))?;
    Ok(Json(json!({ "servers": servers })))
}
