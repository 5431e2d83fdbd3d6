use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::AppState;

pub(crate) async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sessions": state.sessions.session_count(),
        "stream_connections": state.mux.connection_count(),
        "instances": state.sessions.instances().len(),
    }))
}
