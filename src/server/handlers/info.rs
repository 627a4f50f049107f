use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::server::state::ServerState;

pub(crate) async fn info(State(state): State<ServerState>) -> Response {
  let connections = state.signaling.connections();
  let rooms = state.signaling.rooms();
  match serde_json::to_value(&connections) {
    Ok(connections) => Json(json!({ "connections": connections, "rooms": rooms })).into_response(),
    Err(e) => {
      error!("{e}");
      StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
  }
}
