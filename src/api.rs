//! HTTP API endpoints over the shared world.
//!
//! Updates made here merge fields into entities; they are not broadcast to
//! socket clients.

use axum::{
    body::Bytes,
    extract::{Path, State},
    response::Redirect,
    Json,
};
use serde_json::Value;
use std::sync::Arc;

use crate::error::ApiError;
use crate::state::AppState;
use crate::types::{Entity, World};

/// GET /
pub async fn index() -> Redirect {
    Redirect::temporary("/static/index.html")
}

/// Return one entity.
///
/// GET /entity/{id}
///
/// Unknown entities come back as `{}` with 200; the store does not track
/// absence separately from emptiness.
pub async fn get_entity(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Json<Entity> {
    Json(state.world.get(&entity_id).await)
}

/// Merge the body's fields into an entity.
///
/// POST|PUT /entity/{id}
///
/// The body is read as JSON whatever its `Content-Type`, so plain
/// `fetch` calls without headers work too.
pub async fn update_entity(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
    body: Bytes,
) -> Result<Json<Entity>, ApiError> {
    let fields = parse_fields(&body)?;

    let mut entity = state.world.get(&entity_id).await;
    for (key, value) in fields {
        entity = state.world.update_field(&entity_id, key, value).await;
    }

    tracing::debug!(entity_id = %entity_id, fields = entity.len(), "Entity updated over HTTP");
    Ok(Json(entity))
}

/// GET|POST /world
pub async fn world(State(state): State<Arc<AppState>>) -> Json<World> {
    Json(state.world.snapshot().await)
}

/// Empty the world and return it.
///
/// GET|POST /clear
pub async fn clear(State(state): State<Arc<AppState>>) -> Json<World> {
    state.world.clear().await;
    Json(state.world.snapshot().await)
}

fn parse_fields(body: &[u8]) -> Result<Entity, ApiError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(other) => Err(ApiError::InvalidBody(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(ApiError::InvalidBody(e.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
