use serde_json::{Map, Value};
use std::collections::HashMap;

/// Opaque ID types
pub type EntityId = String;
pub type ClientId = String;

/// A named bag of JSON fields. No implicit fields, no versioning.
pub type Entity = Map<String, Value>;

/// Every entity currently tracked, keyed by id
pub type World = HashMap<EntityId, Entity>;

pub fn new_client_id() -> ClientId {
    ulid::Ulid::new().to_string()
}
