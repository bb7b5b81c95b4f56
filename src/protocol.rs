//! Wire format for the `/subscribe` socket.
//!
//! Inbound frames are JSON objects mapping entity ids to the entity's new,
//! complete data. The server echoes frames verbatim, so there is no
//! outbound message type.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::types::{Entity, EntityId};

/// A decoded inbound frame: every named entity is to be replaced wholesale,
/// in the order the frame lists them
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct WorldUpdate {
    entities: Vec<(EntityId, Entity)>,
}

impl WorldUpdate {
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl TryFrom<Map<String, Value>> for WorldUpdate {
    type Error = String;

    fn try_from(frame: Map<String, Value>) -> Result<Self, Self::Error> {
        let entities = frame
            .into_iter()
            .map(|(entity_id, data)| match data {
                Value::Object(data) => Ok((entity_id, data)),
                _ => Err(format!("entity {entity_id:?} is not a JSON object")),
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { entities })
    }
}

impl IntoIterator for WorldUpdate {
    type Item = (EntityId, Entity);
    type IntoIter = std::vec::IntoIter<(EntityId, Entity)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entities.into_iter()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Not JSON, or not an object of objects
    #[error("invalid update frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary frames are not supported ({0} bytes)")]
    Binary(usize),
}

/// Decode an inbound text frame
pub fn decode_frame(text: &str) -> Result<WorldUpdate, FrameError> {
    Ok(serde_json::from_str(text)?)
}
