use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use homectl_common::{topics::StreamTopic, EntityId, StateReader};

/// Last known state and attributes of every entity seen on the state stream.
#[derive(Clone, Default)]
pub struct EntityStore {
    states: Arc<DashMap<EntityId, String>>,
    attributes: Arc<DashMap<(EntityId, String), Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    pub entity: EntityId,
    pub old: Option<String>,
    pub new: String,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the payload and returns the transition when an entity state
    /// actually changed. Attribute updates never produce a transition.
    pub fn apply(&self, topic: StreamTopic, payload: &str) -> Option<StateUpdate> {
        match topic {
            StreamTopic::State(entity) => {
                let new = decode_state(payload);
                let old = self.states.insert(entity.clone(), new.clone());
                if old.as_deref() == Some(new.as_str()) {
                    return None;
                }
                Some(StateUpdate { entity, old, new })
            }
            StreamTopic::Attribute(entity, name) => {
                self.attributes
                    .insert((entity, name), decode_attribute(payload));
                None
            }
        }
    }

    pub fn entity_count(&self) -> usize {
        self.states.len()
    }
}

impl StateReader for EntityStore {
    fn read_state(&self, entity: &EntityId) -> Option<String> {
        self.states.get(entity).map(|value| value.clone())
    }

    fn read_attribute(&self, entity: &EntityId, name: &str) -> Option<Value> {
        self.attributes
            .get(&(entity.clone(), name.to_string()))
            .map(|value| value.clone())
    }
}

// Statestream JSON-encodes strings; plain text is accepted as-is.
fn decode_state(payload: &str) -> String {
    let trimmed = payload.trim();
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::String(text)) => text,
        _ => trimmed.to_string(),
    }
}

fn decode_attribute(payload: &str) -> Value {
    serde_json::from_str(payload.trim()).unwrap_or_else(|_| Value::String(payload.to_string()))
}
