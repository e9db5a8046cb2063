use thiserror::Error;

use crate::types::EntityId;

pub type ControlResult<T> = Result<T, ControlError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControlError {
    #[error("controller '{controller}' is missing required option '{option}'")]
    MissingRequiredConfig {
        controller: String,
        option: &'static str,
    },

    #[error("controller '{controller}' has invalid option '{option}': {reason}")]
    InvalidConfig {
        controller: String,
        option: &'static str,
        reason: String,
    },

    #[error("invalid entity id '{0}', expected domain.object_id")]
    InvalidEntityId(String),

    #[error("unreadable state for {entity}: {}", .value.as_deref().unwrap_or("<absent>"))]
    UnreadableSensorState {
        entity: EntityId,
        value: Option<String>,
    },

    #[error("failed to dispatch command to {entity}: {reason}")]
    CommandDispatch { entity: EntityId, reason: String },
}

impl ControlError {
    pub fn unreadable(entity: &EntityId, value: Option<String>) -> Self {
        Self::UnreadableSensorState {
            entity: entity.clone(),
            value,
        }
    }
}
