use crate::types::EntityId;

pub const DEFAULT_STATE_PREFIX: &str = "homeassistant";
pub const DEFAULT_COMMAND_PREFIX: &str = "homectl";

const STATE_LEAF: &str = "state";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTopic {
    State(EntityId),
    Attribute(EntityId, String),
}

/// Maps `<prefix>/<domain>/<object_id>/<leaf>` onto an entity state or
/// attribute. Anything else under the prefix is ignored.
pub fn parse_stream_topic(state_prefix: &str, topic: &str) -> Option<StreamTopic> {
    let rest = topic.strip_prefix(state_prefix)?.strip_prefix('/')?;
    let mut parts = rest.split('/');
    let domain = parts.next()?;
    let object_id = parts.next()?;
    let leaf = parts.next()?;
    if parts.next().is_some() || domain.is_empty() || object_id.is_empty() || leaf.is_empty() {
        return None;
    }

    let entity = EntityId::parse(&format!("{domain}.{object_id}")).ok()?;
    if leaf == STATE_LEAF {
        Some(StreamTopic::State(entity))
    } else {
        Some(StreamTopic::Attribute(entity, leaf.to_string()))
    }
}

pub fn state_subscription(state_prefix: &str) -> String {
    format!("{state_prefix}/#")
}

pub fn command_topic(command_prefix: &str, entity: &EntityId) -> String {
    format!(
        "{command_prefix}/command/{}/{}",
        entity.domain(),
        entity.object_id()
    )
}

pub fn controller_state_topic(command_prefix: &str, controller: &str) -> String {
    format!("{command_prefix}/controller/{controller}/state")
}

pub fn notify_topic(command_prefix: &str) -> String {
    format!("{command_prefix}/notify")
}
