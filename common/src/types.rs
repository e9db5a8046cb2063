use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::ControlError;

/// Platform entity reference in `domain.object_id` form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    pub fn new(domain: &str, object_id: &str) -> Self {
        Self(format!("{domain}.{object_id}"))
    }

    pub fn parse(raw: &str) -> Result<Self, ControlError> {
        let raw = raw.trim();
        match raw.split_once('.') {
            Some((domain, object_id))
                if !domain.is_empty() && !object_id.is_empty() && !object_id.contains('.') =>
            {
                Ok(Self(raw.to_string()))
            }
            _ => Err(ControlError::InvalidEntityId(raw.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn domain(&self) -> &str {
        self.0.split_once('.').map(|(domain, _)| domain).unwrap_or("")
    }

    pub fn object_id(&self) -> &str {
        self.0
            .split_once('.')
            .map(|(_, object_id)| object_id)
            .unwrap_or("")
    }
}

impl TryFrom<String> for EntityId {
    type Error = ControlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EntityId> for String {
    fn from(value: EntityId) -> Self {
        value.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Power {
    On,
    Off,
}

impl Power {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "on" => Some(Self::On),
            "off" => Some(Self::Off),
            _ => None,
        }
    }

    pub fn from_on(on: bool) -> Self {
        if on {
            Self::On
        } else {
            Self::Off
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DesiredState {
    pub on: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
    #[serde(rename = "colorTemp", skip_serializing_if = "Option::is_none")]
    pub color_temp: Option<u16>,
}

impl DesiredState {
    pub fn off() -> Self {
        Self {
            on: false,
            brightness: None,
            color_temp: None,
        }
    }

    pub fn power(&self) -> Power {
        Power::from_on(self.on)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideSignal {
    SelfIssued,
    OverrideDetected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMode {
    Automatic,
    ManualOverride,
}

impl ControlMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Automatic => "AUTOMATIC",
            Self::ManualOverride => "MANUAL_OVERRIDE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerKind {
    Illumination,
    Climate,
    Charger,
}

impl ControllerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ControllerKind::Illumination => "illumination",
            ControllerKind::Climate => "climate",
            ControllerKind::Charger => "charger",
        }
    }
}

/// A state-change notification for one entity as delivered by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub entity: EntityId,
    pub old: Option<String>,
    pub new: String,
    pub at_ms: u64,
}

/// Point in time handed to controllers: monotonic milliseconds for debounce
/// arithmetic plus local wall-clock time for time-of-day lookups.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Now {
    pub ms: u64,
    pub local: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "service", rename_all = "snake_case")]
pub enum CommandKind {
    TurnOn {
        #[serde(skip_serializing_if = "Option::is_none")]
        brightness: Option<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        color_temp: Option<u16>,
    },
    TurnOff,
    SetTemperature {
        temperature: f32,
    },
    SetValue {
        value: String,
    },
    Notify {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tag: Option<String>,
    },
    Say {
        message: String,
        language: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActuatorCommand {
    pub target: EntityId,
    #[serde(flatten)]
    pub kind: CommandKind,
}

impl ActuatorCommand {
    pub fn new(target: EntityId, kind: CommandKind) -> Self {
        Self { target, kind }
    }

    pub fn for_desired(target: EntityId, desired: &DesiredState) -> Self {
        let kind = if desired.on {
            CommandKind::TurnOn {
                brightness: desired.brightness,
                color_temp: desired.color_temp,
            }
        } else {
            CommandKind::TurnOff
        };
        Self { target, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub message: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub only_push: bool,
    #[serde(default)]
    pub only_say: bool,
}

impl Notification {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            title: None,
            tag: None,
            only_push: false,
            only_say: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub name: String,
    pub kind: ControllerKind,
    pub mode: ControlMode,
    #[serde(rename = "overrideRemainingMs")]
    pub override_remaining_ms: u64,
    #[serde(rename = "overrideRemainingMin")]
    pub override_remaining_min: u64,
    #[serde(rename = "pendingCommands")]
    pub pending_commands: usize,
    #[serde(rename = "lastCommand")]
    pub last_command: Option<ActuatorCommand>,
    #[serde(rename = "lastError")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn entity_id_requires_domain_and_object() {
        assert!(EntityId::parse("light.kitchen").is_ok());
        assert!(EntityId::parse("kitchen").is_err());
        assert!(EntityId::parse(".kitchen").is_err());
        assert!(EntityId::parse("light.").is_err());

        let id = EntityId::parse(" light.kitchen ").unwrap();
        assert_eq!(id.domain(), "light");
        assert_eq!(id.object_id(), "kitchen");
    }

    #[test]
    fn turn_on_payload_omits_unconfigured_dimensions() {
        let command = ActuatorCommand::for_desired(
            EntityId::new("light", "hall"),
            &DesiredState {
                on: true,
                brightness: Some(120),
                color_temp: None,
            },
        );

        let payload = serde_json::to_value(&command.kind).unwrap();
        assert_eq!(
            payload,
            serde_json::json!({ "service": "turn_on", "brightness": 120 })
        );
    }

    #[test]
    fn notification_requires_message() {
        let parsed = serde_json::from_str::<Notification>(r#"{"title":"x"}"#);
        assert!(parsed.is_err());

        let parsed = serde_json::from_str::<Notification>(r#"{"message":"hi","only_push":true}"#)
            .unwrap();
        assert!(parsed.only_push);
        assert!(!parsed.only_say);
    }
}
