use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;

use crate::{
    config::{IlluminanceSensing, IlluminationConfig, ValuePair},
    error::{ControlError, ControlResult},
    ports::{ActuatorGateway, RetryTimer, StateReader},
    types::{ActuatorCommand, EntityId, Notification, Now},
};

#[derive(Debug, Clone, Default)]
pub struct FakeStates {
    states: HashMap<EntityId, String>,
    attributes: HashMap<(EntityId, String), Value>,
}

impl FakeStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, entity: &str, value: &str) -> Self {
        self.set_state(entity, value);
        self
    }

    pub fn with_attribute(mut self, entity: &str, name: &str, value: Value) -> Self {
        self.attributes
            .insert((id(entity), name.to_string()), value);
        self
    }

    pub fn set_state(&mut self, entity: &str, value: &str) {
        self.states.insert(id(entity), value.to_string());
    }
}

impl StateReader for FakeStates {
    fn read_state(&self, entity: &EntityId) -> Option<String> {
        self.states.get(entity).cloned()
    }

    fn read_attribute(&self, entity: &EntityId, name: &str) -> Option<Value> {
        self.attributes
            .get(&(entity.clone(), name.to_string()))
            .cloned()
    }
}

#[derive(Debug, Default)]
pub struct RecordingGateway {
    pub commands: Vec<ActuatorCommand>,
    pub notifications: Vec<Notification>,
    pub fail_dispatch: bool,
}

impl ActuatorGateway for RecordingGateway {
    fn dispatch(&mut self, command: &ActuatorCommand) -> ControlResult<()> {
        if self.fail_dispatch {
            return Err(ControlError::CommandDispatch {
                entity: command.target.clone(),
                reason: "broker unreachable".to_string(),
            });
        }
        self.commands.push(command.clone());
        Ok(())
    }

    fn notify(&mut self, notification: &Notification) -> ControlResult<()> {
        self.notifications.push(notification.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ManualTimer {
    pub scheduled: Vec<(u64, u64)>,
    pub cancelled: Vec<u64>,
}

impl RetryTimer for ManualTimer {
    type Handle = u64;

    fn schedule_once(&mut self, delay_ms: u64, generation: u64) -> u64 {
        self.scheduled.push((delay_ms, generation));
        generation
    }

    fn cancel(&mut self, handle: u64) {
        self.cancelled.push(handle);
    }
}

pub fn id(raw: &str) -> EntityId {
    EntityId::parse(raw).unwrap()
}

pub fn now(ms: u64) -> Now {
    at(ms, 12, 0)
}

pub fn at(ms: u64, hour: u32, minute: u32) -> Now {
    Now {
        ms,
        local: local(hour, minute),
    }
}

pub fn local(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 1, 5)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

pub fn light_config() -> IlluminationConfig {
    IlluminationConfig {
        name: "hall".to_string(),
        occupancy: id("binary_sensor.hall_occupancy"),
        illuminance: Some(IlluminanceSensing {
            entity: id("sensor.hall_illuminance"),
            threshold: 10.0,
        }),
        light: id("light.hall"),
        night_mode: Some(id("input_boolean.night_mode")),
        chill_mode: Some(id("input_boolean.chill_mode")),
        disabled: Some(id("input_boolean.hall_disabled")),
        brightness: Some(ValuePair {
            primary: 255,
            alternate: 40,
        }),
        color_temp: Some(ValuePair {
            primary: 250,
            alternate: 454,
        }),
        debounce_ms: 180_000,
    }
}
