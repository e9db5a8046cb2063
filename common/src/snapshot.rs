use chrono::NaiveTime;
use serde_json::Value;

use crate::{
    config::IlluminationConfig,
    error::{ControlError, ControlResult},
    ports::StateReader,
    types::{EntityId, Power},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorState {
    pub on: bool,
    pub brightness: Option<u8>,
    pub color_temp: Option<u16>,
}

impl ActuatorState {
    /// Fills in the configured dimension attributes. Only read when the light
    /// is on and is meant to stay on, so switching off never depends on them.
    pub fn with_dimensions(
        mut self,
        reader: &dyn StateReader,
        config: &IlluminationConfig,
    ) -> ControlResult<Self> {
        if config.brightness.is_some() {
            self.brightness = read_numeric_attribute(reader, &config.light, "brightness")?
                .map(|value| value.round().clamp(0.0, 255.0) as u8);
        }
        if config.color_temp.is_some() {
            self.color_temp = read_numeric_attribute(reader, &config.light, "color_temp")?
                .map(|value| value.round().clamp(0.0, f64::from(u16::MAX)) as u16);
        }
        Ok(self)
    }
}

/// Values read once at the start of an illumination pass. Dimension
/// attributes are left out; see [`ActuatorState::with_dimensions`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSnapshot {
    pub occupied: bool,
    pub illuminance: Option<f64>,
    pub night_mode: bool,
    pub chill_mode: bool,
    pub disabled: bool,
    pub actuator: ActuatorState,
}

impl SensorSnapshot {
    pub fn capture(reader: &dyn StateReader, config: &IlluminationConfig) -> ControlResult<Self> {
        let disabled = match &config.disabled {
            Some(entity) => read_switch(reader, entity)?,
            None => false,
        };
        let occupied = read_switch(reader, &config.occupancy)?;
        let illuminance = match &config.illuminance {
            Some(sensing) => Some(read_number(reader, &sensing.entity)?),
            None => None,
        };
        let night_mode = read_optional_switch(reader, config.night_mode.as_ref())?;
        let chill_mode = read_optional_switch(reader, config.chill_mode.as_ref())?;

        let actuator = ActuatorState {
            on: read_switch(reader, &config.light)?,
            brightness: None,
            color_temp: None,
        };

        Ok(Self {
            occupied,
            illuminance,
            night_mode,
            chill_mode,
            disabled,
            actuator,
        })
    }
}

pub fn read_switch(reader: &dyn StateReader, entity: &EntityId) -> ControlResult<bool> {
    let raw = reader.read_state(entity);
    match raw.as_deref().and_then(Power::parse) {
        Some(power) => Ok(power == Power::On),
        None => Err(ControlError::unreadable(entity, raw)),
    }
}

pub fn read_optional_switch(
    reader: &dyn StateReader,
    entity: Option<&EntityId>,
) -> ControlResult<bool> {
    match entity {
        Some(entity) => read_switch(reader, entity),
        None => Ok(false),
    }
}

pub fn read_number(reader: &dyn StateReader, entity: &EntityId) -> ControlResult<f64> {
    let raw = reader.read_state(entity);
    raw.as_deref()
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .ok_or_else(|| ControlError::unreadable(entity, raw))
}

pub fn read_time(reader: &dyn StateReader, entity: &EntityId) -> ControlResult<NaiveTime> {
    let raw = reader.read_state(entity);
    raw.as_deref()
        .and_then(|value| {
            let value = value.trim();
            NaiveTime::parse_from_str(value, "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
                .ok()
        })
        .ok_or_else(|| ControlError::unreadable(entity, raw))
}

/// Missing attribute is an error, an explicit `null` reads as `None`.
pub fn read_numeric_attribute(
    reader: &dyn StateReader,
    entity: &EntityId,
    name: &str,
) -> ControlResult<Option<f64>> {
    match reader.read_attribute(entity, name) {
        None => Err(ControlError::unreadable(entity, None)),
        Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number
            .as_f64()
            .map(Some)
            .ok_or_else(|| ControlError::unreadable(entity, Some(number.to_string()))),
        Some(Value::String(text)) => match text.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(Some(value)),
            _ => Err(ControlError::unreadable(entity, Some(text))),
        },
        Some(other) => Err(ControlError::unreadable(entity, Some(other.to_string()))),
    }
}
