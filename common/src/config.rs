use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    error::{ControlError, ControlResult},
    topics::{DEFAULT_COMMAND_PREFIX, DEFAULT_STATE_PREFIX},
    types::EntityId,
};

pub const DEFAULT_MANUAL_MODE_DEBOUNCE_SECS: u64 = 180;
pub const DEFAULT_ILLUMINANCE_THRESHOLD: f64 = 10.0;
pub const DEFAULT_OFF_TEMPERATURE: f32 = 5.0;
pub const DEFAULT_BATTERY_THRESHOLD: f64 = 80.0;
pub const DEFAULT_CHARGING_CONFIRM_SECS: u64 = 15;
pub const DEFAULT_CHARGER_WINDOW_SECS: u64 = 60;

/// A day/night or normal/chill value pair. Only present when both members
/// were configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValuePair<T> {
    pub primary: T,
    pub alternate: T,
}

impl<T: Copy> ValuePair<T> {
    pub fn select(&self, alternate: bool) -> T {
        if alternate {
            self.alternate
        } else {
            self.primary
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IlluminanceSensing {
    pub entity: EntityId,
    pub threshold: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IlluminationOptions {
    pub sensor_occupancy: Option<EntityId>,
    pub sensor_illuminance: Option<EntityId>,
    pub illuminance_threshold: Option<f64>,
    pub light: Option<EntityId>,
    pub night_mode: Option<EntityId>,
    pub chill_mode: Option<EntityId>,
    pub disabled: Option<EntityId>,
    #[serde(alias = "day_illuminance")]
    pub day_brightness: Option<i64>,
    #[serde(alias = "night_illuminance")]
    pub night_brightness: Option<i64>,
    pub normal_temperature: Option<i64>,
    pub chill_temperature: Option<i64>,
    pub manual_mode_debounce: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IlluminationConfig {
    pub name: String,
    pub occupancy: EntityId,
    pub illuminance: Option<IlluminanceSensing>,
    pub light: EntityId,
    pub night_mode: Option<EntityId>,
    pub chill_mode: Option<EntityId>,
    pub disabled: Option<EntityId>,
    pub brightness: Option<ValuePair<u8>>,
    pub color_temp: Option<ValuePair<u16>>,
    pub debounce_ms: u64,
}

impl IlluminationConfig {
    pub fn from_options(name: &str, options: &IlluminationOptions) -> ControlResult<Self> {
        let occupancy = required(name, "sensor_occupancy", &options.sensor_occupancy)?;
        let light = required(name, "light", &options.light)?;

        let threshold = options
            .illuminance_threshold
            .unwrap_or(DEFAULT_ILLUMINANCE_THRESHOLD);
        if !threshold.is_finite() {
            return Err(invalid(name, "illuminance_threshold", "must be a finite number"));
        }
        let illuminance = options
            .sensor_illuminance
            .clone()
            .map(|entity| IlluminanceSensing { entity, threshold });

        let brightness = match (options.day_brightness, options.night_brightness) {
            (Some(day), Some(night)) => Some(ValuePair {
                primary: brightness(name, "day_brightness", day)?,
                alternate: brightness(name, "night_brightness", night)?,
            }),
            _ => None,
        };

        let color_temp = match (options.normal_temperature, options.chill_temperature) {
            (Some(normal), Some(chill)) => Some(ValuePair {
                primary: mireds(name, "normal_temperature", normal)?,
                alternate: mireds(name, "chill_temperature", chill)?,
            }),
            _ => None,
        };

        let debounce_secs = options
            .manual_mode_debounce
            .unwrap_or(DEFAULT_MANUAL_MODE_DEBOUNCE_SECS);

        Ok(Self {
            name: name.to_string(),
            occupancy,
            illuminance,
            light,
            night_mode: options.night_mode.clone(),
            chill_mode: options.chill_mode.clone(),
            disabled: options.disabled.clone(),
            brightness,
            color_temp,
            debounce_ms: debounce_secs.saturating_mul(1_000),
        })
    }

    pub fn watched_entities(&self) -> Vec<EntityId> {
        let mut entities = vec![self.occupancy.clone(), self.light.clone()];
        entities.extend(self.illuminance.iter().map(|sensing| sensing.entity.clone()));
        entities.extend(self.night_mode.iter().cloned());
        entities.extend(self.chill_mode.iter().cloned());
        entities.extend(self.disabled.iter().cloned());
        entities
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClimateOptions {
    pub window_contact: Option<EntityId>,
    pub day_target_temp: Option<EntityId>,
    pub night_target_temp: Option<EntityId>,
    pub day_start_time: Option<EntityId>,
    pub night_start_time: Option<EntityId>,
    pub climate: Option<EntityId>,
    pub away: Option<EntityId>,
    pub off_temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClimateConfig {
    pub name: String,
    pub window_contact: EntityId,
    pub day_target_temp: EntityId,
    pub night_target_temp: EntityId,
    pub day_start_time: EntityId,
    pub night_start_time: EntityId,
    pub climate: EntityId,
    pub away: EntityId,
    pub off_temperature: f32,
}

impl ClimateConfig {
    pub fn from_options(name: &str, options: &ClimateOptions) -> ControlResult<Self> {
        let off_temperature = options.off_temperature.unwrap_or(DEFAULT_OFF_TEMPERATURE);
        if !off_temperature.is_finite() {
            return Err(invalid(name, "off_temperature", "must be a finite number"));
        }

        Ok(Self {
            name: name.to_string(),
            window_contact: required(name, "window_contact", &options.window_contact)?,
            day_target_temp: required(name, "day_target_temp", &options.day_target_temp)?,
            night_target_temp: required(name, "night_target_temp", &options.night_target_temp)?,
            day_start_time: required(name, "day_start_time", &options.day_start_time)?,
            night_start_time: required(name, "night_start_time", &options.night_start_time)?,
            climate: required(name, "climate", &options.climate)?,
            away: required(name, "away", &options.away)?,
            off_temperature,
        })
    }

    pub fn watched_entities(&self) -> Vec<EntityId> {
        vec![
            self.window_contact.clone(),
            self.day_target_temp.clone(),
            self.night_target_temp.clone(),
            self.day_start_time.clone(),
            self.night_start_time.clone(),
            self.away.clone(),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceOptions {
    #[serde(default)]
    pub name: Option<String>,
    pub charging: EntityId,
    pub battery_level: EntityId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChargerOptions {
    pub charger: Option<EntityId>,
    pub detected_device: Option<EntityId>,
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceOptions>,
    pub battery_threshold: Option<f64>,
    pub charging_confirm_secs: Option<u64>,
    pub charger_window_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeableDevice {
    pub name: String,
    pub charging: EntityId,
    pub battery_level: EntityId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargerConfig {
    pub name: String,
    pub charger: EntityId,
    pub detected_device: EntityId,
    pub devices: Vec<ChargeableDevice>,
    pub battery_threshold: f64,
    pub confirm_ms: u64,
    pub window_ms: u64,
}

impl ChargerConfig {
    pub fn from_options(name: &str, options: &ChargerOptions) -> ControlResult<Self> {
        let charger = required(name, "charger", &options.charger)?;
        let detected_device = required(name, "detected_device", &options.detected_device)?;
        if options.devices.is_empty() {
            return Err(ControlError::MissingRequiredConfig {
                controller: name.to_string(),
                option: "devices",
            });
        }

        let battery_threshold = options
            .battery_threshold
            .unwrap_or(DEFAULT_BATTERY_THRESHOLD);
        if !(0.0..=100.0).contains(&battery_threshold) {
            return Err(invalid(name, "battery_threshold", "must be between 0 and 100"));
        }

        let devices = options
            .devices
            .iter()
            .map(|(key, device)| ChargeableDevice {
                name: device.name.clone().unwrap_or_else(|| key.clone()),
                charging: device.charging.clone(),
                battery_level: device.battery_level.clone(),
            })
            .collect();

        Ok(Self {
            name: name.to_string(),
            charger,
            detected_device,
            devices,
            battery_threshold,
            confirm_ms: options
                .charging_confirm_secs
                .unwrap_or(DEFAULT_CHARGING_CONFIRM_SECS)
                .saturating_mul(1_000),
            window_ms: options
                .charger_window_secs
                .unwrap_or(DEFAULT_CHARGER_WINDOW_SECS)
                .saturating_mul(1_000),
        })
    }

    pub fn watched_entities(&self) -> Vec<EntityId> {
        let mut entities = vec![self.charger.clone()];
        for device in &self.devices {
            entities.push(device.charging.clone());
            entities.push(device.battery_level.clone());
        }
        entities
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPlayerOptions {
    pub entity_id: EntityId,
    #[serde(default)]
    pub occupancy_entity_id: Option<EntityId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifierOptions {
    #[serde(default)]
    pub mobile_targets: Vec<String>,
    #[serde(default)]
    pub media_players: BTreeMap<String, MediaPlayerOptions>,
    pub language: Option<String>,
    pub night_mode: Option<EntityId>,
    pub guest_sleeping: Option<EntityId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlayer {
    pub name: String,
    pub entity_id: EntityId,
    pub occupancy_entity_id: Option<EntityId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotifierConfig {
    pub mobile_targets: Vec<EntityId>,
    pub media_players: Vec<MediaPlayer>,
    pub language: String,
    pub night_mode: EntityId,
    pub guest_sleeping: EntityId,
}

impl NotifierConfig {
    pub fn from_options(options: &NotifierOptions) -> ControlResult<Self> {
        const NAME: &str = "notifier";

        let mobile_targets = options
            .mobile_targets
            .iter()
            .map(|target| {
                if target.contains('.') {
                    EntityId::parse(target)
                } else {
                    EntityId::parse(&format!("notify.{target}"))
                }
            })
            .collect::<ControlResult<Vec<_>>>()?;

        let media_players = options
            .media_players
            .iter()
            .map(|(name, player)| MediaPlayer {
                name: name.clone(),
                entity_id: player.entity_id.clone(),
                occupancy_entity_id: player.occupancy_entity_id.clone(),
            })
            .collect();

        Ok(Self {
            mobile_targets,
            media_players,
            language: required(NAME, "language", &options.language)?,
            night_mode: required(NAME, "night_mode", &options.night_mode)?,
            guest_sleeping: required(NAME, "guest_sleeping", &options.guest_sleeping)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub client_id: String,
    pub state_prefix: String,
    pub command_prefix: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            user: String::new(),
            pass: String::new(),
            client_id: "homectl-controller".to_string(),
            state_prefix: DEFAULT_STATE_PREFIX.to_string(),
            command_prefix: DEFAULT_COMMAND_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub mqtt: MqttConfig,
    pub timezone: String,
    pub http_port: u16,
    pub startup_settle_ms: u64,
    pub status_publish_interval_ms: u64,
    pub lights: BTreeMap<String, IlluminationOptions>,
    pub climates: BTreeMap<String, ClimateOptions>,
    pub chargers: BTreeMap<String, ChargerOptions>,
    pub notifier: Option<NotifierOptions>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig::default(),
            timezone: "Europe/Berlin".to_string(),
            http_port: 8080,
            startup_settle_ms: 2_000,
            status_publish_interval_ms: 10_000,
            lights: BTreeMap::new(),
            climates: BTreeMap::new(),
            chargers: BTreeMap::new(),
            notifier: None,
        }
    }
}

fn required<T: Clone>(controller: &str, option: &'static str, value: &Option<T>) -> ControlResult<T> {
    value.clone().ok_or_else(|| ControlError::MissingRequiredConfig {
        controller: controller.to_string(),
        option,
    })
}

fn invalid(controller: &str, option: &'static str, reason: &str) -> ControlError {
    ControlError::InvalidConfig {
        controller: controller.to_string(),
        option,
        reason: reason.to_string(),
    }
}

fn brightness(controller: &str, option: &'static str, value: i64) -> ControlResult<u8> {
    u8::try_from(value).map_err(|_| invalid(controller, option, "brightness must be 0-255"))
}

fn mireds(controller: &str, option: &'static str, value: i64) -> ControlResult<u16> {
    u16::try_from(value)
        .ok()
        .filter(|mireds| *mireds > 0)
        .ok_or_else(|| invalid(controller, option, "color temperature must be 1-65535 mireds"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_options(raw: &str) -> IlluminationOptions {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn missing_light_refuses_to_initialize() {
        let options = parse_options(r#"{ "sensor_occupancy": "binary_sensor.hall" }"#);

        let err = IlluminationConfig::from_options("hall", &options).unwrap_err();

        assert_eq!(
            err,
            ControlError::MissingRequiredConfig {
                controller: "hall".to_string(),
                option: "light",
            }
        );
    }

    #[test]
    fn dimension_requires_both_members_of_pair() {
        let options = parse_options(
            r#"{
                "sensor_occupancy": "binary_sensor.hall",
                "light": "light.hall",
                "day_illuminance": 255,
                "normal_temperature": 250,
                "chill_temperature": 400
            }"#,
        );

        let config = IlluminationConfig::from_options("hall", &options).unwrap();

        assert_eq!(config.brightness, None);
        assert_eq!(
            config.color_temp,
            Some(ValuePair {
                primary: 250,
                alternate: 400,
            })
        );
        assert_eq!(config.debounce_ms, 180_000);
    }

    #[test]
    fn zero_brightness_is_a_configured_value() {
        let options = parse_options(
            r#"{
                "sensor_occupancy": "binary_sensor.hall",
                "light": "light.hall",
                "day_brightness": 0,
                "night_brightness": 255
            }"#,
        );

        let config = IlluminationConfig::from_options("hall", &options).unwrap();

        assert_eq!(
            config.brightness,
            Some(ValuePair {
                primary: 0,
                alternate: 255,
            })
        );
    }

    #[test]
    fn out_of_range_brightness_is_rejected() {
        let options = parse_options(
            r#"{
                "sensor_occupancy": "binary_sensor.hall",
                "light": "light.hall",
                "day_brightness": 255,
                "night_brightness": 300
            }"#,
        );

        let err = IlluminationConfig::from_options("hall", &options).unwrap_err();

        assert_eq!(
            err,
            ControlError::InvalidConfig {
                controller: "hall".to_string(),
                option: "night_brightness",
                reason: "brightness must be 0-255".to_string(),
            }
        );
    }

    #[test]
    fn illuminance_threshold_defaults_when_sensor_present() {
        let options = parse_options(
            r#"{
                "sensor_occupancy": "binary_sensor.hall",
                "sensor_illuminance": "sensor.hall_lux",
                "light": "light.hall",
                "manual_mode_debounce": 30
            }"#,
        );

        let config = IlluminationConfig::from_options("hall", &options).unwrap();

        assert_eq!(
            config.illuminance,
            Some(IlluminanceSensing {
                entity: EntityId::parse("sensor.hall_lux").unwrap(),
                threshold: DEFAULT_ILLUMINANCE_THRESHOLD,
            })
        );
        assert_eq!(config.debounce_ms, 30_000);
    }

    #[test]
    fn malformed_entity_reference_is_rejected_while_parsing() {
        let parsed = serde_json::from_str::<IlluminationOptions>(
            r#"{ "sensor_occupancy": "hall", "light": "light.hall" }"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn charger_requires_devices() {
        let options = ChargerOptions {
            charger: Some(EntityId::parse("switch.charger").unwrap()),
            detected_device: Some(EntityId::parse("input_text.charging_device").unwrap()),
            ..ChargerOptions::default()
        };

        let err = ChargerConfig::from_options("desk", &options).unwrap_err();

        assert_eq!(
            err,
            ControlError::MissingRequiredConfig {
                controller: "desk".to_string(),
                option: "devices",
            }
        );
    }

    #[test]
    fn notifier_targets_default_to_notify_domain() {
        let options: NotifierOptions = serde_json::from_str(
            r#"{
                "mobile_targets": ["mobile_app_phone", "notify.family"],
                "language": "de-DE",
                "night_mode": "input_boolean.night_mode",
                "guest_sleeping": "input_boolean.guest_sleeping"
            }"#,
        )
        .unwrap();

        let config = NotifierConfig::from_options(&options).unwrap();

        assert_eq!(
            config.mobile_targets,
            vec![
                EntityId::parse("notify.mobile_app_phone").unwrap(),
                EntityId::parse("notify.family").unwrap(),
            ]
        );
    }

    #[test]
    fn runtime_config_fills_defaults() {
        let runtime: RuntimeConfig =
            serde_json::from_str(r#"{ "timezone": "UTC", "lights": {} }"#).unwrap();

        assert_eq!(runtime.timezone, "UTC");
        assert_eq!(runtime.mqtt.port, 1883);
        assert_eq!(runtime.http_port, 8080);
        assert!(runtime.notifier.is_none());
    }
}
