use chrono::NaiveTime;
use tracing::{debug, info, warn};

use crate::{
    automation::{Automation, EngineAction},
    config::ClimateConfig,
    error::ControlResult,
    ports::StateReader,
    snapshot::{read_number, read_numeric_attribute, read_switch, read_time},
    types::{
        ActuatorCommand, CommandKind, ControlMode, ControllerKind, ControllerStatus, EntityId,
        Now, StateChange,
    },
};

const TEMPERATURE_TOLERANCE: f32 = 0.05;
const CONFIRM_WINDOW_MS: u64 = 60_000;
const DAY_MS: i64 = 86_400_000;
// Wake just after a boundary so the strict night comparison has flipped.
const BOUNDARY_SLACK_MS: u64 = 1_000;
// Re-check interval while inputs are unreadable; keeps a wake-up armed.
const UNREADABLE_RETRY_MS: u64 = 5 * 60_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateSnapshot {
    pub window_open: bool,
    pub away: bool,
    pub day_target: f32,
    pub night_target: f32,
    pub day_start: NaiveTime,
    pub night_start: NaiveTime,
    pub current_target: Option<f32>,
}

impl ClimateSnapshot {
    pub fn capture(reader: &dyn StateReader, config: &ClimateConfig) -> ControlResult<Self> {
        Ok(Self {
            window_open: read_switch(reader, &config.window_contact)?,
            away: read_switch(reader, &config.away)?,
            day_target: read_number(reader, &config.day_target_temp)? as f32,
            night_target: read_number(reader, &config.night_target_temp)? as f32,
            day_start: read_time(reader, &config.day_start_time)?,
            night_start: read_time(reader, &config.night_start_time)?,
            current_target: read_numeric_attribute(reader, &config.climate, "temperature")?
                .map(|value| value as f32),
        })
    }
}

pub fn is_night(local: NaiveTime, day_start: NaiveTime, night_start: NaiveTime) -> bool {
    local < day_start || local > night_start
}

pub fn compute_target_temperature(
    snapshot: &ClimateSnapshot,
    local: NaiveTime,
    off_temperature: f32,
) -> f32 {
    if snapshot.window_open {
        return off_temperature;
    }
    if snapshot.away || is_night(local, snapshot.day_start, snapshot.night_start) {
        return snapshot.night_target;
    }
    snapshot.day_target
}

/// Milliseconds until just past the next day or night start, wrapping past
/// midnight.
pub fn next_boundary_delay_ms(local: NaiveTime, day_start: NaiveTime, night_start: NaiveTime) -> u64 {
    [day_start, night_start]
        .into_iter()
        .map(|boundary| {
            let diff = boundary.signed_duration_since(local).num_milliseconds();
            let until = if diff <= 0 { diff + DAY_MS } else { diff };
            until as u64 + BOUNDARY_SLACK_MS
        })
        .min()
        .unwrap_or(DAY_MS as u64)
}

#[derive(Debug, Clone)]
pub struct ClimateController {
    config: ClimateConfig,
    in_flight: Option<(f32, u64)>,
    last_target: Option<f32>,
    last_command: Option<ActuatorCommand>,
    last_error: Option<String>,
}

impl ClimateController {
    pub fn new(config: ClimateConfig) -> Self {
        Self {
            config,
            in_flight: None,
            last_target: None,
            last_command: None,
            last_error: None,
        }
    }

    pub fn config(&self) -> &ClimateConfig {
        &self.config
    }

    fn command_in_flight(&self, target: f32, now_ms: u64) -> bool {
        self.in_flight.is_some_and(|(temperature, issued_at_ms)| {
            (temperature - target).abs() <= TEMPERATURE_TOLERANCE
                && now_ms.saturating_sub(issued_at_ms) < CONFIRM_WINDOW_MS
        })
    }
}

impl Automation for ClimateController {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> ControllerKind {
        ControllerKind::Climate
    }

    fn watched_entities(&self) -> Vec<EntityId> {
        self.config.watched_entities()
    }

    fn reconcile(&mut self, reader: &dyn StateReader, now: &Now) -> Vec<EngineAction> {
        let snapshot = match ClimateSnapshot::capture(reader, &self.config) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!("{}: reconciliation skipped: {err}", self.config.name);
                self.last_error = Some(err.to_string());
                return vec![EngineAction::ScheduleRetry {
                    delay_ms: UNREADABLE_RETRY_MS,
                }];
            }
        };
        self.last_error = None;

        let local = now.local.time();
        let target = compute_target_temperature(&snapshot, local, self.config.off_temperature);
        self.last_target = Some(target);

        let mut actions = Vec::new();
        let differs = snapshot
            .current_target
            .is_none_or(|current| (current - target).abs() > TEMPERATURE_TOLERANCE);

        if !differs {
            debug!("{}: target temperature {target} already set", self.config.name);
            self.in_flight = None;
        } else if self.command_in_flight(target, now.ms) {
            debug!("{}: set_temperature {target} still in flight", self.config.name);
        } else {
            info!("{}: setting target temperature to {target}", self.config.name);
            let command = ActuatorCommand::new(
                self.config.climate.clone(),
                CommandKind::SetTemperature {
                    temperature: target,
                },
            );
            self.in_flight = Some((target, now.ms));
            self.last_command = Some(command.clone());
            actions.push(EngineAction::Dispatch(command));
        }

        actions.push(EngineAction::ScheduleRetry {
            delay_ms: next_boundary_delay_ms(local, snapshot.day_start, snapshot.night_start),
        });
        actions
    }

    fn on_state_changed(
        &mut self,
        _change: &StateChange,
        reader: &dyn StateReader,
        now: &Now,
    ) -> Vec<EngineAction> {
        self.reconcile(reader, now)
    }

    fn status(&self, _now: &Now) -> ControllerStatus {
        ControllerStatus {
            name: self.config.name.clone(),
            kind: ControllerKind::Climate,
            mode: ControlMode::Automatic,
            override_remaining_ms: 0,
            override_remaining_min: 0,
            pending_commands: usize::from(self.in_flight.is_some()),
            last_command: self.last_command.clone(),
            last_error: self.last_error.clone(),
            detail: self
                .last_target
                .map(|target| format!("target {target:.1}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        driver::{ControllerDriver, DriverInput},
        testing::{at, id, FakeStates, ManualTimer, RecordingGateway},
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn time(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    fn config() -> ClimateConfig {
        ClimateConfig {
            name: "bedroom".to_string(),
            window_contact: id("binary_sensor.bedroom_window"),
            day_target_temp: id("input_number.bedroom_day"),
            night_target_temp: id("input_number.bedroom_night"),
            day_start_time: id("input_datetime.day_start"),
            night_start_time: id("input_datetime.night_start"),
            climate: id("climate.bedroom"),
            away: id("input_boolean.away"),
            off_temperature: 5.0,
        }
    }

    fn bedroom(window: &str, away: &str, current: f64) -> FakeStates {
        FakeStates::new()
            .with_state("binary_sensor.bedroom_window", window)
            .with_state("input_boolean.away", away)
            .with_state("input_number.bedroom_day", "21.0")
            .with_state("input_number.bedroom_night", "17.5")
            .with_state("input_datetime.day_start", "06:30:00")
            .with_state("input_datetime.night_start", "22:00:00")
            .with_state("climate.bedroom", "heat")
            .with_attribute("climate.bedroom", "temperature", json!(current))
    }

    fn dispatched_temperature(actions: &[EngineAction]) -> Option<f32> {
        actions.iter().find_map(|action| match action {
            EngineAction::Dispatch(ActuatorCommand {
                kind: CommandKind::SetTemperature { temperature },
                ..
            }) => Some(*temperature),
            _ => None,
        })
    }

    #[test]
    fn night_window_is_strict_at_both_ends() {
        let day_start = time(6, 30);
        let night_start = time(22, 0);

        assert!(is_night(time(6, 29), day_start, night_start));
        assert!(!is_night(time(6, 30), day_start, night_start));
        assert!(!is_night(time(22, 0), day_start, night_start));
        assert!(is_night(time(22, 1), day_start, night_start));
    }

    #[test]
    fn open_window_wins_over_schedule_and_away() {
        let mut controller = ClimateController::new(config());

        let actions = controller.reconcile(&bedroom("on", "on", 21.0), &at(0, 12, 0));

        assert_eq!(dispatched_temperature(&actions), Some(5.0));
    }

    #[test]
    fn away_uses_night_target_during_the_day() {
        let mut controller = ClimateController::new(config());

        let actions = controller.reconcile(&bedroom("off", "on", 21.0), &at(0, 12, 0));

        assert_eq!(dispatched_temperature(&actions), Some(17.5));
    }

    #[test]
    fn matching_setpoint_only_rearms_boundary_retry() {
        let mut controller = ClimateController::new(config());

        let actions = controller.reconcile(&bedroom("off", "off", 21.0), &at(0, 21, 0));

        assert_eq!(
            actions,
            vec![EngineAction::ScheduleRetry {
                delay_ms: 60 * 60 * 1_000 + BOUNDARY_SLACK_MS,
            }]
        );
    }

    #[test]
    fn identical_command_is_not_repeated_while_in_flight() {
        let mut controller = ClimateController::new(config());
        let states = bedroom("off", "off", 18.0);

        assert_eq!(
            dispatched_temperature(&controller.reconcile(&states, &at(0, 12, 0))),
            Some(21.0)
        );
        assert_eq!(
            dispatched_temperature(&controller.reconcile(&states, &at(30_000, 12, 0))),
            None
        );
        assert_eq!(
            dispatched_temperature(&controller.reconcile(&states, &at(60_000, 12, 1))),
            Some(21.0)
        );
    }

    #[test]
    fn boundary_delay_wraps_past_midnight() {
        let delay = next_boundary_delay_ms(time(23, 0), time(6, 30), time(22, 0));

        assert_eq!(delay, (7 * 60 + 30) * 60 * 1_000 + BOUNDARY_SLACK_MS);
    }

    #[test]
    fn unreadable_time_aborts_pass_but_keeps_wakeup() {
        let mut controller = ClimateController::new(config());
        let states = bedroom("off", "off", 21.0).with_state("input_datetime.day_start", "soon");

        assert_eq!(
            controller.reconcile(&states, &at(0, 12, 0)),
            vec![EngineAction::ScheduleRetry {
                delay_ms: UNREADABLE_RETRY_MS,
            }]
        );
        assert!(controller.status(&at(0, 12, 0)).last_error.is_some());
    }

    #[test]
    fn failed_boundary_pass_rearms_retry() {
        let mut driver = ControllerDriver::new(
            Box::new(ClimateController::new(config())),
            RecordingGateway::default(),
            ManualTimer::default(),
        );

        driver.handle(
            DriverInput::Initialize,
            &bedroom("off", "off", 21.0),
            &at(0, 21, 0),
        );
        assert_eq!(driver.armed_generation(), Some(1));

        let unavailable =
            bedroom("off", "off", 21.0).with_state("input_number.bedroom_night", "unavailable");
        driver.handle(
            DriverInput::RetryElapsed { generation: 1 },
            &unavailable,
            &at(3_601_000, 22, 0),
        );

        assert_eq!(driver.armed_generation(), Some(2));
        assert_eq!(driver.timer().scheduled[1], (UNREADABLE_RETRY_MS, 2));
        assert!(driver.gateway().commands.is_empty());

        // Once readable again, the boundary pass runs and switches to night.
        driver.handle(
            DriverInput::RetryElapsed { generation: 2 },
            &bedroom("off", "off", 21.0),
            &at(3_901_000, 22, 5),
        );
        assert_eq!(
            driver.gateway().commands[0].kind,
            CommandKind::SetTemperature { temperature: 17.5 }
        );
    }
}
