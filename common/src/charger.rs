use tracing::{debug, info, warn};

use crate::{
    automation::{Automation, EngineAction},
    config::ChargerConfig,
    ports::StateReader,
    types::{
        ActuatorCommand, CommandKind, ControlMode, ControllerKind, ControllerStatus, EntityId,
        Notification, Now, Power, StateChange,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate {
    device: usize,
    since_ms: u64,
}

/// Works out which device is on the charger: a device that starts charging
/// shortly after the charger switch was turned on, and keeps charging for the
/// confirm delay, is the one being charged.
#[derive(Debug, Clone)]
pub struct ChargerController {
    config: ChargerConfig,
    charger_turned_on_ms: Option<u64>,
    candidate: Option<Candidate>,
    detected: Option<usize>,
    last_command: Option<ActuatorCommand>,
    last_error: Option<String>,
}

impl ChargerController {
    pub fn new(config: ChargerConfig) -> Self {
        Self {
            config,
            charger_turned_on_ms: None,
            candidate: None,
            detected: None,
            last_command: None,
            last_error: None,
        }
    }

    pub fn detected_device(&self) -> Option<&str> {
        self.detected
            .and_then(|index| self.config.devices.get(index))
            .map(|device| device.name.as_str())
    }

    fn device_charging(&self, entity: &EntityId) -> Option<usize> {
        self.config
            .devices
            .iter()
            .position(|device| device.charging == *entity)
    }

    fn device_battery(&self, entity: &EntityId) -> Option<usize> {
        self.config
            .devices
            .iter()
            .position(|device| device.battery_level == *entity)
    }

    fn command(&mut self, target: EntityId, kind: CommandKind) -> EngineAction {
        let command = ActuatorCommand::new(target, kind);
        self.last_command = Some(command.clone());
        EngineAction::Dispatch(command)
    }

    fn confirm_candidate(&mut self, reader: &dyn StateReader, now_ms: u64) -> Vec<EngineAction> {
        let Some(candidate) = self.candidate else {
            return Vec::new();
        };

        let elapsed = now_ms.saturating_sub(candidate.since_ms);
        if elapsed < self.config.confirm_ms {
            return vec![EngineAction::ScheduleRetry {
                delay_ms: self.config.confirm_ms - elapsed,
            }];
        }
        self.candidate = None;

        let device = &self.config.devices[candidate.device];
        let still_charging = reader
            .read_state(&device.charging)
            .as_deref()
            .and_then(Power::parse)
            == Some(Power::On);
        if !still_charging {
            debug!("{}: {} stopped charging before confirmation", self.config.name, device.name);
            return Vec::new();
        }

        let charger_recent = self
            .charger_turned_on_ms
            .is_some_and(|on_ms| now_ms.saturating_sub(on_ms) <= self.config.window_ms);
        if !charger_recent {
            info!(
                "{}: {} started charging but charger not turned on recently",
                self.config.name, device.name
            );
            return Vec::new();
        }

        let name = device.name.clone();
        info!("{}: detected device {name}", self.config.name);
        self.detected = Some(candidate.device);

        vec![
            self.command(
                self.config.detected_device.clone(),
                CommandKind::SetValue {
                    value: name.clone(),
                },
            ),
            EngineAction::Notify(Notification::new(format!("Charging started for {name}"))),
        ]
    }

    fn stop_charging(&mut self) -> Vec<EngineAction> {
        self.detected = None;
        vec![
            self.command(self.config.charger.clone(), CommandKind::TurnOff),
            self.command(
                self.config.detected_device.clone(),
                CommandKind::SetValue {
                    value: String::new(),
                },
            ),
        ]
    }

    fn handle_battery(&mut self, device: usize, value: &str) -> Vec<EngineAction> {
        let name = self.config.devices[device].name.clone();
        let level = match value.trim().parse::<f64>() {
            Ok(level) if level.is_finite() => level,
            _ => {
                warn!("{}: unreadable battery level for {name}: {value}", self.config.name);
                self.last_error = Some(format!("unreadable battery level '{value}'"));
                return Vec::new();
            }
        };
        self.last_error = None;

        if level < self.config.battery_threshold {
            debug!(
                "{}: battery level {level} is below threshold {}",
                self.config.name, self.config.battery_threshold
            );
            return Vec::new();
        }

        info!("{}: battery level reached for {name}", self.config.name);
        let mut actions = vec![EngineAction::Notify(Notification::new(format!(
            "Charging finished for {name}"
        )))];
        actions.extend(self.stop_charging());
        actions
    }
}

impl Automation for ChargerController {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> ControllerKind {
        ControllerKind::Charger
    }

    fn watched_entities(&self) -> Vec<EntityId> {
        self.config.watched_entities()
    }

    fn initialize(&mut self, _reader: &dyn StateReader, _now: &Now) -> Vec<EngineAction> {
        Vec::new()
    }

    fn reconcile(&mut self, reader: &dyn StateReader, now: &Now) -> Vec<EngineAction> {
        self.confirm_candidate(reader, now.ms)
    }

    fn on_state_changed(
        &mut self,
        change: &StateChange,
        reader: &dyn StateReader,
        now: &Now,
    ) -> Vec<EngineAction> {
        if change.entity == self.config.charger {
            match Power::parse(&change.new) {
                Some(Power::On) => {
                    info!("{}: charger turned on", self.config.name);
                    self.charger_turned_on_ms = Some(change.at_ms);
                }
                Some(Power::Off) => {
                    if self.detected.take().is_some() {
                        info!("{}: charger turned off", self.config.name);
                    }
                }
                None => {}
            }
            return Vec::new();
        }

        if let Some(device) = self.device_charging(&change.entity) {
            return match Power::parse(&change.new) {
                Some(Power::On) => {
                    self.candidate = Some(Candidate {
                        device,
                        since_ms: change.at_ms,
                    });
                    vec![EngineAction::ScheduleRetry {
                        delay_ms: self.config.confirm_ms,
                    }]
                }
                Some(Power::Off) => {
                    if self.candidate.is_some_and(|candidate| candidate.device == device) {
                        self.candidate = None;
                    }
                    if self.detected == Some(device) {
                        info!(
                            "{}: charging stopped for {}",
                            self.config.name, self.config.devices[device].name
                        );
                        self.stop_charging()
                    } else {
                        Vec::new()
                    }
                }
                None => Vec::new(),
            };
        }

        if let Some(device) = self.device_battery(&change.entity) {
            if self.detected == Some(device) {
                return self.handle_battery(device, &change.new);
            }
            return Vec::new();
        }

        self.reconcile(reader, now)
    }

    fn status(&self, _now: &Now) -> ControllerStatus {
        ControllerStatus {
            name: self.config.name.clone(),
            kind: ControllerKind::Charger,
            mode: ControlMode::Automatic,
            override_remaining_ms: 0,
            override_remaining_min: 0,
            pending_commands: 0,
            last_command: self.last_command.clone(),
            last_error: self.last_error.clone(),
            detail: self
                .detected_device()
                .map(|name| format!("charging {name}")),
        }
    }
}
