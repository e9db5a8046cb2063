use tracing::{debug, info, warn};

use crate::{
    automation::{Automation, EngineAction},
    config::IlluminationConfig,
    detector::OverrideDetector,
    error::ControlError,
    ports::StateReader,
    snapshot::{ActuatorState, SensorSnapshot},
    types::{
        ActuatorCommand, ControllerKind, ControllerStatus, DesiredState, EntityId, Now,
        OverrideSignal, StateChange,
    },
};

/// Desired light state for a snapshot. First matching rule wins:
/// disabled, vacant, already on (sticky), bright enough, otherwise on.
pub fn compute_target(snapshot: &SensorSnapshot, config: &IlluminationConfig) -> DesiredState {
    if !target_on(snapshot, config) {
        return DesiredState::off();
    }

    DesiredState {
        on: true,
        brightness: config
            .brightness
            .map(|pair| pair.select(snapshot.night_mode)),
        color_temp: config
            .color_temp
            .map(|pair| pair.select(snapshot.chill_mode)),
    }
}

fn target_on(snapshot: &SensorSnapshot, config: &IlluminationConfig) -> bool {
    if snapshot.disabled {
        debug!("{}: light is disabled", config.name);
        return false;
    }
    if !snapshot.occupied {
        debug!("{}: no occupancy", config.name);
        return false;
    }
    if snapshot.actuator.on {
        debug!("{}: light is already on", config.name);
        return true;
    }

    match (&config.illuminance, snapshot.illuminance) {
        (Some(sensing), Some(lux)) if lux >= sensing.threshold => {
            debug!("{}: bright enough ({lux} >= {})", config.name, sensing.threshold);
            false
        }
        _ => true,
    }
}

/// Whether `target` differs from what the actuator currently reports.
pub fn update_needed(actuator: &ActuatorState, target: &DesiredState) -> bool {
    if target.on != actuator.on {
        return true;
    }
    if !target.on {
        return false;
    }

    let brightness_differs = target
        .brightness
        .is_some_and(|brightness| actuator.brightness != Some(brightness));
    let color_temp_differs = target
        .color_temp
        .is_some_and(|color_temp| actuator.color_temp != Some(color_temp));

    brightness_differs || color_temp_differs
}

#[derive(Debug, Clone)]
pub struct IlluminationController {
    config: IlluminationConfig,
    detector: OverrideDetector,
    last_command: Option<ActuatorCommand>,
    last_error: Option<String>,
}

impl IlluminationController {
    pub fn new(config: IlluminationConfig) -> Self {
        Self {
            config,
            detector: OverrideDetector::new(),
            last_command: None,
            last_error: None,
        }
    }

    pub fn config(&self) -> &IlluminationConfig {
        &self.config
    }

    pub fn detector(&self) -> &OverrideDetector {
        &self.detector
    }

    pub fn reconcile_at(&mut self, reader: &dyn StateReader, now_ms: u64) -> Vec<EngineAction> {
        let debounce_ms = self.config.debounce_ms;
        self.detector.purge_stale(now_ms, debounce_ms);

        if self.detector.is_override_active(now_ms, debounce_ms) {
            debug!(
                "{}: recent manual action, {}ms of override left",
                self.config.name,
                self.detector.override_remaining_ms(now_ms, debounce_ms)
            );
            return Vec::new();
        }

        let snapshot = match SensorSnapshot::capture(reader, &self.config) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!("{}: reconciliation skipped: {err}", self.config.name);
                self.last_error = Some(err.to_string());
                return Vec::new();
            }
        };
        self.last_error = None;

        let target = compute_target(&snapshot, &self.config);
        if self.detector.in_flight(&target) {
            debug!("{}: identical command still in flight", self.config.name);
            return Vec::new();
        }

        let power_change = target.on != snapshot.actuator.on;
        let actuator = if target.on && !power_change {
            match snapshot.actuator.with_dimensions(reader, &self.config) {
                Ok(actuator) => actuator,
                Err(err) => {
                    warn!("{}: reconciliation skipped: {err}", self.config.name);
                    self.last_error = Some(err.to_string());
                    return Vec::new();
                }
            }
        } else {
            snapshot.actuator
        };

        if !update_needed(&actuator, &target) {
            debug!("{}: no update needed", self.config.name);
            return Vec::new();
        }

        // The expectation must exist before the command can echo back.
        if power_change {
            self.detector.mark_expected(target, now_ms);
        } else {
            self.detector.mark_adjusted(target, now_ms);
        }
        let command = ActuatorCommand::for_desired(self.config.light.clone(), &target);
        info!(
            "{}: light set to {} (brightness {:?}, color_temp {:?})",
            self.config.name,
            target.power().as_str(),
            target.brightness,
            target.color_temp
        );
        self.last_command = Some(command.clone());
        vec![EngineAction::Dispatch(command)]
    }

    pub fn handle_actuator_changed(&mut self, new_value: &str, now_ms: u64) -> Vec<EngineAction> {
        match self.detector.on_actuator_changed(new_value, now_ms) {
            OverrideSignal::SelfIssued => Vec::new(),
            OverrideSignal::OverrideDetected => vec![EngineAction::ScheduleRetry {
                delay_ms: self.config.debounce_ms,
            }],
        }
    }
}

impl Automation for IlluminationController {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> ControllerKind {
        ControllerKind::Illumination
    }

    fn watched_entities(&self) -> Vec<EntityId> {
        self.config.watched_entities()
    }

    fn reconcile(&mut self, reader: &dyn StateReader, now: &Now) -> Vec<EngineAction> {
        self.reconcile_at(reader, now.ms)
    }

    fn on_state_changed(
        &mut self,
        change: &StateChange,
        reader: &dyn StateReader,
        now: &Now,
    ) -> Vec<EngineAction> {
        if change.entity == self.config.light {
            self.handle_actuator_changed(&change.new, change.at_ms)
        } else {
            self.reconcile_at(reader, now.ms)
        }
    }

    fn on_dispatch_failed(
        &mut self,
        _command: &ActuatorCommand,
        _error: &ControlError,
        _now: &Now,
    ) -> Vec<EngineAction> {
        vec![EngineAction::ScheduleRetry {
            delay_ms: self.config.debounce_ms,
        }]
    }

    fn status(&self, now: &Now) -> ControllerStatus {
        let remaining = self
            .detector
            .override_remaining_ms(now.ms, self.config.debounce_ms);
        ControllerStatus {
            name: self.config.name.clone(),
            kind: ControllerKind::Illumination,
            mode: self.detector.mode(now.ms, self.config.debounce_ms),
            override_remaining_ms: remaining,
            override_remaining_min: remaining / 60_000,
            pending_commands: self.detector.pending_len(),
            last_command: self.last_command.clone(),
            last_error: self.last_error.clone(),
            detail: None,
        }
    }
}
