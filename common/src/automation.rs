use crate::{
    error::ControlError,
    ports::StateReader,
    types::{ActuatorCommand, ControllerKind, ControllerStatus, EntityId, Notification, Now, StateChange},
};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    Dispatch(ActuatorCommand),
    Notify(Notification),
    /// Arm the controller's single retry timer, replacing any armed one.
    ScheduleRetry { delay_ms: u64 },
}

/// One controller instance. Implementations own their runtime state and are
/// only ever called from one task, in event delivery order.
pub trait Automation: Send {
    fn name(&self) -> &str;

    fn kind(&self) -> ControllerKind;

    fn watched_entities(&self) -> Vec<EntityId>;

    fn reconcile(&mut self, reader: &dyn StateReader, now: &Now) -> Vec<EngineAction>;

    fn on_state_changed(
        &mut self,
        change: &StateChange,
        reader: &dyn StateReader,
        now: &Now,
    ) -> Vec<EngineAction>;

    fn status(&self, now: &Now) -> ControllerStatus;

    fn initialize(&mut self, reader: &dyn StateReader, now: &Now) -> Vec<EngineAction> {
        self.reconcile(reader, now)
    }

    fn on_retry(&mut self, reader: &dyn StateReader, now: &Now) -> Vec<EngineAction> {
        self.reconcile(reader, now)
    }

    fn on_dispatch_failed(
        &mut self,
        _command: &ActuatorCommand,
        _error: &ControlError,
        _now: &Now,
    ) -> Vec<EngineAction> {
        Vec::new()
    }
}
