//! Seams between the controllers and the host platform.
//!
//! Controllers never touch MQTT, timers or the entity store directly; the
//! host implements these traits and the [`ControllerDriver`](crate::driver::ControllerDriver)
//! calls them.

use serde_json::Value;

use crate::{
    error::ControlResult,
    types::{ActuatorCommand, EntityId, Notification},
};

/// Synchronous reads of the current platform state.
pub trait StateReader {
    fn read_state(&self, entity: &EntityId) -> Option<String>;

    fn read_attribute(&self, entity: &EntityId, name: &str) -> Option<Value>;
}

/// Fire-and-forget command dispatch. Completion is only ever observed through
/// a later state-change event.
pub trait ActuatorGateway {
    fn dispatch(&mut self, command: &ActuatorCommand) -> ControlResult<()>;

    fn notify(&mut self, notification: &Notification) -> ControlResult<()>;
}

/// Single-shot timer with cancellation. Expiry is delivered back to the
/// controller as a retry tagged with `generation`.
pub trait RetryTimer {
    type Handle;

    fn schedule_once(&mut self, delay_ms: u64, generation: u64) -> Self::Handle;

    fn cancel(&mut self, handle: Self::Handle);
}
