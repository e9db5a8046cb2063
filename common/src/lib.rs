pub mod automation;
pub mod charger;
pub mod climate;
pub mod config;
pub mod detector;
pub mod driver;
pub mod error;
pub mod illumination;
pub mod notify;
pub mod ports;
pub mod snapshot;
pub mod topics;
pub mod types;

#[cfg(test)]
mod testing;

pub use automation::{Automation, EngineAction};
pub use charger::ChargerController;
pub use climate::ClimateController;
pub use config::{
    ChargerConfig, ClimateConfig, IlluminationConfig, MqttConfig, NotifierConfig, RuntimeConfig,
};
pub use detector::OverrideDetector;
pub use driver::{ControllerDriver, DriverInput};
pub use error::{ControlError, ControlResult};
pub use illumination::IlluminationController;
pub use notify::NotificationPlanner;
pub use ports::{ActuatorGateway, RetryTimer, StateReader};
pub use topics::*;
pub use types::{
    ActuatorCommand, CommandKind, ControlMode, ControllerKind, ControllerStatus, EntityId,
    Notification, Now, StateChange,
};
