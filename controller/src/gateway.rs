use std::{sync::Arc, time::Duration};

use rumqttc::{AsyncClient, QoS};
use tokio::{sync::mpsc, task::AbortHandle};
use tracing::{debug, warn};

use homectl_common::{
    command_topic, ActuatorCommand, ActuatorGateway, ControlError, ControlResult, DriverInput,
    NotificationPlanner, Notification, RetryTimer,
};

use crate::{host::ControllerInput, store::EntityStore};

/// Publishes commands to the `<command_prefix>/command/...` topics. Never
/// waits on the broker: a full client queue is reported as a dispatch error.
#[derive(Clone)]
pub struct MqttGateway {
    client: AsyncClient,
    command_prefix: String,
    planner: Option<Arc<NotificationPlanner>>,
    store: EntityStore,
}

impl MqttGateway {
    pub fn new(
        client: AsyncClient,
        command_prefix: String,
        planner: Option<Arc<NotificationPlanner>>,
        store: EntityStore,
    ) -> Self {
        Self {
            client,
            command_prefix,
            planner,
            store,
        }
    }
}

impl ActuatorGateway for MqttGateway {
    fn dispatch(&mut self, command: &ActuatorCommand) -> ControlResult<()> {
        let topic = command_topic(&self.command_prefix, &command.target);
        let payload = command_payload(command)?;
        debug!("publishing {} to {topic}", command.target);

        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|err| ControlError::CommandDispatch {
                entity: command.target.clone(),
                reason: err.to_string(),
            })
    }

    fn notify(&mut self, notification: &Notification) -> ControlResult<()> {
        let Some(planner) = self.planner.clone() else {
            warn!("notification dropped, no notifier configured: {}", notification.message);
            return Ok(());
        };

        for command in planner.plan(notification, &self.store) {
            self.dispatch(&command)?;
        }
        Ok(())
    }
}

pub fn command_payload(command: &ActuatorCommand) -> ControlResult<Vec<u8>> {
    serde_json::to_vec(&command.kind).map_err(|err| ControlError::CommandDispatch {
        entity: command.target.clone(),
        reason: err.to_string(),
    })
}

/// Retry timer backed by a spawned sleep that posts the expiry back into the
/// controller's own queue.
pub struct TokioRetryTimer {
    tx: mpsc::Sender<ControllerInput>,
}

impl TokioRetryTimer {
    pub fn new(tx: mpsc::Sender<ControllerInput>) -> Self {
        Self { tx }
    }
}

impl RetryTimer for TokioRetryTimer {
    type Handle = AbortHandle;

    fn schedule_once(&mut self, delay_ms: u64, generation: u64) -> AbortHandle {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let input = ControllerInput::Driver(DriverInput::RetryElapsed { generation });
            if tx.send(input).await.is_err() {
                debug!("retry #{generation} fired after controller shut down");
            }
        })
        .abort_handle()
    }

    fn cancel(&mut self, handle: AbortHandle) {
        handle.abort();
    }
}
