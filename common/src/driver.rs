use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::{
    automation::{Automation, EngineAction},
    ports::{ActuatorGateway, RetryTimer, StateReader},
    types::{ControllerStatus, Now, StateChange},
};

#[derive(Debug, Clone, PartialEq)]
pub enum DriverInput {
    Initialize,
    StateChanged(StateChange),
    RetryElapsed { generation: u64 },
    Reconcile,
}

/// Runs one [`Automation`] against the host ports and owns its single retry
/// timer: arming a new retry always cancels the previous one.
pub struct ControllerDriver<G, T: RetryTimer> {
    automation: Box<dyn Automation>,
    gateway: G,
    timer: T,
    armed_retry: Option<(u64, T::Handle)>,
    next_generation: u64,
}

impl<G, T> ControllerDriver<G, T>
where
    G: ActuatorGateway,
    T: RetryTimer,
{
    pub fn new(automation: Box<dyn Automation>, gateway: G, timer: T) -> Self {
        Self {
            automation,
            gateway,
            timer,
            armed_retry: None,
            next_generation: 0,
        }
    }

    pub fn automation(&self) -> &dyn Automation {
        self.automation.as_ref()
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn armed_generation(&self) -> Option<u64> {
        self.armed_retry.as_ref().map(|(generation, _)| *generation)
    }

    pub fn status(&self, now: &Now) -> ControllerStatus {
        self.automation.status(now)
    }

    pub fn handle(&mut self, input: DriverInput, reader: &dyn StateReader, now: &Now) {
        let actions = match input {
            DriverInput::Initialize => {
                info!("{}: initializing", self.automation.name());
                self.automation.initialize(reader, now)
            }
            DriverInput::StateChanged(change) => {
                self.automation.on_state_changed(&change, reader, now)
            }
            DriverInput::RetryElapsed { generation } => {
                if self.armed_generation() != Some(generation) {
                    debug!(
                        "{}: ignoring superseded retry #{generation}",
                        self.automation.name()
                    );
                    return;
                }
                self.armed_retry = None;
                self.automation.on_retry(reader, now)
            }
            DriverInput::Reconcile => self.automation.reconcile(reader, now),
        };

        self.execute(actions, now);
    }

    fn execute(&mut self, actions: Vec<EngineAction>, now: &Now) {
        let mut queue = VecDeque::from(actions);

        while let Some(action) = queue.pop_front() {
            match action {
                EngineAction::Dispatch(command) => {
                    if let Err(err) = self.gateway.dispatch(&command) {
                        warn!("{}: {err}", self.automation.name());
                        queue.extend(self.automation.on_dispatch_failed(&command, &err, now));
                    }
                }
                EngineAction::Notify(notification) => {
                    if let Err(err) = self.gateway.notify(&notification) {
                        warn!("{}: notification failed: {err}", self.automation.name());
                    }
                }
                EngineAction::ScheduleRetry { delay_ms } => self.arm_retry(delay_ms),
            }
        }
    }

    fn arm_retry(&mut self, delay_ms: u64) {
        if let Some((generation, handle)) = self.armed_retry.take() {
            debug!("{}: cancelling retry #{generation}", self.automation.name());
            self.timer.cancel(handle);
        }

        self.next_generation = self.next_generation.wrapping_add(1);
        let generation = self.next_generation;
        let handle = self.timer.schedule_once(delay_ms, generation);
        self.armed_retry = Some((generation, handle));
        debug!(
            "{}: retry #{generation} armed in {delay_ms}ms",
            self.automation.name()
        );
    }
}
