use std::collections::VecDeque;

use tracing::{debug, info};

use crate::types::{ControlMode, DesiredState, OverrideSignal, Power};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingCommand {
    pub action: Power,
    pub desired: DesiredState,
    pub issued_at_ms: u64,
}

/// Attributes actuator changes to either our own commands or a human.
///
/// Every dispatched command pushes one expectation; the actuator events that
/// follow consume them oldest first, each exactly once. Any event that does
/// not match the oldest expectation starts (or restarts) the override window.
/// Brightness or colour corrections on a light that stays on produce no on/off
/// event, so they are tracked apart and never matched.
#[derive(Debug, Clone, Default)]
pub struct OverrideDetector {
    pending: VecDeque<PendingCommand>,
    adjustment: Option<PendingCommand>,
    manual_override_since_ms: Option<u64>,
}

impl OverrideDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_expected(&mut self, desired: DesiredState, now_ms: u64) {
        self.adjustment = None;
        self.pending.push_back(PendingCommand {
            action: desired.power(),
            desired,
            issued_at_ms: now_ms,
        });
    }

    pub fn mark_adjusted(&mut self, desired: DesiredState, now_ms: u64) {
        self.adjustment = Some(PendingCommand {
            action: desired.power(),
            desired,
            issued_at_ms: now_ms,
        });
    }

    pub fn on_actuator_changed(&mut self, new_value: &str, now_ms: u64) -> OverrideSignal {
        let observed = Power::parse(new_value);
        let matches_oldest = self
            .pending
            .front()
            .is_some_and(|expected| Some(expected.action) == observed);

        if matches_oldest {
            self.pending.pop_front();
            debug!("actuator reported {new_value}, attributed to own command");
            return OverrideSignal::SelfIssued;
        }

        self.manual_override_since_ms = Some(now_ms);
        info!("manual action registered at {now_ms}ms (actuator reported {new_value})");
        OverrideSignal::OverrideDetected
    }

    pub fn is_override_active(&self, now_ms: u64, debounce_ms: u64) -> bool {
        self.override_remaining_ms(now_ms, debounce_ms) > 0
    }

    pub fn override_remaining_ms(&self, now_ms: u64, debounce_ms: u64) -> u64 {
        match self.manual_override_since_ms {
            Some(since) => debounce_ms.saturating_sub(now_ms.saturating_sub(since)),
            None => 0,
        }
    }

    pub fn mode(&self, now_ms: u64, debounce_ms: u64) -> ControlMode {
        if self.is_override_active(now_ms, debounce_ms) {
            ControlMode::ManualOverride
        } else {
            ControlMode::Automatic
        }
    }

    pub fn manual_override_since_ms(&self) -> Option<u64> {
        self.manual_override_since_ms
    }

    /// True when the newest dispatched command already asks for `desired`.
    pub fn in_flight(&self, desired: &DesiredState) -> bool {
        self.adjustment
            .as_ref()
            .or_else(|| self.pending.back())
            .is_some_and(|pending| pending.desired == *desired)
    }

    /// Drops expectations whose confirmation never arrived.
    pub fn purge_stale(&mut self, now_ms: u64, max_age_ms: u64) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|pending| now_ms.saturating_sub(pending.issued_at_ms) < max_age_ms);
        if self
            .adjustment
            .is_some_and(|adjustment| now_ms.saturating_sub(adjustment.issued_at_ms) >= max_age_ms)
        {
            self.adjustment = None;
        }
        let purged = before - self.pending.len();
        if purged > 0 {
            info!("dropped {purged} unconfirmed command expectation(s)");
        }
        purged
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingCommand> {
        self.pending.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
