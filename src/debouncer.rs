use tracing::trace;

use crate::utils::timer::{Scheduler, TimerHandle};

/// A debouncer that tracks when an action should be triggered
/// after a period of inactivity
#[derive(Debug, Clone)]
pub struct Debouncer {
    /// The delay to wait after the last event before triggering
    delay_ms: u64,
    /// Timer for the pending trigger, replaced on every event
    timer: Option<TimerHandle>,
}

impl Debouncer {
    /// Create a new debouncer with the specified delay in milliseconds
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            timer: None,
        }
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    /// Register that an event occurred, restarting the quiet period
    pub fn trigger(&mut self, scheduler: &mut Scheduler) {
        if let Some(previous) = self.timer.take() {
            scheduler.cancel(previous);
        }
        let handle = scheduler.schedule(self.delay_ms);
        trace!(?handle, "Debounce restarted");
        self.timer = Some(handle);
    }

    /// Check if enough time has passed to execute the debounced action.
    /// Returns true once per quiet period.
    pub fn should_execute(&mut self, scheduler: &mut Scheduler) -> bool {
        match self.timer {
            Some(handle) if scheduler.fire_if_due(handle) => {
                self.timer = None;
                true
            }
            _ => false,
        }
    }

    /// Get the time remaining before the action will trigger.
    /// Returns None if no action is pending.
    pub fn time_remaining_ms(&self, scheduler: &Scheduler) -> Option<u64> {
        self.timer.and_then(|handle| scheduler.remaining_ms(handle))
    }

    /// Reset the debouncer, canceling any pending action
    pub fn reset(&mut self, scheduler: &mut Scheduler) {
        if let Some(handle) = self.timer.take() {
            scheduler.cancel(handle);
        }
    }

    /// Check if there's a pending action
    pub fn is_pending(&self) -> bool {
        self.timer.is_some()
    }
}
