//! Cancellable one-shot timers
//!
//! Every `schedule` returns a handle; replacing a timer means cancelling the
//! old handle explicitly. Nothing fires on its own: the owner drains due
//! timers from its event loop (`GridEngine::tick`).

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::trace;

use crate::utils::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

#[derive(Debug)]
pub struct Scheduler {
    clock: Rc<dyn Clock>,
    next_id: u64,
    deadlines: BTreeMap<TimerHandle, DateTime<Utc>>,
}

impl Scheduler {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            next_id: 1,
            deadlines: BTreeMap::new(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn schedule(&mut self, delay_ms: u64) -> TimerHandle {
        let handle = TimerHandle(self.next_id);
        self.next_id += 1;
        let deadline = self.clock.now() + Duration::milliseconds(delay_ms as i64);
        self.deadlines.insert(handle, deadline);
        trace!(?handle, delay_ms, "Scheduled timer");
        handle
    }

    /// Returns false when the handle already fired or was cancelled
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.deadlines.remove(&handle).is_some()
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.deadlines.contains_key(&handle)
    }

    pub fn is_due(&self, handle: TimerHandle) -> bool {
        self.deadlines
            .get(&handle)
            .is_some_and(|deadline| *deadline <= self.clock.now())
    }

    /// Consume a single timer if it is due
    pub fn fire_if_due(&mut self, handle: TimerHandle) -> bool {
        if self.is_due(handle) {
            self.deadlines.remove(&handle);
            return true;
        }
        false
    }

    /// Time left before the handle fires, `None` when it is not pending
    pub fn remaining_ms(&self, handle: TimerHandle) -> Option<u64> {
        let deadline = self.deadlines.get(&handle)?;
        let left = (*deadline - self.clock.now()).num_milliseconds();
        Some(left.max(0) as u64)
    }

    /// Remove and return all due timers in scheduling order
    pub fn drain_due(&mut self) -> Vec<TimerHandle> {
        let now = self.clock.now();
        let due: Vec<TimerHandle> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(handle, _)| *handle)
            .collect();
        for handle in &due {
            self.deadlines.remove(handle);
        }
        due
    }
}
