//! Single-slot notice offering to undo the last destructive action.
//!
//! A new announcement replaces the current one and restarts the expiry
//! timer. Expiry only hides the notice; the history entry stays undoable.

use std::rc::Rc;
use tracing::debug;

use crate::utils::clock::Clock;
use crate::utils::timer::{Scheduler, TimerHandle};

pub const DEFAULT_UNDO_NOTICE_MS: u64 = 5000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoNotice {
    pub description: String,
    /// Sequence id of the history entry the destructive action recorded
    pub entry_seq: u64,
}

#[derive(Debug)]
pub struct UndoNoticeSlot {
    scheduler: Scheduler,
    expiry_ms: u64,
    current: Option<(UndoNotice, TimerHandle)>,
}

impl UndoNoticeSlot {
    pub fn new(expiry_ms: u64, clock: Rc<dyn Clock>) -> Self {
        Self {
            scheduler: Scheduler::new(clock),
            expiry_ms,
            current: None,
        }
    }

    pub fn announce(&mut self, description: impl Into<String>, entry_seq: u64) {
        if let Some((old, timer)) = self.current.take() {
            self.scheduler.cancel(timer);
            debug!(description = %old.description, "Undo notice replaced");
        }
        let notice = UndoNotice {
            description: description.into(),
            entry_seq,
        };
        let timer = self.scheduler.schedule(self.expiry_ms);
        self.current = Some((notice, timer));
    }

    pub fn current(&self) -> Option<&UndoNotice> {
        self.current.as_ref().map(|(notice, _)| notice)
    }

    /// Drop the notice once its timer fires. Returns the expired notice.
    pub fn poll(&mut self) -> Option<UndoNotice> {
        let expired = match &self.current {
            Some((_, timer)) => self.scheduler.fire_if_due(*timer),
            None => false,
        };
        if !expired {
            return None;
        }
        let (notice, _) = self.current.take()?;
        debug!(description = %notice.description, "Undo notice expired");
        Some(notice)
    }

    /// Consume the notice because the user chose to undo
    pub fn take_for_undo(&mut self) -> Option<UndoNotice> {
        self.poll();
        let (notice, timer) = self.current.take()?;
        self.scheduler.cancel(timer);
        Some(notice)
    }

    pub fn dismiss(&mut self) {
        if let Some((_, timer)) = self.current.take() {
            self.scheduler.cancel(timer);
        }
    }
}
