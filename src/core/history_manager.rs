//! Undo/redo history
//!
//! A linear list of snapshots with a pointer to the current one. Recording
//! after an undo discards the redo branch. Rapid `record` calls collapse into
//! one entry through a debouncer; `record_immediate` bypasses it for discrete
//! actions such as deletes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::{debug, info};

use crate::debouncer::Debouncer;
use crate::utils::clock::Clock;
use crate::utils::timer::Scheduler;

pub const DEFAULT_MAX_HISTORY_SIZE: usize = 50;
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_history_size: usize,
    pub debounce_ms: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_history_size: DEFAULT_MAX_HISTORY_SIZE,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryEntry<S> {
    /// Unique and increasing across the manager's lifetime; survives eviction
    pub seq: u64,
    pub snapshot: S,
    pub timestamp: DateTime<Utc>,
    pub description: String,
}

/// A debounced record waiting for its quiet period to end
#[derive(Debug, Clone)]
struct PendingRecord<S> {
    snapshot: S,
    description: String,
    bursts: usize,
}

#[derive(Debug)]
pub struct HistoryManager<S> {
    entries: VecDeque<HistoryEntry<S>>,
    /// Invariant: `pointer < entries.len()`
    pointer: usize,
    max_size: usize,
    next_seq: u64,
    pending: Option<PendingRecord<S>>,
    debouncer: Debouncer,
    scheduler: Scheduler,
}

impl<S: Clone> HistoryManager<S> {
    /// History holding only `initial`, so there is always a current entry
    pub fn new(initial: S, config: HistoryConfig, clock: Rc<dyn Clock>) -> Self {
        let scheduler = Scheduler::new(clock);
        let mut entries = VecDeque::new();
        entries.push_back(HistoryEntry {
            seq: 0,
            snapshot: initial,
            timestamp: scheduler.now(),
            description: "Initial state".to_string(),
        });

        Self {
            entries,
            pointer: 0,
            max_size: config.max_history_size.max(1),
            next_seq: 1,
            pending: None,
            debouncer: Debouncer::new(config.debounce_ms),
            scheduler,
        }
    }

    /// Debounced record: a burst of calls within the debounce window
    /// becomes one entry holding the last snapshot
    pub fn record(&mut self, snapshot: S, description: impl Into<String>) {
        let description = description.into();
        let bursts = self.pending.as_ref().map_or(0, |p| p.bursts) + 1;
        self.pending = Some(PendingRecord {
            snapshot,
            description,
            bursts,
        });
        self.debouncer.trigger(&mut self.scheduler);
    }

    /// Record a discrete action now, flushing any debounced record first.
    /// Returns the new entry's sequence id.
    pub fn record_immediate(&mut self, snapshot: S, description: impl Into<String>) -> u64 {
        self.flush();
        self.push(snapshot, description.into())
    }

    /// Commit the pending debounced record if its quiet period has elapsed.
    /// Returns true when an entry was added.
    pub fn poll(&mut self) -> bool {
        if self.debouncer.should_execute(&mut self.scheduler) {
            return self.commit_pending();
        }
        false
    }

    /// Commit the pending debounced record regardless of timing
    pub fn flush(&mut self) -> bool {
        self.debouncer.reset(&mut self.scheduler);
        self.commit_pending()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Step back one entry. Returns `None` (and changes nothing) at the oldest entry.
    pub fn undo(&mut self) -> Option<&S> {
        self.flush();
        if self.pointer == 0 {
            debug!("Undo at oldest entry; nothing to do");
            return None;
        }
        self.pointer -= 1;
        info!(pointer = self.pointer, "Undo");
        Some(&self.entries[self.pointer].snapshot)
    }

    /// Step forward one entry. Returns `None` (and changes nothing) at the newest entry.
    pub fn redo(&mut self) -> Option<&S> {
        self.flush();
        if self.pointer + 1 >= self.entries.len() {
            debug!("Redo at newest entry; nothing to do");
            return None;
        }
        self.pointer += 1;
        info!(pointer = self.pointer, "Redo");
        Some(&self.entries[self.pointer].snapshot)
    }

    /// Snapshot `undo` would restore, without moving. Ignores a pending record.
    pub fn undo_target(&self) -> Option<&S> {
        self.pointer
            .checked_sub(1)
            .map(|idx| &self.entries[idx].snapshot)
    }

    /// Snapshot `redo` would restore, without moving
    pub fn redo_target(&self) -> Option<&S> {
        self.entries.get(self.pointer + 1).map(|e| &e.snapshot)
    }

    pub fn can_undo(&self) -> bool {
        self.pointer > 0 || self.pending.is_some()
    }

    pub fn can_redo(&self) -> bool {
        self.pending.is_none() && self.pointer + 1 < self.entries.len()
    }

    pub fn current(&self) -> &HistoryEntry<S> {
        &self.entries[self.pointer]
    }

    pub fn pointer(&self) -> usize {
        self.pointer
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry<S>> {
        self.entries.iter()
    }

    /// Drop everything and start over from `initial`
    pub fn clear(&mut self, initial: S) {
        self.debouncer.reset(&mut self.scheduler);
        self.pending = None;
        self.entries.clear();
        self.entries.push_back(HistoryEntry {
            seq: self.next_seq,
            snapshot: initial,
            timestamp: self.scheduler.now(),
            description: "Initial state".to_string(),
        });
        self.next_seq += 1;
        self.pointer = 0;
    }

    fn commit_pending(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                debug!(
                    bursts = pending.bursts,
                    description = %pending.description,
                    "Committing debounced history record"
                );
                self.push(pending.snapshot, pending.description);
                true
            }
            None => false,
        }
    }

    fn push(&mut self, snapshot: S, description: String) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        // A new action discards the redo branch
        self.entries.truncate(self.pointer + 1);
        self.entries.push_back(HistoryEntry {
            seq,
            snapshot,
            timestamp: self.scheduler.now(),
            description,
        });
        self.pointer = self.entries.len() - 1;

        while self.entries.len() > self.max_size {
            if let Some(evicted) = self.entries.pop_front() {
                debug!(description = %evicted.description, "Evicted oldest history entry");
            }
            self.pointer -= 1;
        }
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::ManualClock;

    fn history(max: usize, clock: &ManualClock) -> HistoryManager<i32> {
        HistoryManager::new(
            0,
            HistoryConfig {
                max_history_size: max,
                debounce_ms: 300,
            },
            Rc::new(clock.clone()),
        )
    }

    #[test]
    fn test_undo_redo_walk_the_pointer() {
        let clock = ManualClock::new();
        let mut h = history(10, &clock);
        h.record_immediate(1, "one");
        h.record_immediate(2, "two");

        assert_eq!(h.undo(), Some(&1));
        assert_eq!(h.undo(), Some(&0));
        assert_eq!(h.undo(), None);
        assert_eq!(h.pointer(), 0);

        assert_eq!(h.redo(), Some(&1));
        assert_eq!(h.redo(), Some(&2));
        assert_eq!(h.redo(), None);
    }

    #[test]
    fn test_undo_then_redo_is_identity() {
        let clock = ManualClock::new();
        let mut h = history(10, &clock);
        for i in 1..=3 {
            h.record_immediate(i, format!("step {}", i));
        }
        h.undo();
        let x = h.current().snapshot;
        let _ = h.undo();
        assert_eq!(h.redo().copied(), Some(x));
        let _ = h.redo();
        assert_eq!(h.undo().copied(), Some(x));
    }

    #[test]
    fn test_record_after_undo_discards_redo_branch() {
        let clock = ManualClock::new();
        let mut h = history(10, &clock);
        h.record_immediate(1, "one");
        h.record_immediate(2, "two");
        h.undo();
        h.record_immediate(9, "diverge");

        assert!(!h.can_redo());
        let snapshots: Vec<i32> = h.entries().map(|e| e.snapshot).collect();
        assert_eq!(snapshots, vec![0, 1, 9]);
    }

    #[test]
    fn test_rapid_records_collapse_into_one_entry() {
        let clock = ManualClock::new();
        let mut h = history(10, &clock);
        for i in 1..=5 {
            h.record(i, "typing");
            clock.advance_ms(50);
            assert!(!h.poll());
        }
        clock.advance_ms(300);
        assert!(h.poll());
        assert_eq!(h.len(), 2);
        assert_eq!(h.current().snapshot, 5);
    }

    #[test]
    fn test_spaced_records_each_create_an_entry() {
        let clock = ManualClock::new();
        let mut h = history(10, &clock);
        for i in 1..=5 {
            h.record(i, "edit");
            clock.advance_ms(301);
            assert!(h.poll());
        }
        assert_eq!(h.len(), 6);
    }

    #[test]
    fn test_undo_flushes_pending_record() {
        let clock = ManualClock::new();
        let mut h = history(10, &clock);
        h.record(1, "typing");
        assert!(h.can_undo());
        assert_eq!(h.undo(), Some(&0));
        assert_eq!(h.redo(), Some(&1));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let clock = ManualClock::new();
        let mut h = history(3, &clock);
        for i in 1..=4 {
            clock.advance_ms(10);
            h.record_immediate(i, format!("action {}", i));
        }
        assert_eq!(h.len(), 3);
        assert_eq!(h.pointer(), 2);

        let snapshots: Vec<i32> = h.entries().map(|e| e.snapshot).collect();
        assert_eq!(snapshots, vec![2, 3, 4]);

        let stamps: Vec<_> = h.entries().map(|e| e.timestamp).collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));

        assert_eq!(h.undo(), Some(&3));
        assert_eq!(h.undo(), Some(&2));
        assert_eq!(h.undo(), None);
    }

    #[test]
    fn test_sequence_ids_survive_eviction() {
        let clock = ManualClock::new();
        let mut h = history(3, &clock);
        let first = h.record_immediate(1, "one");
        h.record_immediate(2, "two");
        let third = h.record_immediate(3, "three");
        assert_eq!(h.current().seq, third);

        // At capacity the pointer stays put while the entry changes
        let pointer = h.pointer();
        let fourth = h.record_immediate(4, "four");
        assert_eq!(h.pointer(), pointer);
        assert_ne!(fourth, third);
        assert_eq!(h.current().seq, fourth);
        assert!(h.entries().all(|e| e.seq != first));

        let seqs: Vec<u64> = h.entries().map(|e| e.seq).collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_targets_peek_without_moving() {
        let clock = ManualClock::new();
        let mut h = history(10, &clock);
        assert_eq!(h.undo_target(), None);
        h.record_immediate(1, "one");
        assert_eq!(h.undo_target(), Some(&0));
        assert_eq!(h.redo_target(), None);
        assert_eq!(h.pointer(), 1);

        h.undo();
        assert_eq!(h.redo_target(), Some(&1));
        assert_eq!(h.pointer(), 0);
    }
}
