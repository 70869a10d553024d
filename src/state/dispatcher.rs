//! State dispatcher for pub-sub pattern

use std::collections::VecDeque;
use tracing::{debug, info};

use crate::state::events::StateEvent;

/// Maximum number of events kept for debugging
const MAX_EVENT_HISTORY: usize = 100;

/// Trait for components that subscribe to state changes
pub trait StateSubscriber {
    /// Handle a state event
    fn on_state_event(&mut self, event: &StateEvent);

    /// Get subscriber name for debugging
    fn name(&self) -> &str;
}

/// Adapts a closure into a subscriber
pub struct FnSubscriber<F> {
    name: String,
    callback: F,
}

impl<F: FnMut(&StateEvent)> FnSubscriber<F> {
    pub fn new(name: impl Into<String>, callback: F) -> Self {
        Self {
            name: name.into(),
            callback,
        }
    }
}

impl<F: FnMut(&StateEvent)> StateSubscriber for FnSubscriber<F> {
    fn on_state_event(&mut self, event: &StateEvent) {
        (self.callback)(event)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Fans state events out to subscribers, in subscription order
pub struct StateDispatcher {
    subscribers: Vec<(SubscriptionId, Box<dyn StateSubscriber>)>,
    next_id: u64,

    /// Event history for debugging
    event_history: VecDeque<StateEvent>,

    /// Maximum event history size
    max_history: usize,
}

impl Default for StateDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl StateDispatcher {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
            next_id: 1,
            event_history: VecDeque::with_capacity(MAX_EVENT_HISTORY),
            max_history: MAX_EVENT_HISTORY,
        }
    }

    /// Add a subscriber
    pub fn subscribe(&mut self, subscriber: Box<dyn StateSubscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        info!("StateDispatcher: Adding subscriber: {}", subscriber.name());
        self.subscribers.push((id, subscriber));
        id
    }

    /// Remove a subscriber. Returns false for unknown ids.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub_id, subscriber)| {
            let keep = *sub_id != id;
            if !keep {
                info!("StateDispatcher: Removing subscriber: {}", subscriber.name());
            }
            keep
        });
        before != self.subscribers.len()
    }

    /// Dispatch a state event
    pub fn dispatch(&mut self, event: StateEvent) {
        debug!("StateDispatcher: Dispatching event: {:?}", event);

        for (_, subscriber) in &mut self.subscribers {
            debug!(
                "StateDispatcher: Notifying subscriber: {}",
                subscriber.name()
            );
            subscriber.on_state_event(&event);
        }

        // Record event in history
        if self.event_history.len() >= self.max_history {
            self.event_history.pop_front();
        }
        self.event_history.push_back(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Get event history for debugging, oldest first
    pub fn get_event_history(&self) -> impl Iterator<Item = &StateEvent> {
        self.event_history.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_subscribers_receive_events_until_unsubscribed() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut dispatcher = StateDispatcher::new();
        let id = dispatcher.subscribe(Box::new(FnSubscriber::new("recorder", move |e: &StateEvent| {
            sink.borrow_mut().push(e.clone())
        })));

        dispatcher.dispatch(StateEvent::RowsDeleted { count: 2 });
        assert!(dispatcher.unsubscribe(id));
        assert!(!dispatcher.unsubscribe(id));
        dispatcher.dispatch(StateEvent::UndoNoticeExpired);

        assert_eq!(*seen.borrow(), vec![StateEvent::RowsDeleted { count: 2 }]);
        assert_eq!(dispatcher.get_event_history().count(), 2);
    }

    #[test]
    fn test_event_history_is_bounded() {
        let mut dispatcher = StateDispatcher::new();
        for count in 0..150 {
            dispatcher.dispatch(StateEvent::RowsDeleted { count });
        }
        let history: Vec<&StateEvent> = dispatcher.get_event_history().collect();
        assert_eq!(history.len(), MAX_EVENT_HISTORY);
        assert_eq!(history[0], &StateEvent::RowsDeleted { count: 50 });
    }
}
