use std::collections::VecDeque;

use shared::domain::CanonicalEvent;

pub const EVENT_LOG_CAPACITY: usize = 50;

/// Most-recent-first window over the events seen this session.
///
/// Inserting past capacity evicts from the tail, i.e. the oldest entries by
/// arrival, regardless of any timestamp carried by the events themselves.
#[derive(Debug, Clone)]
pub struct EventLog {
    events: VecDeque<CanonicalEvent>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(EVENT_LOG_CAPACITY)
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn insert(&mut self, event: CanonicalEvent) {
        self.events.push_front(event);
        while self.events.len() > self.capacity {
            self.events.pop_back();
        }
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&CanonicalEvent> {
        self.events.front()
    }

    pub fn get(&self, index: usize) -> Option<&CanonicalEvent> {
        self.events.get(index)
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &CanonicalEvent> + '_ {
        self.events.iter()
    }

    pub fn to_vec(&self) -> Vec<CanonicalEvent> {
        self.events.iter().cloned().collect()
    }
}

#[cfg(test)]
#[path = "tests/event_log_tests.rs"]
mod tests;
