//! Bounded FIFO of unconsumed events.

use std::collections::VecDeque;

use garnet::event::EventRecord;

pub(crate) struct EventQueue {
    events: VecDeque<EventRecord>,
}

/// When full, the oldest record is dropped to make room; a stalled host
/// loses history, not the most recent result.
pub(crate) const CAPACITY: usize = 64;

impl EventQueue {
    pub(crate) fn new() -> Self {
        Self {
            events: VecDeque::new(),
        }
    }

    pub(crate) fn push(&mut self, event: EventRecord) {
        if self.events.len() >= CAPACITY {
            let dropped = self.events.pop_front();
            tracing::warn!(?dropped, "event queue full, dropping oldest");
        }
        self.events.push_back(event);
    }

    pub(crate) fn front(&self) -> Option<&EventRecord> {
        self.events.front()
    }

    pub(crate) fn consume(&mut self) {
        self.events.pop_front();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use garnet::event::EventKind;

    fn event(id: u32) -> EventRecord {
        let mut record = EventRecord::new(EventKind::AchievementTriggered);
        record.achievement_id = id;
        record
    }

    #[test]
    fn consume_pops_exactly_one() {
        let mut queue = EventQueue::new();
        queue.push(event(1));
        queue.push(event(2));

        assert_eq!(queue.front().unwrap().achievement_id, 1);
        // peeking is side-effect free
        assert_eq!(queue.front().unwrap().achievement_id, 1);

        queue.consume();
        assert_eq!(queue.front().unwrap().achievement_id, 2);
        queue.consume();
        assert!(queue.is_empty());
    }

    #[test]
    fn overflow_drops_the_oldest() {
        let mut queue = EventQueue::new();
        for id in 0..(CAPACITY as u32 + 2) {
            queue.push(event(id));
        }
        assert_eq!(queue.front().unwrap().achievement_id, 2);
    }
}
