//! Bounded history ring (spec §3 `HistoryRing`, §9 "use a bounded ring buffer").

use std::collections::VecDeque;

use crate::message::{Message, MessageLevel};

pub struct HistoryRing {
    capacity: usize,
    buf: VecDeque<Message>,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buf: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Push a message, evicting the oldest if at capacity.
    pub fn push(&mut self, message: Message) {
        if self.buf.len() >= self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(message);
    }

    /// Filtered snapshot: only messages with `level >= min_level` and, if
    /// `pattern_name` is given, matching `pattern_name`, most recent
    /// `max_messages` of those (oldest first).
    pub fn snapshot(
        &self,
        max_messages: Option<usize>,
        min_level: Option<MessageLevel>,
        pattern_name: Option<&str>,
    ) -> Vec<Message> {
        let min_level = min_level.unwrap_or(MessageLevel::Debug);
        let filtered: Vec<Message> = self
            .buf
            .iter()
            .filter(|m| m.level >= min_level)
            .filter(|m| pattern_name.is_none_or(|p| m.pattern_name.as_deref() == Some(p)))
            .cloned()
            .collect();

        match max_messages {
            Some(n) if filtered.len() > n => filtered[filtered.len() - n..].to_vec(),
            _ => filtered,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(content: &str, level: MessageLevel) -> Message {
        Message::builder(content).level(level).build()
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut ring = HistoryRing::new(2);
        ring.push(msg("a", MessageLevel::Info));
        ring.push(msg("b", MessageLevel::Info));
        ring.push(msg("c", MessageLevel::Info));
        let all = ring.snapshot(None, None, None);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].content, "b");
        assert_eq!(all[1].content, "c");
    }

    #[test]
    fn snapshot_respects_min_level_and_cap() {
        let mut ring = HistoryRing::new(100);
        for i in 0..10 {
            let level = if i % 2 == 0 { MessageLevel::Debug } else { MessageLevel::Info };
            ring.push(msg(&i.to_string(), level));
        }
        let snap = ring.snapshot(Some(3), Some(MessageLevel::Info), None);
        assert_eq!(snap.len(), 3);
        assert!(snap.iter().all(|m| m.level >= MessageLevel::Info));
    }

    #[test]
    fn snapshot_filters_by_pattern_name() {
        let mut ring = HistoryRing::new(100);
        ring.push(Message::builder("a").pattern_name("x").build());
        ring.push(Message::builder("b").pattern_name("y").build());
        let snap = ring.snapshot(None, None, Some("x"));
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].content, "a");
    }
}
