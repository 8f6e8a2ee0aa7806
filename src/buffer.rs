use crate::record::LogRecord;
use std::collections::VecDeque;

/// Bounded FIFO of records waiting for a connection.
///
/// Pushing past capacity evicts the oldest record, so the buffer always
/// holds the most recent `capacity` writes in their original order.
#[derive(Debug)]
pub struct MessageBuffer {
    records: VecDeque<LogRecord>,
    capacity: usize,
    evicted: u64,
}

impl MessageBuffer {
    pub fn new(capacity: usize) -> Self {
        MessageBuffer {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            evicted: 0,
        }
    }

    pub fn push(&mut self, record: LogRecord) {
        self.records.push_back(record);
        while self.records.len() > self.capacity {
            self.records.pop_front();
            self.evicted += 1;
        }
    }

    pub fn pop_front(&mut self) -> Option<LogRecord> {
        self.records.pop_front()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records discarded by overflow since construction.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogRecord> {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LogLevel;
    use chrono::Utc;
    use rstest::rstest;

    fn record(message: impl Into<String>) -> LogRecord {
        LogRecord {
            timestamp: Utc::now(),
            level: LogLevel::Info,
            message: message.into(),
            data: None,
            source: "test".into(),
            request_id: None,
            context: None,
        }
    }

    #[rstest]
    #[case(0, 5)]
    #[case(1, 5)]
    #[case(3, 10)]
    #[case(10, 3)]
    fn keeps_last_n_in_order(#[case] capacity: usize, #[case] writes: usize) {
        let mut buffer = MessageBuffer::new(capacity);
        for i in 0..writes {
            buffer.push(record(i.to_string()));
            assert!(buffer.len() <= capacity);
        }

        let kept: Vec<String> = buffer.iter().map(|r| r.message.clone()).collect();
        let expected: Vec<String> = (writes.saturating_sub(capacity)..writes)
            .map(|i| i.to_string())
            .collect();
        assert_eq!(kept, expected);
        assert_eq!(buffer.evicted(), writes.saturating_sub(capacity) as u64);
    }

    #[test]
    fn drains_fifo() {
        let mut buffer = MessageBuffer::new(4);
        buffer.push(record("a"));
        buffer.push(record("b"));
        assert_eq!(buffer.pop_front().map(|r| r.message), Some("a".into()));
        assert_eq!(buffer.pop_front().map(|r| r.message), Some("b".into()));
        assert!(buffer.pop_front().is_none());
        assert!(buffer.is_empty());
    }
}
