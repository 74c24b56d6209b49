use std::collections::VecDeque;
use std::sync::Mutex;

use logwarden_model::LogEntry;

/// Multi-producer single-consumer FIFO with a precise length.
///
/// The bound is enforced by the collector, not here: pushes always succeed
/// and the collector schedules a background flush once the length crosses
/// the configured maximum.
#[derive(Debug, Default)]
pub(crate) struct EntryQueue {
    entries: Mutex<VecDeque<LogEntry>>,
}

impl EntryQueue {
    pub fn push(&self, entry: LogEntry) {
        self.entries.lock().unwrap().push_back(entry);
    }

    /// Drain up to `max` entries from the head.
    pub fn pop_batch(&self, max: usize) -> Vec<LogEntry> {
        let mut entries = self.entries.lock().unwrap();
        let count = max.min(entries.len());
        entries.drain(..count).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logwarden_model::Level;

    #[test]
    fn pops_in_fifo_order() {
        let queue = EntryQueue::default();
        for i in 0..5 {
            queue.push(LogEntry::new(format!("line-{i}").into_bytes(), Level::Info));
        }
        assert_eq!(queue.len(), 5);

        let batch = queue.pop_batch(3);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].content, b"line-0");
        assert_eq!(batch[2].content, b"line-2");
        assert_eq!(queue.len(), 2);

        let rest = queue.pop_batch(10);
        assert_eq!(rest.len(), 2);
        assert!(queue.is_empty());
    }
}
