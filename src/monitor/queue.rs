use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::Record;

/// What the writer pulls off the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    Data(Record),
    /// Wakes the writer and tells it to stop.
    Shutdown,
}

/// Bounded FIFO between many producers and the single writer.
///
/// `offer` never waits: when the queue is full the record is dropped
/// and counted. `take` parks the consumer until something arrives.
pub struct IngestQueue {
    items: Mutex<VecDeque<Envelope>>,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
    ready: Notify,
}

impl IngestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            ready: Notify::new(),
        }
    }

    /// Enqueues `record` unless the queue is full or closed.
    pub fn offer(&self, record: Record) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        {
            let mut items = self.items.lock();
            if items.len() >= self.capacity {
                drop(items);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            items.push_back(Envelope::Data(record));
        }
        self.ready.notify_one();
        true
    }

    /// Oldest envelope, waiting for one if the queue is empty.
    pub async fn take(&self) -> Envelope {
        loop {
            if let Some(next) = self.items.lock().pop_front() {
                return next;
            }
            // `notify_one` stores a permit, so a push between the pop
            // above and this await is not lost.
            self.ready.notified().await;
        }
    }

    #[cfg(test)]
    fn try_take(&self) -> Option<Envelope> {
        self.items.lock().pop_front()
    }

    /// Refuses further records and queues the shutdown marker.
    /// The marker bypasses the capacity bound.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.items.lock().push_back(Envelope::Shutdown);
        self.ready.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records rejected because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
