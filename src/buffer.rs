//! Record buffer shared between the producer and the upload scheduler.
//!
//! The buffer holds two FIFO queues: *pending* records that have not been
//! attempted this cycle, and *retry* records whose previous attempt exhausted
//! its retries. Every record lives in exactly one of pending, retry, or the
//! scheduler's in-flight batch; records leave only through successful
//! delivery. A single mutex guards both queues and is never held across I/O.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use crate::record::EventRecord;

/// Thread-safe pending/retry queue pair.
///
/// `push` is called inline by the producer; `drain` and `requeue_failed`
/// are called only by the upload scheduler. All three take the lock for the
/// minimum necessary duration, so a producer `push` during a drain lands
/// either fully in the drained batch or fully in the next cycle, never split.
///
/// # Example
///
/// ```no_run
/// use cosmic_uplink::buffer::RecordBuffer;
/// use cosmic_uplink::record::{EventRecord, DetectorReading};
///
/// let buffer = RecordBuffer::new();
/// let reading = DetectorReading {
///     adc: "512".into(),
///     sipm: "34.1".into(),
///     deadtime: "12".into(),
///     temperature: "24.8".into(),
/// };
/// buffer.push(EventRecord::capture(1, reading));
///
/// let batch = buffer.drain(Some(100));
/// assert_eq!(batch.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct RecordBuffer {
    queues: Mutex<Queues>,
}

#[derive(Debug, Default)]
struct Queues {
    pending: VecDeque<EventRecord>,
    retry: VecDeque<EventRecord>,
}

impl RecordBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record to the pending queue.
    ///
    /// Never blocks on I/O and never fails; safe to call concurrently with
    /// a drain. O(1).
    pub fn push(&self, record: EventRecord) {
        let mut queues = self.lock();
        queues.pending.push_back(record);
    }

    /// Atomically remove and return up to `limit` records, retry queue
    /// first (in order), then pending (in order). `None` drains everything.
    ///
    /// Records beyond the limit stay in their queues in order, so a backlog
    /// larger than one cycle's cap is carried over rather than dropped.
    pub fn drain(&self, limit: Option<usize>) -> Vec<EventRecord> {
        let take = limit.unwrap_or(usize::MAX);
        let mut queues = self.lock();

        let mut batch = Vec::with_capacity(take.min(queues.retry.len() + queues.pending.len()));
        while batch.len() < take {
            match queues.retry.pop_front() {
                Some(record) => batch.push(record),
                None => break,
            }
        }
        while batch.len() < take {
            match queues.pending.pop_front() {
                Some(record) => batch.push(record),
                None => break,
            }
        }

        batch
    }

    /// Append records that failed delivery to the retry queue, preserving
    /// their relative order. They will be drained ahead of pending records
    /// on the next cycle.
    pub fn requeue_failed(&self, records: Vec<EventRecord>) {
        if records.is_empty() {
            return;
        }
        let mut queues = self.lock();
        queues.retry.extend(records);
    }

    /// Total number of buffered records across both queues.
    pub fn len(&self) -> usize {
        let queues = self.lock();
        queues.pending.len() + queues.retry.len()
    }

    /// Check whether both queues are empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current (pending, retry) queue depths.
    pub fn depths(&self) -> (usize, usize) {
        let queues = self.lock();
        (queues.pending.len(), queues.retry.len())
    }

    // Critical sections are plain queue ops; recover from poisoning
    // instead of propagating it into `push`.
    fn lock(&self) -> std::sync::MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
