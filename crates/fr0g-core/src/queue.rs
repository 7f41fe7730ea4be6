//! Bounded priority queues with backpressure and a dead-letter sink.
//!
//! Both internal queues (input events, output commands) use the same
//! envelope and the same contract: FIFO with a higher-priority-first
//! tie-break, bounded capacity, and an enqueue that either waits up to a
//! caller-chosen timeout or fails fast with a backpressure signal. Nothing
//! is ever dropped silently; messages that exhaust their retries are handed
//! to the dead-letter sink.

use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::types::ChannelType;

/// The envelope used on both internal queues.
///
/// Invariant: `retries <= max_retries`. [`QueueMessage::into_retry`] is the
/// only way to increment the counter and refuses to cross the limit.
#[derive(Debug, Clone)]
pub struct QueueMessage<T> {
    /// Message id; for event messages this is the event id, so a retry never
    /// overtakes its own earlier attempt.
    pub id: String,
    /// Channel the payload belongs to.
    pub channel: ChannelType,
    /// Origin of the payload.
    pub source: String,
    /// Destination of the payload, where known.
    pub destination: String,
    /// The typed payload.
    pub payload: T,
    /// Envelope annotations.
    pub metadata: std::collections::HashMap<String, String>,
    /// When the message entered the pipeline.
    pub timestamp: DateTime<Utc>,
    /// Priority in `[0, 10]`; higher dequeues first.
    pub priority: u8,
    /// Attempts already consumed.
    pub retries: u32,
    /// Attempt budget.
    pub max_retries: u32,
}

impl<T> QueueMessage<T> {
    /// Wrap a payload in a fresh envelope with zero retries.
    pub fn new(
        id: impl Into<String>,
        channel: ChannelType,
        source: impl Into<String>,
        destination: impl Into<String>,
        payload: T,
        priority: u8,
        max_retries: u32,
    ) -> Self {
        Self {
            id: id.into(),
            channel,
            source: source.into(),
            destination: destination.into(),
            payload,
            metadata: std::collections::HashMap::new(),
            timestamp: Utc::now(),
            priority: priority.min(crate::types::MAX_PRIORITY),
            retries: 0,
            max_retries,
        }
    }

    /// Whether the retry budget still allows another attempt.
    pub fn can_retry(&self) -> bool {
        self.retries < self.max_retries
    }

    /// Consume the message and return it with the retry counter advanced,
    /// or give it back unchanged when the budget is exhausted.
    pub fn into_retry(mut self) -> Result<Self, Self> {
        if self.retries < self.max_retries {
            self.retries += 1;
            Ok(self)
        } else {
            Err(self)
        }
    }
}

/// Why an enqueue attempt did not take the message.
#[derive(Debug)]
pub enum EnqueueError<T> {
    /// Capacity was exhausted for the whole allowed wait. The message is
    /// returned so the caller can 429, retry, or dead-letter it.
    Full(QueueMessage<T>),
}

impl<T> EnqueueError<T> {
    /// Recover the rejected message.
    pub fn into_message(self) -> QueueMessage<T> {
        match self {
            EnqueueError::Full(message) => message,
        }
    }
}

struct HeapEntry<T> {
    priority: u8,
    seq: u64,
    message: QueueMessage<T>,
}

impl<T> PartialEq for HeapEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for HeapEntry<T> {}

impl<T> PartialOrd for HeapEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for HeapEntry<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: higher priority first, then earlier insertion.
        self.priority
            .cmp(&other.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

/// Counters exposed on the `/queue/stats` surface.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Messages currently queued.
    pub depth: usize,
    /// Configured capacity.
    pub capacity: usize,
    /// Total accepted since startup.
    pub enqueued: u64,
    /// Total handed to consumers since startup.
    pub dequeued: u64,
    /// Total rejected with [`EnqueueError::Full`] since startup.
    pub rejected: u64,
}

/// Bounded FIFO queue with a priority tie-break.
///
/// Two semaphores carry the capacity accounting: `slots` counts free
/// capacity for producers, `items` counts ready messages for consumers. The
/// heap itself sits behind a short critical section and is never held
/// across an await.
pub struct PriorityQueue<T> {
    heap: Mutex<BinaryHeap<HeapEntry<T>>>,
    slots: Semaphore,
    items: Semaphore,
    capacity: usize,
    seq: AtomicU64,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    rejected: AtomicU64,
}

impl<T> PriorityQueue<T> {
    /// Create a queue with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero; configuration validation rejects that
    /// before any queue is built.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            heap: Mutex::new(BinaryHeap::with_capacity(capacity)),
            slots: Semaphore::new(capacity),
            items: Semaphore::new(0),
            capacity,
            seq: AtomicU64::new(0),
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Enqueue, waiting at most `timeout` for capacity.
    pub async fn enqueue(
        &self,
        message: QueueMessage<T>,
        timeout: Duration,
    ) -> Result<(), EnqueueError<T>> {
        match tokio::time::timeout(timeout, self.slots.acquire()).await {
            Ok(Ok(permit)) => {
                permit.forget();
                self.push(message);
                Ok(())
            }
            // The semaphore is never closed; a timeout is the only miss.
            _ => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Err(EnqueueError::Full(message))
            }
        }
    }

    /// Enqueue without waiting; fails immediately when full.
    pub fn try_enqueue(&self, message: QueueMessage<T>) -> Result<(), EnqueueError<T>> {
        match self.slots.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.push(message);
                Ok(())
            }
            Err(_) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Err(EnqueueError::Full(message))
            }
        }
    }

    /// Wait for the next message. Callers select against a shutdown token.
    pub async fn dequeue(&self) -> QueueMessage<T> {
        let permit = self
            .items
            .acquire()
            .await
            .unwrap_or_else(|_| unreachable!("queue semaphore is never closed"));
        permit.forget();
        self.pop()
    }

    /// Take the next message if one is ready.
    pub fn try_dequeue(&self) -> Option<QueueMessage<T>> {
        let permit = self.items.try_acquire().ok()?;
        permit.forget();
        Some(self.pop())
    }

    fn push(&self, message: QueueMessage<T>) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let priority = message.priority;
        self.heap.lock().push(HeapEntry {
            priority,
            seq,
            message,
        });
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.items.add_permits(1);
    }

    fn pop(&self) -> QueueMessage<T> {
        let entry = self
            .heap
            .lock()
            .pop()
            .unwrap_or_else(|| unreachable!("item permit implies a queued message"));
        self.dequeued.fetch_add(1, Ordering::Relaxed);
        self.slots.add_permits(1);
        entry.message
    }

    /// Messages currently queued.
    pub fn len(&self) -> usize {
        self.items.available_permits()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            depth: self.len(),
            capacity: self.capacity,
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Summary of one dead-lettered message, without its payload.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterRecord {
    /// Envelope id.
    pub id: String,
    /// Channel of the payload.
    pub channel: ChannelType,
    /// Origin of the payload.
    pub source: String,
    /// Retries consumed before giving up.
    pub retries: u32,
    /// Why the message was abandoned.
    pub reason: String,
    /// When it was abandoned.
    pub at: DateTime<Utc>,
}

/// Terminal sink for messages that exhausted their retries.
///
/// Keeps a bounded ring of recent records for introspection; recovery is
/// out of scope.
pub struct DeadLetters {
    records: Mutex<VecDeque<DeadLetterRecord>>,
    keep: usize,
    total: AtomicU64,
}

impl DeadLetters {
    /// Create a sink that retains the most recent `keep` records.
    pub fn new(keep: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(keep)),
            keep,
            total: AtomicU64::new(0),
        }
    }

    /// Record an abandoned message.
    pub fn push<T>(&self, message: &QueueMessage<T>, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(
            id = %message.id,
            channel = %message.channel,
            retries = message.retries,
            %reason,
            "dead-lettered message"
        );
        let record = DeadLetterRecord {
            id: message.id.clone(),
            channel: message.channel,
            source: message.source.clone(),
            retries: message.retries,
            reason,
            at: Utc::now(),
        };
        let mut records = self.records.lock();
        if records.len() == self.keep {
            records.pop_front();
        }
        records.push_back(record);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Total dead-lettered since startup.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Recent records, oldest first.
    pub fn snapshot(&self) -> Vec<DeadLetterRecord> {
        self.records.lock().iter().cloned().collect()
    }
}
