//! Delayed fetch queue
//!
//! Attempts wait here until their not-before instant. Retries are pushed with
//! the backoff delay instead of sleeping in a task, so a backing-off attempt
//! holds no worker slot. Ties are broken by insertion order, which keeps
//! listing pages ahead of the detail work they discover.

use crate::state::FetchAttempt;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;
use tokio::time::Instant;

/// An attempt waiting in the queue
#[derive(Debug)]
pub struct QueuedFetch {
    /// Earliest instant the attempt may be dispatched
    pub not_before: Instant,

    /// Insertion sequence number
    seq: u64,

    pub attempt: FetchAttempt,
}

// Earliest not-before first; BinaryHeap is a max-heap so the comparison is reversed
impl Ord for QueuedFetch {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .not_before
            .cmp(&self.not_before)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedFetch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedFetch {
    fn eq(&self, other: &Self) -> bool {
        self.not_before == other.not_before && self.seq == other.seq
    }
}

impl Eq for QueuedFetch {}

/// Not-before priority queue of fetch attempts
#[derive(Debug, Default)]
pub struct Scheduler {
    queue: BinaryHeap<QueuedFetch>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an attempt for immediate dispatch
    pub fn push_now(&mut self, attempt: FetchAttempt) {
        self.push_at(Instant::now(), attempt);
    }

    /// Queues an attempt to become ready after `delay`
    pub fn push_after(&mut self, delay: Duration, attempt: FetchAttempt) {
        self.push_at(Instant::now() + delay, attempt);
    }

    pub fn push_at(&mut self, not_before: Instant, attempt: FetchAttempt) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(QueuedFetch {
            not_before,
            seq,
            attempt,
        });
    }

    /// Pops the next attempt whose not-before instant has passed
    ///
    /// # Arguments
    ///
    /// * `now` - The current instant
    ///
    /// # Returns
    ///
    /// * `Some(FetchAttempt)` - A ready attempt
    /// * `None` - The queue is empty or nothing is due yet
    pub fn pop_ready(&mut self, now: Instant) -> Option<FetchAttempt> {
        if self.queue.peek()?.not_before > now {
            return None;
        }
        self.queue.pop().map(|queued| queued.attempt)
    }

    /// Instant the earliest queued attempt becomes ready
    pub fn next_due(&self) -> Option<Instant> {
        self.queue.peek().map(|queued| queued.not_before)
    }

    /// Drops every queued attempt, returning them
    pub fn drain(&mut self) -> Vec<FetchAttempt> {
        self.queue.drain().map(|queued| queued.attempt).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
