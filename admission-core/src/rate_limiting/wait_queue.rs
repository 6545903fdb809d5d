//! Fairness-ordered queue of calls that were denied immediate admission.
//!
//! Entries are kept sorted by `(priority DESC, enqueued_at ASC)` at all times, so that every read
//! of the queue order agrees while the queue is unmodified. The queue never removes entries on its
//! own; callers leave it by being admitted from the head or by cancelling.

use std::cmp::{Ordering, Reverse};
use std::time::Instant;

use super::QueueId;
use crate::error::{Error, ErrorDetails};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedRequest {
    pub id: QueueId,
    pub estimated_tokens: u64,
    pub enqueued_at: Instant,
    /// Higher is served first
    pub priority: i32,
}

impl QueuedRequest {
    fn sort_key(&self) -> (Reverse<i32>, Instant) {
        (Reverse(self.priority), self.enqueued_at)
    }

    /// Queue order: strict priority, FIFO within equal priority.
    fn queue_order(&self, other: &QueuedRequest) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

#[derive(Debug, Default)]
pub struct WaitQueue {
    entries: Vec<QueuedRequest>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts `request` in queue order and returns its position. Ties go behind existing
    /// entries.
    pub fn enqueue(&mut self, request: QueuedRequest) -> Result<usize, Error> {
        if self.position(&request.id).is_some() {
            return Err(Error::new(ErrorDetails::InvalidArgument {
                message: format!("request `{}` is already queued", request.id),
            }));
        }
        let index = self
            .entries
            .partition_point(|existing| existing.queue_order(&request) != Ordering::Greater);
        self.entries.insert(index, request);
        Ok(index)
    }

    /// 0-indexed rank of `id`, or `None` if it is not queued.
    pub fn position(&self, id: &QueueId) -> Option<usize> {
        self.entries.iter().position(|entry| &entry.id == id)
    }

    /// Removes `id` from the queue. Returns whether it was present.
    pub fn cancel(&mut self, id: &QueueId) -> bool {
        match self.position(id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn head(&self) -> Option<&QueuedRequest> {
        self.entries.first()
    }

    pub fn pop_head(&mut self) -> Option<QueuedRequest> {
        if self.entries.is_empty() {
            return None;
        }
        Some(self.entries.remove(0))
    }

    /// Seconds until `id` reaches the head, assuming requests clear the window at the
    /// steady rate of `request_limit / window_seconds`.
    ///
    /// This ignores token-budget contention, so large calls ahead in the queue can make the
    /// real wait longer than the estimate.
    pub fn estimate_wait_seconds(
        &self,
        id: &QueueId,
        request_limit: u64,
        window_seconds: u64,
    ) -> Option<u64> {
        let position = self.position(id)? as u64;
        Some(
            position
                .saturating_mul(window_seconds)
                .div_ceil(request_limit.max(1)),
        )
    }

    #[cfg(test)]
    fn iter(&self) -> impl Iterator<Item = &QueuedRequest> {
        self.entries.iter()
    }
}
