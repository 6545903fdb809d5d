//! Sliding-window usage accounting.
//!
//! Settled usage is kept oldest-first in a `VecDeque` so that expiring old records is a prefix
//! trim. Running totals are maintained on append and evict, so a read never scans live records.
//! There is no timer: records are only evicted by [`UsageLedger::snapshot`].
//!
//! In-flight calls hold a provisional charge (their estimated tokens and one request) that counts
//! against the window until it is settled or released. Provisional charges do not expire with
//! time, since the call they belong to is still consuming budget.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// One finished call's actual cost.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UsageRecord {
    pub completed_at: Instant,
    pub tokens_spent: u64,
}

/// Identifies a provisional charge held by an in-flight call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ReservationId(u64);

/// Usage inside the window at the time of a snapshot.
///
/// `requests` and `tokens` include the in-flight charges.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WindowUsage {
    pub requests: u64,
    pub tokens: u64,
    pub requests_in_flight: u64,
    pub tokens_in_flight: u64,
}

#[derive(Debug)]
pub struct UsageLedger {
    window: Duration,
    records: VecDeque<UsageRecord>,
    /// Sum of `tokens_spent` over `records`
    settled_tokens: u64,
    pending: HashMap<ReservationId, u64>,
    /// Sum of the values in `pending`
    pending_tokens: u64,
    next_reservation_id: u64,
}

impl UsageLedger {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            records: VecDeque::new(),
            settled_tokens: 0,
            pending: HashMap::new(),
            pending_tokens: 0,
            next_reservation_id: 0,
        }
    }

    /// Appends a completed call to the ledger.
    pub fn record(&mut self, now: Instant, tokens_spent: u64) {
        // Records must stay ordered for the prefix trim in `evict_expired`.
        let completed_at = match self.records.back() {
            Some(last) if last.completed_at > now => last.completed_at,
            _ => now,
        };
        self.records.push_back(UsageRecord {
            completed_at,
            tokens_spent,
        });
        self.settled_tokens = self.settled_tokens.saturating_add(tokens_spent);
    }

    /// Evicts expired records, then returns the usage inside `[now - window, now]`.
    pub fn snapshot(&mut self, now: Instant) -> WindowUsage {
        self.evict_expired(now);
        let requests_in_flight = self.pending.len() as u64;
        WindowUsage {
            requests: (self.records.len() as u64).saturating_add(requests_in_flight),
            tokens: self.settled_tokens.saturating_add(self.pending_tokens),
            requests_in_flight,
            tokens_in_flight: self.pending_tokens,
        }
    }

    /// Takes a provisional charge of `estimated_tokens` for a call that is about to start.
    pub fn reserve(&mut self, estimated_tokens: u64) -> ReservationId {
        let id = ReservationId(self.next_reservation_id);
        self.next_reservation_id += 1;
        self.pending.insert(id, estimated_tokens);
        self.pending_tokens = self.pending_tokens.saturating_add(estimated_tokens);
        id
    }

    /// Replaces the provisional charge with a settled record of `actual_tokens` stamped at `now`.
    ///
    /// Returns the estimate that was charged, or `None` if the reservation is unknown
    /// (already settled or released), in which case nothing is recorded.
    pub fn settle(&mut self, now: Instant, id: ReservationId, actual_tokens: u64) -> Option<u64> {
        let estimated = self.remove_pending(id)?;
        self.record(now, actual_tokens);
        Some(estimated)
    }

    /// Drops the provisional charge without recording any usage.
    pub fn release(&mut self, id: ReservationId) -> Option<u64> {
        self.remove_pending(id)
    }

    fn remove_pending(&mut self, id: ReservationId) -> Option<u64> {
        let estimated = self.pending.remove(&id)?;
        self.pending_tokens = self.pending_tokens.saturating_sub(estimated);
        Some(estimated)
    }

    fn evict_expired(&mut self, now: Instant) {
        // Early in the life of the process there may be nothing old enough to expire.
        let Some(cutoff) = now.checked_sub(self.window) else {
            return;
        };
        while let Some(oldest) = self.records.front() {
            if oldest.completed_at >= cutoff {
                break;
            }
            self.settled_tokens = self.settled_tokens.saturating_sub(oldest.tokens_spent);
            self.records.pop_front();
        }
    }
}
