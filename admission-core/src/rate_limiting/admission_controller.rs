//! The admission controller is the single authority that decides whether a prospective call to
//! the upstream provider may proceed now.
//!
//! # Reserve-then-settle
//!
//! Admission and accounting are one unit. When a call is admitted, its estimated cost is charged
//! to the ledger inside the same critical section as the admission check, and the caller receives
//! a [`Reservation`]. When the call completes, the caller settles the reservation with the actual
//! usage reported by the provider (or releases it if the call never happened). A concurrent
//! `try_admit` can therefore never observe the budget before an earlier admission was charged.
//!
//! The ledger and the queue share one mutex. No operation here blocks on another caller or
//! awaits: callers that have to wait suspend at their own call site.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use metrics::{counter, gauge};

use super::usage_ledger::{ReservationId, UsageLedger, WindowUsage};
use super::usage_reporter::UsageSnapshot;
use super::wait_queue::{QueuedRequest, WaitQueue};
use super::{
    ADMISSION_DECISIONS_METRIC, QUEUE_LENGTH_METRIC, QueueId, RateLimitResource,
    SETTLED_TOKENS_METRIC,
};
use crate::clock::{Clock, SystemClock};
use crate::config::RateLimitConfig;
use crate::error::{Error, ErrorDetails};

/// Outcome of [`AdmissionController::try_admit`].
#[must_use]
#[derive(Debug)]
pub enum Admission {
    /// The call may proceed. Its estimated cost is already charged.
    Admitted(Reservation),
    /// The call would exceed a budget right now.
    Denied,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }

    pub fn into_reservation(self) -> Option<Reservation> {
        match self {
            Admission::Admitted(reservation) => Some(reservation),
            Admission::Denied => None,
        }
    }
}

/// Outcome of [`AdmissionController::admit_from_queue`].
#[must_use]
#[derive(Debug)]
pub enum QueueAdmission {
    /// The request was at the head of the queue, fit the budget, and has left the queue.
    Admitted(Reservation),
    /// The request is still queued at `position`.
    Waiting { position: usize },
    /// The request is not queued (cancelled, already admitted, or never enqueued).
    NotQueued,
}

#[derive(Debug)]
struct ControllerState {
    ledger: UsageLedger,
    queue: WaitQueue,
}

pub struct AdmissionController {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<ControllerState>,
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("config", &self.config)
            .field("clock", &"<dyn Clock>")
            .finish_non_exhaustive()
    }
}

impl AdmissionController {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let window = config.window();
        Self {
            config,
            clock,
            state: Mutex::new(ControllerState {
                ledger: UsageLedger::new(window),
                queue: WaitQueue::new(),
            }),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    // Every mutation of the state finishes before anything that could panic runs,
    // so a poisoned lock still guards consistent data.
    fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_satisfiable(&self, estimated_tokens: u64) -> Result<(), Error> {
        if estimated_tokens > self.config.token_limit() {
            counter!(ADMISSION_DECISIONS_METRIC, "outcome" => "unsatisfiable").increment(1);
            return Err(Error::new(ErrorDetails::Unsatisfiable {
                resource: RateLimitResource::Token,
                requested: estimated_tokens,
                limit: self.config.token_limit(),
            }));
        }
        Ok(())
    }

    fn validate_queue_entry(&self, id: &QueueId, estimated_tokens: u64) -> Result<(), Error> {
        if id.is_empty() {
            return Err(Error::new(ErrorDetails::InvalidArgument {
                message: "queue id must not be empty".to_string(),
            }));
        }
        // Queueing a call that can never fit would make it wait forever.
        self.check_satisfiable(estimated_tokens)
    }

    fn fits(&self, usage: &WindowUsage, estimated_tokens: u64) -> bool {
        usage.requests.saturating_add(1) <= self.config.request_limit()
            && usage.tokens.saturating_add(estimated_tokens) <= self.config.token_limit()
    }

    /// Decides whether a call costing about `estimated_tokens` may proceed now.
    ///
    /// On admission the estimate is charged before the lock is released.
    /// Returns `Unsatisfiable` if the estimate alone exceeds the token limit,
    /// since such a call could never be admitted.
    #[tracing::instrument(skip(self), fields(admitted = tracing::field::Empty))]
    pub fn try_admit(self: &Arc<Self>, estimated_tokens: u64) -> Result<Admission, Error> {
        self.check_satisfiable(estimated_tokens)?;
        let now = self.clock.now();
        let reservation_id = {
            let mut state = self.lock_state();
            let usage = state.ledger.snapshot(now);
            if self.fits(&usage, estimated_tokens) {
                Some(state.ledger.reserve(estimated_tokens))
            } else {
                None
            }
        };
        tracing::Span::current().record("admitted", reservation_id.is_some());
        match reservation_id {
            Some(id) => {
                counter!(ADMISSION_DECISIONS_METRIC, "outcome" => "admitted").increment(1);
                Ok(Admission::Admitted(Reservation::new(
                    Arc::clone(self),
                    id,
                    estimated_tokens,
                )))
            }
            None => {
                counter!(ADMISSION_DECISIONS_METRIC, "outcome" => "denied").increment(1);
                tracing::debug!("Denied admission for {estimated_tokens} estimated tokens");
                Ok(Admission::Denied)
            }
        }
    }

    /// Admits `id` if it is at the head of the queue and its estimate fits the budget.
    ///
    /// The head check, the budget check, the removal from the queue, and the charge all happen
    /// under one lock, so a queued caller cannot lose its turn between them.
    #[tracing::instrument(skip_all, fields(queue_id = %id))]
    pub fn admit_from_queue(self: &Arc<Self>, id: &QueueId) -> QueueAdmission {
        let now = self.clock.now();
        let admitted = {
            let mut state = self.lock_state();
            let Some(position) = state.queue.position(id) else {
                return QueueAdmission::NotQueued;
            };
            if position != 0 {
                return QueueAdmission::Waiting { position };
            }
            let estimated_tokens = match state.queue.head() {
                Some(head) => head.estimated_tokens,
                None => return QueueAdmission::NotQueued,
            };
            let usage = state.ledger.snapshot(now);
            if !self.fits(&usage, estimated_tokens) {
                return QueueAdmission::Waiting { position: 0 };
            }
            state.queue.pop_head();
            gauge!(QUEUE_LENGTH_METRIC).set(state.queue.len() as f64);
            let reservation_id = state.ledger.reserve(estimated_tokens);
            (reservation_id, estimated_tokens)
        };
        let (reservation_id, estimated_tokens) = admitted;
        counter!(ADMISSION_DECISIONS_METRIC, "outcome" => "admitted_from_queue").increment(1);
        tracing::debug!("Admitted `{id}` from the head of the queue");
        QueueAdmission::Admitted(Reservation::new(
            Arc::clone(self),
            reservation_id,
            estimated_tokens,
        ))
    }

    /// Admits the call now if nobody is waiting and the budget allows, otherwise queues it
    /// under `id` and returns its position.
    ///
    /// The emptiness check, the budget check, and the enqueue all happen under one lock, so a
    /// new arrival can never overtake callers that are already queued.
    #[tracing::instrument(skip(self, id), fields(queue_id = %id))]
    pub fn try_admit_or_enqueue(
        self: &Arc<Self>,
        id: &QueueId,
        estimated_tokens: u64,
        priority: i32,
    ) -> Result<QueueAdmission, Error> {
        self.validate_queue_entry(id, estimated_tokens)?;
        let now = self.clock.now();
        let reservation_id = {
            let mut state = self.lock_state();
            let usage = state.ledger.snapshot(now);
            if state.queue.is_empty() && self.fits(&usage, estimated_tokens) {
                state.ledger.reserve(estimated_tokens)
            } else {
                let position = state.queue.enqueue(QueuedRequest {
                    id: id.clone(),
                    estimated_tokens,
                    enqueued_at: now,
                    priority,
                })?;
                gauge!(QUEUE_LENGTH_METRIC).set(state.queue.len() as f64);
                counter!(ADMISSION_DECISIONS_METRIC, "outcome" => "queued").increment(1);
                tracing::debug!("Queued `{id}` at position {position}");
                return Ok(QueueAdmission::Waiting { position });
            }
        };
        counter!(ADMISSION_DECISIONS_METRIC, "outcome" => "admitted").increment(1);
        Ok(QueueAdmission::Admitted(Reservation::new(
            Arc::clone(self),
            reservation_id,
            estimated_tokens,
        )))
    }

    /// Records a completed call that did not go through a reservation.
    ///
    /// This is always available so that calls which bypassed admission are still accounted for.
    pub fn record(&self, tokens_spent: u64) {
        let now = self.clock.now();
        self.lock_state().ledger.record(now, tokens_spent);
        counter!(SETTLED_TOKENS_METRIC).increment(tokens_spent);
    }

    /// Adds a denied call to the wait queue.
    pub fn enqueue(
        &self,
        id: impl Into<QueueId>,
        estimated_tokens: u64,
        priority: i32,
    ) -> Result<(), Error> {
        let id = id.into();
        self.validate_queue_entry(&id, estimated_tokens)?;
        let enqueued_at = self.clock.now();
        let mut state = self.lock_state();
        state.queue.enqueue(QueuedRequest {
            id,
            estimated_tokens,
            enqueued_at,
            priority,
        })?;
        gauge!(QUEUE_LENGTH_METRIC).set(state.queue.len() as f64);
        Ok(())
    }

    /// 0-indexed position of `id` in the queue, or `None` if it is not queued.
    pub fn position(&self, id: &QueueId) -> Option<usize> {
        self.lock_state().queue.position(id)
    }

    /// Removes `id` from the queue. Cancelling an id that is not queued returns `false`.
    pub fn cancel(&self, id: &QueueId) -> bool {
        let mut state = self.lock_state();
        let removed = state.queue.cancel(id);
        if removed {
            gauge!(QUEUE_LENGTH_METRIC).set(state.queue.len() as f64);
        }
        removed
    }

    /// Rate-implied wait for `id`; see [`WaitQueue::estimate_wait_seconds`].
    pub fn estimate_wait_seconds(&self, id: &QueueId) -> Option<u64> {
        self.lock_state().queue.estimate_wait_seconds(
            id,
            self.config.request_limit(),
            self.config.window_seconds(),
        )
    }

    pub fn queue_length(&self) -> usize {
        self.lock_state().queue.len()
    }

    /// Current usage, availability, and queue length.
    pub fn report(&self) -> UsageSnapshot {
        let now = self.clock.now();
        let (usage, queue_length) = {
            let mut state = self.lock_state();
            (state.ledger.snapshot(now), state.queue.len())
        };
        UsageSnapshot::new(&self.config, usage, queue_length)
    }

    fn settle_reservation(&self, id: ReservationId, actual_tokens: u64) {
        let now = self.clock.now();
        let estimated = self.lock_state().ledger.settle(now, id, actual_tokens);
        let Some(estimated) = estimated else {
            tracing::warn!("Tried to settle reservation {id:?}, which is no longer held");
            return;
        };
        if actual_tokens > estimated {
            tracing::warn!(
                "Actual usage exceeds reservation: {estimated} tokens estimated and {actual_tokens} used"
            );
        }
        counter!(SETTLED_TOKENS_METRIC).increment(actual_tokens);
    }

    fn release_reservation(&self, id: ReservationId) {
        if self.lock_state().ledger.release(id).is_none() {
            tracing::warn!("Tried to release reservation {id:?}, which is no longer held");
        }
    }
}

/// A provisional charge for an admitted call.
///
/// Settle it with the actual usage once the provider call completes, or release it if the call
/// was never made. Dropping an unresolved reservation releases it.
#[must_use]
#[derive(Debug)]
pub struct Reservation {
    controller: Arc<AdmissionController>,
    id: ReservationId,
    estimated_tokens: u64,
    resolved: bool,
}

impl Reservation {
    fn new(controller: Arc<AdmissionController>, id: ReservationId, estimated_tokens: u64) -> Self {
        Self {
            controller,
            id,
            estimated_tokens,
            resolved: false,
        }
    }

    pub fn estimated_tokens(&self) -> u64 {
        self.estimated_tokens
    }

    /// Replaces the estimate with the usage the provider actually reported.
    pub fn settle(mut self, actual_tokens: u64) {
        self.resolved = true;
        self.controller.settle_reservation(self.id, actual_tokens);
    }

    /// Gives the reserved budget back without recording any usage.
    pub fn release(mut self) {
        self.resolved = true;
        self.controller.release_reservation(self.id);
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.resolved {
            tracing::warn!(
                "Reservation for {} estimated tokens was dropped without being settled; releasing it",
                self.estimated_tokens
            );
            self.controller.release_reservation(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn make_controller(
        request_limit: u64,
        token_limit: u64,
    ) -> (Arc<AdmissionController>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let config = RateLimitConfig::new(60, request_limit, token_limit).unwrap();
        let controller = Arc::new(AdmissionController::with_clock(config, clock.clone()));
        (controller, clock)
    }

    #[test]
    fn test_admits_within_both_budgets() {
        let (controller, _clock) = make_controller(2, 1000);
        let admission = controller.try_admit(400).unwrap();
        assert!(admission.is_admitted());
        let snapshot = controller.report();
        assert_eq!(snapshot.requests_in_window, 1);
        assert_eq!(snapshot.tokens_in_window, 400);
        assert_eq!(snapshot.requests_in_flight, 1);
        admission.into_reservation().unwrap().settle(400);
    }

    #[test]
    fn test_denies_when_token_budget_would_be_exceeded() {
        let (controller, _clock) = make_controller(10, 1000);
        let first = controller.try_admit(600).unwrap();
        assert!(first.is_admitted());
        let second = controller.try_admit(600).unwrap();
        assert!(!second.is_admitted(), "600 + 600 > 1000 must be denied");
        first.into_reservation().unwrap().settle(600);
    }

    #[test]
    fn test_denies_when_request_budget_would_be_exceeded() {
        let (controller, _clock) = make_controller(2, 1_000_000);
        controller.record(1);
        controller.record(1);
        assert!(!controller.try_admit(1).unwrap().is_admitted());
    }

    #[test]
    fn test_unsatisfiable_is_distinct_from_denied() {
        let (controller, _clock) = make_controller(2, 1000);
        let err = controller.try_admit(1001).unwrap_err();
        assert!(matches!(
            err.get_details(),
            ErrorDetails::Unsatisfiable {
                resource: RateLimitResource::Token,
                requested: 1001,
                limit: 1000,
            }
        ));
        // Exactly the limit is satisfiable
        assert!(controller.try_admit(1000).unwrap().is_admitted());
    }

    #[test]
    fn test_settle_reconciles_to_actual_usage() {
        let (controller, _clock) = make_controller(10, 1000);
        let reservation = controller.try_admit(800).unwrap().into_reservation().unwrap();
        assert!(!controller.try_admit(300).unwrap().is_admitted());

        // The call used far less than estimated
        reservation.settle(200);
        let snapshot = controller.report();
        assert_eq!(snapshot.tokens_in_window, 200);
        assert_eq!(snapshot.tokens_in_flight, 0);
        assert!(controller.try_admit(300).unwrap().is_admitted());
    }

    #[test]
    fn test_release_returns_the_whole_reservation() {
        let (controller, _clock) = make_controller(1, 1000);
        let reservation = controller.try_admit(500).unwrap().into_reservation().unwrap();
        assert!(!controller.try_admit(1).unwrap().is_admitted());
        reservation.release();
        let snapshot = controller.report();
        assert_eq!(snapshot.requests_in_window, 0);
        assert_eq!(snapshot.tokens_in_window, 0);
    }

    #[test]
    fn test_dropping_a_reservation_releases_it() {
        let (controller, _clock) = make_controller(1, 1000);
        {
            let _admission = controller.try_admit(500).unwrap();
            assert_eq!(controller.report().requests_in_flight, 1);
        }
        assert_eq!(controller.report().requests_in_flight, 0);
        assert!(controller.try_admit(500).unwrap().is_admitted());
    }

    #[test]
    fn test_budget_frees_after_window() {
        let (controller, clock) = make_controller(1, 1000);
        controller.try_admit(100).unwrap().into_reservation().unwrap().settle(100);
        assert!(!controller.try_admit(100).unwrap().is_admitted());

        clock.advance(Duration::from_secs(60));
        assert!(
            !controller.try_admit(100).unwrap().is_admitted(),
            "a record exactly one window old is still inside the window"
        );

        clock.advance(Duration::from_secs(1));
        assert!(controller.try_admit(100).unwrap().is_admitted());
    }

    #[test]
    fn test_enqueue_validation() {
        let (controller, _clock) = make_controller(2, 1000);
        let err = controller.enqueue("", 10, 0).unwrap_err();
        assert!(matches!(
            err.get_details(),
            ErrorDetails::InvalidArgument { .. }
        ));

        let err = controller.enqueue("big", 5000, 0).unwrap_err();
        assert!(matches!(
            err.get_details(),
            ErrorDetails::Unsatisfiable { .. }
        ));
        assert_eq!(controller.position(&QueueId::from("big")), None);

        controller.enqueue("a", 10, 0).unwrap();
        let err = controller.enqueue("a", 10, 0).unwrap_err();
        assert!(matches!(
            err.get_details(),
            ErrorDetails::InvalidArgument { .. }
        ));
        assert_eq!(controller.queue_length(), 1);
    }

    #[test]
    fn test_cancel_twice() {
        let (controller, _clock) = make_controller(2, 1000);
        let id = QueueId::from("job");
        controller.enqueue(id.clone(), 10, 0).unwrap();
        assert!(controller.cancel(&id));
        assert!(!controller.cancel(&id));
        assert_eq!(controller.position(&id), None);
        assert_eq!(controller.estimate_wait_seconds(&id), None);
    }

    #[test]
    fn test_admit_from_queue_only_admits_the_head() {
        let (controller, clock) = make_controller(1, 1000);
        controller.record(10);
        controller.enqueue("low", 10, 0).unwrap();
        controller.enqueue("high", 10, 5).unwrap();

        let low = QueueId::from("low");
        let high = QueueId::from("high");
        assert!(matches!(
            controller.admit_from_queue(&low),
            QueueAdmission::Waiting { position: 1 }
        ));
        // Head, but the request budget is full
        assert!(matches!(
            controller.admit_from_queue(&high),
            QueueAdmission::Waiting { position: 0 }
        ));

        clock.advance(Duration::from_secs(61));
        assert!(matches!(
            controller.admit_from_queue(&low),
            QueueAdmission::Waiting { position: 1 }
        ));
        let QueueAdmission::Admitted(reservation) = controller.admit_from_queue(&high) else {
            panic!("Expected the head of the queue to be admitted");
        };
        assert_eq!(reservation.estimated_tokens(), 10);
        assert_eq!(controller.position(&high), None);
        assert_eq!(controller.position(&low), Some(0));
        // Cancelling after admission is a no-op
        assert!(!controller.cancel(&high));
        reservation.settle(10);
    }

    #[test]
    fn test_try_admit_or_enqueue_admits_when_nobody_waits() {
        let (controller, _clock) = make_controller(2, 1000);
        let QueueAdmission::Admitted(reservation) = controller
            .try_admit_or_enqueue(&QueueId::from("a"), 600, 0)
            .unwrap()
        else {
            panic!("Expected admission with an empty queue and a free budget");
        };
        assert_eq!(controller.queue_length(), 0);

        // Over budget with an empty queue: queued at the head
        assert!(matches!(
            controller
                .try_admit_or_enqueue(&QueueId::from("b"), 600, 0)
                .unwrap(),
            QueueAdmission::Waiting { position: 0 }
        ));
        reservation.settle(600);
    }

    #[test]
    fn test_new_arrival_cannot_overtake_the_queue() {
        let (controller, _clock) = make_controller(1000, 1000);
        let in_flight = controller.try_admit(150).unwrap().into_reservation().unwrap();
        // 150 + 900 > 1000, so the big call has to wait
        controller.enqueue("big", 900, 0).unwrap();

        // The small call fits the budget on its own, but the queue is not empty
        let small = QueueId::from("small");
        assert!(matches!(
            controller.try_admit_or_enqueue(&small, 150, 0).unwrap(),
            QueueAdmission::Waiting { position: 1 }
        ));
        let snapshot = controller.report();
        assert_eq!(snapshot.requests_in_flight, 1);
        assert_eq!(snapshot.tokens_in_window, 150);

        // A higher priority still goes ahead of earlier arrivals
        assert!(matches!(
            controller
                .try_admit_or_enqueue(&QueueId::from("urgent"), 10, 9)
                .unwrap(),
            QueueAdmission::Waiting { position: 0 }
        ));

        in_flight.release();
        let QueueAdmission::Admitted(urgent) = controller.admit_from_queue(&QueueId::from("urgent"))
        else {
            panic!("Expected the head of the queue to be admitted");
        };
        let QueueAdmission::Admitted(big) = controller.admit_from_queue(&QueueId::from("big")) else {
            panic!("Expected the big call to be admitted next");
        };
        assert!(matches!(
            controller.admit_from_queue(&small),
            QueueAdmission::Waiting { position: 0 }
        ));
        urgent.release();
        big.release();
    }

    #[test]
    fn test_try_admit_or_enqueue_validation() {
        let (controller, _clock) = make_controller(2, 1000);
        let err = controller
            .try_admit_or_enqueue(&QueueId::from(""), 10, 0)
            .unwrap_err();
        assert!(matches!(
            err.get_details(),
            ErrorDetails::InvalidArgument { .. }
        ));
        let err = controller
            .try_admit_or_enqueue(&QueueId::from("huge"), 1001, 0)
            .unwrap_err();
        assert!(matches!(
            err.get_details(),
            ErrorDetails::Unsatisfiable { .. }
        ));
        assert_eq!(controller.queue_length(), 0);
    }

    #[test]
    fn test_admit_from_queue_not_queued() {
        let (controller, _clock) = make_controller(1, 1000);
        assert!(matches!(
            controller.admit_from_queue(&QueueId::from("ghost")),
            QueueAdmission::NotQueued
        ));
    }

    #[test]
    fn test_estimate_wait_seconds_uses_request_rate() {
        let (controller, _clock) = make_controller(2, 1000);
        controller.enqueue("a", 10, 0).unwrap();
        controller.enqueue("b", 10, 0).unwrap();
        assert_eq!(controller.estimate_wait_seconds(&QueueId::from("a")), Some(0));
        assert_eq!(controller.estimate_wait_seconds(&QueueId::from("b")), Some(30));
    }

    #[test]
    fn test_record_always_succeeds_even_over_budget() {
        let (controller, _clock) = make_controller(1, 100);
        controller.record(500);
        controller.record(500);
        let snapshot = controller.report();
        assert_eq!(snapshot.requests_in_window, 2);
        assert_eq!(snapshot.tokens_in_window, 1000);
        assert_eq!(snapshot.requests_available, 0);
        assert_eq!(snapshot.tokens_available, 0);
    }
}
