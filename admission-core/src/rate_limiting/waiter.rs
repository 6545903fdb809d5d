//! Caller-side waiting for admission.
//!
//! The controller never blocks: a caller that cannot be admitted right away is queued by
//! [`AdmissionController::try_admit_or_enqueue`] and then asks again with
//! [`AdmissionController::admit_from_queue`] every `poll_interval` until it is admitted from the
//! head of the queue or `max_wait` runs out. The waiting caller suspends on a tokio
//! timer at its own call site, so other callers keep using the controller meanwhile.

use std::sync::Arc;

use tokio::time::Instant;

use super::QueueId;
use super::admission_controller::{AdmissionController, QueueAdmission, Reservation};
use crate::config::WaitConfig;
use crate::error::{Error, ErrorDetails};

#[derive(Clone, Debug)]
pub struct AdmissionRequest {
    /// Identifier to queue under. A fresh id is generated if this is `None`.
    pub id: Option<QueueId>,
    pub estimated_tokens: u64,
    pub priority: i32,
}

/// Removes the caller's queue entry if the wait ends without an admission,
/// including when the waiting future is dropped.
struct QueueSlot<'a> {
    controller: &'a AdmissionController,
    id: QueueId,
    armed: bool,
}

impl QueueSlot<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        if self.armed && self.controller.cancel(&self.id) {
            tracing::debug!("Removed `{}` from the wait queue", self.id);
        }
    }
}

/// Admits the request immediately if nobody is queued and the budget allows, otherwise waits
/// in the queue.
///
/// Returns `AdmissionTimeout` once `wait.max_wait()` has elapsed, and `AdmissionCancelled`
/// if someone else cancels the queue entry while we wait.
pub async fn wait_for_admission(
    controller: &Arc<AdmissionController>,
    request: AdmissionRequest,
    wait: &WaitConfig,
) -> Result<Reservation, Error> {
    let AdmissionRequest {
        id,
        estimated_tokens,
        priority,
    } = request;
    let id = id.unwrap_or_else(QueueId::generate);
    if let QueueAdmission::Admitted(reservation) =
        controller.try_admit_or_enqueue(&id, estimated_tokens, priority)?
    {
        return Ok(reservation);
    }
    let mut slot = QueueSlot {
        controller,
        id,
        armed: true,
    };

    let started = Instant::now();
    let deadline = started + wait.max_wait();
    loop {
        match controller.admit_from_queue(&slot.id) {
            QueueAdmission::Admitted(reservation) => {
                slot.disarm();
                tracing::debug!(
                    "Admitted `{}` after waiting {:?}",
                    slot.id,
                    started.elapsed()
                );
                return Ok(reservation);
            }
            QueueAdmission::Waiting { position } => {
                tracing::trace!("`{}` is waiting at position {position}", slot.id);
            }
            QueueAdmission::NotQueued => {
                slot.disarm();
                return Err(Error::new(ErrorDetails::AdmissionCancelled {
                    id: slot.id.to_string(),
                }));
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::new(ErrorDetails::AdmissionTimeout {
                id: slot.id.to_string(),
                waited: now - started,
            }));
        }
        tokio::time::sleep_until(deadline.min(now + wait.poll_interval())).await;
    }
}
