//! Slot allocator: the only writer of a scholarship's `available` count.
//!
//! Every reserve/release is a read followed by a conditional write on the
//! counter's version. Two callers that read the same version cannot both
//! succeed, so at most `available` reservations are ever granted, across
//! threads and across service instances sharing the same store. Contention
//! is scoped to one scholarship; nothing here locks more than one counter.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use super::domain::{ReservationToken, ScholarshipId, SlotCounter};
use super::repository::{RepositoryError, ScholarshipRepository};

/// Result of a reservation attempt. `token` is present exactly when `granted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReservationOutcome {
    pub granted: bool,
    pub remaining_slots: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<ReservationToken>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    #[error("scholarship {0} has no slot counter")]
    UnknownScholarship(ScholarshipId),
    #[error("slot counter for {scholarship_id} stayed contended after {attempts} attempts")]
    Contention {
        scholarship_id: ScholarshipId,
        attempts: u32,
    },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct SlotAllocator<S> {
    store: Arc<S>,
    max_attempts: u32,
}

impl<S> SlotAllocator<S>
where
    S: ScholarshipRepository,
{
    pub fn new(store: Arc<S>, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Take one slot if any remain. A full scholarship is `granted = false`, not an error.
    pub fn reserve(&self, scholarship_id: &ScholarshipId) -> Result<ReservationOutcome, SlotError> {
        for attempt in 1..=self.max_attempts {
            let current = self.counter(scholarship_id)?;
            if current.available == 0 {
                return Ok(ReservationOutcome {
                    granted: false,
                    remaining_slots: 0,
                    token: None,
                });
            }

            match self.store.swap_slots(&current, current.available - 1) {
                Ok(updated) => {
                    let token = ReservationToken::issue();
                    debug!(%scholarship_id, %token, remaining = updated.available, "slot reserved");
                    return Ok(ReservationOutcome {
                        granted: true,
                        remaining_slots: updated.available,
                        token: Some(token),
                    });
                }
                Err(RepositoryError::VersionConflict) => {
                    debug!(%scholarship_id, attempt, "slot counter moved, retrying reserve");
                    std::thread::yield_now();
                }
                Err(other) => return Err(other.into()),
            }
        }

        Err(SlotError::Contention {
            scholarship_id: scholarship_id.clone(),
            attempts: self.max_attempts,
        })
    }

    /// Give one slot back, never exceeding the scholarship's total. Returns the new count.
    pub fn release(&self, scholarship_id: &ScholarshipId) -> Result<u32, SlotError> {
        for attempt in 1..=self.max_attempts {
            let current = self.counter(scholarship_id)?;
            if current.available >= current.total {
                warn!(%scholarship_id, total = current.total, "release on a full counter ignored");
                return Ok(current.available);
            }

            match self.store.swap_slots(&current, current.available + 1) {
                Ok(updated) => {
                    debug!(%scholarship_id, remaining = updated.available, "slot released");
                    return Ok(updated.available);
                }
                Err(RepositoryError::VersionConflict) => {
                    debug!(%scholarship_id, attempt, "slot counter moved, retrying release");
                    std::thread::yield_now();
                }
                Err(other) => return Err(other.into()),
            }
        }

        Err(SlotError::Contention {
            scholarship_id: scholarship_id.clone(),
            attempts: self.max_attempts,
        })
    }

    pub fn counter(&self, scholarship_id: &ScholarshipId) -> Result<SlotCounter, SlotError> {
        self.store
            .slots(scholarship_id)?
            .ok_or_else(|| SlotError::UnknownScholarship(scholarship_id.clone()))
    }
}
