//! Application lifecycle: the only place an application's status may change.
//!
//! ```text
//! DRAFT ──submit──▶ SUBMITTED ──begin_review──▶ UNDER_REVIEW ──approve──▶ APPROVED
//!   │                   │                          │    └──reject──▶ REJECTED
//!   └──────withdraw─────┴──────────withdraw────────┘                    │
//!                                ▼                                      │
//!                            WITHDRAWN ◀────────────withdraw────────────┘ (APPROVED only)
//! ```
//!
//! Transitions are computed in memory and never block. Entering APPROVED
//! requires a reservation token; leaving APPROVED for WITHDRAWN asks for the
//! token to be handed back as [`SlotEffect::Release`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{Application, ApplicationStatus, ReservationToken, ReviewerId};

/// Trigger names, independent of their payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Submit,
    BeginReview,
    Approve,
    Reject,
    Withdraw,
}

impl Trigger {
    pub const ALL: [Self; 5] = [
        Self::Submit,
        Self::BeginReview,
        Self::Approve,
        Self::Reject,
        Self::Withdraw,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Trigger::Submit => "submit",
            Trigger::BeginReview => "begin_review",
            Trigger::Approve => "approve",
            Trigger::Reject => "reject",
            Trigger::Withdraw => "withdraw",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A trigger together with the data it needs.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Submit {
        eligible: bool,
    },
    BeginReview {
        reviewer: ReviewerId,
    },
    Approve {
        reviewer: ReviewerId,
        reservation: ReservationToken,
        comments: Option<String>,
    },
    Reject {
        reviewer: ReviewerId,
        comments: Option<String>,
    },
    Withdraw,
}

impl LifecycleEvent {
    pub fn trigger(&self) -> Trigger {
        match self {
            LifecycleEvent::Submit { .. } => Trigger::Submit,
            LifecycleEvent::BeginReview { .. } => Trigger::BeginReview,
            LifecycleEvent::Approve { .. } => Trigger::Approve,
            LifecycleEvent::Reject { .. } => Trigger::Reject,
            LifecycleEvent::Withdraw => Trigger::Withdraw,
        }
    }

    fn reviewer(&self) -> Option<&ReviewerId> {
        match self {
            LifecycleEvent::BeginReview { reviewer }
            | LifecycleEvent::Approve { reviewer, .. }
            | LifecycleEvent::Reject { reviewer, .. } => Some(reviewer),
            LifecycleEvent::Submit { .. } | LifecycleEvent::Withdraw => None,
        }
    }
}

/// Capacity side effect the caller must carry out once the transition is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotEffect {
    None,
    Release(ReservationToken),
}

/// Result of a permitted transition. `application` is the next record state.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub application: Application,
    pub from: ApplicationStatus,
    pub to: ApplicationStatus,
    pub slot_effect: SlotEffect,
    /// False for idempotent no-ops such as a repeated claim by the same reviewer.
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot {trigger} an application that is {from}")]
    Invalid {
        from: ApplicationStatus,
        trigger: Trigger,
    },
    #[error("application is already under review by {holder}")]
    ClaimedByOther { holder: ReviewerId },
    #[error("submission refused: mandatory criteria not met")]
    Ineligible,
}

/// Target status for a `(state, trigger)` pair, or `None` if the pair is not in the table.
pub const fn target(from: ApplicationStatus, trigger: Trigger) -> Option<ApplicationStatus> {
    use ApplicationStatus::*;

    match (from, trigger) {
        (Draft, Trigger::Submit) => Some(Submitted),
        (Submitted, Trigger::BeginReview) => Some(UnderReview),
        (UnderReview, Trigger::BeginReview) => Some(UnderReview),
        (UnderReview, Trigger::Approve) => Some(Approved),
        (UnderReview, Trigger::Reject) => Some(Rejected),
        (Draft | Submitted | UnderReview | Approved, Trigger::Withdraw) => Some(Withdrawn),
        _ => None,
    }
}

/// Check a reviewer-driven trigger without producing a new record.
///
/// Lets the engine refuse early, before it spends a slot reservation.
pub fn ensure_permitted(
    application: &Application,
    trigger: Trigger,
    reviewer: Option<&ReviewerId>,
) -> Result<ApplicationStatus, TransitionError> {
    let to = target(application.status, trigger).ok_or(TransitionError::Invalid {
        from: application.status,
        trigger,
    })?;

    if application.status == ApplicationStatus::UnderReview
        && matches!(
            trigger,
            Trigger::BeginReview | Trigger::Approve | Trigger::Reject
        )
    {
        if let (Some(holder), Some(reviewer)) = (application.reviewer.as_ref(), reviewer) {
            if holder != reviewer {
                return Err(TransitionError::ClaimedByOther {
                    holder: holder.clone(),
                });
            }
        }
    }

    Ok(to)
}

/// Apply `event` to `application`, returning the next state or a refusal.
///
/// The input record is never modified; a refused transition leaves the caller
/// holding the unchanged original.
pub fn transition(
    application: &Application,
    event: LifecycleEvent,
    at: DateTime<Utc>,
) -> Result<Transition, TransitionError> {
    let from = application.status;
    let to = ensure_permitted(application, event.trigger(), event.reviewer())?;
    let mut next = application.clone();
    let mut slot_effect = SlotEffect::None;

    match event {
        LifecycleEvent::Submit { eligible } => {
            if !eligible {
                return Err(TransitionError::Ineligible);
            }
            next.submitted_at = Some(at);
        }
        LifecycleEvent::BeginReview { reviewer } => {
            if from == ApplicationStatus::UnderReview {
                return Ok(Transition {
                    application: next,
                    from,
                    to,
                    slot_effect,
                    changed: false,
                });
            }
            next.reviewer = Some(reviewer);
        }
        LifecycleEvent::Approve {
            reviewer,
            reservation,
            comments,
        } => {
            next.reviewer = Some(reviewer);
            next.reservation = Some(reservation);
            next.comments = comments;
            next.decided_at = Some(at);
        }
        LifecycleEvent::Reject { reviewer, comments } => {
            next.reviewer = Some(reviewer);
            next.comments = comments;
            next.decided_at = Some(at);
        }
        LifecycleEvent::Withdraw => {
            // The token stays on the record until the engine confirms the release.
            if let Some(token) = next.reservation {
                slot_effect = SlotEffect::Release(token);
            }
        }
    }

    next.status = to;
    Ok(Transition {
        application: next,
        from,
        to,
        slot_effect,
        changed: true,
    })
}
