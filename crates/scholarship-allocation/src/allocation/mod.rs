//! Scholarship award allocation: eligibility gating, the application
//! lifecycle, and concurrency-safe slot accounting.
//!
//! [`AllocationEngine`] is the entry point. It composes the criteria
//! evaluator, the lifecycle state machine, and the [`SlotAllocator`], and
//! persists through the traits in [`repository`].

pub mod clock;
pub mod criteria;
pub mod domain;
pub mod engine;
pub mod lifecycle;
pub mod memory;
pub mod repository;
pub mod router;
pub mod seed;
pub mod slots;
pub mod views;

#[cfg(test)]
mod tests;

pub use clock::{Clock, FixedClock, SystemClock};
pub use criteria::{evaluate, Criterion, CriterionFault, CriterionRule, EligibilityVerdict};
pub use domain::{
    Actor, ApplicantId, ApplicantProfile, Application, ApplicationId, ApplicationStatus,
    ApplicationWindow, AwardAmount, ReservationToken, ReviewAction, ReviewerId, Scholarship,
    ScholarshipId, ScholarshipStatus, SlotCounter,
};
pub use engine::{
    AllocationEngine, AllocationError, AllocationSummary, DecisionOutcome, SubmissionReceipt,
};
pub use lifecycle::{SlotEffect, Transition, TransitionError, Trigger};
pub use memory::{InMemoryAllocationStore, InMemoryNotificationSink};
pub use repository::{
    AllocationNotice, AllocationStore, ApplicationRepository, AuditEntry, AuditLog,
    NotificationError, NotificationSink, ProfileDirectory, RepositoryError,
    ScholarshipRepository,
};
pub use router::allocation_router;
pub use seed::{SeedCatalog, SeedError};
pub use slots::{ReservationOutcome, SlotAllocator, SlotError};
pub use views::{ApplicationView, DecisionView, SlotView, SubmissionView};
