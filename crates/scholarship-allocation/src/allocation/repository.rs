use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    Actor, ApplicantId, ApplicantProfile, Application, ApplicationId, ApplicationStatus,
    ReservationToken, ReviewerId, Scholarship, ScholarshipId, SlotCounter,
};

/// Application storage. Updates are optimistic: the stored version must still
/// equal `record.version` or the write is refused with `VersionConflict`.
pub trait ApplicationRepository: Send + Sync {
    /// Persist a new record. Fails with `Conflict` when the (scholarship, applicant)
    /// pair already has a non-withdrawn application; the check and the write are atomic.
    fn insert(&self, record: Application) -> Result<Application, RepositoryError>;
    /// Compare-and-swap on `record.version`. Returns the stored record with its new version.
    fn update(&self, record: Application) -> Result<Application, RepositoryError>;
    fn fetch(&self, id: &ApplicationId) -> Result<Option<Application>, RepositoryError>;
    fn find_active(
        &self,
        scholarship_id: &ScholarshipId,
        applicant_id: &ApplicantId,
    ) -> Result<Option<Application>, RepositoryError>;
    fn list_for_scholarship(
        &self,
        scholarship_id: &ScholarshipId,
    ) -> Result<Vec<Application>, RepositoryError>;
}

/// Scholarship metadata (read-only here) plus the slot counter the allocator owns.
pub trait ScholarshipRepository: Send + Sync {
    fn scholarship(&self, id: &ScholarshipId) -> Result<Option<Scholarship>, RepositoryError>;
    fn slots(&self, id: &ScholarshipId) -> Result<Option<SlotCounter>, RepositoryError>;
    /// Set `available` only if the stored counter still has `expected.version`.
    fn swap_slots(
        &self,
        expected: &SlotCounter,
        available: u32,
    ) -> Result<SlotCounter, RepositoryError>;
}

/// Append-only record of application state changes.
pub trait AuditLog: Send + Sync {
    fn append(&self, entry: AuditEntry) -> Result<(), RepositoryError>;
    fn history(&self, id: &ApplicationId) -> Result<Vec<AuditEntry>, RepositoryError>;
}

/// Everything the engine needs from its storage layer.
pub trait AllocationStore:
    ApplicationRepository + ScholarshipRepository + AuditLog + 'static
{
}

impl<T> AllocationStore for T where
    T: ApplicationRepository + ScholarshipRepository + AuditLog + 'static
{
}

/// Read access to the identity/profile service.
pub trait ProfileDirectory: Send + Sync {
    fn profile(&self, id: &ApplicantId) -> Result<Option<ApplicantProfile>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("record was modified concurrently")]
    VersionConflict,
    #[error("write violates a storage constraint: {0}")]
    Constraint(String),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// One persisted state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub application_id: ApplicationId,
    pub from: Option<ApplicationStatus>,
    pub to: ApplicationStatus,
    pub actor: Actor,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation: Option<ReservationToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Outbound hook toward the notification service.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, notice: AllocationNotice) -> Result<(), NotificationError>;
}

/// Allocation events other services may act on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AllocationNotice {
    ApplicationApproved {
        application_id: ApplicationId,
        scholarship_id: ScholarshipId,
        applicant_id: ApplicantId,
        remaining_slots: u32,
    },
    CapacityExhausted {
        application_id: ApplicationId,
        scholarship_id: ScholarshipId,
        reviewer: ReviewerId,
    },
    SlotReleased {
        application_id: ApplicationId,
        scholarship_id: ScholarshipId,
        remaining_slots: u32,
    },
}

impl AllocationNotice {
    pub fn template(&self) -> &'static str {
        match self {
            AllocationNotice::ApplicationApproved { .. } => "application_approved",
            AllocationNotice::CapacityExhausted { .. } => "capacity_exhausted",
            AllocationNotice::SlotReleased { .. } => "slot_released",
        }
    }
}

/// Notification dispatch error.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}
