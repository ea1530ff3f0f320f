use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::Response;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};

use crate::allocation::clock::FixedClock;
use crate::allocation::criteria::{Criterion, CriterionRule};
use crate::allocation::domain::{
    ApplicantId, ApplicantProfile, Application, ApplicationId, ApplicationStatus,
    ApplicationWindow, AwardAmount, ReviewerId, Scholarship, ScholarshipId, ScholarshipStatus,
    SlotCounter,
};
use crate::allocation::engine::AllocationEngine;
use crate::allocation::memory::{InMemoryAllocationStore, InMemoryNotificationSink};
use crate::allocation::repository::{
    AllocationNotice, ApplicationRepository, AuditEntry, AuditLog, NotificationError,
    NotificationSink, ProfileDirectory, RepositoryError, ScholarshipRepository,
};
use crate::config::AllocationConfig;

pub(super) type MemoryEngine =
    AllocationEngine<InMemoryAllocationStore, InMemoryAllocationStore, InMemoryNotificationSink>;

pub(super) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 9, 30, 0)
        .single()
        .expect("valid instant")
}

pub(super) fn day(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, month, day).expect("valid date")
}

pub(super) fn scholarship_id() -> ScholarshipId {
    ScholarshipId::new("sch-merit")
}

pub(super) fn reviewer() -> ReviewerId {
    ReviewerId::new("rev-ada")
}

pub(super) fn scholarship(total_slots: u32) -> Scholarship {
    Scholarship {
        id: scholarship_id(),
        title: "Merit Award".to_string(),
        amount: AwardAmount {
            minor_units: 250_000,
            currency: "USD".to_string(),
        },
        total_slots,
        window: ApplicationWindow {
            start_date: day(3, 1),
            end_date: day(3, 31),
        },
        status: ScholarshipStatus::Active,
        criteria: vec![
            Criterion::mandatory("gpa", CriterionRule::MinGpa(3.5)),
            Criterion::optional(
                "stem",
                CriterionRule::parse("PROGRAM", json!(["Engineering", "Physics"])),
            ),
        ],
    }
}

pub(super) fn profile(id: &str, gpa: f64) -> ApplicantProfile {
    let mut profile = ApplicantProfile::new(ApplicantId::new(id));
    profile.gpa = Some(gpa);
    profile.program = Some("engineering".to_string());
    profile
}

pub(super) fn seeded_store(total_slots: u32) -> Arc<InMemoryAllocationStore> {
    let store = Arc::new(InMemoryAllocationStore::new());
    store
        .register_scholarship(scholarship(total_slots))
        .expect("register scholarship");
    for (id, gpa) in [("stu-a", 3.8), ("stu-b", 3.6), ("stu-c", 3.9), ("stu-low", 2.9)] {
        store.register_profile(profile(id, gpa)).expect("register profile");
    }
    store
}

pub(super) fn build_engine(
    total_slots: u32,
) -> (
    MemoryEngine,
    Arc<InMemoryAllocationStore>,
    Arc<InMemoryNotificationSink>,
    Arc<FixedClock>,
) {
    let store = seeded_store(total_slots);
    let notices = Arc::new(InMemoryNotificationSink::default());
    let clock = Arc::new(FixedClock::new(now()));
    let engine = AllocationEngine::with_clock(
        store.clone(),
        store.clone(),
        notices.clone(),
        &AllocationConfig::default(),
        clock.clone(),
    );
    (engine, store, notices, clock)
}

pub(super) fn applicant(id: &str) -> ApplicantId {
    ApplicantId::new(id)
}

pub(super) fn under_review(application: &Application) -> bool {
    application.status == ApplicationStatus::UnderReview
}

/// Store wrapper that refuses to persist APPROVED records while `fail_approvals` is set
/// and refuses slot counter swaps while `fail_swaps` is set.
#[derive(Default)]
pub(super) struct FlakyApprovalStore {
    pub(super) inner: InMemoryAllocationStore,
    pub(super) fail_approvals: AtomicBool,
    pub(super) fail_swaps: AtomicBool,
}

impl FlakyApprovalStore {
    pub(super) fn seeded(total_slots: u32) -> Self {
        let store = Self::default();
        store
            .inner
            .register_scholarship(scholarship(total_slots))
            .expect("register scholarship");
        store
            .inner
            .register_profile(profile("stu-a", 3.8))
            .expect("register profile");
        store
    }
}

impl ApplicationRepository for FlakyApprovalStore {
    fn insert(&self, record: Application) -> Result<Application, RepositoryError> {
        self.inner.insert(record)
    }

    fn update(&self, record: Application) -> Result<Application, RepositoryError> {
        if record.status == ApplicationStatus::Approved
            && self.fail_approvals.load(Ordering::SeqCst)
        {
            return Err(RepositoryError::Unavailable("database offline".to_string()));
        }
        self.inner.update(record)
    }

    fn fetch(&self, id: &ApplicationId) -> Result<Option<Application>, RepositoryError> {
        self.inner.fetch(id)
    }

    fn find_active(
        &self,
        scholarship_id: &ScholarshipId,
        applicant_id: &ApplicantId,
    ) -> Result<Option<Application>, RepositoryError> {
        self.inner.find_active(scholarship_id, applicant_id)
    }

    fn list_for_scholarship(
        &self,
        scholarship_id: &ScholarshipId,
    ) -> Result<Vec<Application>, RepositoryError> {
        self.inner.list_for_scholarship(scholarship_id)
    }
}

impl ScholarshipRepository for FlakyApprovalStore {
    fn scholarship(&self, id: &ScholarshipId) -> Result<Option<Scholarship>, RepositoryError> {
        self.inner.scholarship(id)
    }

    fn slots(&self, id: &ScholarshipId) -> Result<Option<SlotCounter>, RepositoryError> {
        self.inner.slots(id)
    }

    fn swap_slots(
        &self,
        expected: &SlotCounter,
        available: u32,
    ) -> Result<SlotCounter, RepositoryError> {
        if self.fail_swaps.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("slot store offline".to_string()));
        }
        self.inner.swap_slots(expected, available)
    }
}

impl AuditLog for FlakyApprovalStore {
    fn append(&self, entry: AuditEntry) -> Result<(), RepositoryError> {
        self.inner.append(entry)
    }

    fn history(&self, id: &ApplicationId) -> Result<Vec<AuditEntry>, RepositoryError> {
        self.inner.history(id)
    }
}

impl ProfileDirectory for FlakyApprovalStore {
    fn profile(&self, id: &ApplicantId) -> Result<Option<ApplicantProfile>, RepositoryError> {
        self.inner.profile(id)
    }
}

/// Sink whose transport is always down.
#[derive(Default)]
pub(super) struct OfflineSink;

impl NotificationSink for OfflineSink {
    fn publish(&self, _notice: AllocationNotice) -> Result<(), NotificationError> {
        Err(NotificationError::Transport("smtp relay refused".to_string()))
    }
}

pub(super) async fn response_json(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("body bytes");
    let value = serde_json::from_slice(&bytes).expect("json body");
    (status, value)
}
