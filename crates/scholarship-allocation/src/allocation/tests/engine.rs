use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Duration;
use serde_json::json;

use super::common::*;
use crate::allocation::clock::FixedClock;
use crate::allocation::criteria::{Criterion, CriterionRule};
use crate::allocation::domain::{
    Actor, ApplicationId, ApplicationStatus, ReviewAction, ReviewerId, ScholarshipId,
    ScholarshipStatus,
};
use crate::allocation::engine::{AllocationEngine, AllocationError, DecisionOutcome};
use crate::allocation::lifecycle::TransitionError;
use crate::allocation::memory::InMemoryNotificationSink;
use crate::allocation::repository::{ApplicationRepository, RepositoryError};
use crate::allocation::slots::SlotError;
use crate::config::AllocationConfig;

fn approve(engine: &MemoryEngine, id: &ApplicationId) -> DecisionOutcome {
    engine
        .decide_application(id, ReviewAction::Approve, &reviewer(), None)
        .expect("decision accepted")
}

#[test]
fn end_to_end_capacity_scenario() {
    let (engine, _, notices, _) = build_engine(1);

    let a = engine
        .submit_application(&applicant("stu-a"), &scholarship_id())
        .expect("A submits")
        .application;
    let b = engine
        .submit_application(&applicant("stu-b"), &scholarship_id())
        .expect("B submits")
        .application;
    assert_eq!(a.status, ApplicationStatus::Submitted);
    assert_eq!(b.status, ApplicationStatus::Submitted);

    let outcome = approve(&engine, &a.id);
    assert!(matches!(&outcome, DecisionOutcome::Applied(record) if record.status == ApplicationStatus::Approved));
    assert_eq!(
        engine.slot_availability(&scholarship_id()).expect("slots").available,
        0
    );

    match approve(&engine, &b.id) {
        DecisionOutcome::CapacityExhausted {
            application,
            remaining_slots,
        } => {
            assert!(under_review(&application));
            assert_eq!(remaining_slots, 0);
        }
        other => panic!("expected capacity exhausted, got {other:?}"),
    }
    assert!(under_review(&engine.application(&b.id).expect("B exists")));

    let withdrawn = engine.withdraw(&a.id, &applicant("stu-a")).expect("A withdraws");
    assert_eq!(withdrawn.status, ApplicationStatus::Withdrawn);
    assert_eq!(
        engine.slot_availability(&scholarship_id()).expect("slots").available,
        1
    );

    let retried = approve(&engine, &b.id);
    assert_eq!(retried.application().status, ApplicationStatus::Approved);
    assert_eq!(
        engine.slot_availability(&scholarship_id()).expect("slots").available,
        0
    );

    let templates: Vec<_> = notices.events().iter().map(|notice| notice.template()).collect();
    assert_eq!(
        templates,
        vec![
            "application_approved",
            "capacity_exhausted",
            "slot_released",
            "application_approved"
        ]
    );
}

#[test]
fn submission_returns_optional_matches() {
    let (engine, _, _, _) = build_engine(1);

    let receipt = engine
        .submit_application(&applicant("stu-a"), &scholarship_id())
        .expect("submits");

    assert!(receipt.verdict.eligible);
    assert_eq!(receipt.verdict.matched_optional.len(), 1);
    assert_eq!(receipt.application.version, 1);
}

#[test]
fn ineligible_applicant_creates_nothing() {
    let (engine, store, _, _) = build_engine(1);

    let error = engine
        .submit_application(&applicant("stu-low"), &scholarship_id())
        .expect_err("gpa too low");

    match error {
        AllocationError::EligibilityRejected { verdict } => {
            assert_eq!(verdict.failed_mandatory.len(), 1);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(store
        .list_for_scholarship(&scholarship_id())
        .expect("list")
        .is_empty());
}

#[test]
fn closed_window_and_inactive_scholarship_are_refused() {
    let (engine, store, _, clock) = build_engine(1);

    clock.set(now() + Duration::days(30));
    assert!(matches!(
        engine.submit_application(&applicant("stu-a"), &scholarship_id()),
        Err(AllocationError::WindowClosed { .. })
    ));

    clock.set(now());
    let mut paused = scholarship(1);
    paused.status = ScholarshipStatus::Inactive;
    store.update_scholarship(paused).expect("update");
    assert!(matches!(
        engine.submit_application(&applicant("stu-a"), &scholarship_id()),
        Err(AllocationError::ScholarshipNotOpen {
            status: ScholarshipStatus::Inactive,
            ..
        })
    ));
}

#[test]
fn window_end_date_is_still_open() {
    let (engine, _, _, clock) = build_engine(1);
    clock.set(now() + Duration::days(21));

    assert!(engine
        .submit_application(&applicant("stu-a"), &scholarship_id())
        .is_ok());
}

#[test]
fn unknown_criterion_surfaces_as_invalid_criteria() {
    let (engine, store, _, _) = build_engine(1);
    let mut broken = scholarship(1);
    broken
        .criteria
        .push(Criterion::optional("essay", CriterionRule::parse("ESSAY", json!(1))));
    store.update_scholarship(broken).expect("update");

    let error = engine
        .submit_application(&applicant("stu-a"), &scholarship_id())
        .expect_err("fails closed");

    assert_eq!(error.kind(), "invalid_criteria");
}

#[test]
fn missing_ids_are_lookup_errors() {
    let (engine, _, _, _) = build_engine(1);

    assert!(matches!(
        engine.submit_application(&applicant("stu-a"), &ScholarshipId::new("nope")),
        Err(AllocationError::ScholarshipNotFound(_))
    ));
    assert!(matches!(
        engine.submit_application(&applicant("ghost"), &scholarship_id()),
        Err(AllocationError::ApplicantNotFound(_))
    ));
    assert!(matches!(
        engine.application(&ApplicationId::new("app-none")),
        Err(AllocationError::ApplicationNotFound(_))
    ));
    assert!(matches!(
        engine.slot_availability(&ScholarshipId::new("nope")),
        Err(AllocationError::ScholarshipNotFound(_))
    ));
}

#[test]
fn duplicate_application_is_refused_until_withdrawn() {
    let (engine, _, _, _) = build_engine(2);
    let first = engine
        .submit_application(&applicant("stu-a"), &scholarship_id())
        .expect("first");

    assert!(matches!(
        engine.submit_application(&applicant("stu-a"), &scholarship_id()),
        Err(AllocationError::DuplicateApplication { .. })
    ));
    assert!(matches!(
        engine.create_draft(&applicant("stu-a"), &scholarship_id()),
        Err(AllocationError::DuplicateApplication { .. })
    ));

    engine
        .withdraw(&first.application.id, &applicant("stu-a"))
        .expect("withdraw");
    assert!(engine
        .submit_application(&applicant("stu-a"), &scholarship_id())
        .is_ok());
}

#[test]
fn rejected_application_still_blocks_reapplication() {
    let (engine, _, _, _) = build_engine(1);
    let submitted = engine
        .submit_application(&applicant("stu-a"), &scholarship_id())
        .expect("submit");
    engine
        .decide_application(
            &submitted.application.id,
            ReviewAction::Reject,
            &reviewer(),
            Some("incomplete transcript".to_string()),
        )
        .expect("reject");

    assert!(matches!(
        engine.submit_application(&applicant("stu-a"), &scholarship_id()),
        Err(AllocationError::DuplicateApplication { .. })
    ));
}

#[test]
fn draft_then_submit() {
    let (engine, _, _, _) = build_engine(1);
    let draft = engine
        .create_draft(&applicant("stu-a"), &scholarship_id())
        .expect("draft");
    assert_eq!(draft.status, ApplicationStatus::Draft);

    assert!(matches!(
        engine.submit_draft(&draft.id, &applicant("stu-b")),
        Err(AllocationError::NotOwner { .. })
    ));

    let receipt = engine
        .submit_draft(&draft.id, &applicant("stu-a"))
        .expect("submit draft");
    assert_eq!(receipt.application.status, ApplicationStatus::Submitted);
    assert_eq!(receipt.application.submitted_at, Some(now()));

    assert!(matches!(
        engine.submit_draft(&draft.id, &applicant("stu-a")),
        Err(AllocationError::InvalidTransition(TransitionError::Invalid { .. }))
    ));
}

#[test]
fn draft_of_ineligible_applicant_cannot_be_submitted() {
    let (engine, _, _, _) = build_engine(1);
    let draft = engine
        .create_draft(&applicant("stu-low"), &scholarship_id())
        .expect("drafts skip the gate");

    assert!(matches!(
        engine.submit_draft(&draft.id, &applicant("stu-low")),
        Err(AllocationError::EligibilityRejected { .. })
    ));
    assert_eq!(
        engine.application(&draft.id).expect("exists").status,
        ApplicationStatus::Draft
    );
}

#[test]
fn claim_is_exclusive_and_idempotent() {
    let (engine, _, _, _) = build_engine(1);
    let id = engine
        .submit_application(&applicant("stu-a"), &scholarship_id())
        .expect("submit")
        .application
        .id;

    let claimed = engine
        .decide_application(&id, ReviewAction::BeginReview, &reviewer(), None)
        .expect("claim");
    let again = engine
        .decide_application(&id, ReviewAction::BeginReview, &reviewer(), None)
        .expect("re-claim");
    assert_eq!(claimed.application().version, again.application().version);

    let other = ReviewerId::new("rev-grace");
    let error = engine
        .decide_application(&id, ReviewAction::Approve, &other, None)
        .expect_err("claimed by someone else");
    assert_eq!(error.kind(), "claimed_by_other");
    assert_eq!(
        engine.slot_availability(&scholarship_id()).expect("slots").available,
        1
    );
}

#[test]
fn approving_a_draft_is_an_invalid_transition() {
    let (engine, _, _, _) = build_engine(1);
    let draft = engine
        .create_draft(&applicant("stu-a"), &scholarship_id())
        .expect("draft");

    let error = engine
        .decide_application(&draft.id, ReviewAction::Approve, &reviewer(), None)
        .expect_err("draft cannot be approved");

    assert_eq!(error.kind(), "invalid_transition");
    assert_eq!(
        engine.slot_availability(&scholarship_id()).expect("slots").available,
        1
    );
}

#[test]
fn approval_rechecks_mandatory_criteria() {
    let (engine, store, _, _) = build_engine(1);
    let id = engine
        .submit_application(&applicant("stu-b"), &scholarship_id())
        .expect("submit")
        .application
        .id;

    let mut tightened = scholarship(1);
    tightened.criteria = vec![Criterion::mandatory("gpa", CriterionRule::MinGpa(3.7))];
    store.update_scholarship(tightened).expect("update");

    assert!(matches!(
        engine.decide_application(&id, ReviewAction::Approve, &reviewer(), None),
        Err(AllocationError::EligibilityRejected { .. })
    ));
    assert!(under_review(&engine.application(&id).expect("exists")));
    assert_eq!(
        engine.slot_availability(&scholarship_id()).expect("slots").available,
        1
    );
}

#[test]
fn archived_scholarship_cannot_approve() {
    let (engine, store, _, _) = build_engine(1);
    let id = engine
        .submit_application(&applicant("stu-a"), &scholarship_id())
        .expect("submit")
        .application
        .id;
    let mut archived = scholarship(1);
    archived.status = ScholarshipStatus::Archived;
    store.update_scholarship(archived).expect("update");

    assert!(matches!(
        engine.decide_application(&id, ReviewAction::Approve, &reviewer(), None),
        Err(AllocationError::ScholarshipNotOpen { .. })
    ));
}

#[test]
fn withdraw_rules() {
    let (engine, _, notices, _) = build_engine(1);
    let id = engine
        .submit_application(&applicant("stu-a"), &scholarship_id())
        .expect("submit")
        .application
        .id;

    assert!(matches!(
        engine.withdraw(&id, &applicant("stu-b")),
        Err(AllocationError::NotOwner { .. })
    ));

    engine.withdraw(&id, &applicant("stu-a")).expect("withdraw");
    assert!(matches!(
        engine.withdraw(&id, &applicant("stu-a")),
        Err(AllocationError::InvalidTransition(_))
    ));
    assert!(notices.events().is_empty(), "no slot was held");
}

#[test]
fn history_records_each_step() {
    let (engine, _, _, clock) = build_engine(1);
    let id = engine
        .submit_application(&applicant("stu-a"), &scholarship_id())
        .expect("submit")
        .application
        .id;
    clock.advance(Duration::hours(2));
    approve(&engine, &id);
    clock.advance(Duration::days(1));
    engine.withdraw(&id, &applicant("stu-a")).expect("withdraw");

    let history = engine.history(&id).expect("history");
    let steps: Vec<_> = history.iter().map(|entry| (entry.from, entry.to)).collect();
    assert_eq!(
        steps,
        vec![
            (None, ApplicationStatus::Submitted),
            (Some(ApplicationStatus::Submitted), ApplicationStatus::UnderReview),
            (Some(ApplicationStatus::UnderReview), ApplicationStatus::Approved),
            (Some(ApplicationStatus::Approved), ApplicationStatus::Withdrawn),
        ]
    );
    assert_eq!(history[2].actor, Actor::Reviewer(reviewer()));
    assert!(history[2].reservation.is_some());
    assert_eq!(history[3].reservation, history[2].reservation);
    assert_eq!(history[3].at, now() + Duration::hours(2) + Duration::days(1));
}

#[test]
fn summary_counts_statuses() {
    let (engine, _, _, _) = build_engine(2);
    let a = engine
        .submit_application(&applicant("stu-a"), &scholarship_id())
        .expect("a")
        .application;
    engine
        .submit_application(&applicant("stu-b"), &scholarship_id())
        .expect("b");
    engine
        .create_draft(&applicant("stu-c"), &scholarship_id())
        .expect("c");
    approve(&engine, &a.id);

    let summary = engine.allocation_summary(&scholarship_id()).expect("summary");

    assert_eq!(summary.total_slots, 2);
    assert_eq!(summary.available_slots, 1);
    assert_eq!(summary.applications.get(&ApplicationStatus::Approved), Some(&1));
    assert_eq!(summary.applications.get(&ApplicationStatus::Submitted), Some(&1));
    assert_eq!(summary.applications.get(&ApplicationStatus::Draft), Some(&1));

    let encoded = serde_json::to_value(&summary).expect("encodes");
    assert_eq!(encoded["applications"]["APPROVED"], 1);
}

#[test]
fn failed_approval_write_releases_the_slot() {
    let store = Arc::new(FlakyApprovalStore::seeded(1));
    let notices = Arc::new(InMemoryNotificationSink::default());
    let engine = AllocationEngine::with_clock(
        store.clone(),
        store.clone(),
        notices.clone(),
        &AllocationConfig::default(),
        Arc::new(FixedClock::new(now())),
    );
    let id = engine
        .submit_application(&applicant("stu-a"), &scholarship_id())
        .expect("submit")
        .application
        .id;

    store.fail_approvals.store(true, Ordering::SeqCst);
    let error = engine
        .decide_application(&id, ReviewAction::Approve, &reviewer(), None)
        .expect_err("approval write fails");

    assert!(matches!(
        error,
        AllocationError::Repository(RepositoryError::Unavailable(_))
    ));
    assert!(error.is_transient());
    assert_eq!(
        engine.slot_availability(&scholarship_id()).expect("slots").available,
        1
    );
    assert!(notices.events().is_empty());

    store.fail_approvals.store(false, Ordering::SeqCst);
    let outcome = engine
        .decide_application(&id, ReviewAction::Approve, &reviewer(), None)
        .expect("retry succeeds");
    assert_eq!(outcome.application().status, ApplicationStatus::Approved);
}

#[test]
fn failed_release_on_withdraw_is_owed_until_retried() {
    let store = Arc::new(FlakyApprovalStore::seeded(1));
    let notices = Arc::new(InMemoryNotificationSink::default());
    let engine = AllocationEngine::with_clock(
        store.clone(),
        store.clone(),
        notices.clone(),
        &AllocationConfig::default(),
        Arc::new(FixedClock::new(now())),
    );
    let id = engine
        .submit_application(&applicant("stu-a"), &scholarship_id())
        .expect("submit")
        .application
        .id;
    engine
        .decide_application(&id, ReviewAction::Approve, &reviewer(), None)
        .expect("approve");

    store.fail_swaps.store(true, Ordering::SeqCst);
    let error = engine
        .withdraw(&id, &applicant("stu-a"))
        .expect_err("release fails");
    assert!(matches!(
        error,
        AllocationError::Slot(SlotError::Repository(RepositoryError::Unavailable(_)))
    ));
    assert!(error.is_transient());

    let owed = engine.application(&id).expect("record");
    assert_eq!(owed.status, ApplicationStatus::Withdrawn);
    assert!(owed.reservation.is_some(), "token kept until the slot is back");
    assert_eq!(
        engine.slot_availability(&scholarship_id()).expect("slots").available,
        0
    );

    store.fail_swaps.store(false, Ordering::SeqCst);
    let settled = engine
        .withdraw(&id, &applicant("stu-a"))
        .expect("retry settles the release");
    assert_eq!(settled.status, ApplicationStatus::Withdrawn);
    assert_eq!(settled.reservation, None);
    let counter = engine.slot_availability(&scholarship_id()).expect("slots");
    assert_eq!(counter.available, counter.total);
    assert_eq!(
        notices.events().last().map(|notice| notice.template()),
        Some("slot_released")
    );

    // Once settled, further withdrawals are refused and capacity is untouched.
    assert!(matches!(
        engine.withdraw(&id, &applicant("stu-a")),
        Err(AllocationError::InvalidTransition(_))
    ));
    assert_eq!(
        engine.slot_availability(&scholarship_id()).expect("slots").available,
        1
    );
}

#[test]
fn notification_failure_does_not_undo_approval() {
    let store = seeded_store(1);
    let engine = AllocationEngine::with_clock(
        store.clone(),
        store.clone(),
        Arc::new(OfflineSink),
        &AllocationConfig::default(),
        Arc::new(FixedClock::new(now())),
    );
    let id = engine
        .submit_application(&applicant("stu-a"), &scholarship_id())
        .expect("submit")
        .application
        .id;

    let outcome = engine
        .decide_application(&id, ReviewAction::Approve, &reviewer(), None)
        .expect("approved despite notification failure");

    assert_eq!(outcome.application().status, ApplicationStatus::Approved);
}

#[test]
fn version_conflicts_are_transient() {
    let (engine, store, _, _) = build_engine(1);
    let record = engine
        .submit_application(&applicant("stu-a"), &scholarship_id())
        .expect("submit")
        .application;

    // A concurrent writer bumps the version between our read and write.
    store.update(record.clone()).expect("bump");
    assert!(matches!(
        store.update(record.clone()),
        Err(RepositoryError::VersionConflict)
    ));

    let error = AllocationError::StaleRecord(record.id.clone());
    assert!(error.is_transient());
    assert_eq!(error.kind(), "stale_record");
    assert!(!AllocationError::Slot(SlotError::UnknownScholarship(scholarship_id())).is_transient());
}
