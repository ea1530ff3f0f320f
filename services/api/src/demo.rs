use chrono::{Duration, Utc};
use clap::Args;
use scholarship_allocation::allocation::{
    AllocationEngine, AllocationError, ApplicantId, ApplicantProfile, ApplicationId,
    ApplicationWindow, AwardAmount, Criterion, CriterionRule, DecisionOutcome,
    InMemoryAllocationStore, InMemoryNotificationSink, ReviewAction, ReviewerId, Scholarship,
    ScholarshipId, ScholarshipStatus,
};
use scholarship_allocation::config::AllocationConfig;
use scholarship_allocation::error::AppError;
use std::sync::{Arc, Barrier};
use std::thread;

type DemoEngine =
    AllocationEngine<InMemoryAllocationStore, InMemoryAllocationStore, InMemoryNotificationSink>;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Number of applicants competing in the approval race.
    #[arg(long, default_value_t = 12)]
    pub(crate) applicants: usize,
    /// Award slots available in the approval race.
    #[arg(long, default_value_t = 3)]
    pub(crate) slots: u32,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    println!("Scholarship allocation demo");
    run_capacity_scenario()?;
    run_approval_race(args.applicants, args.slots)
}

fn demo_scholarship(id: &str, title: &str, slots: u32) -> Scholarship {
    let today = Utc::now().date_naive();
    Scholarship {
        id: ScholarshipId::new(id),
        title: title.to_string(),
        amount: AwardAmount {
            minor_units: 300_000,
            currency: "USD".to_string(),
        },
        total_slots: slots,
        window: ApplicationWindow {
            start_date: today - Duration::days(7),
            end_date: today + Duration::days(30),
        },
        status: ScholarshipStatus::Active,
        criteria: vec![Criterion::mandatory("gpa", CriterionRule::MinGpa(3.5))],
    }
}

fn register_applicant(
    store: &InMemoryAllocationStore,
    id: &str,
    gpa: f64,
) -> Result<ApplicantId, AppError> {
    let applicant = ApplicantId::new(id);
    let mut profile = ApplicantProfile::new(applicant.clone());
    profile.gpa = Some(gpa);
    store
        .register_profile(profile)
        .map_err(AllocationError::from)?;
    Ok(applicant)
}

type DemoParts = (
    DemoEngine,
    Arc<InMemoryAllocationStore>,
    Arc<InMemoryNotificationSink>,
);

fn engine_for(scholarship: Scholarship) -> Result<DemoParts, AppError> {
    let store = Arc::new(InMemoryAllocationStore::new());
    store
        .register_scholarship(scholarship)
        .map_err(AllocationError::from)?;
    let notices = Arc::new(InMemoryNotificationSink::default());
    let engine = AllocationEngine::new(
        store.clone(),
        store.clone(),
        notices.clone(),
        &AllocationConfig::default(),
    );
    Ok((engine, store, notices))
}

fn run_capacity_scenario() -> Result<(), AppError> {
    let scholarship = demo_scholarship("demo-single-seat", "Single Seat Fellowship", 1);
    let scholarship_id = scholarship.id.clone();
    let (engine, store, notices) = engine_for(scholarship)?;
    let a = register_applicant(&store, "applicant-a", 3.8)?;
    let b = register_applicant(&store, "applicant-b", 3.6)?;
    let reviewer = ReviewerId::new("reviewer-1");

    println!("\nCapacity scenario (1 slot, MIN_GPA 3.5)");
    let app_a = engine.submit_application(&a, &scholarship_id)?.application;
    let app_b = engine.submit_application(&b, &scholarship_id)?.application;
    println!("  {a} submitted -> {}", app_a.status);
    println!("  {b} submitted -> {}", app_b.status);

    report_decision(&engine, &app_a.id, &reviewer, &a)?;
    report_decision(&engine, &app_b.id, &reviewer, &b)?;

    let withdrawn = engine.withdraw(&app_a.id, &a)?;
    let counter = engine.slot_availability(&scholarship_id)?;
    println!(
        "  {a} withdrew -> {} (available slots: {}/{})",
        withdrawn.status, counter.available, counter.total
    );

    report_decision(&engine, &app_b.id, &reviewer, &b)?;

    println!("  Notices:");
    for notice in notices.events() {
        println!("    - {}", notice.template());
    }
    Ok(())
}

fn report_decision(
    engine: &DemoEngine,
    id: &ApplicationId,
    reviewer: &ReviewerId,
    applicant: &ApplicantId,
) -> Result<(), AppError> {
    match engine.decide_application(id, ReviewAction::Approve, reviewer, None)? {
        DecisionOutcome::Applied(record) => {
            println!("  approve {applicant} -> {}", record.status);
        }
        DecisionOutcome::CapacityExhausted {
            application,
            remaining_slots,
        } => {
            println!(
                "  approve {applicant} -> capacity exhausted, stays {} ({remaining_slots} slots left)",
                application.status
            );
        }
    }
    Ok(())
}

fn run_approval_race(applicants: usize, slots: u32) -> Result<(), AppError> {
    let scholarship = demo_scholarship("demo-race", "Open Competition Award", slots);
    let scholarship_id = scholarship.id.clone();
    let (engine, store, _) = engine_for(scholarship)?;
    let engine = Arc::new(engine);

    let mut ids = Vec::with_capacity(applicants);
    for index in 0..applicants {
        let applicant = register_applicant(&store, &format!("racer-{index:03}"), 3.9)?;
        ids.push(engine.submit_application(&applicant, &scholarship_id)?.application.id);
    }

    println!("\nApproval race ({applicants} applicants, {slots} slots)");
    let barrier = Arc::new(Barrier::new(ids.len().max(1)));
    let handles: Vec<_> = ids
        .into_iter()
        .enumerate()
        .map(|(index, id)| {
            let engine = engine.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let reviewer = ReviewerId::new(format!("reviewer-{}", index % 3));
                barrier.wait();
                engine.decide_application(&id, ReviewAction::Approve, &reviewer, None)
            })
        })
        .collect();

    let mut approved = 0usize;
    let mut exhausted = 0usize;
    let mut failed = 0usize;
    for handle in handles {
        match handle.join() {
            Ok(Ok(DecisionOutcome::Applied(_))) => approved += 1,
            Ok(Ok(DecisionOutcome::CapacityExhausted { .. })) => exhausted += 1,
            Ok(Err(err)) => {
                failed += 1;
                println!("  decision failed: {err}");
            }
            Err(_) => failed += 1,
        }
    }

    let summary = engine.allocation_summary(&scholarship_id)?;
    println!("  Approved: {approved}");
    println!("  Capacity exhausted: {exhausted}");
    if failed > 0 {
        println!("  Failed: {failed}");
    }
    println!(
        "  Slots: {} available of {} (never over-allocated: {})",
        summary.available_slots,
        summary.total_slots,
        approved as u32 <= summary.total_slots
    );
    Ok(())
}
