use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::clock::{Clock, SystemClock};
use super::criteria::{self, CriterionFault, EligibilityVerdict};
use super::domain::{
    Actor, ApplicantId, Application, ApplicationId, ApplicationStatus, ReservationToken,
    ReviewAction, ReviewerId, Scholarship, ScholarshipId, ScholarshipStatus, SlotCounter,
};
use super::lifecycle::{self, LifecycleEvent, SlotEffect, Transition, TransitionError, Trigger};
use super::repository::{
    AllocationNotice, AllocationStore, AuditEntry, NotificationSink, ProfileDirectory,
    RepositoryError,
};
use super::slots::{SlotAllocator, SlotError};
use crate::config::AllocationConfig;

/// Created application plus the evaluator's detail (matched optional criteria etc.).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionReceipt {
    pub application: Application,
    pub verdict: EligibilityVerdict,
}

/// Result of a reviewer decision. Running out of slots is an outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionOutcome {
    Applied(Application),
    /// Approval refused for lack of capacity; the application stays UNDER_REVIEW.
    CapacityExhausted {
        application: Application,
        remaining_slots: u32,
    },
}

impl DecisionOutcome {
    pub fn application(&self) -> &Application {
        match self {
            DecisionOutcome::Applied(application)
            | DecisionOutcome::CapacityExhausted { application, .. } => application,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DecisionOutcome::Applied(_) => "applied",
            DecisionOutcome::CapacityExhausted { .. } => "capacity_exhausted",
        }
    }
}

/// Dashboard snapshot of one scholarship's allocation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationSummary {
    pub scholarship_id: ScholarshipId,
    pub status: ScholarshipStatus,
    pub total_slots: u32,
    pub available_slots: u32,
    pub applications: BTreeMap<ApplicationStatus, usize>,
}

/// Orchestrates intake, review decisions, and withdrawals for scholarship applications.
pub struct AllocationEngine<S, P, N> {
    store: Arc<S>,
    profiles: Arc<P>,
    notices: Arc<N>,
    slots: SlotAllocator<S>,
    clock: Arc<dyn Clock>,
}

impl<S, P, N> AllocationEngine<S, P, N>
where
    S: AllocationStore,
    P: ProfileDirectory + 'static,
    N: NotificationSink + 'static,
{
    pub fn new(store: Arc<S>, profiles: Arc<P>, notices: Arc<N>, config: &AllocationConfig) -> Self {
        Self::with_clock(store, profiles, notices, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<S>,
        profiles: Arc<P>,
        notices: Arc<N>,
        config: &AllocationConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let slots = SlotAllocator::new(Arc::clone(&store), config.slot_attempts);
        Self {
            store,
            profiles,
            notices,
            slots,
            clock,
        }
    }

    /// Gate an applicant against an open scholarship and record a SUBMITTED application.
    pub fn submit_application(
        &self,
        applicant_id: &ApplicantId,
        scholarship_id: &ScholarshipId,
    ) -> Result<SubmissionReceipt, AllocationError> {
        let now = self.clock.now();
        let scholarship = self.open_scholarship(scholarship_id, now.date_naive())?;
        self.reject_duplicate(scholarship_id, applicant_id)?;
        let verdict = self.gate(&scholarship, applicant_id)?;

        let draft = Application::draft(scholarship.id.clone(), applicant_id.clone(), now);
        let transition = lifecycle::transition(
            &draft,
            LifecycleEvent::Submit {
                eligible: verdict.eligible,
            },
            now,
        )?;
        let stored = self
            .store
            .insert(transition.application)
            .map_err(|err| duplicate_or(err, scholarship_id, applicant_id))?;

        self.audit(AuditEntry {
            application_id: stored.id.clone(),
            from: None,
            to: stored.status,
            actor: Actor::Applicant(applicant_id.clone()),
            at: now,
            reservation: None,
            note: None,
        });
        info!(
            application_id = %stored.id,
            %scholarship_id,
            %applicant_id,
            matched_optional = verdict.matched_optional.len(),
            "application submitted"
        );

        Ok(SubmissionReceipt {
            application: stored,
            verdict,
        })
    }

    /// Save an application as DRAFT without running the eligibility gate.
    pub fn create_draft(
        &self,
        applicant_id: &ApplicantId,
        scholarship_id: &ScholarshipId,
    ) -> Result<Application, AllocationError> {
        let scholarship = self.scholarship(scholarship_id)?;
        if scholarship.status != ScholarshipStatus::Active {
            return Err(AllocationError::ScholarshipNotOpen {
                scholarship_id: scholarship.id,
                status: scholarship.status,
            });
        }
        self.reject_duplicate(scholarship_id, applicant_id)?;

        let now = self.clock.now();
        let draft = Application::draft(scholarship.id, applicant_id.clone(), now);
        let stored = self
            .store
            .insert(draft)
            .map_err(|err| duplicate_or(err, scholarship_id, applicant_id))?;

        self.audit(AuditEntry {
            application_id: stored.id.clone(),
            from: None,
            to: stored.status,
            actor: Actor::Applicant(applicant_id.clone()),
            at: now,
            reservation: None,
            note: None,
        });
        debug!(application_id = %stored.id, %scholarship_id, "draft created");
        Ok(stored)
    }

    /// Move the owner's DRAFT to SUBMITTED through the same gate as a direct submission.
    pub fn submit_draft(
        &self,
        application_id: &ApplicationId,
        applicant_id: &ApplicantId,
    ) -> Result<SubmissionReceipt, AllocationError> {
        let application = self.load(application_id)?;
        ensure_owner(&application, applicant_id)?;
        lifecycle::ensure_permitted(&application, Trigger::Submit, None)?;

        let now = self.clock.now();
        let scholarship = self.open_scholarship(&application.scholarship_id, now.date_naive())?;
        let verdict = self.gate(&scholarship, applicant_id)?;

        let transition = lifecycle::transition(
            &application,
            LifecycleEvent::Submit {
                eligible: verdict.eligible,
            },
            now,
        )?;
        let stored = self.commit(transition, Actor::Applicant(applicant_id.clone()), None, now)?;
        info!(application_id = %stored.id, "draft submitted");

        Ok(SubmissionReceipt {
            application: stored,
            verdict,
        })
    }

    /// Apply a reviewer decision.
    ///
    /// `approve` and `reject` on a SUBMITTED application claim it for the
    /// reviewer first. `approve` reserves a slot before the APPROVED state is
    /// written and releases it again if that write fails.
    pub fn decide_application(
        &self,
        application_id: &ApplicationId,
        action: ReviewAction,
        reviewer: &ReviewerId,
        comments: Option<String>,
    ) -> Result<DecisionOutcome, AllocationError> {
        let application = self.load(application_id)?;

        match action {
            ReviewAction::BeginReview => self
                .claim(application, reviewer)
                .map(DecisionOutcome::Applied),
            ReviewAction::Reject => {
                let application = self.claim_if_submitted(application, reviewer)?;
                let now = self.clock.now();
                let transition = lifecycle::transition(
                    &application,
                    LifecycleEvent::Reject {
                        reviewer: reviewer.clone(),
                        comments,
                    },
                    now,
                )?;
                let stored =
                    self.commit(transition, Actor::Reviewer(reviewer.clone()), None, now)?;
                info!(application_id = %stored.id, %reviewer, "application rejected");
                Ok(DecisionOutcome::Applied(stored))
            }
            ReviewAction::Approve => self.approve(application, reviewer, comments),
        }
    }

    /// Withdraw on behalf of the owning applicant, returning any held slot.
    ///
    /// A WITHDRAWN application that still carries its reservation token owes
    /// a release; withdrawing it again retries that release.
    pub fn withdraw(
        &self,
        application_id: &ApplicationId,
        applicant_id: &ApplicantId,
    ) -> Result<Application, AllocationError> {
        let application = self.load(application_id)?;
        ensure_owner(&application, applicant_id)?;

        if application.status == ApplicationStatus::Withdrawn {
            if let Some(token) = application.reservation {
                info!(application_id = %application.id, %token, "retrying owed slot release");
                return self.settle_release(application, token);
            }
        }

        let now = self.clock.now();
        let transition = lifecycle::transition(&application, LifecycleEvent::Withdraw, now)?;
        let effect = transition.slot_effect;
        let stored = self.commit(transition, Actor::Applicant(applicant_id.clone()), None, now)?;
        info!(application_id = %stored.id, %applicant_id, "application withdrawn");

        match effect {
            SlotEffect::Release(token) => self.settle_release(stored, token),
            SlotEffect::None => Ok(stored),
        }
    }

    pub fn application(&self, id: &ApplicationId) -> Result<Application, AllocationError> {
        self.load(id)
    }

    pub fn history(&self, id: &ApplicationId) -> Result<Vec<AuditEntry>, AllocationError> {
        self.load(id)?;
        Ok(self.store.history(id)?)
    }

    pub fn slot_availability(
        &self,
        scholarship_id: &ScholarshipId,
    ) -> Result<SlotCounter, AllocationError> {
        self.slots.counter(scholarship_id).map_err(|err| match err {
            SlotError::UnknownScholarship(id) => AllocationError::ScholarshipNotFound(id),
            other => other.into(),
        })
    }

    pub fn allocation_summary(
        &self,
        scholarship_id: &ScholarshipId,
    ) -> Result<AllocationSummary, AllocationError> {
        let scholarship = self.scholarship(scholarship_id)?;
        let counter = self.slot_availability(scholarship_id)?;

        let mut applications: BTreeMap<ApplicationStatus, usize> = BTreeMap::new();
        for record in self.store.list_for_scholarship(scholarship_id)? {
            *applications.entry(record.status).or_default() += 1;
        }

        Ok(AllocationSummary {
            scholarship_id: scholarship.id,
            status: scholarship.status,
            total_slots: counter.total,
            available_slots: counter.available,
            applications,
        })
    }

    fn approve(
        &self,
        application: Application,
        reviewer: &ReviewerId,
        comments: Option<String>,
    ) -> Result<DecisionOutcome, AllocationError> {
        let application = self.claim_if_submitted(application, reviewer)?;
        lifecycle::ensure_permitted(&application, Trigger::Approve, Some(reviewer))?;

        let scholarship = self.scholarship(&application.scholarship_id)?;
        if scholarship.status == ScholarshipStatus::Archived {
            return Err(AllocationError::ScholarshipNotOpen {
                scholarship_id: scholarship.id,
                status: scholarship.status,
            });
        }
        self.gate(&scholarship, &application.applicant_id)?;

        let reservation = self.slots.reserve(&scholarship.id)?;
        let token = match reservation.token {
            Some(token) if reservation.granted => token,
            _ => {
                warn!(
                    application_id = %application.id,
                    scholarship_id = %scholarship.id,
                    %reviewer,
                    "approval refused: no slots remaining"
                );
                self.notify(AllocationNotice::CapacityExhausted {
                    application_id: application.id.clone(),
                    scholarship_id: scholarship.id.clone(),
                    reviewer: reviewer.clone(),
                });
                return Ok(DecisionOutcome::CapacityExhausted {
                    application,
                    remaining_slots: reservation.remaining_slots,
                });
            }
        };

        let now = self.clock.now();
        let event = LifecycleEvent::Approve {
            reviewer: reviewer.clone(),
            reservation: token,
            comments,
        };
        let committed = lifecycle::transition(&application, event, now)
            .map_err(AllocationError::from)
            .and_then(|transition| {
                self.commit(transition, Actor::Reviewer(reviewer.clone()), None, now)
            });

        match committed {
            Ok(stored) => {
                info!(
                    application_id = %stored.id,
                    scholarship_id = %stored.scholarship_id,
                    %reviewer,
                    remaining = reservation.remaining_slots,
                    "application approved"
                );
                self.notify(AllocationNotice::ApplicationApproved {
                    application_id: stored.id.clone(),
                    scholarship_id: stored.scholarship_id.clone(),
                    applicant_id: stored.applicant_id.clone(),
                    remaining_slots: reservation.remaining_slots,
                });
                Ok(DecisionOutcome::Applied(stored))
            }
            Err(err) => {
                self.compensate(&scholarship.id, &application.id, token, &err);
                Err(err)
            }
        }
    }

    fn claim(
        &self,
        application: Application,
        reviewer: &ReviewerId,
    ) -> Result<Application, AllocationError> {
        let now = self.clock.now();
        let transition = lifecycle::transition(
            &application,
            LifecycleEvent::BeginReview {
                reviewer: reviewer.clone(),
            },
            now,
        )?;
        if !transition.changed {
            debug!(application_id = %application.id, %reviewer, "review already claimed");
            return Ok(application);
        }
        let stored = self.commit(transition, Actor::Reviewer(reviewer.clone()), None, now)?;
        debug!(application_id = %stored.id, %reviewer, "review claimed");
        Ok(stored)
    }

    fn claim_if_submitted(
        &self,
        application: Application,
        reviewer: &ReviewerId,
    ) -> Result<Application, AllocationError> {
        if application.status == ApplicationStatus::Submitted {
            self.claim(application, reviewer)
        } else {
            Ok(application)
        }
    }

    fn commit(
        &self,
        transition: Transition,
        actor: Actor,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Application, AllocationError> {
        let Transition {
            application,
            from,
            slot_effect,
            ..
        } = transition;
        let reservation = match slot_effect {
            SlotEffect::Release(token) => Some(token),
            SlotEffect::None => application.reservation,
        };
        let id = application.id.clone();

        let stored = self.store.update(application).map_err(|err| match err {
            RepositoryError::VersionConflict => AllocationError::StaleRecord(id.clone()),
            RepositoryError::NotFound => AllocationError::ApplicationNotFound(id.clone()),
            other => other.into(),
        })?;

        self.audit(AuditEntry {
            application_id: id,
            from: Some(from),
            to: stored.status,
            actor,
            at,
            reservation,
            note,
        });
        Ok(stored)
    }

    /// Drop the token from a withdrawn record, then return its slot.
    ///
    /// The token is cleared first under the record's version so two callers
    /// can never release the same slot. A failed release puts it back.
    fn settle_release(
        &self,
        withdrawn: Application,
        token: ReservationToken,
    ) -> Result<Application, AllocationError> {
        let id = withdrawn.id.clone();
        let scholarship_id = withdrawn.scholarship_id.clone();
        let mut cleared = withdrawn;
        cleared.reservation = None;

        let settled = match self.store.update(cleared) {
            Ok(settled) => settled,
            Err(RepositoryError::VersionConflict) => {
                let current = self.load(&id)?;
                if current.reservation.is_none() {
                    debug!(application_id = %id, %token, "slot release already settled");
                    return Ok(current);
                }
                return Err(AllocationError::StaleRecord(id));
            }
            Err(RepositoryError::NotFound) => return Err(AllocationError::ApplicationNotFound(id)),
            Err(other) => return Err(other.into()),
        };

        match self.slots.release(&scholarship_id) {
            Ok(remaining) => {
                self.notify(AllocationNotice::SlotReleased {
                    application_id: settled.id.clone(),
                    scholarship_id,
                    remaining_slots: remaining,
                });
                Ok(settled)
            }
            Err(err) => {
                let mut owed = settled;
                owed.reservation = Some(token);
                match self.store.update(owed) {
                    Ok(_) => error!(
                        application_id = %id,
                        %scholarship_id,
                        %token,
                        error = %err,
                        "withdrawal recorded but slot release failed; release is still owed"
                    ),
                    Err(restore) => error!(
                        application_id = %id,
                        %scholarship_id,
                        %token,
                        error = %err,
                        restore_error = %restore,
                        "slot release failed and the owed token could not be restored"
                    ),
                }
                Err(err.into())
            }
        }
    }

    fn compensate(
        &self,
        scholarship_id: &ScholarshipId,
        application_id: &ApplicationId,
        token: ReservationToken,
        cause: &AllocationError,
    ) {
        match self.slots.release(scholarship_id) {
            Ok(remaining) => warn!(
                %application_id,
                %scholarship_id,
                %token,
                remaining,
                cause = %cause,
                "approval not recorded; reservation released"
            ),
            Err(err) => error!(
                %application_id,
                %scholarship_id,
                %token,
                cause = %cause,
                error = %err,
                "approval not recorded and compensating release failed"
            ),
        }
    }

    fn open_scholarship(
        &self,
        scholarship_id: &ScholarshipId,
        today: NaiveDate,
    ) -> Result<Scholarship, AllocationError> {
        let scholarship = self.scholarship(scholarship_id)?;
        if scholarship.status != ScholarshipStatus::Active {
            return Err(AllocationError::ScholarshipNotOpen {
                scholarship_id: scholarship.id,
                status: scholarship.status,
            });
        }
        if !scholarship.window.contains(today) {
            return Err(AllocationError::WindowClosed {
                scholarship_id: scholarship.id,
                start_date: scholarship.window.start_date,
                end_date: scholarship.window.end_date,
            });
        }
        Ok(scholarship)
    }

    fn gate(
        &self,
        scholarship: &Scholarship,
        applicant_id: &ApplicantId,
    ) -> Result<EligibilityVerdict, AllocationError> {
        let profile = self
            .profiles
            .profile(applicant_id)?
            .ok_or_else(|| AllocationError::ApplicantNotFound(applicant_id.clone()))?;

        let verdict = criteria::evaluate(&profile, &scholarship.criteria);
        if !verdict.faults.is_empty() {
            warn!(
                scholarship_id = %scholarship.id,
                faults = verdict.faults.len(),
                "scholarship criteria could not be evaluated"
            );
            return Err(AllocationError::InvalidCriteria {
                faults: verdict.faults,
            });
        }
        if !verdict.eligible {
            debug!(
                scholarship_id = %scholarship.id,
                %applicant_id,
                failed = verdict.failed_mandatory.len(),
                "applicant failed mandatory criteria"
            );
            return Err(AllocationError::EligibilityRejected { verdict });
        }
        Ok(verdict)
    }

    fn reject_duplicate(
        &self,
        scholarship_id: &ScholarshipId,
        applicant_id: &ApplicantId,
    ) -> Result<(), AllocationError> {
        match self.store.find_active(scholarship_id, applicant_id)? {
            Some(_) => Err(AllocationError::DuplicateApplication {
                scholarship_id: scholarship_id.clone(),
                applicant_id: applicant_id.clone(),
            }),
            None => Ok(()),
        }
    }

    fn scholarship(&self, id: &ScholarshipId) -> Result<Scholarship, AllocationError> {
        self.store
            .scholarship(id)?
            .ok_or_else(|| AllocationError::ScholarshipNotFound(id.clone()))
    }

    fn load(&self, id: &ApplicationId) -> Result<Application, AllocationError> {
        self.store
            .fetch(id)?
            .ok_or_else(|| AllocationError::ApplicationNotFound(id.clone()))
    }

    fn audit(&self, entry: AuditEntry) {
        let application_id = entry.application_id.clone();
        if let Err(err) = self.store.append(entry) {
            warn!(%application_id, error = %err, "audit append failed");
        }
    }

    fn notify(&self, notice: AllocationNotice) {
        let template = notice.template();
        if let Err(err) = self.notices.publish(notice) {
            warn!(template, error = %err, "notification delivery failed");
        }
    }
}

fn ensure_owner(application: &Application, applicant_id: &ApplicantId) -> Result<(), AllocationError> {
    if &application.applicant_id != applicant_id {
        return Err(AllocationError::NotOwner {
            application_id: application.id.clone(),
            applicant_id: applicant_id.clone(),
        });
    }
    Ok(())
}

fn duplicate_or(
    err: RepositoryError,
    scholarship_id: &ScholarshipId,
    applicant_id: &ApplicantId,
) -> AllocationError {
    match err {
        RepositoryError::Conflict => AllocationError::DuplicateApplication {
            scholarship_id: scholarship_id.clone(),
            applicant_id: applicant_id.clone(),
        },
        other => other.into(),
    }
}

fn describe_faults(faults: &[CriterionFault]) -> String {
    faults
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error raised by the allocation engine.
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("scholarship {scholarship_id} is {status}")]
    ScholarshipNotOpen {
        scholarship_id: ScholarshipId,
        status: ScholarshipStatus,
    },
    #[error("scholarship {scholarship_id} accepts applications from {start_date} to {end_date}")]
    WindowClosed {
        scholarship_id: ScholarshipId,
        start_date: NaiveDate,
        end_date: NaiveDate,
    },
    #[error("scholarship criteria cannot be evaluated: {}", describe_faults(.faults))]
    InvalidCriteria { faults: Vec<CriterionFault> },
    #[error("applicant does not meet {} mandatory criteria", .verdict.failed_mandatory.len())]
    EligibilityRejected { verdict: EligibilityVerdict },
    #[error("applicant {applicant_id} already has an active application for {scholarship_id}")]
    DuplicateApplication {
        scholarship_id: ScholarshipId,
        applicant_id: ApplicantId,
    },
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
    #[error("applicant {applicant_id} does not own application {application_id}")]
    NotOwner {
        application_id: ApplicationId,
        applicant_id: ApplicantId,
    },
    #[error("application {0} was changed by another request; reload and retry")]
    StaleRecord(ApplicationId),
    #[error("application {0} not found")]
    ApplicationNotFound(ApplicationId),
    #[error("scholarship {0} not found")]
    ScholarshipNotFound(ScholarshipId),
    #[error("applicant {0} not found")]
    ApplicantNotFound(ApplicantId),
    #[error(transparent)]
    Slot(#[from] SlotError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl AllocationError {
    /// Stable machine-readable code for API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            AllocationError::ScholarshipNotOpen { .. } => "scholarship_not_open",
            AllocationError::WindowClosed { .. } => "window_closed",
            AllocationError::InvalidCriteria { .. } => "invalid_criteria",
            AllocationError::EligibilityRejected { .. } => "eligibility_rejected",
            AllocationError::DuplicateApplication { .. } => "duplicate_application",
            AllocationError::InvalidTransition(TransitionError::ClaimedByOther { .. }) => {
                "claimed_by_other"
            }
            AllocationError::InvalidTransition(TransitionError::Ineligible) => {
                "eligibility_rejected"
            }
            AllocationError::InvalidTransition(TransitionError::Invalid { .. }) => {
                "invalid_transition"
            }
            AllocationError::NotOwner { .. } => "not_owner",
            AllocationError::StaleRecord(_) => "stale_record",
            AllocationError::ApplicationNotFound(_) => "application_not_found",
            AllocationError::ScholarshipNotFound(_) => "scholarship_not_found",
            AllocationError::ApplicantNotFound(_) => "applicant_not_found",
            AllocationError::Slot(_) | AllocationError::Repository(_) => "unavailable",
        }
    }

    /// Transient failures are safe to retry with the same inputs.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AllocationError::StaleRecord(_)
                | AllocationError::Slot(SlotError::Contention { .. })
                | AllocationError::Slot(SlotError::Repository(RepositoryError::Unavailable(_)))
                | AllocationError::Repository(RepositoryError::Unavailable(_))
        )
    }
}
