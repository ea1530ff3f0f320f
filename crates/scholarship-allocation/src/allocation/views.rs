use chrono::{DateTime, Utc};
use serde::Serialize;

use super::criteria::EligibilityVerdict;
use super::domain::{
    ApplicantId, Application, ApplicationId, ReviewerId, ScholarshipId, SlotCounter,
};
use super::engine::{DecisionOutcome, SubmissionReceipt};

/// API representation of an application record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationView {
    pub application_id: ApplicationId,
    pub scholarship_id: ScholarshipId,
    pub applicant_id: ApplicantId,
    pub status: &'static str,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<ReviewerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    pub holds_slot: bool,
    pub version: u64,
}

impl From<&Application> for ApplicationView {
    fn from(record: &Application) -> Self {
        Self {
            application_id: record.id.clone(),
            scholarship_id: record.scholarship_id.clone(),
            applicant_id: record.applicant_id.clone(),
            status: record.status.label(),
            created_at: record.created_at,
            submitted_at: record.submitted_at,
            decided_at: record.decided_at,
            reviewer: record.reviewer.clone(),
            comments: record.comments.clone(),
            holds_slot: record.reservation.is_some(),
            version: record.version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionView {
    pub application: ApplicationView,
    pub verdict: EligibilityVerdict,
}

impl From<&SubmissionReceipt> for SubmissionView {
    fn from(receipt: &SubmissionReceipt) -> Self {
        Self {
            application: ApplicationView::from(&receipt.application),
            verdict: receipt.verdict.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionView {
    pub outcome: &'static str,
    pub application: ApplicationView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_slots: Option<u32>,
}

impl From<&DecisionOutcome> for DecisionView {
    fn from(outcome: &DecisionOutcome) -> Self {
        let remaining_slots = match outcome {
            DecisionOutcome::CapacityExhausted {
                remaining_slots, ..
            } => Some(*remaining_slots),
            DecisionOutcome::Applied(_) => None,
        };
        Self {
            outcome: outcome.label(),
            application: ApplicationView::from(outcome.application()),
            remaining_slots,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotView {
    pub scholarship_id: ScholarshipId,
    pub total_slots: u32,
    pub available_slots: u32,
    pub reserved_slots: u32,
}

impl From<&SlotCounter> for SlotView {
    fn from(counter: &SlotCounter) -> Self {
        Self {
            scholarship_id: counter.scholarship_id.clone(),
            total_slots: counter.total,
            available_slots: counter.available,
            reserved_slots: counter.reserved(),
        }
    }
}
