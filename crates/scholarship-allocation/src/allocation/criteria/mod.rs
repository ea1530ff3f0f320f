mod checks;
mod rule;

pub use rule::{Criterion, CriterionId, CriterionRule, MembershipSet, RawCriterion};

use serde::{Deserialize, Serialize};

use super::domain::ApplicantProfile;

/// A criterion the engine could not evaluate. Always counted as a mandatory failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "fault", rename_all = "snake_case")]
pub enum CriterionFault {
    #[error("criterion {criterion} has unknown type '{tag}'")]
    UnknownKind { criterion: CriterionId, tag: String },
    #[error("criterion {criterion} ({tag}) has a malformed value: {reason}")]
    MalformedPayload {
        criterion: CriterionId,
        tag: String,
        reason: String,
    },
}

/// Outcome of checking one applicant against a scholarship's criteria.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EligibilityVerdict {
    pub eligible: bool,
    pub failed_mandatory: Vec<CriterionId>,
    pub matched_optional: Vec<CriterionId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub faults: Vec<CriterionFault>,
}

/// Evaluate every criterion against the profile.
///
/// Mandatory criteria must all pass. Optional criteria are reported in
/// `matched_optional` and never block. A criterion that cannot be evaluated
/// (unknown type, malformed value) fails closed regardless of its
/// `mandatory` flag and is listed in both `failed_mandatory` and `faults`.
pub fn evaluate(profile: &ApplicantProfile, criteria: &[Criterion]) -> EligibilityVerdict {
    let mut verdict = EligibilityVerdict::default();

    for criterion in criteria {
        match checks::check(criterion, profile) {
            Ok(true) if !criterion.mandatory => verdict.matched_optional.push(criterion.id.clone()),
            Ok(true) => {}
            Ok(false) if criterion.mandatory => {
                verdict.failed_mandatory.push(criterion.id.clone())
            }
            Ok(false) => {}
            Err(fault) => {
                verdict.failed_mandatory.push(criterion.id.clone());
                verdict.faults.push(fault);
            }
        }
    }

    verdict.eligible = verdict.failed_mandatory.is_empty();
    verdict
}
