use super::super::domain::ApplicantProfile;
use super::rule::{Criterion, CriterionRule, MembershipSet};
use super::CriterionFault;

/// Apply one criterion to a profile. Missing profile data is a plain failure.
pub(crate) fn check(
    criterion: &Criterion,
    profile: &ApplicantProfile,
) -> Result<bool, CriterionFault> {
    match &criterion.rule {
        CriterionRule::MinGpa(threshold) => Ok(profile
            .gpa
            .map(|gpa| gpa.is_finite() && gpa >= *threshold)
            .unwrap_or(false)),
        CriterionRule::AcademicLevel(accepted) => Ok(member(accepted, &profile.academic_level)),
        CriterionRule::Nationality(accepted) => Ok(member(accepted, &profile.nationality)),
        CriterionRule::Program(accepted) => Ok(member(accepted, &profile.program)),
        CriterionRule::Gender(accepted) => Ok(member(accepted, &profile.gender)),
        CriterionRule::MaxHouseholdIncome(cap) => Ok(profile
            .household_income
            .map(|income| income <= *cap)
            .unwrap_or(false)),
        CriterionRule::Unknown { tag, .. } => Err(CriterionFault::UnknownKind {
            criterion: criterion.id.clone(),
            tag: tag.clone(),
        }),
        CriterionRule::Malformed { tag, reason, .. } => Err(CriterionFault::MalformedPayload {
            criterion: criterion.id.clone(),
            tag: tag.clone(),
            reason: reason.clone(),
        }),
    }
}

fn member(accepted: &MembershipSet, value: &Option<String>) -> bool {
    value
        .as_deref()
        .map(|candidate| accepted.contains(candidate))
        .unwrap_or(false)
}
