use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::criteria::Criterion;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifier wrapper for scholarships owned by the management service.
    ScholarshipId
);
string_id!(
    /// Applicant identity as issued by the identity/profile service.
    ApplicantId
);
string_id!(
    /// Staff identity of the reviewer deciding an application.
    ReviewerId
);
string_id!(
    /// Identifier wrapper for application records.
    ApplicationId
);

impl ApplicationId {
    pub fn generate() -> Self {
        Self(format!("app-{}", Uuid::new_v4().simple()))
    }
}

/// Proof that one slot was taken from a scholarship's capacity for an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationToken(pub Uuid);

impl ReservationToken {
    pub fn issue() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ReservationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Publication state of a scholarship as set by its sponsor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScholarshipStatus {
    Draft,
    Active,
    Inactive,
    Archived,
}

impl ScholarshipStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ScholarshipStatus::Draft => "draft",
            ScholarshipStatus::Active => "active",
            ScholarshipStatus::Inactive => "inactive",
            ScholarshipStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for ScholarshipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Award value in minor currency units (cents, pence, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwardAmount {
    pub minor_units: u64,
    pub currency: String,
}

/// Inclusive date range during which submissions are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationWindow {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl ApplicationWindow {
    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start_date <= day && day <= self.end_date
    }
}

/// Scholarship metadata. The live slot count is kept in [`SlotCounter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scholarship {
    pub id: ScholarshipId,
    pub title: String,
    pub amount: AwardAmount,
    pub total_slots: u32,
    pub window: ApplicationWindow,
    pub status: ScholarshipStatus,
    #[serde(default)]
    pub criteria: Vec<Criterion>,
}

/// Capacity counter for one scholarship. `version` advances on every write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotCounter {
    pub scholarship_id: ScholarshipId,
    pub total: u32,
    pub available: u32,
    pub version: u64,
}

impl SlotCounter {
    pub fn fresh(scholarship_id: ScholarshipId, total: u32) -> Self {
        Self {
            scholarship_id,
            total,
            available: total,
            version: 0,
        }
    }

    pub fn reserved(&self) -> u32 {
        self.total - self.available
    }
}

/// The slice of a user's profile the criteria evaluator reads. Never mutated here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicantProfile {
    pub applicant_id: ApplicantId,
    #[serde(default)]
    pub gpa: Option<f64>,
    #[serde(default)]
    pub academic_level: Option<String>,
    #[serde(default)]
    pub nationality: Option<String>,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    /// Annual household income in minor currency units.
    #[serde(default)]
    pub household_income: Option<u64>,
}

impl ApplicantProfile {
    pub fn new(applicant_id: ApplicantId) -> Self {
        Self {
            applicant_id,
            gpa: None,
            academic_level: None,
            nationality: None,
            program: None,
            gender: None,
            household_income: None,
        }
    }
}

/// Lifecycle status of an application record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    Draft,
    Submitted,
    UnderReview,
    Approved,
    Rejected,
    Withdrawn,
}

impl ApplicationStatus {
    pub const ALL: [Self; 6] = [
        Self::Draft,
        Self::Submitted,
        Self::UnderReview,
        Self::Approved,
        Self::Rejected,
        Self::Withdrawn,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Draft => "draft",
            ApplicationStatus::Submitted => "submitted",
            ApplicationStatus::UnderReview => "under_review",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Withdrawn => "withdrawn",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            ApplicationStatus::Approved | ApplicationStatus::Rejected | ApplicationStatus::Withdrawn
        )
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// An applicant's bid for one scholarship. Records are retained after terminal states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub scholarship_id: ScholarshipId,
    pub applicant_id: ApplicantId,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub decided_at: Option<DateTime<Utc>>,
    pub reviewer: Option<ReviewerId>,
    pub comments: Option<String>,
    pub reservation: Option<ReservationToken>,
    /// Optimistic concurrency version, assigned by the repository.
    pub version: u64,
}

impl Application {
    pub fn draft(
        scholarship_id: ScholarshipId,
        applicant_id: ApplicantId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ApplicationId::generate(),
            scholarship_id,
            applicant_id,
            status: ApplicationStatus::Draft,
            created_at,
            submitted_at: None,
            decided_at: None,
            reviewer: None,
            comments: None,
            reservation: None,
            version: 0,
        }
    }

    /// Withdrawn applications free the (scholarship, applicant) pair for a new one.
    pub fn is_active(&self) -> bool {
        self.status != ApplicationStatus::Withdrawn
    }
}

/// Reviewer-initiated decisions accepted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    BeginReview,
    Approve,
    Reject,
}

/// Who caused a recorded state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum Actor {
    Applicant(ApplicantId),
    Reviewer(ReviewerId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_inclusive_on_both_ends() {
        let window = ApplicationWindow {
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).expect("valid"),
            end_date: NaiveDate::from_ymd_opt(2026, 3, 31).expect("valid"),
        };
        assert!(window.contains(window.start_date));
        assert!(window.contains(window.end_date));
        assert!(!window.contains(NaiveDate::from_ymd_opt(2025, 12, 31).expect("valid")));
        assert!(!window.contains(NaiveDate::from_ymd_opt(2026, 4, 1).expect("valid")));
    }

    #[test]
    fn terminal_states_match_lifecycle() {
        let terminal: Vec<_> = ApplicationStatus::ALL
            .into_iter()
            .filter(|status| status.is_terminal())
            .collect();
        assert_eq!(
            terminal,
            vec![
                ApplicationStatus::Approved,
                ApplicationStatus::Rejected,
                ApplicationStatus::Withdrawn
            ]
        );
    }

    #[test]
    fn status_serializes_in_upper_snake_case() {
        let encoded = serde_json::to_string(&ApplicationStatus::UnderReview).expect("encodes");
        assert_eq!(encoded, "\"UNDER_REVIEW\"");
    }
}
