use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of a criterion within its scholarship.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CriterionId(pub String);

impl fmt::Display for CriterionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub(crate) const MIN_GPA: &str = "MIN_GPA";
pub(crate) const ACADEMIC_LEVEL: &str = "ACADEMIC_LEVEL";
pub(crate) const NATIONALITY: &str = "NATIONALITY";
pub(crate) const PROGRAM: &str = "PROGRAM";
pub(crate) const GENDER: &str = "GENDER";
pub(crate) const MAX_HOUSEHOLD_INCOME: &str = "MAX_HOUSEHOLD_INCOME";

/// Case-insensitive set of accepted values for membership criteria.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipSet(BTreeSet<String>);

impl MembershipSet {
    pub fn new<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        Self(
            values
                .into_iter()
                .map(|value| normalize(value.as_ref()))
                .filter(|value| !value.is_empty())
                .collect(),
        )
    }

    pub fn contains(&self, candidate: &str) -> bool {
        self.0.contains(&normalize(candidate))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

pub(crate) fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Typed comparison carried by a criterion. One variant per supported kind.
#[derive(Debug, Clone, PartialEq)]
pub enum CriterionRule {
    /// Profile GPA must be at least this value.
    MinGpa(f64),
    AcademicLevel(MembershipSet),
    Nationality(MembershipSet),
    Program(MembershipSet),
    Gender(MembershipSet),
    /// Household income (minor units) must not exceed this value.
    MaxHouseholdIncome(u64),
    /// Tag not recognized by this engine. Never passes.
    Unknown { tag: String, payload: Value },
    /// Recognized tag whose payload could not be read. Never passes.
    Malformed {
        tag: String,
        payload: Value,
        reason: String,
    },
}

impl CriterionRule {
    /// Parse a raw `(type, value)` pair. Never fails; bad input becomes `Unknown`/`Malformed`.
    pub fn parse(tag: &str, payload: Value) -> Self {
        let canonical = tag.trim().to_ascii_uppercase().replace('-', "_");
        let parsed = match canonical.as_str() {
            MIN_GPA => parse_gpa(&payload).map(CriterionRule::MinGpa),
            ACADEMIC_LEVEL => parse_membership(&payload).map(CriterionRule::AcademicLevel),
            NATIONALITY => parse_membership(&payload).map(CriterionRule::Nationality),
            PROGRAM => parse_membership(&payload).map(CriterionRule::Program),
            GENDER => parse_membership(&payload).map(CriterionRule::Gender),
            MAX_HOUSEHOLD_INCOME => payload
                .as_u64()
                .map(CriterionRule::MaxHouseholdIncome)
                .ok_or_else(|| "expected a non-negative integer amount".to_string()),
            _ => {
                return CriterionRule::Unknown {
                    tag: tag.to_string(),
                    payload,
                }
            }
        };

        parsed.unwrap_or_else(|reason| CriterionRule::Malformed {
            tag: canonical,
            payload,
            reason,
        })
    }

    pub fn tag(&self) -> &str {
        match self {
            CriterionRule::MinGpa(_) => MIN_GPA,
            CriterionRule::AcademicLevel(_) => ACADEMIC_LEVEL,
            CriterionRule::Nationality(_) => NATIONALITY,
            CriterionRule::Program(_) => PROGRAM,
            CriterionRule::Gender(_) => GENDER,
            CriterionRule::MaxHouseholdIncome(_) => MAX_HOUSEHOLD_INCOME,
            CriterionRule::Unknown { tag, .. } | CriterionRule::Malformed { tag, .. } => tag.as_str(),
        }
    }

    fn payload(&self) -> Value {
        match self {
            CriterionRule::MinGpa(threshold) => Value::from(*threshold),
            CriterionRule::AcademicLevel(set)
            | CriterionRule::Nationality(set)
            | CriterionRule::Program(set)
            | CriterionRule::Gender(set) => {
                Value::Array(set.iter().map(Value::from).collect())
            }
            CriterionRule::MaxHouseholdIncome(cap) => Value::from(*cap),
            CriterionRule::Unknown { payload, .. } | CriterionRule::Malformed { payload, .. } => {
                payload.clone()
            }
        }
    }
}

fn parse_gpa(payload: &Value) -> Result<f64, String> {
    match payload.as_f64() {
        Some(threshold) if threshold.is_finite() && threshold >= 0.0 => Ok(threshold),
        Some(threshold) => Err(format!("gpa threshold {threshold} is out of range")),
        None => Err("expected a numeric gpa threshold".to_string()),
    }
}

fn parse_membership(payload: &Value) -> Result<MembershipSet, String> {
    let set = match payload {
        Value::String(single) => MembershipSet::new([single]),
        Value::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                match item.as_str() {
                    Some(value) => values.push(value),
                    None => return Err(format!("membership entry {item} is not a string")),
                }
            }
            MembershipSet::new(values)
        }
        _ => return Err("expected a string or a list of strings".to_string()),
    };

    if set.is_empty() {
        return Err("membership list is empty".to_string());
    }
    Ok(set)
}

/// A single eligibility rule attached to a scholarship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawCriterion", into = "RawCriterion")]
pub struct Criterion {
    pub id: CriterionId,
    pub rule: CriterionRule,
    pub mandatory: bool,
}

impl Criterion {
    pub fn mandatory(id: &str, rule: CriterionRule) -> Self {
        Self {
            id: CriterionId(id.to_string()),
            rule,
            mandatory: true,
        }
    }

    pub fn optional(id: &str, rule: CriterionRule) -> Self {
        Self {
            id: CriterionId(id.to_string()),
            rule,
            mandatory: false,
        }
    }
}

/// Wire shape of a criterion as stored by the management service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCriterion {
    pub id: CriterionId,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default = "mandatory_by_default")]
    pub mandatory: bool,
}

fn mandatory_by_default() -> bool {
    true
}

impl From<RawCriterion> for Criterion {
    fn from(raw: RawCriterion) -> Self {
        Self {
            id: raw.id,
            rule: CriterionRule::parse(&raw.kind, raw.value),
            mandatory: raw.mandatory,
        }
    }
}

impl From<Criterion> for RawCriterion {
    fn from(criterion: Criterion) -> Self {
        Self {
            kind: criterion.rule.tag().to_string(),
            value: criterion.rule.payload(),
            id: criterion.id,
            mandatory: criterion.mandatory,
        }
    }
}
