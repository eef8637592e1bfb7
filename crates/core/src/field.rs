use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::id_number::IdNumber;

/// The field kinds an identity card yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    IdNumber,
    Name,
    DateOfBirth,
    Gender,
}

impl FieldKind {
    pub const ALL: [FieldKind; 4] = [
        FieldKind::IdNumber,
        FieldKind::Name,
        FieldKind::DateOfBirth,
        FieldKind::Gender,
    ];
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldKind::IdNumber => write!(f, "id_number"),
            FieldKind::Name => write!(f, "name"),
            FieldKind::DateOfBirth => write!(f, "date_of_birth"),
            FieldKind::Gender => write!(f, "gender"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Transgender,
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Gender::Male => write!(f, "Male"),
            Gender::Female => write!(f, "Female"),
            Gender::Transgender => write!(f, "Transgender"),
        }
    }
}

impl std::str::FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "transgender" => Ok(Gender::Transgender),
            other => Err(format!("Unknown gender: '{other}'")),
        }
    }
}

/// How a field value was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// Matched by a primary pattern rule.
    PrimaryPattern,
    /// Recovered by a best-effort heuristic after primary rules missed.
    FallbackHeuristic,
}

/// Validated, typed value of a found field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Id(IdNumber),
    Text(String),
    Date(NaiveDate),
    Gender(Gender),
}

/// One slot of an extraction record. Not-found is an explicit state: the
/// slot exists with `raw`, `value` and `strategy` absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField {
    pub kind: FieldKind,
    /// The substring the rule matched, before validation.
    pub raw: Option<String>,
    pub value: Option<FieldValue>,
    pub strategy: Option<ExtractionStrategy>,
    /// Confidence in this extraction (0.0 = guessed, 1.0 = certain);
    /// 0.0 when not found.
    pub confidence: f32,
}

impl ExtractedField {
    pub fn found(
        kind: FieldKind,
        raw: impl Into<String>,
        value: FieldValue,
        strategy: ExtractionStrategy,
        confidence: f32,
    ) -> Self {
        Self {
            kind,
            raw: Some(raw.into()),
            value: Some(value),
            strategy: Some(strategy),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn not_found(kind: FieldKind) -> Self {
        Self {
            kind,
            raw: None,
            value: None,
            strategy: None,
            confidence: 0.0,
        }
    }

    pub fn is_found(&self) -> bool {
        self.value.is_some()
    }
}
