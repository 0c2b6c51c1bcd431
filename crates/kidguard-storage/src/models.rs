use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Probability at or below which the current user is classified as a kid.
pub const KID_THRESHOLD: f32 = 0.5;

/// Binary classification label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    Kid,
    Adult,
}

impl Label {
    /// Derive the label from a classifier probability.
    ///
    /// `probability <= 0.5` is a kid; anything above is an adult.
    #[must_use]
    pub fn from_probability(probability: f32) -> Self {
        if probability <= KID_THRESHOLD {
            Self::Kid
        } else {
            Self::Adult
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Kid => "Kid",
            Self::Adult => "Adult",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Kid" => Ok(Self::Kid),
            "Adult" => Ok(Self::Adult),
            other => anyhow::bail!("Unknown label: {other}"),
        }
    }
}

/// Outcome of one classifier invocation
///
/// The label is always derived from the probability, so the two can never
/// disagree. Construct through [`ClassificationResult::new`]; deserialized
/// values are checked against the same rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ResultFields")]
pub struct ClassificationResult {
    probability: f32,
    label: Label,
    decided_at: DateTime<Utc>,
}

/// Wire shape of [`ClassificationResult`] before validation
#[derive(Deserialize)]
struct ResultFields {
    probability: f32,
    label: Label,
    decided_at: DateTime<Utc>,
}

impl TryFrom<ResultFields> for ClassificationResult {
    type Error = String;

    fn try_from(fields: ResultFields) -> Result<Self, Self::Error> {
        if !(0.0..=1.0).contains(&fields.probability) {
            return Err(format!(
                "probability {} is outside [0, 1]",
                fields.probability
            ));
        }
        let result = Self::new(fields.probability, fields.decided_at);
        if result.label != fields.label {
            return Err(format!(
                "label {} contradicts probability {}",
                fields.label, fields.probability
            ));
        }
        Ok(result)
    }
}

impl ClassificationResult {
    /// Build a result from a probability, clamped into `[0, 1]`.
    #[must_use]
    pub fn new(probability: f32, decided_at: DateTime<Utc>) -> Self {
        let probability = probability.clamp(0.0, 1.0);
        Self {
            probability,
            label: Label::from_probability(probability),
            decided_at,
        }
    }

    #[must_use]
    pub const fn probability(&self) -> f32 {
        self.probability
    }

    #[must_use]
    pub const fn label(&self) -> Label {
        self.label
    }

    #[must_use]
    pub const fn decided_at(&self) -> DateTime<Utc> {
        self.decided_at
    }

    #[must_use]
    pub fn is_kid(&self) -> bool {
        self.label == Label::Kid
    }
}

/// Durable part of the policy state
///
/// `restricted_mode` is kept in lockstep with `latest_result`; see
/// [`PolicyRecord::from_result`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub latest_result: Option<ClassificationResult>,
    pub restricted_mode: bool,
}

impl PolicyRecord {
    #[must_use]
    pub fn from_result(result: ClassificationResult) -> Self {
        Self {
            latest_result: Some(result),
            restricted_mode: result.is_kid(),
        }
    }

    /// Whether `restricted_mode` agrees with `latest_result`.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.restricted_mode == self.latest_result.is_some_and(|r| r.is_kid())
    }
}

/// One row of classification history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub id: Uuid,
    pub owner: Option<String>,
    pub result: ClassificationResult,
}

impl ClassificationRecord {
    #[must_use]
    pub fn new(owner: Option<String>, result: ClassificationResult) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            result,
        }
    }
}
