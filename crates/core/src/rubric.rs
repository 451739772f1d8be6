//! Weighted grading rubric and verdict parsing.

use std::collections::BTreeMap;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::tier::ModelTier;

pub const MAX_CRITERION_SCORE: u8 = 10;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub key: String,
    pub description: String,
    pub weight: Decimal,
}

impl Criterion {
    pub fn new(key: impl Into<String>, description: impl Into<String>, weight: Decimal) -> Self {
        Self { key: key.into(), description: description.into(), weight }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rubric {
    pub criteria: Vec<Criterion>,
}

impl Default for Rubric {
    fn default() -> Self {
        Self {
            criteria: vec![
                Criterion::new(
                    "discovery",
                    "Uncovered the prospect's situation, pain and decision process",
                    Decimal::ONE,
                ),
                Criterion::new(
                    "objection_handling",
                    "Acknowledged and resolved objections without caving on value",
                    Decimal::ONE,
                ),
                Criterion::new(
                    "closing",
                    "Asked for a concrete commitment and secured a next step",
                    Decimal::ONE,
                ),
            ],
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RubricError {
    #[error("rubric must define at least one criterion")]
    Empty,
    #[error("criterion `{0}` is defined more than once")]
    DuplicateCriterion(String),
    #[error("criterion `{0}` must have a positive weight")]
    NonPositiveWeight(String),
    #[error("malformed verdict: {0}")]
    MalformedVerdict(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionScore {
    pub criterion: String,
    pub score: u8,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefereeVerdict {
    pub criterion_scores: Vec<CriterionScore>,
    /// 0–100, one decimal place.
    pub aggregate_score: Decimal,
    pub rationale: String,
    pub model_tier: ModelTier,
}

impl RefereeVerdict {
    /// Decile of the aggregate (0..=10), stable under re-grading noise below one point.
    pub fn aggregate_bucket(&self) -> u8 {
        (self.aggregate_score / Decimal::TEN).floor().to_u8().unwrap_or(10).min(10)
    }
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    scores: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    rationale: String,
}

impl Rubric {
    pub fn validate(&self) -> Result<(), RubricError> {
        if self.criteria.is_empty() {
            return Err(RubricError::Empty);
        }
        let mut seen = std::collections::BTreeSet::new();
        for criterion in &self.criteria {
            if !seen.insert(criterion.key.as_str()) {
                return Err(RubricError::DuplicateCriterion(criterion.key.clone()));
            }
            if criterion.weight <= Decimal::ZERO {
                return Err(RubricError::NonPositiveWeight(criterion.key.clone()));
            }
        }
        Ok(())
    }

    pub fn total_weight(&self) -> Decimal {
        self.criteria.iter().map(|criterion| criterion.weight).sum()
    }

    /// Weighted 0–100 aggregate of per-criterion 0–10 scores.
    pub fn aggregate(&self, scores: &[CriterionScore]) -> Decimal {
        let total_weight = self.total_weight();
        if total_weight <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let weighted: Decimal = self
            .criteria
            .iter()
            .filter_map(|criterion| {
                scores
                    .iter()
                    .find(|score| score.criterion == criterion.key)
                    .map(|score| Decimal::from(score.score) * criterion.weight)
            })
            .sum();

        (weighted / (Decimal::from(MAX_CRITERION_SCORE) * total_weight) * Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Instructions appended to the referee prompt.
    pub fn prompt_section(&self) -> String {
        let mut lines = vec![format!(
            "Score each criterion with an integer from 0 to {MAX_CRITERION_SCORE}:"
        )];
        for criterion in &self.criteria {
            lines.push(format!("- {}: {}", criterion.key, criterion.description));
        }
        let keys = self
            .criteria
            .iter()
            .map(|criterion| format!("\"{}\": <0-{MAX_CRITERION_SCORE}>", criterion.key))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!(
            "Respond with JSON only: {{\"scores\": {{{keys}}}, \"rationale\": \"<two sentences>\"}}"
        ));
        lines.join("\n")
    }

    /// Parses a grading response. Any deviation from the rubric is an error;
    /// no partial verdict is ever produced.
    pub fn parse_verdict(&self, raw: &str, tier: ModelTier) -> Result<RefereeVerdict, RubricError> {
        let body = extract_json_object(raw)
            .ok_or_else(|| RubricError::MalformedVerdict("no JSON object in response".into()))?;
        let parsed: RawVerdict = serde_json::from_str(body)
            .map_err(|error| RubricError::MalformedVerdict(error.to_string()))?;

        let mut criterion_scores = Vec::with_capacity(self.criteria.len());
        for criterion in &self.criteria {
            let value = parsed.scores.get(&criterion.key).ok_or_else(|| {
                RubricError::MalformedVerdict(format!("missing score for `{}`", criterion.key))
            })?;
            let score = value
                .as_u64()
                .and_then(|score| u8::try_from(score).ok())
                .filter(|score| *score <= MAX_CRITERION_SCORE)
                .ok_or_else(|| {
                    RubricError::MalformedVerdict(format!(
                        "score for `{}` must be an integer 0..={MAX_CRITERION_SCORE}, got {value}",
                        criterion.key
                    ))
                })?;
            criterion_scores.push(CriterionScore { criterion: criterion.key.clone(), score });
        }

        let rationale = parsed.rationale.trim().to_string();
        if rationale.is_empty() {
            return Err(RubricError::MalformedVerdict("rationale is empty".into()));
        }

        let aggregate_score = self.aggregate(&criterion_scores);
        Ok(RefereeVerdict { criterion_scores, aggregate_score, rationale, model_tier: tier })
    }
}

fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}
