use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::battle::BattleId;
use crate::domain::tier::ModelTier;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerEntryId(pub String);

impl LedgerEntryId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self { input_tokens, output_tokens }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    pub fn accumulate(&mut self, other: TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryKind {
    Turn,
    Referee,
    Summary,
}

impl LedgerEntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Turn => "turn",
            Self::Referee => "referee",
            Self::Summary => "summary",
        }
    }
}

impl std::str::FromStr for LedgerEntryKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "turn" => Ok(Self::Turn),
            "referee" => Ok(Self::Referee),
            "summary" => Ok(Self::Summary),
            other => Err(DomainError::InvariantViolation(format!(
                "unknown ledger entry kind `{other}`"
            ))),
        }
    }
}

/// Free-form context attached to a ledger entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTags {
    pub battle_id: Option<BattleId>,
    pub turn_index: Option<u32>,
    pub kind: LedgerEntryKind,
}

/// One priced completion call. Entries are never updated or deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub provider: String,
    pub model: String,
    pub model_tier: ModelTier,
    pub usage: TokenUsage,
    pub cost: Decimal,
    pub recorded_at: DateTime<Utc>,
    pub tags: LedgerTags,
}

impl LedgerEntry {
    /// UTC calendar day the entry counts against.
    pub fn ledger_day(&self) -> NaiveDate {
        self.recorded_at.date_naive()
    }
}

/// Exact sum of entry costs. No rounding is applied.
pub fn total_cost<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Decimal {
    entries.into_iter().map(|entry| entry.cost).sum()
}
