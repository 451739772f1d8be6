use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::ledger::TokenUsage;
use crate::domain::persona::PersonaId;
use crate::domain::tier::ModelTier;
use crate::flows::{BattleEvent, BattleFlow, BattleState, FlowTransitionError, TransitionOutcome};
use crate::rubric::RefereeVerdict;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BattleId(pub String);

impl BattleId {
    pub fn generate() -> Self {
        Self(format!("BTL-{}", Uuid::new_v4()))
    }
}

impl std::fmt::Display for BattleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which side of the negotiation produced an utterance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Closer,
    Persona,
}

impl Speaker {
    pub fn opponent(self) -> Self {
        match self {
            Self::Closer => Self::Persona,
            Self::Persona => Self::Closer,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closer => "closer",
            Self::Persona => "persona",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub speaker: Speaker,
    pub text: String,
    pub turn_index: u32,
    pub model_tier: ModelTier,
    pub usage: TokenUsage,
    pub cost: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    PerBattleCeiling { spent: Decimal, ceiling: Decimal },
    DailyCapExceeded,
    GatewayFailure { message: String },
    GradingFailed { message: String },
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PerBattleCeiling { .. } => "per_battle_ceiling",
            Self::DailyCapExceeded => "daily_cap_exceeded",
            Self::GatewayFailure { .. } => "gateway_failure",
            Self::GradingFailed { .. } => "grading_failed",
        }
    }

    /// Kill-switch aborts are reported to the operator channel.
    pub fn is_kill_switch(&self) -> bool {
        matches!(self, Self::PerBattleCeiling { .. } | Self::DailyCapExceeded)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    TurnCap,
    NaturalConclusion,
}

/// One adversarial conversation, mutated turn by turn in memory and persisted once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Battle {
    pub id: BattleId,
    pub persona_id: PersonaId,
    pub persona_name: String,
    pub state: BattleState,
    pub transcript: Vec<Utterance>,
    pub usage: TokenUsage,
    pub cost: Decimal,
    pub max_turns: u32,
    pub verdict: Option<RefereeVerdict>,
    pub abort_reason: Option<AbortReason>,
    pub end_reason: Option<EndReason>,
    /// Auxiliary reviewer note, only produced while the budget is normal.
    pub audit_note: Option<String>,
    pub contract_status: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Battle {
    pub fn new(persona_id: PersonaId, persona_name: impl Into<String>, max_turns: u32) -> Self {
        Self {
            id: BattleId::generate(),
            persona_id,
            persona_name: persona_name.into(),
            state: BattleState::Initialized,
            transcript: Vec::new(),
            usage: TokenUsage::default(),
            cost: Decimal::ZERO,
            max_turns,
            verdict: None,
            abort_reason: None,
            end_reason: None,
            audit_note: None,
            contract_status: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn turn_count(&self) -> u32 {
        u32::try_from(self.transcript.len()).unwrap_or(u32::MAX)
    }

    /// Speaker owed the next turn, if the dialogue is still running.
    pub fn next_speaker(&self) -> Option<Speaker> {
        match self.state {
            BattleState::CloserTurn => Some(Speaker::Closer),
            BattleState::PersonaTurn => Some(Speaker::Persona),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn apply(&mut self, event: BattleEvent) -> Result<TransitionOutcome, FlowTransitionError> {
        let outcome = BattleFlow::transition(&self.state, &event, self.turn_count(), self.max_turns)?;
        match &outcome.event {
            BattleEvent::Abort(reason) => self.abort_reason = Some(reason.clone()),
            BattleEvent::ConversationConcluded => self.end_reason = Some(EndReason::NaturalConclusion),
            BattleEvent::TurnCompleted if outcome.to == BattleState::Grading => {
                self.end_reason = Some(EndReason::TurnCap);
            }
            _ => {}
        }
        if outcome.to.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        self.state = outcome.to.clone();
        Ok(outcome)
    }

    /// Appends an utterance and accumulates its usage and cost.
    pub fn record_utterance(&mut self, utterance: Utterance) {
        self.usage.accumulate(utterance.usage);
        self.cost += utterance.cost;
        self.transcript.push(utterance);
    }

    /// Adds cost incurred outside the dialogue (grading, audit).
    pub fn add_overhead(&mut self, usage: TokenUsage, cost: Decimal) {
        self.usage.accumulate(usage);
        self.cost += cost;
    }
}

/// What a caller gets back from a single battle run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BattleRunResult {
    pub battle_id: BattleId,
    pub persona_id: PersonaId,
    pub state: BattleState,
    pub verdict: Option<RefereeVerdict>,
    pub transcript: Vec<Utterance>,
    pub usage: TokenUsage,
    pub cost: Decimal,
    pub abort_reason: Option<AbortReason>,
    pub end_reason: Option<EndReason>,
}

impl BattleRunResult {
    pub fn aggregate_score(&self) -> Option<Decimal> {
        self.verdict.as_ref().map(|verdict| verdict.aggregate_score)
    }
}

impl From<Battle> for BattleRunResult {
    fn from(battle: Battle) -> Self {
        Self {
            battle_id: battle.id,
            persona_id: battle.persona_id,
            state: battle.state,
            verdict: battle.verdict,
            transcript: battle.transcript,
            usage: battle.usage,
            cost: battle.cost,
            abort_reason: battle.abort_reason,
            end_reason: battle.end_reason,
        }
    }
}
