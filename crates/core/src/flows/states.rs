use serde::{Deserialize, Serialize};

use crate::domain::battle::AbortReason;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleState {
    Initialized,
    CloserTurn,
    PersonaTurn,
    Grading,
    Completed,
    Aborted,
}

impl BattleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::CloserTurn => "closer_turn",
            Self::PersonaTurn => "persona_turn",
            Self::Grading => "grading",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

impl std::str::FromStr for BattleState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "initialized" => Ok(Self::Initialized),
            "closer_turn" => Ok(Self::CloserTurn),
            "persona_turn" => Ok(Self::PersonaTurn),
            "grading" => Ok(Self::Grading),
            "completed" => Ok(Self::Completed),
            "aborted" => Ok(Self::Aborted),
            other => Err(format!("unknown battle state `{other}`")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BattleEvent {
    Start,
    TurnCompleted,
    ConversationConcluded,
    VerdictRecorded,
    Abort(AbortReason),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BattleAction {
    DispatchCloserTurn,
    DispatchPersonaTurn,
    RequestGrading,
    PersistBattle,
    NotifyOperator,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: BattleState,
    pub to: BattleState,
    pub event: BattleEvent,
    pub actions: Vec<BattleAction>,
}
