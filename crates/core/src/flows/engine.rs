use thiserror::Error;

use crate::flows::states::{BattleAction, BattleEvent, BattleState, TransitionOutcome};

/// Pure transition table for a single battle.
///
/// Turns alternate strictly, closer first. `turns_taken` is the number of
/// utterances already in the transcript when the event is applied.
#[derive(Clone, Debug, Default)]
pub struct BattleFlow;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: BattleState, event: BattleEvent },
    #[error("turn cap of {max_turns} already reached in {state:?}")]
    TurnCapExceeded { state: BattleState, max_turns: u32 },
}

impl BattleFlow {
    pub fn initial_state() -> BattleState {
        BattleState::Initialized
    }

    pub fn transition(
        current: &BattleState,
        event: &BattleEvent,
        turns_taken: u32,
        max_turns: u32,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        use BattleAction::{
            DispatchCloserTurn, DispatchPersonaTurn, NotifyOperator, PersistBattle,
            RequestGrading,
        };
        use BattleEvent::{Abort, ConversationConcluded, Start, TurnCompleted, VerdictRecorded};
        use BattleState::{Aborted, CloserTurn, Completed, Grading, Initialized, PersonaTurn};

        let (to, actions) = match (current, event) {
            (Initialized, Start) if max_turns == 0 => (Grading, vec![RequestGrading]),
            (Initialized, Start) => (CloserTurn, vec![DispatchCloserTurn]),
            (CloserTurn | PersonaTurn, TurnCompleted) if turns_taken > max_turns => {
                return Err(FlowTransitionError::TurnCapExceeded {
                    state: current.clone(),
                    max_turns,
                });
            }
            (CloserTurn | PersonaTurn, TurnCompleted) if turns_taken == max_turns => {
                (Grading, vec![RequestGrading])
            }
            (CloserTurn, TurnCompleted) => (PersonaTurn, vec![DispatchPersonaTurn]),
            (PersonaTurn, TurnCompleted) => (CloserTurn, vec![DispatchCloserTurn]),
            (CloserTurn | PersonaTurn, ConversationConcluded) => (Grading, vec![RequestGrading]),
            (Grading, VerdictRecorded) => (Completed, vec![PersistBattle]),
            (Completed | Aborted, _) => {
                return Err(FlowTransitionError::InvalidTransition {
                    state: current.clone(),
                    event: event.clone(),
                });
            }
            (_, Abort(reason)) if reason.is_kill_switch() => {
                (Aborted, vec![NotifyOperator, PersistBattle])
            }
            (_, Abort(_)) => (Aborted, vec![PersistBattle]),
            _ => {
                return Err(FlowTransitionError::InvalidTransition {
                    state: current.clone(),
                    event: event.clone(),
                });
            }
        };

        Ok(TransitionOutcome { from: current.clone(), to, event: event.clone(), actions })
    }
}
