pub mod engine;
pub mod states;

pub use engine::{BattleFlow, FlowTransitionError};
pub use states::{BattleAction, BattleEvent, BattleState, TransitionOutcome};
