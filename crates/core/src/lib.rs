pub mod budget;
pub mod config;
pub mod cost;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod retry;
pub mod rubric;

pub use budget::{BudgetPolicy, BudgetState, BudgetStatus};
pub use cost::{PriceTable, TierPrice};
pub use domain::battle::{
    AbortReason, Battle, BattleId, BattleRunResult, EndReason, Speaker, Utterance,
};
pub use domain::ledger::{
    total_cost, LedgerEntry, LedgerEntryId, LedgerEntryKind, LedgerTags, TokenUsage,
};
pub use domain::persona::{Persona, PersonaId};
pub use domain::tier::ModelTier;
pub use errors::{ApplicationError, DomainError};
pub use flows::{BattleAction, BattleEvent, BattleFlow, BattleState, FlowTransitionError};
pub use retry::RetrySchedule;
pub use rubric::{Criterion, CriterionScore, RefereeVerdict, Rubric, RubricError};
