use thiserror::Error;

use crate::flows::FlowTransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("unknown model tier `{0}`")]
    UnknownModelTier(String),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Top-level failure classes surfaced to operators.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("configuration failure: {0}")]
    Configuration(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("cost ledger write failure: {0}")]
    LedgerWrite(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("daily budget exceeded: {0}")]
    BudgetExceeded(String),
}

impl ApplicationError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Domain(_) => "domain_validation",
            Self::Configuration(_) => "config_validation",
            Self::Persistence(_) => "persistence",
            Self::LedgerWrite(_) => "ledger_write",
            Self::Integration(_) => "integration",
            Self::BudgetExceeded(_) => "budget_exceeded",
        }
    }

    /// Process exit code used by the operator CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Configuration(_) => 2,
            Self::Persistence(_) => 3,
            Self::BudgetExceeded(_) => 4,
            Self::LedgerWrite(_) => 5,
            Self::Domain(_) | Self::Integration(_) => 6,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "Configuration is invalid. Fix the named key and retry.",
            Self::Persistence(_) => "The store is unavailable. Please retry shortly.",
            Self::LedgerWrite(_) => {
                "Spend could not be recorded. Execution stopped to avoid unmetered cost."
            }
            Self::BudgetExceeded(_) => "Today's budget is spent. No new battles will start.",
            Self::Domain(_) | Self::Integration(_) => "The battle could not be completed.",
        }
    }
}
