//! Daily budget policy.
//!
//! Today's spend is never stored; [`BudgetState`] is derived from the sum of
//! the day's ledger entries every time it is needed.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::{BattleConfig, BudgetConfig};
use crate::domain::tier::ModelTier;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetPolicy {
    pub daily_cap: Decimal,
    /// Fraction of the daily cap at which throttling starts (0.2 = 20 %).
    pub throttle_fraction: Decimal,
    pub per_battle_ceiling: Decimal,
    pub persona_degrades_under_throttle: bool,
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        Self {
            daily_cap: Decimal::new(1_500, 2),
            throttle_fraction: Decimal::new(2, 1),
            per_battle_ceiling: Decimal::new(500, 2),
            persona_degrades_under_throttle: false,
        }
    }
}

impl BudgetPolicy {
    pub fn from_config(budget: &BudgetConfig, battle: &BattleConfig) -> Self {
        Self {
            daily_cap: budget.daily_cap_usd,
            throttle_fraction: budget.throttle_fraction,
            per_battle_ceiling: budget.per_battle_ceiling_usd,
            persona_degrades_under_throttle: battle.persona_degrades_under_throttle,
        }
    }

    pub fn throttle_threshold(&self) -> Decimal {
        self.daily_cap * self.throttle_fraction
    }

    /// Per-battle kill-switch. Spending at or above the ceiling aborts the battle.
    pub fn battle_ceiling_reached(&self, battle_cost: Decimal) -> bool {
        battle_cost >= self.per_battle_ceiling
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    Normal,
    Throttled,
    Exceeded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetState {
    pub daily_spend: Decimal,
    pub daily_cap: Decimal,
    pub throttle_threshold: Decimal,
    pub remaining: Decimal,
    pub percentage_used: Decimal,
    pub status: BudgetStatus,
    pub is_throttled: bool,
    pub is_exceeded: bool,
    /// False when the ledger could not be read and the state failed closed.
    pub ledger_available: bool,
}

impl BudgetState {
    pub fn evaluate(daily_spend: Decimal, policy: &BudgetPolicy) -> Self {
        let threshold = policy.throttle_threshold();
        let status = if daily_spend >= policy.daily_cap {
            BudgetStatus::Exceeded
        } else if daily_spend >= threshold {
            BudgetStatus::Throttled
        } else {
            BudgetStatus::Normal
        };

        let percentage_used = if policy.daily_cap > Decimal::ZERO {
            (daily_spend / policy.daily_cap * Decimal::ONE_HUNDRED).round_dp(2)
        } else {
            Decimal::ONE_HUNDRED
        };

        Self {
            daily_spend,
            daily_cap: policy.daily_cap,
            throttle_threshold: threshold,
            remaining: (policy.daily_cap - daily_spend).max(Decimal::ZERO),
            percentage_used,
            status,
            is_throttled: status != BudgetStatus::Normal,
            is_exceeded: status == BudgetStatus::Exceeded,
            ledger_available: true,
        }
    }

    /// State reported when the ledger is unreadable: treated as exceeded.
    pub fn fail_closed(policy: &BudgetPolicy) -> Self {
        Self {
            daily_spend: policy.daily_cap,
            daily_cap: policy.daily_cap,
            throttle_threshold: policy.throttle_threshold(),
            remaining: Decimal::ZERO,
            percentage_used: Decimal::ONE_HUNDRED,
            status: BudgetStatus::Exceeded,
            is_throttled: true,
            is_exceeded: true,
            ledger_available: false,
        }
    }

    /// The closer stays on the premium tier until the hard stop.
    pub fn closer_tier(&self) -> Option<ModelTier> {
        (!self.is_exceeded).then_some(ModelTier::Premium)
    }

    pub fn persona_tier(&self, policy: &BudgetPolicy) -> Option<ModelTier> {
        match self.status {
            BudgetStatus::Exceeded => None,
            BudgetStatus::Throttled if policy.persona_degrades_under_throttle => {
                Some(ModelTier::Economy)
            }
            _ => Some(ModelTier::Premium),
        }
    }

    pub fn referee_tier(&self) -> Option<ModelTier> {
        match self.status {
            BudgetStatus::Normal => Some(ModelTier::Premium),
            BudgetStatus::Throttled => Some(ModelTier::Economy),
            BudgetStatus::Exceeded => None,
        }
    }

    /// The auxiliary audit note only runs while spend is below the throttle line.
    pub fn audit_enabled(&self) -> bool {
        self.status == BudgetStatus::Normal
    }
}
