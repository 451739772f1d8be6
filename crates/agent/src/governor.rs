use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{debug, error};

use arena_core::budget::{BudgetPolicy, BudgetState};
use arena_core::domain::ledger::total_cost;
use arena_db::repositories::LedgerRepository;

/// Derives today's budget state from the ledger on every call.
pub struct BudgetGovernor {
    ledger: Arc<dyn LedgerRepository>,
    policy: BudgetPolicy,
}

impl BudgetGovernor {
    pub fn new(ledger: Arc<dyn LedgerRepository>, policy: BudgetPolicy) -> Self {
        Self { ledger, policy }
    }

    pub fn policy(&self) -> &BudgetPolicy {
        &self.policy
    }

    pub async fn current_state(&self) -> BudgetState {
        self.state_for_day(Utc::now().date_naive()).await
    }

    /// Sums the given UTC day. An unreadable ledger fails closed.
    pub async fn state_for_day(&self, day: NaiveDate) -> BudgetState {
        match self.ledger.entries_for_day(day).await {
            Ok(entries) => {
                let state = BudgetState::evaluate(total_cost(&entries), &self.policy);
                debug!(
                    event_name = "budget.state_evaluated",
                    ledger_day = %day,
                    entries = entries.len(),
                    daily_spend = %state.daily_spend,
                    status = ?state.status,
                    "budget state evaluated"
                );
                state
            }
            Err(source) => {
                error!(
                    event_name = "budget.ledger_unavailable",
                    ledger_day = %day,
                    error = %source,
                    "ledger unreadable, treating daily budget as exceeded"
                );
                BudgetState::fail_closed(&self.policy)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use arena_core::budget::{BudgetPolicy, BudgetStatus};
    use arena_core::domain::ledger::{
        LedgerEntry, LedgerEntryId, LedgerEntryKind, LedgerTags, TokenUsage,
    };
    use arena_core::domain::tier::ModelTier;
    use arena_db::repositories::{InMemoryLedgerRepository, LedgerRepository};

    use super::BudgetGovernor;

    fn spend(cost: Decimal) -> LedgerEntry {
        LedgerEntry {
            id: LedgerEntryId::generate(),
            provider: "scripted".to_string(),
            model: "scripted-premium".to_string(),
            model_tier: ModelTier::Premium,
            usage: TokenUsage::new(1, 1),
            cost,
            recorded_at: Utc::now(),
            tags: LedgerTags { battle_id: None, turn_index: None, kind: LedgerEntryKind::Turn },
        }
    }

    #[tokio::test]
    async fn daily_spend_is_exact_sum_of_todays_entries() {
        let ledger = Arc::new(InMemoryLedgerRepository::default());
        for cents in [40, 35, 5] {
            ledger.append(spend(Decimal::new(cents, 2))).await.expect("append");
        }
        let governor = BudgetGovernor::new(ledger, BudgetPolicy::default());

        let state = governor.current_state().await;
        assert_eq!(state.daily_spend, Decimal::new(80, 2));
        assert_eq!(state.status, BudgetStatus::Normal);
        assert!(state.ledger_available);
    }

    #[tokio::test]
    async fn state_is_recomputed_on_every_call() {
        let ledger = Arc::new(InMemoryLedgerRepository::default());
        let governor = BudgetGovernor::new(ledger.clone(), BudgetPolicy::default());

        assert_eq!(governor.current_state().await.status, BudgetStatus::Normal);
        ledger.append(spend(Decimal::new(300, 2))).await.expect("append");
        assert_eq!(governor.current_state().await.status, BudgetStatus::Throttled);
        ledger.append(spend(Decimal::new(1_200, 2))).await.expect("append");

        let state = governor.current_state().await;
        assert_eq!(state.status, BudgetStatus::Exceeded);
        assert!(state.is_exceeded && state.is_throttled);
    }

    #[tokio::test]
    async fn ledger_read_error_fails_closed() {
        let ledger = Arc::new(InMemoryLedgerRepository::default());
        ledger.set_reads_unavailable(true);
        let governor = BudgetGovernor::new(ledger, BudgetPolicy::default());

        let state = governor.current_state().await;
        assert!(state.is_exceeded);
        assert!(state.is_throttled);
        assert!(!state.ledger_available);
        assert_eq!(state.referee_tier(), None);
    }
}
