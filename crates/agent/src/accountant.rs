//! Prices completion calls and appends them to the cost ledger.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{error, info, warn};

use arena_core::cost::PriceTable;
use arena_core::domain::ledger::{LedgerEntry, LedgerEntryId, LedgerTags, TokenUsage};
use arena_core::domain::tier::ModelTier;
use arena_core::retry::RetrySchedule;
use arena_db::repositories::{LedgerRepository, RepositoryError};

#[derive(Debug, Error)]
#[error("cost ledger write for `{entry_id}` failed after {attempts} attempt(s): {source}")]
pub struct LedgerWriteError {
    pub entry_id: String,
    pub attempts: u32,
    #[source]
    pub source: RepositoryError,
}

/// Runs `operation` until it succeeds or the schedule is exhausted. On
/// exhaustion the last error is returned with the number of attempts made.
/// Each delay gets up to 25 % random jitter so concurrent writers spread out.
pub async fn retry_with_backoff<T, E, F, Fut>(
    schedule: &RetrySchedule,
    operation_name: &str,
    mut operation: F,
) -> Result<T, (u32, E)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => match schedule.delay_after(attempt) {
                Some(base) => {
                    let delay = with_jitter(base);
                    warn!(
                        event_name = "retry.attempt_failed",
                        operation = operation_name,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err((attempt, error)),
            },
        }
    }
}

fn with_jitter(delay: Duration) -> Duration {
    let spread = u64::try_from(delay.as_millis() / 4).unwrap_or(u64::MAX);
    if spread == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}

pub struct CostAccountant {
    ledger: Arc<dyn LedgerRepository>,
    prices: PriceTable,
    retry: RetrySchedule,
}

impl CostAccountant {
    pub fn new(ledger: Arc<dyn LedgerRepository>, prices: PriceTable, retry: RetrySchedule) -> Self {
        Self { ledger, prices, retry }
    }

    pub fn prices(&self) -> &PriceTable {
        &self.prices
    }

    pub fn cost(&self, tier: ModelTier, input_tokens: u64, output_tokens: u64) -> Decimal {
        self.prices.cost(tier, input_tokens, output_tokens)
    }

    /// Appends one entry. A write that still fails after the retry schedule is
    /// surfaced, never dropped.
    pub async fn record(&self, entry: LedgerEntry) -> Result<(), LedgerWriteError> {
        let entry_id = entry.id.0.clone();
        let result = retry_with_backoff(&self.retry, "ledger.append", || {
            let ledger = Arc::clone(&self.ledger);
            let entry = entry.clone();
            async move { ledger.append(entry).await }
        })
        .await;

        match result {
            Ok(()) => Ok(()),
            Err((attempts, source)) => {
                error!(
                    event_name = "ledger.write_failed",
                    entry_id = %entry_id,
                    attempts,
                    error = %source,
                    "cost ledger write exhausted retries"
                );
                Err(LedgerWriteError { entry_id, attempts, source })
            }
        }
    }

    /// Prices a completed call, records it and returns the stored entry.
    pub async fn charge(
        &self,
        provider: &str,
        model: &str,
        tier: ModelTier,
        usage: TokenUsage,
        tags: LedgerTags,
    ) -> Result<LedgerEntry, LedgerWriteError> {
        let entry = LedgerEntry {
            id: LedgerEntryId::generate(),
            provider: provider.to_string(),
            model: model.to_string(),
            model_tier: tier,
            usage,
            cost: self.prices.cost_of(tier, usage),
            recorded_at: Utc::now(),
            tags,
        };

        self.record(entry.clone()).await?;

        info!(
            event_name = "ledger.entry_recorded",
            entry_id = %entry.id.0,
            battle_id = entry.tags.battle_id.as_ref().map(|id| id.0.as_str()).unwrap_or(""),
            kind = entry.tags.kind.as_str(),
            model_tier = %tier,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            cost = %entry.cost,
            "completion cost recorded"
        );

        Ok(entry)
    }
}
