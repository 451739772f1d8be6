//! Runs many battles across personas with bounded concurrency.
//!
//! Three conditions stop a batch: an external kill signal, the run's own cost
//! ceiling, and today's budget reaching the cap. They are checked before every
//! start and after every completion. Battles already in flight are always
//! drained, so their spend still lands in the ledger and the summary.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use arena_core::config::AppConfig;
use arena_core::domain::battle::{AbortReason, BattleId, BattleRunResult};
use arena_core::domain::persona::PersonaId;
use arena_core::flows::BattleState;
use arena_db::repositories::{PersonaRepository, RepositoryError};

use crate::accountant::LedgerWriteError;
use crate::orchestrator::{BattleError, BattleRunner};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchOptions {
    /// Explicit personas to battle. `None` uses every active persona.
    pub persona_ids: Option<Vec<PersonaId>>,
    pub batch_size: u32,
    pub max_concurrent: usize,
    pub delay_between_battles: Duration,
    pub run_cost_ceiling: Option<Decimal>,
    pub max_attempts_per_persona: u32,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            persona_ids: None,
            batch_size: 10,
            max_concurrent: 2,
            delay_between_battles: Duration::from_millis(1_500),
            run_cost_ceiling: None,
            max_attempts_per_persona: 2,
        }
    }
}

impl From<&AppConfig> for BatchOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            persona_ids: None,
            batch_size: config.batch.batch_size,
            max_concurrent: usize::try_from(config.batch.max_concurrent).unwrap_or(1),
            delay_between_battles: Duration::from_millis(config.batch.delay_ms),
            run_cost_ceiling: config.budget.run_cost_ceiling_usd,
            max_attempts_per_persona: config.batch.max_attempts_per_persona,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    KillSignal,
    RunCostCeiling,
    DailyCapExceeded,
    NoEligiblePersonas,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KillSignal => "kill_signal",
            Self::RunCostCeiling => "run_cost_ceiling",
            Self::DailyCapExceeded => "daily_cap_exceeded",
            Self::NoEligiblePersonas => "no_eligible_personas",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BatchError {
    pub persona_id: PersonaId,
    pub battle_id: Option<BattleId>,
    pub class: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub results: Vec<BattleRunResult>,
    pub battles_started: u32,
    pub battles_completed: u32,
    pub battles_aborted: u32,
    pub total_cost: Decimal,
    pub stop_reason: Option<StopReason>,
    pub kill_switch_fired: bool,
    pub errors: Vec<BatchError>,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("persona list unavailable: {0}")]
    Repository(#[from] RepositoryError),
    #[error("batch halted on ledger failure: {source}")]
    Ledger {
        #[source]
        source: LedgerWriteError,
        partial: Box<BatchSummary>,
    },
    #[error("invalid batch options: {0}")]
    InvalidOptions(String),
}

#[derive(Clone, Debug)]
struct Slot {
    persona_id: PersonaId,
    attempt: u32,
}

type Finished = (Slot, Result<BattleRunResult, BattleError>);

pub struct BatchScheduler {
    runner: Arc<BattleRunner>,
    personas: Arc<dyn PersonaRepository>,
    cancel: CancellationToken,
}

impl BatchScheduler {
    pub fn new(
        runner: Arc<BattleRunner>,
        personas: Arc<dyn PersonaRepository>,
        cancel: CancellationToken,
    ) -> Self {
        Self { runner, personas, cancel }
    }

    /// Token that stops new starts when cancelled.
    pub fn kill_signal(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run_batch(&self, options: BatchOptions) -> Result<BatchSummary, SchedulerError> {
        if options.max_concurrent == 0 {
            return Err(SchedulerError::InvalidOptions(
                "max_concurrent must be at least 1".to_string(),
            ));
        }

        let mut summary = BatchSummary::default();
        let roster = self.resolve_personas(&options, &mut summary).await?;
        if roster.is_empty() {
            summary.stop_reason = Some(StopReason::NoEligiblePersonas);
            warn!(event_name = "batch.no_personas", "no eligible personas for batch");
            return Ok(summary);
        }

        let mut queue: VecDeque<Slot> = roster
            .iter()
            .cycle()
            .take(usize::try_from(options.batch_size).unwrap_or(usize::MAX))
            .map(|persona_id| Slot { persona_id: persona_id.clone(), attempt: 1 })
            .collect();

        info!(
            event_name = "batch.started",
            batch_size = options.batch_size,
            max_concurrent = options.max_concurrent,
            personas = roster.len(),
            "batch started"
        );

        let semaphore = Arc::new(Semaphore::new(options.max_concurrent));
        let mut tasks: JoinSet<Finished> = JoinSet::new();
        let mut fatal: Option<LedgerWriteError> = None;

        loop {
            while tasks.len() >= options.max_concurrent
                && fatal.is_none()
                && summary.stop_reason.is_none()
            {
                if let Some(joined) = tasks.join_next().await {
                    fatal = self.absorb(joined, &options, &mut queue, &mut summary);
                    if fatal.is_none() {
                        self.check_after_completion(&options, &mut summary).await;
                    }
                }
            }
            if fatal.is_some() || summary.stop_reason.is_some() {
                break;
            }

            if queue.is_empty() {
                match tasks.join_next().await {
                    Some(joined) => {
                        fatal = self.absorb(joined, &options, &mut queue, &mut summary);
                        if fatal.is_none() {
                            self.check_after_completion(&options, &mut summary).await;
                        }
                        continue;
                    }
                    None => break,
                }
            }

            if summary.battles_started > 0 && !options.delay_between_battles.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep(options.delay_between_battles) => {}
                }
            }

            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|error| SchedulerError::InvalidOptions(error.to_string()))?;

            if let Some(reason) = self.stop_condition(&options, &summary).await {
                summary.stop_reason = Some(reason);
                break;
            }

            let Some(slot) = queue.pop_front() else {
                continue;
            };
            summary.battles_started += 1;
            let runner = Arc::clone(&self.runner);
            tasks.spawn(async move {
                let _permit = permit;
                let result = runner.run_battle(&slot.persona_id).await;
                (slot, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Some(error) = self.absorb(joined, &options, &mut queue, &mut summary) {
                fatal.get_or_insert(error);
            }
        }
        if fatal.is_none() {
            self.check_after_completion(&options, &mut summary).await;
        }

        if let Some(source) = fatal {
            warn!(
                event_name = "batch.ledger_failure",
                battles_started = summary.battles_started,
                total_cost = %summary.total_cost,
                error = %source,
                "batch halted after cost ledger failure"
            );
            return Err(SchedulerError::Ledger { source, partial: Box::new(summary) });
        }

        info!(
            event_name = "batch.finished",
            battles_started = summary.battles_started,
            battles_completed = summary.battles_completed,
            battles_aborted = summary.battles_aborted,
            total_cost = %summary.total_cost,
            stop_reason = summary.stop_reason.map(|reason| reason.as_str()).unwrap_or(""),
            kill_switch_fired = summary.kill_switch_fired,
            "batch finished"
        );
        Ok(summary)
    }

    async fn resolve_personas(
        &self,
        options: &BatchOptions,
        summary: &mut BatchSummary,
    ) -> Result<Vec<PersonaId>, SchedulerError> {
        let Some(requested) = &options.persona_ids else {
            let active = self.personas.list_active().await?;
            return Ok(active.into_iter().map(|persona| persona.id).collect());
        };

        let mut roster = Vec::with_capacity(requested.len());
        for persona_id in requested {
            let rejection = match self.personas.find_by_id(persona_id).await? {
                Some(persona) if persona.active => None,
                Some(_) => Some(BattleError::PersonaInactive(persona_id.clone())),
                None => Some(BattleError::PersonaNotFound(persona_id.clone())),
            };
            match rejection {
                None => roster.push(persona_id.clone()),
                Some(error) => {
                    warn!(
                        event_name = "batch.persona_rejected",
                        persona_id = %persona_id,
                        error = %error,
                        "persona skipped"
                    );
                    summary.errors.push(BatchError {
                        persona_id: persona_id.clone(),
                        battle_id: None,
                        class: error.error_class().to_string(),
                        message: error.to_string(),
                    });
                }
            }
        }
        Ok(roster)
    }

    async fn stop_condition(&self, options: &BatchOptions, summary: &BatchSummary) -> Option<StopReason> {
        let reason = if self.cancel.is_cancelled() {
            Some(StopReason::KillSignal)
        } else if options.run_cost_ceiling.is_some_and(|ceiling| summary.total_cost >= ceiling) {
            Some(StopReason::RunCostCeiling)
        } else if self.runner.governor().current_state().await.is_exceeded {
            Some(StopReason::DailyCapExceeded)
        } else {
            None
        };

        if let Some(reason) = reason {
            warn!(
                event_name = "batch.stopping",
                stop_reason = reason.as_str(),
                battles_started = summary.battles_started,
                total_cost = %summary.total_cost,
                "stop condition met, no new battles will start"
            );
        }
        reason
    }

    /// Records the first stop condition seen once a battle has finished, so a
    /// stop caused by the last battles of a run still shows in the summary.
    async fn check_after_completion(&self, options: &BatchOptions, summary: &mut BatchSummary) {
        if summary.stop_reason.is_none() {
            let reason = self.stop_condition(options, summary).await;
            summary.stop_reason = reason;
        }
    }

    /// Folds one finished battle into the summary. Returns the ledger error
    /// when the battle failed to record its spend.
    fn absorb(
        &self,
        joined: Result<Finished, JoinError>,
        options: &BatchOptions,
        queue: &mut VecDeque<Slot>,
        summary: &mut BatchSummary,
    ) -> Option<LedgerWriteError> {
        let (slot, outcome) = match joined {
            Ok(finished) => finished,
            Err(error) => {
                warn!(event_name = "batch.task_failed", error = %error, "battle task did not finish");
                summary.errors.push(BatchError {
                    persona_id: PersonaId(String::new()),
                    battle_id: None,
                    class: "task_join".to_string(),
                    message: error.to_string(),
                });
                return None;
            }
        };

        match outcome {
            Ok(result) => {
                summary.total_cost += result.cost;
                match result.state {
                    BattleState::Completed => summary.battles_completed += 1,
                    _ => summary.battles_aborted += 1,
                }
                if result.abort_reason.as_ref().is_some_and(AbortReason::is_kill_switch) {
                    summary.kill_switch_fired = true;
                }
                let gateway_failed =
                    matches!(result.abort_reason, Some(AbortReason::GatewayFailure { .. }));
                if gateway_failed && slot.attempt < options.max_attempts_per_persona {
                    info!(
                        event_name = "batch.persona_requeued",
                        persona_id = %slot.persona_id,
                        battle_id = %result.battle_id,
                        attempt = slot.attempt,
                        "gateway failure, persona re-queued"
                    );
                    queue.push_front(Slot { persona_id: slot.persona_id, attempt: slot.attempt + 1 });
                }
                summary.results.push(result);
                None
            }
            Err(BattleError::Ledger(error)) => Some(error),
            Err(error) => {
                let battle_id = match &error {
                    BattleError::GradingFailed { battle_id, .. }
                    | BattleError::Persistence { battle_id, .. } => Some(battle_id.clone()),
                    _ => None,
                };
                if battle_id.is_some() {
                    summary.battles_aborted += 1;
                }
                summary.total_cost += error.spent();
                warn!(
                    event_name = "batch.battle_failed",
                    persona_id = %slot.persona_id,
                    error_class = error.error_class(),
                    error = %error,
                    "battle failed"
                );
                summary.errors.push(BatchError {
                    persona_id: slot.persona_id,
                    battle_id,
                    class: error.error_class().to_string(),
                    message: error.to_string(),
                });
                None
            }
        }
    }
}
