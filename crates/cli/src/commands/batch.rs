use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use arena_agent::{BatchOptions, BatchScheduler, BatchSummary, SchedulerError};
use arena_core::config::LoadOptions;
use arena_core::domain::persona::PersonaId;

use crate::bootstrap::bootstrap;
use crate::commands::battle::budget_exceeded;
use crate::commands::{load_config, runtime, CommandResult};

#[derive(Clone, Debug, Default)]
pub struct BatchArgs {
    pub persona_ids: Vec<String>,
    pub size: Option<u32>,
    pub concurrency: Option<u32>,
    pub delay_ms: Option<u64>,
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
struct BatchReport<'a> {
    command: &'static str,
    status: &'static str,
    dry_run: bool,
    error_class: Option<&'static str>,
    message: Option<String>,
    summary: &'a BatchSummary,
}

/// Runs a batch until it is exhausted or a stop condition fires. Ctrl-C acts
/// as the kill signal: no new battles start and in-flight ones are drained.
pub fn run(options: &LoadOptions, args: BatchArgs) -> CommandResult {
    let config = match load_config("batch", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("batch") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let mut batch_options = BatchOptions::from(&config);
    if !args.persona_ids.is_empty() {
        batch_options.persona_ids =
            Some(args.persona_ids.iter().cloned().map(PersonaId).collect());
    }
    if let Some(size) = args.size {
        batch_options.batch_size = size;
    }
    if let Some(concurrency) = args.concurrency {
        batch_options.max_concurrent = usize::try_from(concurrency).unwrap_or(usize::MAX);
    }
    if let Some(delay_ms) = args.delay_ms {
        batch_options.delay_between_battles = Duration::from_millis(delay_ms);
    }

    runtime.block_on(async {
        let arena = match bootstrap(config, args.dry_run).await {
            Ok(arena) => arena,
            Err(error) => {
                return CommandResult::failure(
                    "batch",
                    error.error_class(),
                    error.to_string(),
                    error.exit_code(),
                );
            }
        };

        let state = arena.governor.current_state().await;
        if state.is_exceeded {
            arena.pool.close().await;
            return budget_exceeded("batch", &state);
        }

        let cancel = CancellationToken::new();
        let scheduler =
            BatchScheduler::new(arena.runner.clone(), arena.personas.clone(), cancel.clone());
        let signal_watch = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(event_name = "batch.kill_signal", "interrupt received, draining batch");
                cancel.cancel();
            }
        });

        let outcome = scheduler.run_batch(batch_options).await;
        signal_watch.abort();
        arena.pool.close().await;

        match outcome {
            Ok(summary) => CommandResult::report(
                0,
                &BatchReport {
                    command: "batch",
                    status: "ok",
                    dry_run: arena.dry_run,
                    error_class: None,
                    message: None,
                    summary: &summary,
                },
            ),
            Err(SchedulerError::Ledger { source, partial }) => CommandResult::report(
                5,
                &BatchReport {
                    command: "batch",
                    status: "error",
                    dry_run: arena.dry_run,
                    error_class: Some("ledger_write"),
                    message: Some(source.to_string()),
                    summary: &partial,
                },
            ),
            Err(SchedulerError::Repository(error)) => {
                CommandResult::failure("batch", "persistence", error.to_string(), 3)
            }
            Err(SchedulerError::InvalidOptions(message)) => {
                CommandResult::failure("batch", "config_validation", message, 2)
            }
        }
    })
}
