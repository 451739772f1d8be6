use serde::Serialize;

use arena_core::budget::BudgetState;
use arena_core::config::LoadOptions;
use arena_core::domain::battle::BattleRunResult;
use arena_core::domain::persona::PersonaId;
use arena_core::errors::ApplicationError;
use arena_core::flows::BattleState;

use crate::bootstrap::bootstrap;
use crate::commands::{load_config, runtime, CommandResult};

#[derive(Clone, Debug)]
pub struct BattleArgs {
    pub persona_id: String,
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
struct BattleReport {
    command: &'static str,
    status: &'static str,
    dry_run: bool,
    result: BattleRunResult,
}

pub(crate) fn budget_exceeded(command: &str, state: &BudgetState) -> CommandResult {
    let error = ApplicationError::BudgetExceeded(format!(
        "spent {} of {} today",
        state.daily_spend, state.daily_cap
    ));
    CommandResult::failure(
        command,
        error.error_class(),
        format!("{} ({error})", error.user_message()),
        error.exit_code(),
    )
}

/// Runs one battle. Exit code 0 for a completed battle, 6 for an aborted one.
pub fn run(options: &LoadOptions, args: BattleArgs) -> CommandResult {
    let config = match load_config("battle", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("battle") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    runtime.block_on(async {
        let arena = match bootstrap(config, args.dry_run).await {
            Ok(arena) => arena,
            Err(error) => {
                return CommandResult::failure(
                    "battle",
                    error.error_class(),
                    error.to_string(),
                    error.exit_code(),
                );
            }
        };

        let state = arena.governor.current_state().await;
        if state.is_exceeded {
            arena.pool.close().await;
            return budget_exceeded("battle", &state);
        }

        let outcome = arena.runner.run_battle(&PersonaId(args.persona_id.clone())).await;
        arena.pool.close().await;

        match outcome {
            Ok(result) => {
                let (status, exit_code) = match result.state {
                    BattleState::Completed => ("completed", 0),
                    _ => ("aborted", 6),
                };
                CommandResult::report(
                    exit_code,
                    &BattleReport { command: "battle", status, dry_run: arena.dry_run, result },
                )
            }
            Err(error) => {
                let application = ApplicationError::from(&error);
                CommandResult::failure(
                    "battle",
                    error.error_class(),
                    error.to_string(),
                    application.exit_code(),
                )
            }
        }
    })
}
