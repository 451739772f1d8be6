use std::sync::Arc;

use serde::Serialize;

use arena_agent::BudgetGovernor;
use arena_core::budget::{BudgetPolicy, BudgetState};
use arena_core::config::LoadOptions;
use arena_db::SqlLedgerRepository;

use crate::bootstrap::connect_and_migrate;
use crate::commands::{load_config, runtime, CommandResult};

#[derive(Debug, Serialize)]
struct BudgetReport {
    command: &'static str,
    status: &'static str,
    budget: BudgetState,
}

/// Today's budget state, derived from the ledger.
pub fn run(options: &LoadOptions) -> CommandResult {
    let config = match load_config("budget", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("budget") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = connect_and_migrate(&config).await?;
        let governor = BudgetGovernor::new(
            Arc::new(SqlLedgerRepository::new(pool.clone())),
            BudgetPolicy::from_config(&config.budget, &config.battle),
        );
        let state = governor.current_state().await;
        pool.close().await;
        Ok::<BudgetState, crate::bootstrap::BootstrapError>(state)
    });

    match result {
        Ok(budget) => CommandResult::report(0, &BudgetReport { command: "budget", status: "ok", budget }),
        Err(error) => CommandResult::failure(
            "budget",
            error.error_class(),
            error.to_string(),
            error.exit_code(),
        ),
    }
}
