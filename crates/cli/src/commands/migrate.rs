use arena_core::config::LoadOptions;

use crate::bootstrap::connect_and_migrate;
use crate::commands::{load_config, runtime, CommandResult};

pub fn run(options: &LoadOptions) -> CommandResult {
    let config = match load_config("migrate", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("migrate") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = connect_and_migrate(&config).await?;
        pool.close().await;
        Ok::<(), crate::bootstrap::BootstrapError>(())
    });

    match result {
        Ok(()) => CommandResult::success("migrate", "applied pending migrations"),
        Err(error) => CommandResult::failure(
            "migrate",
            error.error_class(),
            error.to_string(),
            error.exit_code(),
        ),
    }
}
