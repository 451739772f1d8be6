use std::process::ExitCode;

fn main() -> ExitCode {
    arena_cli::run()
}
