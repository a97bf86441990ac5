mod cli_args;
mod error_map;
mod state_store;
mod turn_runner;

use std::ffi::OsString;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli_args::{Cli, Mode};
use error_map::emit_error;

/// Logs go to stderr so stdout stays a clean line protocol.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub async fn run_cli_from_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            return 2;
        }
    };

    let outcome = match cli.command {
        Mode::Turn(args) => turn_runner::run_turn(args).await,
    };
    match outcome {
        Ok(code) => code,
        Err(error) => emit_error(&error),
    }
}
