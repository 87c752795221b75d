//! `tether` - phase sequencer for timed input around a network outage

use clap::Parser;

use tether::cli::args::Cli;
use tether::cli::commands;
use tether::error::{ExitCode, TetherError};
use tether::observability::init_logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if !cli.quiet {
        init_logging(cli.log_format.into(), cli.verbose, cli.color);
    }

    // The run command handles the first signal itself; a second one forces exit.
    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        eprintln!("\nShutting down gracefully... (press Ctrl+C again to force)");
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(ExitCode::INTERRUPTED);
        }
    });

    let result = commands::dispatch(cli).await;

    match result {
        Ok(()) => std::process::exit(ExitCode::SUCCESS),
        Err(e @ TetherError::Signal(_)) => std::process::exit(e.exit_code()),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}
