//! `run` command
//!
//! Wires a controller to the dry-run actuator and the configured
//! connectivity strategy, then serves the operator console on stdin until
//! `quit`, end of input with no active run, or a termination signal. Every
//! exit path ends in [`RunController::shutdown`], so the network is restored
//! before the process leaves.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};

use super::validate::log_warnings;
use crate::actuator::LoggingActuator;
use crate::cli::args::RunArgs;
use crate::cli::console::{Console, OperatorCommand, Reply};
use crate::config::ConfigLoader;
use crate::config::schema::{ParamName, SequenceConfig};
use crate::connectivity::{ConnectivityController, Strategies};
use crate::control::RunController;
use crate::error::{StopSignal, TetherError};
use crate::observability::EventEmitter;
use crate::sequencer::SequencerContext;

/// How often a run is polled for completion once stdin has closed.
const IDLE_POLL: Duration = Duration::from_millis(200);

/// Load the configuration and serve the operator console.
///
/// # Errors
///
/// Returns a configuration or I/O error during setup, or
/// `TetherError::Signal` when stopped by SIGINT/SIGTERM.
pub async fn run(args: &RunArgs) -> Result<(), TetherError> {
    if let Some(port) = args.metrics_port {
        crate::observability::init_metrics(Some(port))?;
        tracing::info!(port, "Prometheus metrics endpoint started");
    }

    let config = load_config(args)?;

    let events = if let Some(ref path) = args.events_file {
        EventEmitter::from_file(path)?
    } else {
        EventEmitter::stderr()
    };

    let connectivity = Arc::new(ConnectivityController::new(
        config.strategy,
        Strategies::from_config(&config),
    ));
    if !connectivity.is_available() {
        tracing::warn!(
            strategy = %config.strategy,
            "connectivity strategy is unavailable on this host; disconnects will fail"
        );
    }

    let ctx = SequencerContext::new(
        &config,
        Arc::new(LoggingActuator),
        connectivity,
        Arc::new(events),
    );
    let controller = Arc::new(RunController::new(ctx));
    let console = Console::new(Arc::clone(&controller), config, args.config.clone());

    if args.autostart {
        controller.start()?;
    }

    let outcome = serve(&console).await;

    tokio::task::spawn_blocking(move || controller.shutdown())
        .await
        .map_err(join_error)?;
    tracing::info!("shutdown complete");

    outcome
}

/// Reads the configuration file (if any) and applies command-line overrides.
fn load_config(args: &RunArgs) -> Result<SequenceConfig, TetherError> {
    let mut config = if let Some(ref path) = args.config {
        tracing::info!(config = %path.display(), "loading configuration");
        let result = ConfigLoader::new().load(path)?;
        log_warnings(&result.warnings);
        result.config
    } else {
        SequenceConfig::default()
    };

    if let Some(strategy) = args.strategy {
        config.strategy = strategy.into();
    }
    if args.no_loop {
        config.loop_enabled = false;
    }
    if let Some(offset) = args.ping_offset {
        ParamName::PingOffset.check(offset)?;
        config.timings.ping_offset = offset;
    }
    Ok(config)
}

async fn serve(console: &Console) -> Result<(), TetherError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let signal = wait_for_signal();
    tokio::pin!(signal);

    loop {
        tokio::select! {
            stop = &mut signal => {
                tracing::info!(signal = %stop, "shutting down");
                return Err(TetherError::Signal(stop));
            }
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match execute_line(console, &line).await {
                    Ok(Reply::Quit) => return Ok(()),
                    Ok(Reply::Text(text)) => println!("{text}"),
                    Err(e) => eprintln!("error: {e}"),
                },
                None => {
                    tracing::debug!("stdin closed");
                    stdin_open = false;
                }
            },
            () = tokio::time::sleep(IDLE_POLL), if !stdin_open => {
                if !console.controller().is_running() {
                    return Ok(());
                }
            }
        }
    }
}

async fn execute_line(console: &Console, line: &str) -> Result<Reply, TetherError> {
    let command: OperatorCommand = line.parse()?;
    let console = console.clone();
    tokio::task::spawn_blocking(move || console.execute(command))
        .await
        .map_err(join_error)?
}

fn join_error(e: tokio::task::JoinError) -> TetherError {
    TetherError::Io(std::io::Error::other(e))
}

async fn wait_for_signal() -> StopSignal {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    () = interrupt() => StopSignal::Interrupt,
                    _ = sigterm.recv() => StopSignal::Terminate,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                interrupt().await;
                StopSignal::Interrupt
            }
        }
    }

    #[cfg(not(unix))]
    {
        interrupt().await;
        StopSignal::Interrupt
    }
}

async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Ctrl+C handler unavailable");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::StrategyArg;
    use crate::config::schema::StrategyKind;

    #[test]
    fn overrides_apply_without_a_file() {
        let args = RunArgs {
            strategy: Some(StrategyArg::Simulated),
            no_loop: true,
            ping_offset: Some(35),
            ..RunArgs::default()
        };
        let config = load_config(&args).unwrap();
        assert_eq!(config.strategy, StrategyKind::Simulated);
        assert!(!config.loop_enabled);
        assert_eq!(config.timings.ping_offset, 35);
    }

    #[test]
    fn out_of_range_ping_offset_is_rejected() {
        let args = RunArgs {
            ping_offset: Some(301),
            ..RunArgs::default()
        };
        assert!(matches!(
            load_config(&args),
            Err(TetherError::Config(_))
        ));
    }

    #[test]
    fn overrides_win_over_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.yaml");
        std::fs::write(
            &path,
            "strategy: firewall_rule\nloop_enabled: true\ntimings:\n  ping_offset: 10\n",
        )
        .unwrap();

        let args = RunArgs {
            config: Some(path),
            strategy: Some(StrategyArg::Simulated),
            ping_offset: Some(20),
            ..RunArgs::default()
        };
        let config = load_config(&args).unwrap();
        assert_eq!(config.strategy, StrategyKind::Simulated);
        assert!(config.loop_enabled);
        assert_eq!(config.timings.ping_offset, 20);
    }
}
