//! Logging setup for the operator console.
//!
//! Logs always go to stderr so stdout stays free for console replies.
//! Verbosity only raises the level of this crate's own targets; other
//! crates stay at `warn` unless `TETHER_LOG_LEVEL` says otherwise.

use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

use crate::cli::args::ColorChoice;

/// Environment variable holding a full filter directive, e.g. `tether=trace`.
pub const LOG_LEVEL_ENV: &str = "TETHER_LOG_LEVEL";

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    /// One JSON object per line.
    Json,
}

/// Resolved subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LogSettings {
    directive: String,
    ansi: bool,
    /// Show targets and thread names. The sequencer runs on its own named
    /// thread, so this tells console and run output apart at `-vv`.
    detailed: bool,
}

impl LogSettings {
    fn resolve(verbosity: u8, color: ColorChoice, env_directive: Option<String>) -> Self {
        let directive = env_directive
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| crate_directive(verbosity));
        let ansi = match color {
            ColorChoice::Auto => {
                std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
            }
            ColorChoice::Always => true,
            ColorChoice::Never => false,
        };
        Self {
            directive,
            ansi,
            detailed: verbosity >= 2,
        }
    }
}

/// Builds the default filter for a `-v` count.
///
/// No flag shows warnings and errors only; each `-v` steps this crate
/// through info, debug and trace.
#[must_use]
pub fn crate_directive(verbosity: u8) -> String {
    let level = match verbosity {
        0 => return "warn".to_string(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    format!("warn,{}={level}", env!("CARGO_CRATE_NAME"))
}

/// Installs the global subscriber.
///
/// A second call is a no-op, which keeps tests that share a process quiet.
pub fn init_logging(format: LogFormat, verbosity: u8, color: ColorChoice) {
    let settings = LogSettings::resolve(verbosity, color, std::env::var(LOG_LEVEL_ENV).ok());
    let filter = EnvFilter::try_new(&settings.directive)
        .unwrap_or_else(|_| EnvFilter::new(crate_directive(verbosity)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(settings.detailed)
        .with_thread_names(settings.detailed)
        .with_writer(std::io::stderr);

    let _ = match format {
        LogFormat::Human => builder.with_ansi(settings.ansi).try_init(),
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
    };
}
