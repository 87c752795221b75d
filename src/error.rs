//! Error types for `tether`
//!
//! One top-level error aggregates the configuration, connectivity and
//! actuator failure domains and maps each of them onto a process exit code.

use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `tether` CLI operations.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Connectivity strategy could not be driven
    pub const CONNECTIVITY_ERROR: i32 = 4;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `tether` operations.
#[derive(Debug, Error)]
pub enum TetherError {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Connectivity strategy error
    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),

    /// Actuator port error
    #[error(transparent)]
    Actuator(#[from] ActuatorError),

    /// Invalid command-line usage
    #[error("usage error: {0}")]
    Usage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Run stopped by a termination signal
    #[error("stopped by {0}")]
    Signal(StopSignal),
}

impl TetherError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Connectivity(_) => ExitCode::CONNECTIVITY_ERROR,
            Self::Actuator(_) => ExitCode::ERROR,
            Self::Usage(_) => ExitCode::USAGE_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
            Self::Signal(StopSignal::Interrupt) => ExitCode::INTERRUPTED,
            Self::Signal(StopSignal::Terminate) => ExitCode::TERMINATED,
        }
    }
}

/// Signal that ended a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl std::fmt::Display for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
        })
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the configuration file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Configuration validation failed
    #[error("validation failed for {path}: {}", summarize(errors))]
    ValidationError {
        /// Path (or label) of the configuration that failed
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },

    /// Referenced configuration file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Parameter name is not part of the timing table
    #[error("unknown parameter '{name}'{}", suggestion.as_ref().map(|s| format!(" (did you mean '{s}'?)")).unwrap_or_default())]
    UnknownParameter {
        /// Name supplied by the caller
        name: String,
        /// Closest known parameter name, if any is close enough
        suggestion: Option<String>,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },
}

fn summarize(errors: &[ValidationIssue]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found during configuration validation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the problematic field (e.g., "timings.charge_hold")
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Validation failure that prevents the configuration from being used
    Error,
    /// Potential issue that does not prevent loading
    Warning,
}

// ============================================================================
// Connectivity Errors
// ============================================================================

/// Failures raised while toggling the simulated outage.
#[derive(Debug, Error)]
pub enum ConnectivityError {
    /// The selected strategy has no backend on this host
    #[error("{strategy} strategy is unavailable on this host")]
    Unavailable {
        /// Strategy label
        strategy: &'static str,
    },

    /// The packet intercept handle could not be opened or closed
    #[error("packet intercept failed: {0}")]
    Intercept(#[source] std::io::Error),

    /// A firewall policy command could not be parsed or spawned
    #[error("failed to run `{command}`: {message}")]
    CommandFailed {
        /// The command line as configured
        command: String,
        /// Failure detail
        message: String,
    },

    /// A firewall restore command did not finish in time
    #[error("`{command}` did not finish within {timeout_ms}ms")]
    CommandTimeout {
        /// The command line as configured
        command: String,
        /// Configured timeout
        timeout_ms: u64,
    },
}

// ============================================================================
// Actuator Errors
// ============================================================================

/// Failures reported by an actuator port.
///
/// The sequencer treats these as transient phase faults.
#[derive(Debug, Error)]
pub enum ActuatorError {
    /// The port could not deliver a command
    #[error("actuator delivery failed: {0}")]
    Delivery(String),

    /// The port has been shut down
    #[error("actuator port is closed")]
    Closed,
}
