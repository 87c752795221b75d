//! Configuration validation command
//!
//! Loads each file through the normal pipeline and reports warnings without
//! starting a run.

use serde_json::json;

use crate::cli::args::{OutputFormat, ValidateArgs};
use crate::config::{ConfigLoader, LoadWarning};
use crate::error::TetherError;

/// Validate configuration files.
///
/// # Errors
///
/// Returns an I/O error if a file does not exist, or the first
/// configuration error encountered.
pub fn run(args: &ValidateArgs) -> Result<(), TetherError> {
    let loader = ConfigLoader::new();
    let mut reports = Vec::with_capacity(args.files.len());

    for path in &args.files {
        if !path.exists() {
            return Err(TetherError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("file not found: {}", path.display()),
            )));
        }
        tracing::info!(file = %path.display(), "validating configuration");

        let result = loader.load(path)?;
        log_warnings(&result.warnings);

        match args.format {
            OutputFormat::Human => {
                println!(
                    "{}: ok ({} warning{})",
                    path.display(),
                    result.warnings.len(),
                    if result.warnings.len() == 1 { "" } else { "s" }
                );
            }
            OutputFormat::Json => reports.push(json!({
                "file": path.display().to_string(),
                "valid": true,
                "warnings": result
                    .warnings
                    .iter()
                    .map(|w| json!({ "message": w.message, "location": w.location }))
                    .collect::<Vec<_>>(),
            })),
        }
    }

    if args.format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }
    Ok(())
}

/// Logs loader warnings with their location.
pub fn log_warnings(warnings: &[LoadWarning]) {
    for warning in warnings {
        tracing::warn!(
            location = warning.location.as_deref().unwrap_or("<unknown>"),
            "{}",
            warning.message
        );
    }
}
