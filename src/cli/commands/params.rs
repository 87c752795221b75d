//! Parameter listing
//!
//! Prints every timing parameter with its bounds and default, either as an
//! aligned table or as a JSON array.

use std::fmt::Write as _;

use serde_json::json;

use crate::cli::args::{OutputFormat, ParamsArgs};
use crate::config::schema::{ParamName, TimingParameters};
use crate::error::TetherError;

/// Print the parameter table.
///
/// # Errors
///
/// Returns a JSON error if serialization fails.
pub fn run(args: &ParamsArgs) -> Result<(), TetherError> {
    let defaults = TimingParameters::default();
    match args.format {
        OutputFormat::Human => print!("{}", render_table(&defaults)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&to_json(&defaults))?),
    }
    Ok(())
}

/// Renders `values` next to each parameter's bounds, one line per parameter.
#[must_use]
pub fn render_table(values: &TimingParameters) -> String {
    let width = ParamName::ALL
        .iter()
        .map(|p| p.key().len())
        .max()
        .unwrap_or_default();

    let mut out = String::new();
    for (name, value) in values.iter() {
        let bounds = name.bounds();
        let unit = bounds.unit.suffix();
        let range = format!("[{}, {}]", bounds.min, bounds.max);
        let _ = writeln!(
            out,
            "{:<width$}  {:>6}{unit:<2}  {range:<12}  {}",
            name.key(),
            value,
            bounds.label,
        );
    }
    out
}

/// JSON description of every parameter, with `value` taken from `values`.
#[must_use]
pub fn to_json(values: &TimingParameters) -> serde_json::Value {
    let params: Vec<_> = values
        .iter()
        .map(|(name, value)| {
            let bounds = name.bounds();
            json!({
                "name": name.key(),
                "value": value,
                "default": bounds.default,
                "min": bounds.min,
                "max": bounds.max,
                "unit": bounds.unit.suffix(),
                "label": bounds.label,
            })
        })
        .collect();
    serde_json::Value::Array(params)
}
