//! Configuration module
//!
//! Typed, bounded timing parameters plus the surrounding run settings,
//! the YAML loader, validation, and the live table the sequencer reads.

pub mod live;
pub mod loader;
pub mod schema;
pub mod validation;

pub use live::LiveTimings;
pub use loader::{CONFIG_ENV, ConfigLoader, LoadResult, LoadWarning};
pub use schema::*;
pub use validation::{ValidationResult, Validator};
