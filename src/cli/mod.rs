//! Command-line interface
//!
//! Argument definitions, command handlers, and the line-oriented operator
//! console that drives a run from stdin.

pub mod args;
pub mod commands;
pub mod console;
