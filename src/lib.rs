//! `tether` - phase sequencer for timed input around a network outage
//!
//! A run walks a fixed cycle of phases (charge, cancel, disconnect,
//! inventory, combat, pickup), issuing abstract actuator commands and
//! blocking or restoring the host's traffic between interruptible waits.
//! Every wait can be paused or aborted from another thread, and an abort
//! always leaves the network connected with no input held.

pub mod actuator;
pub mod cli;
pub mod config;
pub mod connectivity;
pub mod control;
pub mod coords;
pub mod error;
pub mod observability;
pub mod sequencer;
