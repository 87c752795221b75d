//! Firewall rule strategy
//!
//! Drives the host firewall through configured policy commands. Block
//! commands are spawned and left to finish on their own so the outage
//! starts as fast as possible; restore commands are awaited, each up to the
//! configured timeout. Traffic may take a moment to flow again after
//! `reconnect()` returns.

use std::process::{Child, Command, Stdio};
use std::time::Duration;

use wait_timeout::ChildExt;

use super::ConnectivityStrategy;
use crate::config::schema::{FirewallCommands, StrategyKind};
use crate::error::ConnectivityError;

/// Runs block/restore policy commands.
#[derive(Debug)]
pub struct FirewallRuleStrategy {
    commands: FirewallCommands,
    /// Block commands still running.
    pending: Vec<Child>,
    /// Set once block commands have run in this process.
    engaged: bool,
}

impl FirewallRuleStrategy {
    #[must_use]
    pub const fn new(commands: FirewallCommands) -> Self {
        Self {
            commands,
            pending: Vec::new(),
            engaged: false,
        }
    }

    fn restore_timeout(&self) -> Duration {
        Duration::from_millis(self.commands.restore_timeout_ms)
    }

    /// Drops block commands that have already exited.
    fn reap(&mut self) {
        self.pending.retain_mut(|child| match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    tracing::warn!(%status, "firewall block command failed");
                }
                false
            }
            Ok(None) => true,
            Err(e) => {
                tracing::debug!(error = %e, "could not poll firewall command");
                false
            }
        });
    }

    /// Waits for every block command still running, killing any that
    /// outlive the restore timeout.
    fn settle_pending(&mut self) {
        let timeout = self.restore_timeout();
        for mut child in self.pending.drain(..) {
            match child.wait_timeout(timeout) {
                Ok(Some(_)) => {}
                Ok(None) => stop(&mut child, "firewall block command"),
                Err(e) => tracing::debug!(error = %e, "could not wait for firewall block command"),
            }
        }
    }

    fn run_restore(&self, line: &str) -> Result<(), ConnectivityError> {
        let mut child = spawn(line)?;
        match child.wait_timeout(self.restore_timeout()) {
            Ok(Some(status)) if status.success() => Ok(()),
            Ok(Some(status)) => Err(ConnectivityError::CommandFailed {
                command: line.to_string(),
                message: format!("exited with {status}"),
            }),
            Ok(None) => {
                stop(&mut child, line);
                Err(ConnectivityError::CommandTimeout {
                    command: line.to_string(),
                    timeout_ms: self.commands.restore_timeout_ms,
                })
            }
            Err(e) => Err(ConnectivityError::CommandFailed {
                command: line.to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Undoes block commands that did start before a later one failed.
    fn undo_partial_block(&mut self, started: usize) {
        tracing::warn!(
            started,
            total = self.commands.block.len(),
            "firewall block incomplete, restoring"
        );
        self.settle_pending();
        if let Err(e) = self.restore_all() {
            tracing::warn!(error = %e, "restore after incomplete block failed");
        }
    }

    fn restore_all(&self) -> Result<(), ConnectivityError> {
        for line in &self.commands.restore {
            self.run_restore(line)?;
            tracing::debug!(command = %line, "firewall restore finished");
        }
        Ok(())
    }
}

/// Kills a command that overran its budget and reaps it.
fn stop(child: &mut Child, what: &str) {
    if let Err(e) = child.kill() {
        tracing::debug!(command = %what, error = %e, "could not kill firewall command");
    }
    if let Err(e) = child.wait() {
        tracing::debug!(command = %what, error = %e, "could not reap firewall command");
    }
}

/// Splits a command line with shell-word rules and spawns it detached from
/// our stdio.
fn spawn(line: &str) -> Result<Child, ConnectivityError> {
    let words = shlex::split(line).unwrap_or_default();
    let Some((program, args)) = words.split_first() else {
        return Err(ConnectivityError::CommandFailed {
            command: line.to_string(),
            message: "empty or unparseable command".to_string(),
        });
    };
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| ConnectivityError::CommandFailed {
            command: line.to_string(),
            message: e.to_string(),
        })
}

impl ConnectivityStrategy for FirewallRuleStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FirewallRule
    }

    fn is_available(&self) -> bool {
        !self.commands.block.is_empty()
            && self
                .commands
                .block
                .iter()
                .chain(&self.commands.restore)
                .filter_map(|line| shlex::split(line)?.into_iter().next())
                .all(|program| which::which(program).is_ok())
    }

    /// Spawns every block command without waiting for it.
    ///
    /// If a later command fails to start, the ones already started are
    /// awaited and the restore commands run before the error is returned,
    /// so a failed disconnect never leaves a partial outage behind.
    fn disconnect(&mut self) -> Result<(), ConnectivityError> {
        self.reap();
        self.engaged = true;
        let mut failure = None;
        for (index, line) in self.commands.block.iter().enumerate() {
            match spawn(line) {
                Ok(child) => {
                    tracing::debug!(command = %line, "firewall block spawned");
                    self.pending.push(child);
                }
                Err(e) => {
                    failure = Some((index, e));
                    break;
                }
            }
        }
        let Some((started, error)) = failure else {
            return Ok(());
        };
        if started > 0 {
            self.undo_partial_block(started);
        }
        self.engaged = false;
        Err(error)
    }

    fn reconnect(&mut self) -> Result<(), ConnectivityError> {
        self.reap();
        self.restore_all()
    }

    fn cleanup(&mut self) {
        if !self.engaged {
            return;
        }
        self.settle_pending();
        if let Err(e) = self.restore_all() {
            tracing::warn!(error = %e, "firewall cleanup failed");
        }
        self.engaged = false;
    }
}
