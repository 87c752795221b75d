//! Configuration validation
//!
//! Validation runs on the fully deserialized `SequenceConfig` and collects
//! ALL issues instead of stopping at the first one, so an operator fixing a
//! hand-edited file sees every problem in a single pass.
//!
//! Out-of-range values are rejected, never clamped.

use crate::config::schema::{ParamName, Point, SequenceConfig, StrategyKind, TimingParameters};
use crate::coords::{BASE_HEIGHT, BASE_WIDTH, MAX_SCREEN_COORD};
use crate::error::{Severity, ValidationIssue};

// ============================================================================
// Public API
// ============================================================================

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors (prevent loading).
    pub errors: Vec<ValidationIssue>,

    /// Validation warnings (informational).
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Configuration validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a configuration and returns the result.
    pub fn validate(&mut self, config: &SequenceConfig) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        self.check_timings(&config.timings, "timings");
        self.check_loop(config);
        self.check_layout(config);
        self.check_keys(config);
        self.check_firewall(config);

        self.finish()
    }

    fn finish(&mut self) -> ValidationResult {
        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Timing Validation
    // ========================================================================

    fn check_timings(&mut self, timings: &TimingParameters, prefix: &str) {
        for (name, value) in timings.iter() {
            let bounds = name.bounds();
            if !bounds.contains(value) {
                self.add_error(
                    &format!("{prefix}.{name}"),
                    &format!("value {value} outside [{}, {}]", bounds.min, bounds.max),
                );
            }
        }

        if timings.reconnect_on_throw > timings.throw_count {
            self.add_error(
                &format!("{prefix}.{}", ParamName::ReconnectOnThrow),
                &format!(
                    "reconnect on throw #{} but only {} throws are configured",
                    timings.reconnect_on_throw, timings.throw_count
                ),
            );
        } else if timings.reconnect_on_throw == timings.throw_count && timings.reconnect_delay == 0 {
            self.add_warning(
                &format!("{prefix}.{}", ParamName::ReconnectDelay),
                "reconnect lands on the last throw with no delay; the throw may not register",
            );
        }
    }

    fn check_loop(&mut self, config: &SequenceConfig) {
        if config.loop_enabled && config.timings.loop_delay == 0 {
            self.add_warning(
                &format!("timings.{}", ParamName::LoopDelay),
                "loop delay is 0; cycles will run back-to-back",
            );
        }
    }

    // ========================================================================
    // Layout & Keys
    // ========================================================================

    fn check_layout(&mut self, config: &SequenceConfig) {
        let viewport = config.layout.viewport;
        if viewport.width == 0 || viewport.height == 0 {
            self.add_error(
                "layout.viewport",
                "viewport width and height must be non-zero",
            );
        }
        let limit = MAX_SCREEN_COORD.unsigned_abs();
        if viewport.width.max(viewport.height) > limit
            || viewport.left.unsigned_abs() > limit
            || viewport.top.unsigned_abs() > limit
        {
            self.add_error(
                "layout.viewport",
                &format!("viewport must lie within +/-{MAX_SCREEN_COORD}"),
            );
        }
        for (path, point) in [
            ("layout.source", config.layout.source),
            ("layout.destination", config.layout.destination),
        ] {
            if !within_base(point) {
                self.add_error(
                    path,
                    &format!("point {point} outside the {BASE_WIDTH}x{BASE_HEIGHT} base area"),
                );
            }
        }
        if config.layout.source == config.layout.destination {
            self.add_warning(
                "layout.destination",
                "drag source and destination are the same point",
            );
        }
    }

    fn check_keys(&mut self, config: &SequenceConfig) {
        if config.keys.inventory.trim().is_empty() {
            self.add_error("keys.inventory", "key name cannot be empty");
        }
        if config.keys.pickup.trim().is_empty() {
            self.add_error("keys.pickup", "key name cannot be empty");
        }
    }

    // ========================================================================
    // Firewall Commands
    // ========================================================================

    fn check_firewall(&mut self, config: &SequenceConfig) {
        let firewall = &config.firewall;
        let required = config.strategy == StrategyKind::FirewallRule;

        for (label, commands) in [("block", &firewall.block), ("restore", &firewall.restore)] {
            if commands.is_empty() && required {
                self.add_error(
                    &format!("firewall.{label}"),
                    "firewall_rule strategy needs at least one command",
                );
            }
            for (i, command) in commands.iter().enumerate() {
                if shlex::split(command).is_none_or(|words| words.is_empty()) {
                    self.add_error(
                        &format!("firewall.{label}[{i}]"),
                        "command is empty or has unbalanced quotes",
                    );
                }
            }
        }

        if firewall.restore_timeout_ms == 0 {
            self.add_error(
                "firewall.restore_timeout_ms",
                "restore timeout must be greater than 0",
            );
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}

fn within_base(point: Point) -> bool {
    u32::try_from(point.x).is_ok_and(|x| x <= BASE_WIDTH)
        && u32::try_from(point.y).is_ok_and(|y| y <= BASE_HEIGHT)
}
