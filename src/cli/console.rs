//! Operator console
//!
//! Parses one command per stdin line and applies it to a [`RunController`].
//! Parsing is pure so it can be tested without a run; execution may block
//! (a reconnect under the firewall strategy waits for its restore commands)
//! and is therefore driven from a blocking task by the `run` command.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use crate::cli::commands::params::render_table;
use crate::config::ConfigLoader;
use crate::config::schema::{ParamName, SequenceConfig, StrategyKind};
use crate::control::RunController;
use crate::error::{ConfigError, TetherError};

/// Console keywords, used for "did you mean" hints.
const KEYWORDS: [&str; 16] = [
    "start", "pause", "resume", "toggle", "abort", "stop", "status", "set", "offset", "loop",
    "strategy", "params", "defaults", "save", "help", "quit",
];

const HELP: &str = "\
start                  begin a run
pause | resume | toggle
abort | stop           stop the run and restore the network
status                 show phase, cycle and network state
set <param> <value>    change a timing parameter
offset +N | -N | reset nudge the ping offset
loop on | off          repeat cycles or stop after one
strategy <kind>        packet_filter, firewall_rule or simulated
params                 list current parameter values
defaults               put every timing parameter back to its default
save [path]            write the current configuration as YAML
quit                   abort, clean up and exit";

/// Ping offset change requested from the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetChange {
    /// Signed step in milliseconds.
    Nudge(i64),
    /// Back to the configured default.
    Reset,
}

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Start,
    Pause,
    Resume,
    Toggle,
    Abort,
    Status,
    Set { name: ParamName, value: u32 },
    Offset(OffsetChange),
    Loop(bool),
    Strategy(StrategyKind),
    Params,
    Defaults,
    Save(Option<PathBuf>),
    Help,
    Quit,
}

impl FromStr for OperatorCommand {
    type Err = TetherError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let words = shlex::split(line)
            .ok_or_else(|| TetherError::Usage("unbalanced quotes".to_string()))?;
        let Some((head, rest)) = words.split_first() else {
            return Err(TetherError::Usage("empty command".to_string()));
        };
        let keyword = head.to_ascii_lowercase();

        let command = match (keyword.as_str(), rest) {
            ("start", []) => Self::Start,
            ("pause", []) => Self::Pause,
            ("resume", []) => Self::Resume,
            ("toggle", []) => Self::Toggle,
            ("abort" | "stop", []) => Self::Abort,
            ("status", []) => Self::Status,
            ("params", []) => Self::Params,
            ("defaults", []) => Self::Defaults,
            ("help" | "?", []) => Self::Help,
            ("quit" | "exit", []) => Self::Quit,
            ("set", [name, value]) => Self::Set {
                name: name.parse()?,
                value: parse_value(name, value)?,
            },
            ("offset", [arg]) => Self::Offset(parse_offset(arg)?),
            ("loop", [arg]) => Self::Loop(parse_switch(arg)?),
            ("strategy", [kind]) => Self::Strategy(kind.parse()?),
            ("save", []) => Self::Save(None),
            ("save", [path]) => Self::Save(Some(PathBuf::from(path))),
            (known, _) if KEYWORDS.contains(&known) => {
                return Err(TetherError::Usage(format!(
                    "wrong arguments for '{known}' (type 'help')"
                )));
            }
            (unknown, _) => {
                let hint = suggest_keyword(unknown)
                    .map(|k| format!(" (did you mean '{k}'?)"))
                    .unwrap_or_default();
                return Err(TetherError::Usage(format!(
                    "unknown command '{unknown}'{hint}"
                )));
            }
        };
        Ok(command)
    }
}

fn parse_value(name: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        field: name.to_string(),
        value: value.to_string(),
        expected: "a non-negative integer".to_string(),
    })
}

fn parse_offset(arg: &str) -> Result<OffsetChange, TetherError> {
    if arg.eq_ignore_ascii_case("reset") {
        return Ok(OffsetChange::Reset);
    }
    arg.parse::<i64>()
        .map(OffsetChange::Nudge)
        .map_err(|_| TetherError::Usage(format!("offset expects +N, -N or reset, got '{arg}'")))
}

fn parse_switch(arg: &str) -> Result<bool, TetherError> {
    match arg.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" => Ok(true),
        "off" | "false" | "no" => Ok(false),
        _ => Err(TetherError::Usage(format!(
            "loop expects on or off, got '{arg}'"
        ))),
    }
}

fn suggest_keyword(word: &str) -> Option<&'static str> {
    KEYWORDS
        .iter()
        .map(|k| (*k, strsim::jaro_winkler(word, k)))
        .filter(|(_, score)| *score > 0.8)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(k, _)| k)
}

/// Result of executing a console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Text to show the operator.
    Text(String),
    /// The operator asked to leave.
    Quit,
}

/// Applies operator commands to a controller.
#[derive(Debug, Clone)]
pub struct Console {
    controller: Arc<RunController>,
    base: SequenceConfig,
    config_path: Option<PathBuf>,
}

impl Console {
    /// `base` supplies the settings the console cannot change (layout, keys,
    /// firewall commands) when saving.
    #[must_use]
    pub const fn new(
        controller: Arc<RunController>,
        base: SequenceConfig,
        config_path: Option<PathBuf>,
    ) -> Self {
        Self {
            controller,
            base,
            config_path,
        }
    }

    #[must_use]
    pub const fn controller(&self) -> &Arc<RunController> {
        &self.controller
    }

    /// The configuration as it stands after live edits.
    #[must_use]
    pub fn current_config(&self) -> SequenceConfig {
        let timings = self.controller.timings();
        SequenceConfig {
            timings: timings.snapshot(),
            loop_enabled: timings.loop_enabled(),
            strategy: self.controller.connectivity().selected(),
            ..self.base.clone()
        }
    }

    /// Executes one command.
    ///
    /// # Errors
    ///
    /// Returns an error for rejected values, a refused strategy switch, a
    /// failed save, or a sequencer thread that cannot be spawned. None of
    /// these end the session.
    pub fn execute(&self, command: OperatorCommand) -> Result<Reply, TetherError> {
        let ctl = &self.controller;
        let text = match command {
            OperatorCommand::Start => {
                if ctl.start()? {
                    "run started".to_string()
                } else {
                    "already running".to_string()
                }
            }
            OperatorCommand::Pause => running_or(ctl.pause(), "paused"),
            OperatorCommand::Resume => running_or(ctl.resume(), "resumed"),
            OperatorCommand::Toggle => match ctl.toggle_pause() {
                Some(true) => "paused".to_string(),
                Some(false) => "resumed".to_string(),
                None => "not running".to_string(),
            },
            OperatorCommand::Abort => {
                ctl.abort();
                "aborted".to_string()
            }
            OperatorCommand::Status => self.status(),
            OperatorCommand::Set { name, value } => {
                ctl.timings().set(name, value)?;
                format!("{name} = {value}{}", name.bounds().unit.suffix())
            }
            OperatorCommand::Offset(change) => {
                let offset = match change {
                    OffsetChange::Nudge(delta) => ctl.timings().adjust_ping_offset(delta),
                    OffsetChange::Reset => {
                        ctl.timings().reset_ping_offset();
                        ctl.timings().get(ParamName::PingOffset)
                    }
                };
                format!("ping offset {offset} ms")
            }
            OperatorCommand::Loop(enabled) => {
                ctl.timings().set_loop_enabled(enabled);
                format!("loop {}", if enabled { "on" } else { "off" })
            }
            OperatorCommand::Strategy(kind) => {
                ctl.connectivity().select(kind)?;
                if ctl.connectivity().is_available() {
                    format!("strategy {kind}")
                } else {
                    format!("strategy {kind} (unavailable on this host)")
                }
            }
            OperatorCommand::Params => render_table(&ctl.timings().snapshot())
                .trim_end()
                .to_string(),
            OperatorCommand::Defaults => {
                ctl.timings().reset_defaults();
                "timings reset to defaults".to_string()
            }
            OperatorCommand::Save(path) => {
                let path = path.or_else(|| self.config_path.clone()).ok_or_else(|| {
                    TetherError::Usage("no path given and no --config file in use".to_string())
                })?;
                ConfigLoader::new().save(&path, &self.current_config())?;
                format!("saved {}", path.display())
            }
            OperatorCommand::Help => HELP.to_string(),
            OperatorCommand::Quit => return Ok(Reply::Quit),
        };
        Ok(Reply::Text(text))
    }

    fn status(&self) -> String {
        let ctl = &self.controller;
        let connectivity = ctl.connectivity();
        let network = if connectivity.is_active() {
            "blocked"
        } else {
            "connected"
        };
        format!(
            "{} | network {network} via {} | ping offset {} ms | loop {}",
            ctl.snapshot(),
            connectivity.selected(),
            ctl.timings().get(ParamName::PingOffset),
            if ctl.timings().loop_enabled() { "on" } else { "off" },
        )
    }
}

fn running_or(changed: bool, done: &str) -> String {
    if changed {
        done.to_string()
    } else {
        "not running".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::RecordingActuator;
    use crate::connectivity::{ConnectivityController, SimulatedStrategy, Strategies};
    use crate::observability::EventEmitter;
    use crate::sequencer::SequencerContext;

    fn parse(line: &str) -> Result<OperatorCommand, TetherError> {
        line.parse()
    }

    fn console(path: Option<PathBuf>) -> Console {
        let sim = SimulatedStrategy::new();
        let config = SequenceConfig {
            strategy: StrategyKind::Simulated,
            ..SequenceConfig::default()
        };
        let connectivity = Arc::new(ConnectivityController::new(
            config.strategy,
            Strategies::simulated(&sim),
        ));
        let ctx = SequencerContext::new(
            &config,
            Arc::new(RecordingActuator::new()),
            connectivity,
            Arc::new(EventEmitter::noop()),
        );
        Console::new(Arc::new(RunController::new(ctx)), config, path)
    }

    fn text(reply: Reply) -> String {
        match reply {
            Reply::Text(text) => text,
            Reply::Quit => panic!("unexpected quit"),
        }
    }

    #[test]
    fn parses_simple_keywords() {
        assert_eq!(parse("start").unwrap(), OperatorCommand::Start);
        assert_eq!(parse("  STOP ").unwrap(), OperatorCommand::Abort);
        assert_eq!(parse("abort").unwrap(), OperatorCommand::Abort);
        assert_eq!(parse("toggle").unwrap(), OperatorCommand::Toggle);
        assert_eq!(parse("quit").unwrap(), OperatorCommand::Quit);
    }

    #[test]
    fn parses_set_with_flexible_names() {
        assert_eq!(
            parse("set chargeHold 180").unwrap(),
            OperatorCommand::Set {
                name: ParamName::ChargeHold,
                value: 180
            }
        );
        assert!(matches!(
            parse("set charge_hold fast"),
            Err(TetherError::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn unknown_parameter_carries_suggestion() {
        let err = parse("set charge_hld 100").unwrap_err();
        match err {
            TetherError::Config(ConfigError::UnknownParameter { suggestion, .. }) => {
                assert_eq!(suggestion.as_deref(), Some("charge_hold"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_offsets_and_switches() {
        assert_eq!(
            parse("offset +10").unwrap(),
            OperatorCommand::Offset(OffsetChange::Nudge(10))
        );
        assert_eq!(
            parse("offset -5").unwrap(),
            OperatorCommand::Offset(OffsetChange::Nudge(-5))
        );
        assert_eq!(
            parse("offset reset").unwrap(),
            OperatorCommand::Offset(OffsetChange::Reset)
        );
        assert_eq!(parse("loop off").unwrap(), OperatorCommand::Loop(false));
        assert!(parse("loop maybe").is_err());
    }

    #[test]
    fn parses_strategy_and_save() {
        assert_eq!(
            parse("strategy firewall").unwrap(),
            OperatorCommand::Strategy(StrategyKind::FirewallRule)
        );
        assert_eq!(parse("save").unwrap(), OperatorCommand::Save(None));
        assert_eq!(
            parse("save 'my config.yaml'").unwrap(),
            OperatorCommand::Save(Some(PathBuf::from("my config.yaml")))
        );
    }

    #[test]
    fn defaults_resets_live_timings() {
        let console = console(None);
        assert_eq!(parse("defaults").unwrap(), OperatorCommand::Defaults);
        assert!(parse("defaults now").is_err());

        console.execute(parse("set drag 900").unwrap()).unwrap();
        console.execute(parse("offset +20").unwrap()).unwrap();
        let reply = text(console.execute(OperatorCommand::Defaults).unwrap());
        assert_eq!(reply, "timings reset to defaults");

        let timings = console.controller().timings();
        assert_eq!(timings.get(ParamName::Drag), 600);
        assert_eq!(timings.get(ParamName::PingOffset), 0);
    }

    #[test]
    fn misspelled_keyword_is_suggested() {
        let err = parse("statsu").unwrap_err().to_string();
        assert!(err.contains("did you mean 'status'"), "{err}");
        let err = parse("set charge_hold").unwrap_err().to_string();
        assert!(err.contains("wrong arguments for 'set'"), "{err}");
        assert!(parse("").is_err());
    }

    #[test]
    fn set_and_offset_update_live_timings() {
        let console = console(None);
        let reply = console
            .execute(parse("set charge_hold 200").unwrap())
            .unwrap();
        assert_eq!(text(reply), "charge_hold = 200ms");
        assert_eq!(
            console.controller().timings().get(ParamName::ChargeHold),
            200
        );

        assert!(console.execute(parse("set charge_hold 9999").unwrap()).is_err());
        assert_eq!(
            console.controller().timings().get(ParamName::ChargeHold),
            200
        );

        let reply = console.execute(parse("offset +15").unwrap()).unwrap();
        assert_eq!(text(reply), "ping offset 15 ms");
        let reply = console.execute(parse("offset -50").unwrap()).unwrap();
        assert_eq!(text(reply), "ping offset 0 ms");
    }

    #[test]
    fn pause_without_run_reports_idle() {
        let console = console(None);
        let reply = console.execute(OperatorCommand::Pause).unwrap();
        assert_eq!(text(reply), "not running");
        let status = text(console.execute(OperatorCommand::Status).unwrap());
        assert!(status.contains("network connected via simulated"), "{status}");
    }

    #[test]
    fn save_needs_a_path() {
        let console = console(None);
        assert!(matches!(
            console.execute(OperatorCommand::Save(None)),
            Err(TetherError::Usage(_))
        ));
    }

    #[test]
    fn save_writes_live_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.yaml");
        let console = console(Some(path.clone()));
        console
            .execute(OperatorCommand::Set {
                name: ParamName::Drag,
                value: 750,
            })
            .unwrap();
        console.execute(OperatorCommand::Loop(false)).unwrap();
        console.execute(OperatorCommand::Save(None)).unwrap();

        let loaded = ConfigLoader::new().load(&path).unwrap().config;
        assert_eq!(loaded.timings.drag, 750);
        assert!(!loaded.loop_enabled);
        assert_eq!(loaded.strategy, StrategyKind::Simulated);
    }

    #[test]
    fn quit_is_a_reply_not_an_error() {
        let console = console(None);
        assert_eq!(
            console.execute(OperatorCommand::Quit).unwrap(),
            Reply::Quit
        );
    }
}
