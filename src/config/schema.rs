//! Configuration schema types
//!
//! This module defines the typed configuration for a `tether` run: the
//! bounded timing table, the connectivity strategy selector, the inventory
//! drag layout, key bindings for the target, and the firewall policy
//! commands. These types are deserialized from YAML configuration files.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ============================================================================
// Top-Level Configuration
// ============================================================================

/// Root configuration for a `tether` run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct SequenceConfig {
    /// Phase timings (missing keys fall back to defaults)
    pub timings: TimingParameters,

    /// Whether the sequencer restarts at Charge after each cycle
    pub loop_enabled: bool,

    /// Connectivity strategy used to simulate the outage
    pub strategy: StrategyKind,

    /// Inventory drag geometry
    pub layout: Layout,

    /// Keys sent to the target
    pub keys: KeyBindings,

    /// Policy commands for the firewall strategy
    pub firewall: FirewallCommands,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            timings: TimingParameters::default(),
            loop_enabled: true,
            strategy: StrategyKind::default(),
            layout: Layout::default(),
            keys: KeyBindings::default(),
            firewall: FirewallCommands::default(),
        }
    }
}

// ============================================================================
// Timing Parameters
// ============================================================================

/// Name of a single tunable timing parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamName {
    ChargeHold,
    CancelHold,
    PostCancelDelay,
    PreDisconnectDelay,
    Settle,
    PingOffset,
    OpenDelay,
    InventorySettle,
    Grip,
    Drag,
    Drop,
    Close,
    ThrowCount,
    ThrowHold,
    ThrowDelay,
    ReconnectOnThrow,
    ReconnectDelay,
    ECount,
    EHold,
    EDelay,
    LoopDelay,
}

/// Unit a parameter is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamUnit {
    Millis,
    Count,
}

impl ParamUnit {
    /// Short suffix used when printing values.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Millis => "ms",
            Self::Count => "x",
        }
    }
}

/// Declared bounds and default for a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamBounds {
    pub name: ParamName,
    pub min: u32,
    pub max: u32,
    pub default: u32,
    pub unit: ParamUnit,
    pub label: &'static str,
}

impl ParamBounds {
    const fn ms(name: ParamName, min: u32, max: u32, default: u32, label: &'static str) -> Self {
        Self {
            name,
            min,
            max,
            default,
            unit: ParamUnit::Millis,
            label,
        }
    }

    const fn count(name: ParamName, min: u32, max: u32, default: u32, label: &'static str) -> Self {
        Self {
            name,
            min,
            max,
            default,
            unit: ParamUnit::Count,
            label,
        }
    }

    /// Returns `true` when `value` lies within `[min, max]`.
    #[must_use]
    pub const fn contains(&self, value: u32) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Every parameter in phase order, with its bounds.
pub const PARAM_BOUNDS: [ParamBounds; 21] = [
    ParamBounds::ms(ParamName::ChargeHold, 10, 300, 150, "Charge hold"),
    ParamBounds::ms(ParamName::CancelHold, 10, 200, 50, "Secondary hold"),
    ParamBounds::ms(ParamName::PostCancelDelay, 0, 200, 30, "Post-cancel delay"),
    ParamBounds::ms(ParamName::PreDisconnectDelay, 0, 200, 0, "Pre-disconnect delay"),
    ParamBounds::ms(ParamName::Settle, 0, 500, 50, "Disconnect settle"),
    ParamBounds::ms(ParamName::PingOffset, 0, 300, 0, "Ping offset"),
    ParamBounds::ms(ParamName::OpenDelay, 50, 800, 400, "Inventory open delay"),
    ParamBounds::ms(ParamName::InventorySettle, 0, 300, 150, "Pointer settle"),
    ParamBounds::ms(ParamName::Grip, 20, 500, 100, "Grip time"),
    ParamBounds::ms(ParamName::Drag, 100, 1500, 600, "Drag duration"),
    ParamBounds::ms(ParamName::Drop, 20, 500, 100, "Drop delay"),
    ParamBounds::ms(ParamName::Close, 50, 500, 200, "Close delay"),
    ParamBounds::count(ParamName::ThrowCount, 1, 10, 2, "Throw count"),
    ParamBounds::ms(ParamName::ThrowHold, 10, 200, 49, "Throw hold"),
    ParamBounds::ms(ParamName::ThrowDelay, 10, 200, 49, "Throw interval"),
    ParamBounds::count(ParamName::ReconnectOnThrow, 1, 10, 1, "Reconnect on throw #"),
    ParamBounds::ms(ParamName::ReconnectDelay, 0, 200, 25, "Reconnect delay"),
    ParamBounds::count(ParamName::ECount, 1, 50, 10, "Pickup press count"),
    ParamBounds::ms(ParamName::EHold, 5, 100, 20, "Pickup hold"),
    ParamBounds::ms(ParamName::EDelay, 5, 100, 20, "Pickup interval"),
    ParamBounds::ms(ParamName::LoopDelay, 0, 3000, 800, "Cycle delay"),
];

impl ParamName {
    /// All parameters in phase order.
    pub const ALL: [Self; 21] = [
        Self::ChargeHold,
        Self::CancelHold,
        Self::PostCancelDelay,
        Self::PreDisconnectDelay,
        Self::Settle,
        Self::PingOffset,
        Self::OpenDelay,
        Self::InventorySettle,
        Self::Grip,
        Self::Drag,
        Self::Drop,
        Self::Close,
        Self::ThrowCount,
        Self::ThrowHold,
        Self::ThrowDelay,
        Self::ReconnectOnThrow,
        Self::ReconnectDelay,
        Self::ECount,
        Self::EHold,
        Self::EDelay,
        Self::LoopDelay,
    ];

    /// Configuration key (snake_case).
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::ChargeHold => "charge_hold",
            Self::CancelHold => "cancel_hold",
            Self::PostCancelDelay => "post_cancel_delay",
            Self::PreDisconnectDelay => "pre_disconnect_delay",
            Self::Settle => "settle",
            Self::PingOffset => "ping_offset",
            Self::OpenDelay => "open_delay",
            Self::InventorySettle => "inventory_settle",
            Self::Grip => "grip",
            Self::Drag => "drag",
            Self::Drop => "drop",
            Self::Close => "close",
            Self::ThrowCount => "throw_count",
            Self::ThrowHold => "throw_hold",
            Self::ThrowDelay => "throw_delay",
            Self::ReconnectOnThrow => "reconnect_on_throw",
            Self::ReconnectDelay => "reconnect_delay",
            Self::ECount => "e_count",
            Self::EHold => "e_hold",
            Self::EDelay => "e_delay",
            Self::LoopDelay => "loop_delay",
        }
    }

    /// Bounds and default for this parameter.
    #[must_use]
    pub const fn bounds(self) -> &'static ParamBounds {
        &PARAM_BOUNDS[self as usize]
    }

    /// Checks `value` against the declared bounds.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when the value is out of range.
    pub fn check(self, value: u32) -> Result<(), ConfigError> {
        let bounds = self.bounds();
        if bounds.contains(value) {
            Ok(())
        } else {
            Err(ConfigError::InvalidValue {
                field: self.key().to_string(),
                value: value.to_string(),
                expected: format!("a value in [{}, {}]", bounds.min, bounds.max),
            })
        }
    }

    /// Returns the closest known key for a misspelled name.
    #[must_use]
    pub fn suggest(name: &str) -> Option<&'static str> {
        let needle = normalize(name);
        Self::ALL
            .iter()
            .map(|p| (p.key(), strsim::jaro_winkler(&needle, &normalize(p.key()))))
            .filter(|(_, score)| *score > 0.8)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(key, _)| key)
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

impl std::fmt::Display for ParamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

impl std::str::FromStr for ParamName {
    type Err = ConfigError;

    /// Accepts `charge_hold`, `chargeHold` or `charge-hold`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = normalize(s);
        Self::ALL
            .into_iter()
            .find(|p| normalize(p.key()) == needle)
            .ok_or_else(|| ConfigError::UnknownParameter {
                name: s.to_string(),
                suggestion: Self::suggest(s).map(str::to_string),
            })
    }
}

/// Durations (milliseconds) and counts for every phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default, deny_unknown_fields)]
pub struct TimingParameters {
    pub charge_hold: u32,
    pub cancel_hold: u32,
    pub post_cancel_delay: u32,
    pub pre_disconnect_delay: u32,
    pub settle: u32,
    pub ping_offset: u32,
    pub open_delay: u32,
    pub inventory_settle: u32,
    pub grip: u32,
    pub drag: u32,
    pub drop: u32,
    pub close: u32,
    pub throw_count: u32,
    pub throw_hold: u32,
    pub throw_delay: u32,
    pub reconnect_on_throw: u32,
    pub reconnect_delay: u32,
    pub e_count: u32,
    pub e_hold: u32,
    pub e_delay: u32,
    pub loop_delay: u32,
}

impl Default for TimingParameters {
    fn default() -> Self {
        let mut params = Self::zeroed();
        for bounds in &PARAM_BOUNDS {
            *params.slot(bounds.name) = bounds.default;
        }
        params
    }
}

impl TimingParameters {
    const fn zeroed() -> Self {
        Self {
            charge_hold: 0,
            cancel_hold: 0,
            post_cancel_delay: 0,
            pre_disconnect_delay: 0,
            settle: 0,
            ping_offset: 0,
            open_delay: 0,
            inventory_settle: 0,
            grip: 0,
            drag: 0,
            drop: 0,
            close: 0,
            throw_count: 0,
            throw_hold: 0,
            throw_delay: 0,
            reconnect_on_throw: 0,
            reconnect_delay: 0,
            e_count: 0,
            e_hold: 0,
            e_delay: 0,
            loop_delay: 0,
        }
    }

    const fn slot(&mut self, name: ParamName) -> &mut u32 {
        match name {
            ParamName::ChargeHold => &mut self.charge_hold,
            ParamName::CancelHold => &mut self.cancel_hold,
            ParamName::PostCancelDelay => &mut self.post_cancel_delay,
            ParamName::PreDisconnectDelay => &mut self.pre_disconnect_delay,
            ParamName::Settle => &mut self.settle,
            ParamName::PingOffset => &mut self.ping_offset,
            ParamName::OpenDelay => &mut self.open_delay,
            ParamName::InventorySettle => &mut self.inventory_settle,
            ParamName::Grip => &mut self.grip,
            ParamName::Drag => &mut self.drag,
            ParamName::Drop => &mut self.drop,
            ParamName::Close => &mut self.close,
            ParamName::ThrowCount => &mut self.throw_count,
            ParamName::ThrowHold => &mut self.throw_hold,
            ParamName::ThrowDelay => &mut self.throw_delay,
            ParamName::ReconnectOnThrow => &mut self.reconnect_on_throw,
            ParamName::ReconnectDelay => &mut self.reconnect_delay,
            ParamName::ECount => &mut self.e_count,
            ParamName::EHold => &mut self.e_hold,
            ParamName::EDelay => &mut self.e_delay,
            ParamName::LoopDelay => &mut self.loop_delay,
        }
    }

    /// Reads one parameter by name.
    #[must_use]
    pub const fn get(&self, name: ParamName) -> u32 {
        match name {
            ParamName::ChargeHold => self.charge_hold,
            ParamName::CancelHold => self.cancel_hold,
            ParamName::PostCancelDelay => self.post_cancel_delay,
            ParamName::PreDisconnectDelay => self.pre_disconnect_delay,
            ParamName::Settle => self.settle,
            ParamName::PingOffset => self.ping_offset,
            ParamName::OpenDelay => self.open_delay,
            ParamName::InventorySettle => self.inventory_settle,
            ParamName::Grip => self.grip,
            ParamName::Drag => self.drag,
            ParamName::Drop => self.drop,
            ParamName::Close => self.close,
            ParamName::ThrowCount => self.throw_count,
            ParamName::ThrowHold => self.throw_hold,
            ParamName::ThrowDelay => self.throw_delay,
            ParamName::ReconnectOnThrow => self.reconnect_on_throw,
            ParamName::ReconnectDelay => self.reconnect_delay,
            ParamName::ECount => self.e_count,
            ParamName::EHold => self.e_hold,
            ParamName::EDelay => self.e_delay,
            ParamName::LoopDelay => self.loop_delay,
        }
    }

    /// Writes one parameter without checking bounds.
    ///
    /// Callers that accept operator input go through
    /// [`LiveTimings::set`](super::live::LiveTimings::set) instead.
    pub const fn set_unchecked(&mut self, name: ParamName, value: u32) {
        *self.slot(name) = value;
    }

    /// Iterates `(name, value)` pairs in phase order.
    pub fn iter(&self) -> impl Iterator<Item = (ParamName, u32)> + '_ {
        ParamName::ALL.into_iter().map(|name| (name, self.get(name)))
    }
}

// ============================================================================
// Connectivity Strategy
// ============================================================================

/// Mechanism used to simulate the network outage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Low-level outbound packet intercept; near-instant both ways
    #[default]
    PacketFilter,
    /// Operating-system firewall policy; restore may lag
    FirewallRule,
    /// No real network effect; calls are only recorded and logged
    Simulated,
}

impl StrategyKind {
    /// Stable label used in logs, events and the console.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PacketFilter => "packet_filter",
            Self::FirewallRule => "firewall_rule",
            Self::Simulated => "simulated",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "packetfilter" | "packet" | "divert" => Ok(Self::PacketFilter),
            "firewallrule" | "firewall" => Ok(Self::FirewallRule),
            "simulated" | "sim" | "none" => Ok(Self::Simulated),
            _ => Err(ConfigError::InvalidValue {
                field: "strategy".to_string(),
                value: s.to_string(),
                expected: "packet_filter, firewall_rule or simulated".to_string(),
            }),
        }
    }
}

// ============================================================================
// Layout & Keys
// ============================================================================

/// A point in screen (or base) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Client-area rectangle of the target window on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            left: 0,
            top: 0,
            width: crate::coords::BASE_WIDTH,
            height: crate::coords::BASE_HEIGHT,
        }
    }
}

/// Inventory drag endpoints, authored against the 1920x1080 base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    pub source: Point,
    pub destination: Point,
    pub viewport: Viewport,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            source: Point::new(1502, 360),
            destination: Point::new(401, 506),
            viewport: Viewport::default(),
        }
    }
}

/// Keys the sequencer presses on the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyBindings {
    /// Toggles the secondary UI (inventory)
    pub inventory: String,
    /// Picks an item up
    pub pickup: String,
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            inventory: "tab".to_string(),
            pickup: "e".to_string(),
        }
    }
}

// ============================================================================
// Firewall Commands
// ============================================================================

/// Default restore timeout for firewall policy commands.
pub const DEFAULT_RESTORE_TIMEOUT_MS: u64 = 3000;

/// External commands that block and restore traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallCommands {
    /// Spawned in order without waiting
    pub block: Vec<String>,
    /// Run in order, each awaited up to `restore_timeout_ms`
    pub restore: Vec<String>,
    pub restore_timeout_ms: u64,
}

impl Default for FirewallCommands {
    fn default() -> Self {
        Self {
            block: vec![
                "netsh advfirewall set allprofiles state on".to_string(),
                "netsh advfirewall set allprofiles firewallpolicy blockinbound,blockoutbound"
                    .to_string(),
            ],
            restore: vec![
                "netsh advfirewall set allprofiles firewallpolicy blockinbound,allowoutbound"
                    .to_string(),
            ],
            restore_timeout_ms: DEFAULT_RESTORE_TIMEOUT_MS,
        }
    }
}
