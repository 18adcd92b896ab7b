//! Network condition monitor and sync strategy selection.
//!
//! [`derive_strategy`] is a pure function of the observed [`NetworkState`]. The monitor
//! only remembers the previous derivation so it can log transitions; flapping networks
//! just re-derive more often.

use crate::core::config::StrategyTable;
use crate::core::error::SyncError;
use crate::core::time::Clock;
use clap::{Subcommand, ValueEnum};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const NETWORK_STATE_FILE: &str = "network_state.json";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum NetworkQuality {
    Poor,
    Low,
    Medium,
    High,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum BatteryLevel {
    Critical,
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkState {
    pub connected: bool,
    pub quality: NetworkQuality,
    pub metered: bool,
    pub battery: BatteryLevel,
    pub observed_at: i64,
}

impl NetworkState {
    pub fn offline(observed_at: i64) -> Self {
        Self {
            connected: false,
            quality: NetworkQuality::Poor,
            metered: false,
            battery: BatteryLevel::Normal,
            observed_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    Aggressive,
    Moderate,
    Conservative,
    Minimal,
    Disabled,
}

impl SyncStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aggressive => "aggressive",
            Self::Moderate => "moderate",
            Self::Conservative => "conservative",
            Self::Minimal => "minimal",
            Self::Disabled => "disabled",
        }
    }

    pub fn allows_activity(&self) -> bool {
        !matches!(self, SyncStrategy::Disabled)
    }

    /// What to ask of the OS background scheduler while this strategy applies.
    pub fn constraints(&self) -> SchedulerConstraints {
        match self {
            Self::Aggressive | Self::Moderate => SchedulerConstraints {
                requires_network: true,
                requires_unmetered: true,
                requires_battery_not_low: false,
                requires_charging: false,
            },
            Self::Conservative => SchedulerConstraints {
                requires_network: true,
                requires_unmetered: false,
                requires_battery_not_low: true,
                requires_charging: false,
            },
            Self::Minimal => SchedulerConstraints {
                requires_network: true,
                requires_unmetered: false,
                requires_battery_not_low: false,
                requires_charging: false,
            },
            Self::Disabled => SchedulerConstraints {
                requires_network: true,
                requires_unmetered: false,
                requires_battery_not_low: true,
                requires_charging: false,
            },
        }
    }
}

impl fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<T: Copy> StrategyTable<T> {
    pub fn get(&self, strategy: SyncStrategy) -> T {
        match strategy {
            SyncStrategy::Aggressive => self.aggressive,
            SyncStrategy::Moderate => self.moderate,
            SyncStrategy::Conservative => self.conservative,
            SyncStrategy::Minimal => self.minimal,
            SyncStrategy::Disabled => self.disabled,
        }
    }
}

/// Constraint request handed to the platform scheduler. The core asks; the OS enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConstraints {
    pub requires_network: bool,
    pub requires_unmetered: bool,
    pub requires_battery_not_low: bool,
    pub requires_charging: bool,
}

/// Priority-ordered strategy rules.
pub fn derive_strategy(state: &NetworkState) -> SyncStrategy {
    if !state.connected {
        return SyncStrategy::Disabled;
    }
    if state.battery == BatteryLevel::Critical {
        return SyncStrategy::Disabled;
    }
    if state.battery == BatteryLevel::Low && state.metered {
        return SyncStrategy::Minimal;
    }
    if state.quality == NetworkQuality::High
        && !state.metered
        && state.battery >= BatteryLevel::Normal
    {
        return SyncStrategy::Aggressive;
    }
    if state.quality >= NetworkQuality::Medium && !state.metered {
        return SyncStrategy::Moderate;
    }
    if state.quality >= NetworkQuality::Low {
        return SyncStrategy::Conservative;
    }
    SyncStrategy::Minimal
}

/// Source of connectivity/battery observations (OS adapter, file, or test fixture).
pub trait NetworkProbe: Send + Sync {
    fn observe(&self) -> Result<NetworkState, SyncError>;
}

impl<T: NetworkProbe + ?Sized> NetworkProbe for Arc<T> {
    fn observe(&self) -> Result<NetworkState, SyncError> {
        (**self).observe()
    }
}

/// Probe returning whatever state was last pushed into it.
#[derive(Debug)]
pub struct StaticProbe {
    state: Mutex<NetworkState>,
}

impl StaticProbe {
    pub fn new(state: NetworkState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn set(&self, state: NetworkState) {
        if let Ok(mut guard) = self.state.lock() {
            *guard = state;
        }
    }
}

impl NetworkProbe for StaticProbe {
    fn observe(&self) -> Result<NetworkState, SyncError> {
        self.state
            .lock()
            .map(|s| *s)
            .map_err(|_| SyncError::ValidationError("network probe lock poisoned".to_string()))
    }
}

/// Probe reading `network_state.json`, written by the platform layer.
///
/// A missing file reads as offline.
#[derive(Debug, Clone)]
pub struct FileProbe {
    path: PathBuf,
}

impl FileProbe {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(NETWORK_STATE_FILE),
        }
    }

    pub fn write(&self, state: &NetworkState) -> Result<(), SyncError> {
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl NetworkProbe for FileProbe {
    fn observe(&self) -> Result<NetworkState, SyncError> {
        if !self.path.exists() {
            return Ok(NetworkState::offline(0));
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

pub struct NetworkConditionMonitor {
    probe: Box<dyn NetworkProbe>,
    /// Latest platform-pushed observation; wins over a probe reading that is not newer.
    pushed: Mutex<Option<NetworkState>>,
    last: Mutex<Option<(NetworkState, SyncStrategy)>>,
}

impl NetworkConditionMonitor {
    pub fn new(probe: Box<dyn NetworkProbe>) -> Self {
        Self {
            probe,
            pushed: Mutex::new(None),
            last: Mutex::new(None),
        }
    }

    /// Poll the probe and derive the current strategy from the newest observation,
    /// pushed or polled.
    ///
    /// A failing probe is treated as offline rather than aborting the caller's cycle.
    pub fn refresh(&self) -> (NetworkState, SyncStrategy) {
        let polled = match self.probe.observe() {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, "network probe failed; treating as offline");
                NetworkState::offline(0)
            }
        };
        let pushed = self.pushed.lock().ok().and_then(|g| *g);
        let state = match pushed {
            Some(pushed) if pushed.observed_at >= polled.observed_at => pushed,
            _ => polled,
        };
        self.record(state)
    }

    /// Feed a pushed observation (connectivity or capability change). It stays in effect
    /// until the probe reports something newer.
    pub fn on_event(&self, state: NetworkState) -> (NetworkState, SyncStrategy) {
        if let Ok(mut pushed) = self.pushed.lock() {
            *pushed = Some(state);
        }
        self.record(state)
    }

    fn record(&self, state: NetworkState) -> (NetworkState, SyncStrategy) {
        let strategy = derive_strategy(&state);
        if let Ok(mut last) = self.last.lock() {
            let previous = last.map(|(_, s)| s);
            if previous != Some(strategy) {
                tracing::info!(
                    from = previous.map(|s| s.as_str()).unwrap_or("none"),
                    to = strategy.as_str(),
                    connected = state.connected,
                    metered = state.metered,
                    quality = ?state.quality,
                    battery = ?state.battery,
                    "sync strategy changed"
                );
            }
            *last = Some((state, strategy));
        }
        (state, strategy)
    }

    pub fn last_observation(&self) -> Option<(NetworkState, SyncStrategy)> {
        self.last.lock().ok().and_then(|g| *g)
    }
}

#[derive(clap::Args, Debug)]
pub struct NetworkCli {
    #[clap(subcommand)]
    pub command: NetworkCommand,
}

#[derive(Subcommand, Debug)]
pub enum NetworkCommand {
    /// Record the observed network and battery state.
    Set {
        /// Mark the device as offline.
        #[clap(long)]
        offline: bool,
        #[clap(long, value_enum, default_value = "medium")]
        quality: NetworkQuality,
        /// Cellular or otherwise metered connection.
        #[clap(long)]
        metered: bool,
        #[clap(long, value_enum, default_value = "normal")]
        battery: BatteryLevel,
    },
    /// Show the current state, derived strategy and scheduler constraints.
    Show {
        #[clap(long)]
        json: bool,
    },
}

pub fn run_network_cli(root: &Path, clock: &dyn Clock, cli: NetworkCli) -> Result<(), SyncError> {
    let probe = FileProbe::new(root);
    match cli.command {
        NetworkCommand::Set {
            offline,
            quality,
            metered,
            battery,
        } => {
            let state = NetworkState {
                connected: !offline,
                quality,
                metered,
                battery,
                observed_at: clock.now_ms(),
            };
            probe.write(&state)?;
            println!(
                "{} strategy is now {}",
                "▸".bright_green(),
                derive_strategy(&state).as_str().bright_white()
            );
        }
        NetworkCommand::Show { json } => {
            let state = probe.observe()?;
            let strategy = derive_strategy(&state);
            if json {
                let out = serde_json::json!({
                    "state": state,
                    "strategy": strategy,
                    "constraints": strategy.constraints(),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!(
                    "connected={} quality={:?} metered={} battery={:?}",
                    state.connected, state.quality, state.metered, state.battery
                );
                println!("strategy: {}", strategy.as_str().bright_white());
            }
        }
    }
    Ok(())
}
