//! Engine configuration loaded from `kindsync.toml` in the data root.
//!
//! Every section is optional; a missing file yields [`SyncConfig::default`]. Priority
//! thresholds, backoff multipliers and jitter are tuning knobs, so they live here rather
//! than in the components that apply them.

use crate::core::error::SyncError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "kindsync.toml";
pub const ENDPOINT_ENV: &str = "KINDSYNC_ENDPOINT";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub gate: GateConfig,
    pub batching: BatchingConfig,
    pub retry: RetryConfig,
    pub coordinator: CoordinatorConfig,
    pub transport: TransportConfig,
    pub health: HealthConfig,
}

/// Per-strategy value table. Lookup by strategy lives next to `SyncStrategy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyTable<T> {
    pub aggressive: T,
    pub moderate: T,
    pub conservative: T,
    pub minimal: T,
    pub disabled: T,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub max_indicators: usize,
    /// Longest string value accepted, in characters.
    pub max_text_len: usize,
    /// Glob-style key patterns (`*` prefix/suffix wildcards).
    pub allowed_key_patterns: Vec<String>,
    /// Additional first names to treat as PII on top of the built-in list.
    pub extra_blocked_names: Vec<String>,
    /// Reject "Title Title" word pairs as possible full names.
    pub reject_title_case_pairs: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_indicators: 32,
            max_text_len: 200,
            allowed_key_patterns: [
                "score",
                "score_*",
                "*_score",
                "rating",
                "*_rating",
                "level",
                "*_level",
                "*_count",
                "*_ms",
                "*_seconds",
                "attempts",
                "step",
                "progress",
                "progress_*",
                "completed",
                "is_*",
                "has_*",
                "choice",
                "choice_*",
                "response_*",
                "lesson_*",
                "module_*",
                "activity_*",
                "scenario_*",
                "emotion",
                "emotion_*",
                "feeling",
                "feeling_*",
                "screen",
                "action",
                "engagement_*",
                "empathy_*",
                "confidence_*",
                "communication_*",
                "leadership_*",
                "awareness_*",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            extra_blocked_names: Vec::new(),
            reject_title_case_pairs: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierAdjustments {
    pub poor_or_critical: i32,
    pub low: i32,
    pub medium_or_normal: i32,
    pub high: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Maximum records selected per planning pass.
    pub limits: StrategyTable<usize>,
    pub behavioral_base_priority: u32,
    pub general_base_priority: u32,
    pub quality_adjustment: TierAdjustments,
    pub battery_adjustment: TierAdjustments,
    /// Forces every batch onto unmetered networks.
    pub wifi_only: bool,
    /// Batches scoring below this wait for an unmetered network.
    pub unmetered_priority_floor: u32,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            limits: StrategyTable {
                aggressive: 100,
                moderate: 50,
                conservative: 25,
                minimal: 10,
                disabled: 0,
            },
            behavioral_base_priority: 10,
            general_base_priority: 5,
            quality_adjustment: TierAdjustments {
                poor_or_critical: -3,
                low: 0,
                medium_or_normal: 2,
                high: 5,
            },
            battery_adjustment: TierAdjustments {
                poor_or_critical: -5,
                low: -3,
                medium_or_normal: 0,
                high: 2,
            },
            wifi_only: false,
            unmetered_priority_floor: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryTier {
    pub min_priority: u32,
    pub max_retries: u32,
    pub delay_multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: i64,
    /// Upper bound of the uniform jitter as a fraction of the un-jittered delay.
    pub jitter_ratio: f64,
    pub max_delay_ms: i64,
    /// Ordered from highest `min_priority` down; the last tier must start at 0.
    pub tiers: Vec<RetryTier>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 30_000,
            jitter_ratio: 0.10,
            max_delay_ms: 6 * 60 * 60 * 1_000,
            tiers: vec![
                RetryTier {
                    min_priority: 15,
                    max_retries: 5,
                    delay_multiplier: 0.5,
                },
                RetryTier {
                    min_priority: 10,
                    max_retries: 3,
                    delay_multiplier: 1.0,
                },
                RetryTier {
                    min_priority: 5,
                    max_retries: 2,
                    delay_multiplier: 2.0,
                },
                RetryTier {
                    min_priority: 0,
                    max_retries: 1,
                    delay_multiplier: 4.0,
                },
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub cycle_period_secs: StrategyTable<u64>,
    pub purge_interval_secs: u64,
    pub retention_days: u32,
    pub lease_ttl_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            cycle_period_secs: StrategyTable {
                aggressive: 30,
                moderate: 60,
                conservative: 300,
                minimal: 900,
                disabled: 1800,
            },
            purge_interval_secs: 24 * 60 * 60,
            retention_days: 30,
            lease_ttl_secs: 60 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
    /// Environment variable holding the opaque bearer credential.
    pub credential_env: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 30,
            credential_env: "KINDSYNC_TOKEN".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub concerning_pending_events: u64,
    pub backlog_pending_events: u64,
    pub backlog_pending_batches: u64,
    /// Counts `failed_retryable` batches only; terminal ones never degrade status.
    pub unhealthy_failed_batches: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            concerning_pending_events: 200,
            backlog_pending_events: 1_000,
            backlog_pending_batches: 50,
            unhealthy_failed_batches: 10,
        }
    }
}

impl SyncConfig {
    pub fn path(root: &Path) -> PathBuf {
        root.join(CONFIG_FILE_NAME)
    }

    /// Load `kindsync.toml` from `root`, falling back to defaults when absent.
    pub fn load(root: &Path) -> Result<Self, SyncError> {
        let path = Self::path(root);
        let mut config = if path.exists() {
            let content = fs::read_to_string(&path).map_err(SyncError::IoError)?;
            Self::from_toml(&content)?
        } else {
            Self::default()
        };

        if let Ok(endpoint) = std::env::var(ENDPOINT_ENV) {
            if !endpoint.trim().is_empty() {
                config.transport.endpoint = Some(endpoint);
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, SyncError> {
        toml::from_str(content).map_err(|e| SyncError::ConfigError(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        let retry = &self.retry;
        if retry.base_delay_ms <= 0 {
            return Err(SyncError::ConfigError(
                "retry.base_delay_ms must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&retry.jitter_ratio) {
            return Err(SyncError::ConfigError(format!(
                "retry.jitter_ratio must be within [0, 1], got {}",
                retry.jitter_ratio
            )));
        }
        if retry.max_delay_ms < retry.base_delay_ms {
            return Err(SyncError::ConfigError(
                "retry.max_delay_ms must not be below retry.base_delay_ms".to_string(),
            ));
        }
        if retry.tiers.last().map(|t| t.min_priority) != Some(0) {
            return Err(SyncError::ConfigError(
                "retry.tiers must end with a tier starting at priority 0".to_string(),
            ));
        }
        for tier in &retry.tiers {
            if tier.max_retries == 0 || tier.delay_multiplier <= 0.0 {
                return Err(SyncError::ConfigError(format!(
                    "retry tier at priority {} needs max_retries >= 1 and a positive multiplier",
                    tier.min_priority
                )));
            }
        }
        // Higher priority must never mean fewer retries or a longer delay.
        for pair in retry.tiers.windows(2) {
            let (higher, lower) = (&pair[0], &pair[1]);
            if higher.min_priority <= lower.min_priority
                || higher.max_retries < lower.max_retries
                || higher.delay_multiplier > lower.delay_multiplier
            {
                return Err(SyncError::ConfigError(format!(
                    "retry tiers are not monotonic between priority {} and {}",
                    higher.min_priority, lower.min_priority
                )));
            }
        }

        let periods = &self.coordinator.cycle_period_secs;
        if [
            periods.aggressive,
            periods.moderate,
            periods.conservative,
            periods.minimal,
            periods.disabled,
        ]
        .contains(&0)
        {
            return Err(SyncError::ConfigError(
                "coordinator.cycle_period_secs entries must be non-zero".to_string(),
            ));
        }
        let longest_period = [
            periods.aggressive,
            periods.moderate,
            periods.conservative,
            periods.minimal,
            periods.disabled,
        ]
        .into_iter()
        .max()
        .unwrap_or(0);
        // A live coordinator renews its lease once per cycle.
        if self.coordinator.lease_ttl_secs <= longest_period {
            return Err(SyncError::ConfigError(format!(
                "coordinator.lease_ttl_secs ({}) must exceed the longest cycle period ({})",
                self.coordinator.lease_ttl_secs, longest_period
            )));
        }
        if self.batching.limits.disabled != 0 {
            return Err(SyncError::ConfigError(
                "batching.limits.disabled must be 0".to_string(),
            ));
        }
        if self.gate.max_text_len == 0 || self.gate.max_indicators == 0 {
            return Err(SyncError::ConfigError(
                "gate limits must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
