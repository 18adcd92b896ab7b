//! Record and batch types shared by the store, planner, scheduler and coordinator.
//!
//! Status and category columns are closed enums; they round-trip through SQLite as their
//! snake_case names.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! sql_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Engagement,
    Empathy,
    Confidence,
    Communication,
    Leadership,
    EmotionalAwareness,
    LessonProgress,
    AppUsage,
}

sql_enum!(Category, "category", {
    Engagement => "engagement",
    Empathy => "empathy",
    Confidence => "confidence",
    Communication => "communication",
    Leadership => "leadership",
    EmotionalAwareness => "emotional_awareness",
    LessonProgress => "lesson_progress",
    AppUsage => "app_usage",
});

impl Category {
    /// Wellbeing signals that feed facilitator safety insight.
    pub fn is_behavioral(&self) -> bool {
        matches!(
            self,
            Category::Empathy
                | Category::Confidence
                | Category::Communication
                | Category::Leadership
                | Category::EmotionalAwareness
        )
    }

    pub fn batch_type(&self) -> BatchType {
        if self.is_behavioral() {
            BatchType::Behavioral
        } else {
            BatchType::General
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchType {
    Behavioral,
    General,
}

sql_enum!(BatchType, "batch type", {
    Behavioral => "behavioral",
    General => "general",
});

impl BatchType {
    pub fn categories(&self) -> Vec<Category> {
        Category::ALL
            .iter()
            .copied()
            .filter(|c| c.batch_type() == *self)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Unsynced,
    Assigned,
    Synced,
    Failed,
}

sql_enum!(SyncState, "sync state", {
    Unsynced => "unsynced",
    Assigned => "assigned",
    Synced => "synced",
    Failed => "failed",
});

impl SyncState {
    /// States a purge may ever remove.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncState::Synced | SyncState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    InFlight,
    Succeeded,
    FailedRetryable,
    FailedTerminal,
}

sql_enum!(BatchStatus, "batch status", {
    Pending => "pending",
    InFlight => "in_flight",
    Succeeded => "succeeded",
    FailedRetryable => "failed_retryable",
    FailedTerminal => "failed_terminal",
});

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Succeeded | BatchStatus::FailedTerminal)
    }
}

/// A primitive indicator value. Free-form nested data is not representable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndicatorValue {
    Flag(bool),
    Integer(i64),
    Decimal(f64),
    Label(String),
}

/// Indicator map that has passed the compliance gate.
///
/// Only the gate constructs one from raw input; the store rehydrates persisted maps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Indicators(BTreeMap<String, IndicatorValue>);

impl Indicators {
    pub(crate) fn from_validated(map: BTreeMap<String, IndicatorValue>) -> Self {
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&IndicatorValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &IndicatorValue)> {
        self.0.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsRecord {
    pub id: String,
    pub session_id: String,
    pub category: Category,
    pub indicators: Indicators,
    pub timestamp: i64,
    pub created_at: i64,
    pub sync_state: SyncState,
    pub batch_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBatch {
    pub batch_id: String,
    pub record_ids: Vec<String>,
    pub batch_type: BatchType,
    pub priority: u32,
    pub status: BatchStatus,
    pub created_at: i64,
    pub scheduled_at: i64,
    pub next_retry_at: Option<i64>,
    pub attempts: u32,
    pub max_retries: u32,
    pub retry_delay_base_ms: i64,
    pub requires_unmetered_network: bool,
}

impl SyncBatch {
    pub fn retry_budget_exhausted(&self) -> bool {
        self.attempts >= self.max_retries
    }
}
