//! Learning document model (`cos/learning.json`).
//!
//! Completion-keyed metrics per task type and per model tier, error-pattern
//! tallies, and routing accuracy. The derived numbers (success rate, p80,
//! cooldown multipliers) feed back into scheduling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::agent::{ErrorCategory, ModelTier};

/// Current learning document version.
pub const LEARNING_VERSION: u32 = 2;

/// Samples kept for unclassified failures.
pub const MAX_UNKNOWN_SAMPLES: usize = 20;

/// Aggregate counters for one task type (or one model tier).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketStats {
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub succeeded: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub total_duration_ms: u64,
    #[serde(default)]
    pub avg_duration_ms: u64,
    #[serde(default)]
    pub max_duration_ms: u64,
    /// Estimated 80th percentile: `avg + 0.6 * (max - avg)`.
    #[serde(default)]
    pub p80_duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_completed: Option<DateTime<Utc>>,
    /// Integer percent in `0..=100`.
    #[serde(default)]
    pub success_rate: u8,
}

impl BucketStats {
    /// Fold one completion into the bucket and refresh the derived fields.
    pub fn record(&mut self, success: bool, duration_ms: u64, at: DateTime<Utc>) {
        self.completed += 1;
        if success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.total_duration_ms += duration_ms;
        self.avg_duration_ms = self.total_duration_ms / self.completed;
        self.max_duration_ms = self.max_duration_ms.max(duration_ms);
        self.p80_duration_ms =
            self.avg_duration_ms + (self.max_duration_ms - self.avg_duration_ms) * 6 / 10;
        self.last_completed = Some(at);
        self.success_rate = (self.succeeded * 100 / self.completed) as u8;
    }

    /// Remove a previously folded contribution (used by rehabilitation and
    /// tier rebuilds). Derived fields are refreshed; max is left as-is since
    /// the per-run maxima are gone.
    pub fn subtract(&mut self, completed: u64, succeeded: u64, duration_ms: u64) {
        self.completed = self.completed.saturating_sub(completed);
        self.succeeded = self.succeeded.saturating_sub(succeeded);
        self.failed = self.completed.saturating_sub(self.succeeded);
        self.total_duration_ms = self.total_duration_ms.saturating_sub(duration_ms);
        if self.completed == 0 {
            *self = Self {
                max_duration_ms: self.max_duration_ms,
                ..Self::default()
            };
        } else {
            self.avg_duration_ms = self.total_duration_ms / self.completed;
            self.p80_duration_ms =
                self.avg_duration_ms + (self.max_duration_ms - self.avg_duration_ms) * 6 / 10;
            self.success_rate = (self.succeeded * 100 / self.completed) as u8;
        }
    }
}

/// Global totals across every task-type bucket (pruning aside).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningTotals {
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub succeeded: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub total_duration_ms: u64,
}

/// Error-category tally with a per-task-type cross reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPattern {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub by_task_type: BTreeMap<String, u64>,
}

/// Attempt/success counts for one (task type, tier) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingCell {
    #[serde(default)]
    pub attempts: u64,
    #[serde(default)]
    pub successes: u64,
}

impl RoutingCell {
    pub fn success_rate(&self) -> u8 {
        if self.attempts == 0 {
            0
        } else {
            (self.successes * 100 / self.attempts) as u8
        }
    }
}

/// One retained sample of an unclassified failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnknownErrorSample {
    pub task_type: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// The full learning document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub totals: LearningTotals,
    #[serde(default)]
    pub by_task_type: BTreeMap<String, BucketStats>,
    #[serde(default)]
    pub by_model_tier: BTreeMap<String, BucketStats>,
    #[serde(default)]
    pub error_patterns: BTreeMap<String, ErrorPattern>,
    /// `routing_accuracy[task_type][tier]`.
    #[serde(default)]
    pub routing_accuracy: BTreeMap<String, BTreeMap<String, RoutingCell>>,
    #[serde(default)]
    pub unknown_error_samples: Vec<UnknownErrorSample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

const fn default_version() -> u32 {
    LEARNING_VERSION
}

impl Default for LearningDocument {
    fn default() -> Self {
        Self {
            version: LEARNING_VERSION,
            totals: LearningTotals::default(),
            by_task_type: BTreeMap::new(),
            by_model_tier: BTreeMap::new(),
            error_patterns: BTreeMap::new(),
            routing_accuracy: BTreeMap::new(),
            unknown_error_samples: Vec::new(),
            last_updated: None,
        }
    }
}

/// Why a multiplier was chosen for a task type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CooldownPolicy {
    InsufficientData,
    HighSuccess,
    GoodSuccess,
    ModerateSuccess,
    LowSuccess,
    SkipFailing,
    VeryLowSuccess,
}

impl CooldownPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientData => "insufficient-data",
            Self::HighSuccess => "high-success",
            Self::GoodSuccess => "good-success",
            Self::ModerateSuccess => "moderate-success",
            Self::LowSuccess => "low-success",
            Self::SkipFailing => "skip-failing",
            Self::VeryLowSuccess => "very-low-success",
        }
    }
}

/// Multiplier applied to a task type's base cooldown interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CooldownAdjustment {
    pub multiplier: f64,
    pub policy: CooldownPolicy,
    pub skip: bool,
}

impl CooldownAdjustment {
    pub const NEUTRAL: Self = Self {
        multiplier: 1.0,
        policy: CooldownPolicy::InsufficientData,
        skip: false,
    };

    /// The adjustment table, keyed on a bucket's track record.
    pub fn for_bucket(stats: &BucketStats) -> Self {
        if stats.completed < 3 {
            return Self::NEUTRAL;
        }
        match stats.success_rate {
            90..=100 => Self {
                multiplier: 0.7,
                policy: CooldownPolicy::HighSuccess,
                skip: false,
            },
            75..=89 => Self {
                multiplier: 0.85,
                policy: CooldownPolicy::GoodSuccess,
                skip: false,
            },
            50..=74 => Self {
                multiplier: 1.0,
                policy: CooldownPolicy::ModerateSuccess,
                skip: false,
            },
            30..=49 => Self {
                multiplier: 1.5,
                policy: CooldownPolicy::LowSuccess,
                skip: false,
            },
            _ if stats.completed >= 5 => Self {
                multiplier: 0.0,
                policy: CooldownPolicy::SkipFailing,
                skip: true,
            },
            _ => Self {
                multiplier: 2.0,
                policy: CooldownPolicy::VeryLowSuccess,
                skip: false,
            },
        }
    }
}

/// Tier routing advice for a task type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingSuggestion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred: Option<ModelTier>,
    #[serde(default)]
    pub avoid: Vec<ModelTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RoutingSuggestion {
    pub fn is_empty(&self) -> bool {
        self.preferred.is_none() && self.avoid.is_empty()
    }
}

/// Key under which an error category is tallied.
pub fn error_pattern_key(category: ErrorCategory) -> String {
    category.as_str().to_string()
}
