//! Agent domain model.
//!
//! An agent is one worker process executing exactly one task. The supervisor
//! tracks a live record while the process runs and archives the record when
//! it completes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::TaskMetadata;

/// Coarse model class attached to the agent that ran a task. Used by the
/// learning store for routing feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Light,
    Medium,
    Heavy,
    Unknown,
}

impl Default for ModelTier {
    fn default() -> Self {
        Self::Unknown
    }
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Medium => "medium",
            Self::Heavy => "heavy",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "light" => Some(Self::Light),
            "medium" => Some(Self::Medium),
            "heavy" => Some(Self::Heavy),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// All tiers, for aggregate rebuilds.
    pub fn all() -> &'static [ModelTier] {
        &[Self::Light, Self::Medium, Self::Heavy, Self::Unknown]
    }
}

/// Status of a tracked agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// The worker process is (believed to be) alive
    Running,
    /// Terminal: result recorded, metadata archived
    Completed,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
        }
    }
}

/// Closed set of failure categories, with an unknown fallback. Unknown
/// failures additionally store a bounded sample so new categories can be
/// carved out later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    Timeout,
    RateLimit,
    Auth,
    Network,
    Crash,
    TokenLimit,
    ToolFailure,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimit => "rate-limit",
            Self::Auth => "auth",
            Self::Network => "network",
            Self::Crash => "crash",
            Self::TokenLimit => "token-limit",
            Self::ToolFailure => "tool-failure",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "timeout" => Self::Timeout,
            "rate-limit" | "rate_limit" => Self::RateLimit,
            "auth" | "authentication" => Self::Auth,
            "network" => Self::Network,
            "crash" => Self::Crash,
            "token-limit" | "token_limit" => Self::TokenLimit,
            "tool-failure" | "tool_failure" => Self::ToolFailure,
            _ => Self::Unknown,
        }
    }
}

/// Analysis of a failed run, as reported by the spawner or synthesized by
/// the zombie sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorAnalysis {
    pub category: ErrorCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorAnalysis {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            details: None,
        }
    }
}

/// Outcome of a completed agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResult {
    pub success: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorAnalysis>,
}

impl AgentResult {
    pub fn success(duration_ms: u64) -> Self {
        Self {
            success: true,
            duration_ms,
            error: None,
        }
    }

    pub fn failure(duration_ms: u64, error: ErrorAnalysis) -> Self {
        Self {
            success: false,
            duration_ms,
            error: Some(error),
        }
    }
}

/// One tracked worker process. Owns exactly one task id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub id: String,
    pub task_id: String,
    pub status: AgentStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// OS pid, when the spawner reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AgentResult>,
    /// Forwarded task metadata.
    #[serde(default)]
    pub metadata: TaskMetadata,
    #[serde(default)]
    pub model_tier: ModelTier,
}

impl AgentRecord {
    pub fn new(id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_id: task_id.into(),
            status: AgentStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            pid: None,
            result: None,
            metadata: TaskMetadata::default(),
            model_tier: ModelTier::Unknown,
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn with_metadata(mut self, metadata: TaskMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_model_tier(mut self, tier: ModelTier) -> Self {
        self.model_tier = tier;
        self
    }

    pub fn is_running(&self) -> bool {
        self.status == AgentStatus::Running
    }

    /// Wall-clock runtime so far, or total runtime once completed.
    pub fn runtime_ms(&self, now: DateTime<Utc>) -> u64 {
        let end = self.completed_at.unwrap_or(now);
        (end - self.started_at).num_milliseconds().max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_tier_round_trip() {
        for t in ModelTier::all() {
            assert_eq!(ModelTier::parse_str(t.as_str()), Some(*t));
        }
        assert_eq!(ModelTier::parse_str("sonnet"), None);
    }

    #[test]
    fn test_error_category_falls_back_to_unknown() {
        assert_eq!(ErrorCategory::parse_str("rate-limit"), ErrorCategory::RateLimit);
        assert_eq!(ErrorCategory::parse_str("cosmic-rays"), ErrorCategory::Unknown);
    }

    #[test]
    fn test_agent_record_runtime() {
        let mut agent = AgentRecord::new("agent-1", "task-1");
        agent.started_at = Utc::now() - chrono::Duration::seconds(5);
        let ms = agent.runtime_ms(Utc::now());
        assert!(ms >= 5_000 && ms < 7_000, "runtime_ms was {ms}");
    }

    #[test]
    fn test_result_constructors() {
        let ok = AgentResult::success(1200);
        assert!(ok.success && ok.error.is_none());

        let err = AgentResult::failure(
            300,
            ErrorAnalysis::new(ErrorCategory::Timeout, "no output for 10m"),
        );
        assert!(!err.success);
        assert_eq!(err.error.unwrap().category, ErrorCategory::Timeout);
    }
}
