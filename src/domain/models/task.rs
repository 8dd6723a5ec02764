//! Task domain model.
//!
//! Tasks are discrete units of work the supervisor hands to worker agents.
//! They are ingested from the user task file, the system task file, the
//! on-demand queue, or one of the proactive generators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Status of a task in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task exists but no agent has been dispatched for it
    Pending,
    /// A spawn was emitted and the spawner acknowledged it
    InProgress,
    /// The agent finished and reported success
    Completed,
    /// The agent finished and reported failure
    Failed,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" | "in-progress" => Some(Self::InProgress),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::InProgress],
            Self::InProgress => &[Self::Completed, Self::Failed, Self::Pending],
            Self::Completed => &[],
            Self::Failed => &[Self::Pending], // Can retry
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// Where a task originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOrigin {
    /// Authored by the user in the user task file
    User,
    /// Generated by the supervisor (schedule, on-demand, idle review, jobs)
    Internal,
}

impl Default for TaskOrigin {
    fn default() -> Self {
        Self::User
    }
}

impl TaskOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Internal => "internal",
        }
    }
}

/// Priority level for tasks. Ordering follows urgency, `Critical` highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskPriority {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "LOW" => Some(Self::Low),
            "MEDIUM" | "NORMAL" => Some(Self::Medium),
            "HIGH" => Some(Self::High),
            "CRITICAL" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Numeric urgency value (higher = more urgent).
    pub fn value(&self) -> u8 {
        *self as u8
    }
}

/// Typed view of the metadata the orchestrator actually inspects, with an
/// open-ended pass-through map for fields it forwards untouched (model,
/// provider overrides, prompt templates, spawner hints).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetadata {
    /// Project this task belongs to; admission control groups by this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    /// Analysis type driving the learning classifier (`task:<type>`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_type: Option<String>,
    /// Review discriminator; `idle` marks idle-review tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mission_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mission_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    /// Everything else rides along untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl TaskMetadata {
    /// Project key used when a task carries no app id.
    pub const SELF_PROJECT: &'static str = "_self";

    /// Project key for admission control: `metadata.app`, or `_self`.
    pub fn project(&self) -> &str {
        self.app.as_deref().unwrap_or(Self::SELF_PROJECT)
    }
}

/// A unit of work tracked by the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Stable id, prefixed `task-` (user) or `sys-` (generated).
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub origin: TaskOrigin,
    #[serde(default)]
    pub approval_required: bool,
    #[serde(default)]
    pub auto_approved: bool,
    #[serde(default)]
    pub metadata: TaskMetadata,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a system-generated task with a fresh `sys-` id.
    pub fn system(description: impl Into<String>, metadata: TaskMetadata) -> Self {
        Self {
            id: format!("sys-{}", uuid::Uuid::new_v4()),
            description: description.into(),
            priority: TaskPriority::Medium,
            status: TaskStatus::Pending,
            origin: TaskOrigin::Internal,
            approval_required: false,
            auto_approved: true,
            metadata,
            created_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Whether the task may be dispatched without user approval.
    pub fn is_dispatchable(&self) -> bool {
        !self.approval_required || self.auto_approved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::from_str(s.as_str()), Some(s));
        }
    }

    #[test]
    fn test_status_transitions() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Pending));
        assert!(TaskStatus::Failed.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Medium);
        assert_eq!(TaskPriority::from_str("critical"), Some(TaskPriority::Critical));
        assert_eq!(TaskPriority::Critical.value(), 4);
    }

    #[test]
    fn test_metadata_project_defaults_to_self() {
        let meta = TaskMetadata::default();
        assert_eq!(meta.project(), "_self");

        let meta = TaskMetadata {
            app: Some("a1".into()),
            ..TaskMetadata::default()
        };
        assert_eq!(meta.project(), "a1");
    }

    #[test]
    fn test_metadata_passthrough_fields_survive_round_trip() {
        let json = r#"{"app":"a1","analysisType":"security","customHint":42}"#;
        let meta: TaskMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.app.as_deref(), Some("a1"));
        assert_eq!(meta.analysis_type.as_deref(), Some("security"));
        assert_eq!(meta.extra.get("customHint"), Some(&Value::from(42)));

        let back = serde_json::to_value(&meta).unwrap();
        assert_eq!(back["customHint"], Value::from(42));
    }

    #[test]
    fn test_system_task_is_auto_approved() {
        let task = Task::system("review app", TaskMetadata::default());
        assert!(task.id.starts_with("sys-"));
        assert_eq!(task.origin, TaskOrigin::Internal);
        assert!(task.is_dispatchable());
    }
}
