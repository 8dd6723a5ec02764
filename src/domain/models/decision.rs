//! Evaluation decision records.
//!
//! Every evaluation that defers, skips, or dispatches work leaves a record
//! explaining why, so the status surface can answer "why did nothing run?".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why an evaluation took (or did not take) an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionReason {
    Dispatched,
    CapacityFull,
    CooldownActive,
    NotDue,
    SkipFailing,
    Idle,
    Paused,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dispatched => "dispatched",
            Self::CapacityFull => "capacity-full",
            Self::CooldownActive => "cooldown-active",
            Self::NotDue => "not-due",
            Self::SkipFailing => "skip-failing",
            Self::Idle => "idle",
            Self::Paused => "paused",
        }
    }
}

/// One structured decision, with the context a reader needs to act on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationDecision {
    pub at: DateTime<Utc>,
    pub reason: DecisionReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    /// Per-project limit, when `capacity-full` names a project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Effective cooldown, when `cooldown-active`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl EvaluationDecision {
    pub fn new(reason: DecisionReason) -> Self {
        Self {
            at: Utc::now(),
            reason,
            task_id: None,
            task_type: None,
            app: None,
            limit: None,
            cooldown_ms: None,
            next_run_at: None,
            detail: None,
        }
    }

    pub fn task_id(mut self, id: impl Into<String>) -> Self {
        self.task_id = Some(id.into());
        self
    }

    pub fn task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn app(mut self, app: impl Into<String>) -> Self {
        self.app = Some(app.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn cooldown_ms(mut self, ms: u64) -> Self {
        self.cooldown_ms = Some(ms);
        self
    }

    pub fn next_run_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_run_at = Some(at);
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
