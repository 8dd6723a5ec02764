//! The persisted state envelope (`cos/state.json`).
//!
//! One JSON document holds the run flags, orchestration config, counters,
//! the agents map, and the latest health snapshot. Every field carries a
//! serde default so documents from older versions load cleanly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::agent::AgentRecord;
use super::config::CosConfig;

/// Counters stamped by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CosStats {
    #[serde(default)]
    pub tasks_completed: u64,
    #[serde(default)]
    pub agents_spawned: u64,
    /// Recorded on every failed completion. Nothing reads this back into
    /// scheduling; the consumer is undefined upstream.
    #[serde(default)]
    pub errors: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_evaluation: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_health_check: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_self_improvement: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_idle_review: Option<DateTime<Utc>>,
    #[serde(default)]
    pub evaluation_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_self_improvement_type: Option<String>,
}

/// Classification of one process-manager process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Online,
    Errored,
    Stopped,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Errored => "errored",
            Self::Stopped => "stopped",
        }
    }
}

/// One row of the process-manager listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessHealth {
    pub name: String,
    pub status: ProcessStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default)]
    pub memory_mb: u64,
    #[serde(default)]
    pub restarts: u64,
}

/// Result of the most recent health tick, stashed into state for the
/// status surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processes: Vec<ProcessHealth>,
    #[serde(default)]
    pub issues: Vec<String>,
}

impl HealthSnapshot {
    pub fn has_errors(&self) -> bool {
        !self.issues.is_empty()
            || self
                .processes
                .iter()
                .any(|p| p.status == ProcessStatus::Errored)
    }
}

/// The full `cos/state.json` document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CosState {
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_reason: Option<String>,
    #[serde(default)]
    pub config: CosConfig,
    #[serde(default)]
    pub stats: CosStats,
    /// Live and recently completed agents, keyed by agent id.
    #[serde(default)]
    pub agents: BTreeMap<String, AgentRecord>,
    #[serde(default)]
    pub health: HealthSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl CosState {
    /// Agents currently marked running.
    pub fn running_agents(&self) -> impl Iterator<Item = &AgentRecord> {
        self.agents.values().filter(|a| a.is_running())
    }

    /// Count of running agents per project key.
    pub fn running_by_project(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for agent in self.running_agents() {
            *counts
                .entry(agent.metadata.project().to_string())
                .or_insert(0) += 1;
        }
        counts
    }

    /// Most recent completion time for agents tied to `app`.
    pub fn last_completion_for_app(&self, app: &str) -> Option<DateTime<Utc>> {
        self.agents
            .values()
            .filter(|a| a.metadata.app.as_deref() == Some(app))
            .filter_map(|a| a.completed_at)
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::agent::AgentStatus;
    use crate::domain::models::task::TaskMetadata;

    fn running_agent(id: &str, app: Option<&str>) -> AgentRecord {
        AgentRecord::new(id, format!("task-{id}")).with_metadata(TaskMetadata {
            app: app.map(String::from),
            ..TaskMetadata::default()
        })
    }

    #[test]
    fn test_empty_state_loads_from_empty_object() {
        let state: CosState = serde_json::from_str("{}").unwrap();
        assert!(!state.running);
        assert_eq!(state.config.max_concurrent_agents, 3);
        assert!(state.agents.is_empty());
    }

    #[test]
    fn test_running_by_project_groups_by_app() {
        let mut state = CosState::default();
        state.agents.insert("a".into(), running_agent("a", Some("a1")));
        state.agents.insert("b".into(), running_agent("b", Some("a1")));
        state.agents.insert("c".into(), running_agent("c", None));

        let counts = state.running_by_project();
        assert_eq!(counts.get("a1"), Some(&2));
        assert_eq!(counts.get("_self"), Some(&1));
    }

    #[test]
    fn test_last_completion_for_app_ignores_running() {
        let mut state = CosState::default();
        let mut done = running_agent("a", Some("a1"));
        done.status = AgentStatus::Completed;
        done.completed_at = Some(Utc::now());
        state.agents.insert("a".into(), done);
        state.agents.insert("b".into(), running_agent("b", Some("a1")));

        assert!(state.last_completion_for_app("a1").is_some());
        assert!(state.last_completion_for_app("a2").is_none());
    }

    #[test]
    fn test_round_trip_preserves_envelope() {
        let mut state = CosState::default();
        state.running = true;
        state.stats.tasks_completed = 7;
        state.agents.insert("a".into(), running_agent("a", Some("a1")));

        let json = serde_json::to_string(&state).unwrap();
        let back: CosState = serde_json::from_str(&json).unwrap();
        assert!(back.running);
        assert_eq!(back.stats.tasks_completed, 7);
        assert_eq!(back.agents.len(), 1);
    }
}
