//! Port for the external sub-agent spawner.
//!
//! The spawner consumes `task:ready` events, runs the worker CLI, and calls
//! back into the agent registry. The supervisor only queries which agents
//! the spawner still tracks and asks it to kill one when required.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Resource usage of one spawned worker process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProcessStats {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default)]
    pub memory_mb: u64,
    #[serde(default)]
    pub cpu_percent: f64,
}

/// Handle onto the spawner's process tracking.
#[async_trait]
pub trait SpawnerHandle: Send + Sync {
    /// Agent ids the spawner currently tracks a live process for.
    async fn active_agent_ids(&self) -> Vec<String>;

    /// Resource stats for tracked agents; empty when unavailable.
    async fn agent_process_stats(&self) -> Vec<AgentProcessStats>;

    /// Ask the spawner to terminate one agent's process tree.
    async fn kill_agent(&self, agent_id: &str) -> bool;
}

/// Spawner handle that tracks nothing. The zombie sweep treats every
/// state-recorded agent as untracked under this handle.
#[derive(Debug, Default, Clone)]
pub struct NullSpawner;

#[async_trait]
impl SpawnerHandle for NullSpawner {
    async fn active_agent_ids(&self) -> Vec<String> {
        vec![]
    }

    async fn agent_process_stats(&self) -> Vec<AgentProcessStats> {
        vec![]
    }

    async fn kill_agent(&self, _agent_id: &str) -> bool {
        false
    }
}

/// Spawner stub with a configurable tracked set. Used by lifecycle tests and
/// dry runs where no real spawner is attached.
#[derive(Debug, Default)]
pub struct StubSpawner {
    tracked: std::sync::Mutex<std::collections::HashSet<String>>,
}

impl StubSpawner {
    pub fn tracking(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            tracked: std::sync::Mutex::new(ids.into_iter().map(Into::into).collect()),
        }
    }

    pub fn track(&self, id: impl Into<String>) {
        self.tracked.lock().unwrap().insert(id.into());
    }

    pub fn untrack(&self, id: &str) {
        self.tracked.lock().unwrap().remove(id);
    }
}

#[async_trait]
impl SpawnerHandle for StubSpawner {
    async fn active_agent_ids(&self) -> Vec<String> {
        self.tracked.lock().unwrap().iter().cloned().collect()
    }

    async fn agent_process_stats(&self) -> Vec<AgentProcessStats> {
        vec![]
    }

    async fn kill_agent(&self, agent_id: &str) -> bool {
        self.tracked.lock().unwrap().remove(agent_id)
    }
}
