//! Agent lifecycle registry.
//!
//! Owns the live agent records (inside the state envelope), the bounded
//! per-agent output scrollback, the completed-agent cache, and the archival
//! metadata files under `cos/agents/<id>/`. Completion is idempotent: the
//! second delivery for the same agent id is rejected, so duplicate
//! `agent:completed` events cannot double-count downstream.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::domain::error::{ApiError, StateError};
use crate::domain::models::{AgentRecord, AgentResult, AgentStatus, ModelTier};
use crate::infrastructure::fsio;
use crate::infrastructure::paths::DataPaths;
use crate::services::event_bus::{CosEvent, EventBus};
use crate::services::state_store::StateStore;

/// Lines of output retained per agent.
pub const SCROLLBACK_LINES: usize = 1_000;

/// Registry failures: user-visible API errors or persistence trouble.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Partial update applied by the spawner once process details are known.
#[derive(Debug, Clone, Default)]
pub struct AgentPatch {
    pub pid: Option<u32>,
    pub model_tier: Option<ModelTier>,
}

pub struct AgentRegistry {
    state: Arc<StateStore>,
    paths: DataPaths,
    bus: Arc<EventBus>,
    scrollback: RwLock<HashMap<String, VecDeque<String>>>,
    /// Archived completed agents, loaded from disk on first use.
    completed: RwLock<Option<BTreeMap<String, AgentRecord>>>,
}

impl AgentRegistry {
    pub fn new(state: Arc<StateStore>, paths: DataPaths, bus: Arc<EventBus>) -> Self {
        Self {
            state,
            paths,
            bus,
            scrollback: RwLock::new(HashMap::new()),
            completed: RwLock::new(None),
        }
    }

    /// Register a freshly spawned agent. At most one running agent may own
    /// a task id at any time.
    pub async fn register_agent(&self, record: AgentRecord) -> Result<AgentRecord, RegistryError> {
        if record.id.is_empty() {
            return Err(ApiError::Validation("agent id must not be empty".into()).into());
        }
        if record.task_id.is_empty() {
            return Err(ApiError::Validation("task id must not be empty".into()).into());
        }

        let inserted = record.clone();
        let result = self
            .state
            .mutate(move |state| {
                let conflict = state.agents.values().any(|a| {
                    a.is_running() && a.task_id == record.task_id && a.id != record.id
                });
                if conflict {
                    return Err(ApiError::BadRequest(format!(
                        "task {} already has a running agent",
                        record.task_id
                    )));
                }
                if state
                    .agents
                    .get(&record.id)
                    .map_or(false, AgentRecord::is_running)
                {
                    return Err(ApiError::BadRequest(format!(
                        "agent {} is already registered",
                        record.id
                    )));
                }
                state.stats.agents_spawned += 1;
                state.agents.insert(record.id.clone(), record);
                Ok(())
            })
            .await?;
        result?;

        self.scrollback
            .write()
            .await
            .insert(inserted.id.clone(), VecDeque::new());
        info!(agent = %inserted.id, task = %inserted.task_id, "agent registered");
        self.bus.publish(CosEvent::AgentSpawned {
            agent: inserted.clone(),
        });
        self.bus.publish(CosEvent::AgentsChanged {
            action: "registered".into(),
        });
        Ok(inserted)
    }

    /// Append one line to an agent's scrollback. The ring keeps the last
    /// `SCROLLBACK_LINES` lines; older lines fall off the front.
    pub async fn append_output(
        &self,
        agent_id: &str,
        line: impl Into<String>,
    ) -> Result<(), RegistryError> {
        let line = line.into();
        let mut scrollback = self.scrollback.write().await;
        let Some(ring) = scrollback.get_mut(agent_id) else {
            return Err(ApiError::NotFound(format!("agent {agent_id}")).into());
        };
        if ring.len() == SCROLLBACK_LINES {
            ring.pop_front();
        }
        ring.push_back(line.clone());
        drop(scrollback);

        self.bus.publish(CosEvent::AgentOutput {
            agent_id: agent_id.to_string(),
            line,
        });
        Ok(())
    }

    pub async fn scrollback(&self, agent_id: &str) -> Vec<String> {
        self.scrollback
            .read()
            .await
            .get(agent_id)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Patch a running agent with details the spawner learned after launch.
    pub async fn update_agent(
        &self,
        agent_id: &str,
        patch: AgentPatch,
    ) -> Result<AgentRecord, RegistryError> {
        let id = agent_id.to_string();
        let updated = self
            .state
            .mutate(move |state| {
                let Some(agent) = state.agents.get_mut(&id) else {
                    return Err(ApiError::NotFound(format!("agent {id}")));
                };
                if !agent.is_running() {
                    return Err(ApiError::BadRequest(format!(
                        "agent {id} has already completed"
                    )));
                }
                if let Some(pid) = patch.pid {
                    agent.pid = Some(pid);
                }
                if let Some(tier) = patch.model_tier {
                    agent.model_tier = tier;
                }
                Ok(agent.clone())
            })
            .await??;

        self.bus.publish(CosEvent::AgentUpdated {
            agent: updated.clone(),
        });
        Ok(updated)
    }

    /// Complete an agent: atomically set status, result, and timestamps,
    /// archive the metadata file, and publish `agent:completed` only after
    /// persistence. A second completion for the same id is a `BAD_REQUEST`.
    pub async fn complete_agent(
        &self,
        agent_id: &str,
        result: AgentResult,
    ) -> Result<AgentRecord, RegistryError> {
        self.complete_with_action(agent_id, result, "completed").await
    }

    /// Complete an agent the zombie sweep reclaimed. Identical semantics,
    /// distinct `agents:changed` action for observers.
    pub async fn reap_zombie(
        &self,
        agent_id: &str,
        result: AgentResult,
    ) -> Result<AgentRecord, RegistryError> {
        self.complete_with_action(agent_id, result, "zombie-cleanup").await
    }

    async fn complete_with_action(
        &self,
        agent_id: &str,
        result: AgentResult,
        action: &str,
    ) -> Result<AgentRecord, RegistryError> {
        let id = agent_id.to_string();
        let completed = self
            .state
            .mutate(move |state| {
                let Some(agent) = state.agents.get_mut(&id) else {
                    return Err(ApiError::NotFound(format!("agent {id}")));
                };
                if agent.status == AgentStatus::Completed {
                    return Err(ApiError::BadRequest(format!(
                        "agent {id} already completed"
                    )));
                }
                agent.status = AgentStatus::Completed;
                agent.completed_at = Some(chrono::Utc::now());
                if !result.success {
                    state.stats.errors += 1;
                }
                agent.result = Some(result);
                state.stats.tasks_completed += 1;
                Ok(agent.clone())
            })
            .await??;

        // Archive after the state write so the event ordering guarantee
        // (completion persisted before handlers run) holds.
        let metadata_path = self.paths.agent_metadata_file(&completed.id);
        if let Err(e) = fsio::write_atomic(&metadata_path, &completed).await {
            warn!(agent = %completed.id, error = %e, "failed to archive agent metadata");
        }

        if let Some(cache) = self.completed.write().await.as_mut() {
            cache.insert(completed.id.clone(), completed.clone());
        }
        self.scrollback.write().await.remove(&completed.id);

        info!(
            agent = %completed.id,
            task = %completed.task_id,
            success = completed.result.as_ref().map_or(false, |r| r.success),
            action,
            "agent completed"
        );
        self.bus.publish(CosEvent::AgentCompleted {
            agent: completed.clone(),
        });
        self.bus.publish(CosEvent::AgentsChanged {
            action: action.to_string(),
        });
        Ok(completed)
    }

    /// Remove an agent from the live map, the cache, and the archive.
    pub async fn delete_agent(&self, agent_id: &str) -> Result<(), RegistryError> {
        let id = agent_id.to_string();
        let removed = self
            .state
            .mutate(move |state| state.agents.remove(&id).is_some())
            .await?;

        let cached = if let Some(cache) = self.completed.write().await.as_mut() {
            cache.remove(agent_id).is_some()
        } else {
            false
        };
        self.scrollback.write().await.remove(agent_id);

        let archive_dir = self.paths.agents_dir().join(agent_id);
        let archived = tokio::fs::remove_dir_all(&archive_dir).await.is_ok();

        if !removed && !cached && !archived {
            return Err(ApiError::NotFound(format!("agent {agent_id}")).into());
        }
        self.bus.publish(CosEvent::AgentsChanged {
            action: "deleted".into(),
        });
        Ok(())
    }

    /// Drop every completed agent from the live map and the cache. The
    /// archive directories stay on disk.
    pub async fn clear_completed_agents(&self) -> Result<usize, RegistryError> {
        let removed = self
            .state
            .mutate(|state| {
                let before = state.agents.len();
                state.agents.retain(|_, a| a.is_running());
                before - state.agents.len()
            })
            .await?;

        *self.completed.write().await = Some(BTreeMap::new());
        self.bus.publish(CosEvent::AgentsChanged {
            action: "cleared".into(),
        });
        Ok(removed)
    }

    pub async fn get(&self, agent_id: &str) -> Option<AgentRecord> {
        if let Some(agent) = self.state.snapshot().await.agents.get(agent_id) {
            return Some(agent.clone());
        }
        self.load_completed_cache().await;
        self.completed
            .read()
            .await
            .as_ref()
            .and_then(|cache| cache.get(agent_id).cloned())
    }

    /// Every known agent: live records first, then archived completions not
    /// present in the live map.
    pub async fn list_agents(&self) -> Vec<AgentRecord> {
        let state = self.state.snapshot().await;
        let mut out: Vec<AgentRecord> = state.agents.values().cloned().collect();

        self.load_completed_cache().await;
        if let Some(cache) = self.completed.read().await.as_ref() {
            for (id, agent) in cache {
                if !state.agents.contains_key(id) {
                    out.push(agent.clone());
                }
            }
        }
        out
    }

    async fn load_completed_cache(&self) {
        if self.completed.read().await.is_some() {
            return;
        }
        let mut cache = BTreeMap::new();
        let dir = self.paths.agents_dir();
        if let Ok(mut entries) = tokio::fs::read_dir(&dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let metadata = entry.path().join("metadata.json");
                match tokio::fs::read_to_string(&metadata).await {
                    Ok(raw) => match serde_json::from_str::<AgentRecord>(&raw) {
                        Ok(agent) => {
                            cache.insert(agent.id.clone(), agent);
                        }
                        Err(e) => {
                            warn!(path = %metadata.display(), error = %e, "unreadable agent archive")
                        }
                    },
                    Err(_) => continue,
                }
            }
        }
        debug!(archived = cache.len(), "loaded completed-agent cache");
        *self.completed.write().await = Some(cache);
    }
}
