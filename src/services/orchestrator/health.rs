//! Health tick: process-manager inspection and the zombie sweep.
//!
//! Shell-outs to the process manager are guarded; its absence is a normal
//! condition. Zombies are agents the state file believes are running but
//! that nothing tracks and no live pid backs.

use chrono::Utc;
use tracing::{debug, info, warn};

use super::Orchestrator;
use crate::domain::error::OrchestratorError;
use crate::domain::models::{
    AgentResult, ErrorAnalysis, ErrorCategory, HealthSnapshot, ProcessStatus, TaskStatus,
};
use crate::services::event_bus::CosEvent;

/// Pid-less agents younger than this are still initializing, not zombies.
const ZOMBIE_GRACE_MS: i64 = 30_000;

impl Orchestrator {
    /// Inspect the managed process list, auto-restart errored processes,
    /// flag high-memory ones, stash the snapshot into state, and finish
    /// with the zombie sweep and orphaned-task reset.
    pub async fn run_health_check(&self) -> Result<HealthSnapshot, OrchestratorError> {
        let config = self.state.snapshot().await.config.clone();
        let mut processes = self.process_manager.list().await;
        let mut issues = Vec::new();

        let errored: Vec<String> = processes
            .iter()
            .filter(|p| p.status == ProcessStatus::Errored)
            .map(|p| p.name.clone())
            .collect();
        for name in &errored {
            if self.process_manager.restart(name).await {
                info!(process = %name, "restarted errored process");
                if let Some(row) = processes.iter_mut().find(|p| p.name == *name) {
                    row.status = ProcessStatus::Online;
                }
            } else {
                warn!(process = %name, "errored process could not be restarted");
                issues.push(format!("failed to restart {name}"));
            }
        }

        for process in &processes {
            if process.memory_mb > config.high_memory_mb {
                issues.push(format!(
                    "high memory: {} ({} MB)",
                    process.name, process.memory_mb
                ));
            }
        }
        for stat in self.spawner.agent_process_stats().await {
            if stat.memory_mb > config.high_memory_mb {
                issues.push(format!(
                    "high memory agent: {} ({} MB)",
                    stat.agent_id, stat.memory_mb
                ));
            }
        }

        let snapshot = HealthSnapshot {
            checked_at: Some(Utc::now()),
            processes,
            issues,
        };
        let stored = snapshot.clone();
        self.state
            .mutate(move |s| {
                s.stats.last_health_check = Some(Utc::now());
                s.health = stored;
            })
            .await?;

        self.bus.publish(CosEvent::HealthCheck {
            snapshot: snapshot.clone(),
        });
        if snapshot.has_errors() {
            self.bus.publish(CosEvent::HealthCritical {
                snapshot: snapshot.clone(),
            });
        }

        self.cleanup_zombies().await;
        if let Err(e) = self.reset_orphaned_tasks().await {
            warn!(error = %e, "orphaned task reset failed");
        }
        Ok(snapshot)
    }

    /// Reclassify running agents nothing is backing. An agent survives the
    /// sweep when the spawner still tracks it, its pid is alive, or it is a
    /// pid-less record younger than the grace period.
    pub async fn cleanup_zombies(&self) -> Vec<String> {
        let snapshot = self.state.snapshot().await;
        let tracked: std::collections::HashSet<String> =
            self.spawner.active_agent_ids().await.into_iter().collect();
        let now = Utc::now();

        let mut reaped = Vec::new();
        for agent in snapshot.running_agents() {
            if tracked.contains(&agent.id) {
                continue;
            }
            let alive = match agent.pid {
                Some(pid) => self.probe.pid_alive(pid),
                None => (now - agent.started_at).num_milliseconds() < ZOMBIE_GRACE_MS,
            };
            if alive {
                continue;
            }

            let reason = match agent.pid {
                Some(pid) => format!(
                    "process {pid} is gone and the spawner no longer tracks agent {}",
                    agent.id
                ),
                None => format!(
                    "agent {} never reported a pid and exceeded the startup grace period",
                    agent.id
                ),
            };
            let result = AgentResult::failure(
                agent.runtime_ms(now),
                ErrorAnalysis::new(ErrorCategory::Crash, reason),
            );
            match self.registry.reap_zombie(&agent.id, result).await {
                Ok(_) => {
                    info!(agent = %agent.id, "reaped zombie agent");
                    reaped.push(agent.id.clone());
                }
                // Raced with a real completion; the agent was not a zombie.
                Err(e) => debug!(agent = %agent.id, error = %e, "zombie reap skipped"),
            }
        }
        reaped
    }

    /// Reset `in_progress` tasks with no live agent back to `pending` so a
    /// later tick can retry them.
    pub async fn reset_orphaned_tasks(&self) -> Result<usize, OrchestratorError> {
        let snapshot = self.state.snapshot().await;
        let owned: std::collections::HashSet<String> = snapshot
            .running_agents()
            .map(|a| a.task_id.clone())
            .collect();

        let mut reset = 0;
        for loader in [
            self.tasks.load_user_tasks().await,
            self.tasks.load_system_tasks().await,
        ] {
            let tasks = match loader {
                Ok(tasks) => tasks,
                Err(e) => {
                    warn!(error = %e, "task file unreadable during orphan reset");
                    continue;
                }
            };
            for task in tasks {
                if task.status != TaskStatus::InProgress {
                    continue;
                }
                if owned.contains(&task.id) || self.is_spawn_pending(&task.id).await {
                    continue;
                }
                info!(task = %task.id, "resetting orphaned in-progress task");
                self.tasks
                    .update_task_status(&task.id, TaskStatus::Pending)
                    .await
                    .map_err(OrchestratorError::State)?;
                reset += 1;
            }
        }
        if reset > 0 {
            self.bus.publish(CosEvent::TasksChanged {
                source: "orphan-reset".into(),
            });
        }
        Ok(reset)
    }
}
