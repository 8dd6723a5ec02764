//! The evaluation loop - the supervisor's decision core.
//!
//! A single logical evaluator driven by two interval timers (evaluation and
//! health) plus three fast paths: a user task arriving, an agent completing,
//! and a pause→resume edge. Each tick reads the task sources, applies
//! admission, cooldown, learning, and scheduling rules, and emits
//! `task:ready` events for the external spawner.
//!
//! - **evaluation**: the per-tick P0→P4 candidate pipeline and admission
//! - **health**: process-manager health checks and the zombie sweep
//! - **decision_log**: the bounded explain-why record

pub mod decision_log;
mod evaluation;
mod health;

pub use decision_log::DecisionLog;
pub use evaluation::EvaluationOutcome;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::domain::error::OrchestratorError;
use crate::domain::models::{AgentRecord, Task, TaskStatus};
use crate::domain::ports::{
    NullProactiveSource, NullSpawner, NullTaskSource, ProactiveSource, SpawnerHandle, TaskSource,
};
use crate::adapters::process::{NixProcessProbe, NullProcessManager, ProcessManager, ProcessProbe};
use crate::services::event_bus::{CosEvent, EventBus, EventEnvelope};
use crate::services::learning_store::{LearningStore, REHABILITATION_GRACE_MS};
use crate::services::reports::ReportService;
use crate::services::schedule_store::ScheduleStore;
use crate::services::agent_registry::AgentRegistry;
use crate::services::state_store::StateStore;

/// How long a dispatched task may wait for the spawner's acknowledgment
/// before it is considered dispatchable again.
const PENDING_SPAWN_GRACE: Duration = Duration::from_secs(120);

/// Delay between a resume edge and the follow-up evaluation.
const RESUME_EVALUATION_DELAY: Duration = Duration::from_millis(500);

/// One dispatched-but-unacknowledged task.
#[derive(Debug, Clone)]
pub(super) struct PendingSpawn {
    at: Instant,
    project: String,
}

pub struct Orchestrator {
    pub(super) state: Arc<StateStore>,
    pub(super) learning: Arc<LearningStore>,
    pub(super) schedule: Arc<ScheduleStore>,
    pub(super) registry: Arc<AgentRegistry>,
    pub(super) bus: Arc<EventBus>,
    pub(super) reports: Arc<ReportService>,
    pub(super) tasks: Arc<dyn TaskSource>,
    pub(super) spawner: Arc<dyn SpawnerHandle>,
    pub(super) proactive: Arc<dyn ProactiveSource>,
    pub(super) process_manager: Arc<dyn ProcessManager>,
    pub(super) probe: Arc<dyn ProcessProbe>,
    pub(super) decisions: DecisionLog,

    /// Ticks never overlap; the fast paths queue behind a running tick.
    pub(super) eval_lock: Mutex<()>,
    /// Tasks dispatched but not yet acknowledged by the spawner, with the
    /// project each one counts against.
    pub(super) pending_spawns: Mutex<HashMap<String, PendingSpawn>>,
    stopped: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl Orchestrator {
    pub fn new(
        state: Arc<StateStore>,
        learning: Arc<LearningStore>,
        schedule: Arc<ScheduleStore>,
        registry: Arc<AgentRegistry>,
        bus: Arc<EventBus>,
        reports: Arc<ReportService>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            state,
            learning,
            schedule,
            registry,
            bus,
            reports,
            tasks: Arc::new(NullTaskSource),
            spawner: Arc::new(NullSpawner),
            proactive: Arc::new(NullProactiveSource),
            process_manager: Arc::new(NullProcessManager),
            probe: Arc::new(NixProcessProbe),
            decisions: DecisionLog::with_defaults(),
            eval_lock: Mutex::new(()),
            pending_spawns: Mutex::new(HashMap::new()),
            stopped: AtomicBool::new(false),
            shutdown,
        }
    }

    // -- Builder methods --

    pub fn with_task_source(mut self, tasks: Arc<dyn TaskSource>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn SpawnerHandle>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn with_proactive_source(mut self, proactive: Arc<dyn ProactiveSource>) -> Self {
        self.proactive = proactive;
        self
    }

    pub fn with_process_manager(mut self, manager: Arc<dyn ProcessManager>) -> Self {
        self.process_manager = manager;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn ProcessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn decisions(&self) -> &DecisionLog {
        &self.decisions
    }

    // -- Lifecycle --

    /// Run until `stop` is called. Drives the evaluation and health timers
    /// and reacts to bus events.
    pub async fn run(self: Arc<Self>) -> Result<(), OrchestratorError> {
        self.state
            .mutate(|s| {
                s.running = true;
            })
            .await?;
        info!("orchestrator started");
        self.bus.publish(CosEvent::Log {
            level: "info".into(),
            message: "orchestrator started".into(),
        });

        // Reclaim whatever a previous process left behind before scheduling
        // anything new.
        if let Err(e) = self.reset_orphaned_tasks().await {
            warn!(error = %e, "startup orphan reset failed");
        }
        self.cleanup_zombies().await;

        let config = self.state.snapshot().await.config.clone();
        let mut eval_tick =
            tokio::time::interval(Duration::from_millis(config.evaluation_interval_ms.max(100)));
        let mut health_tick =
            tokio::time::interval(Duration::from_millis(config.health_check_interval_ms.max(1_000)));
        // The first immediate fire of each interval is the startup pass.
        let mut events = self.bus.subscribe();
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = eval_tick.tick() => {
                    if let Err(e) = self.evaluate().await {
                        if e.is_transient() {
                            warn!(error = %e, "evaluation failed, will retry next tick");
                        } else {
                            error!(error = %e, "evaluation failed");
                        }
                    }
                }
                _ = health_tick.tick() => {
                    if let Err(e) = self.run_health_check().await {
                        warn!(error = %e, "health check failed");
                    }
                }
                event = events.recv() => {
                    match event {
                        Ok(envelope) => self.handle_event(envelope).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(dropped = n, "event subscriber lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.state
            .mutate(|s| {
                s.running = false;
            })
            .await?;
        info!("orchestrator stopped");
        Ok(())
    }

    /// Stop the loop. Live agents keep running; termination goes through
    /// the spawner via `agent:terminate`.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Pause evaluation. No new dispatches happen until resume.
    pub async fn pause(&self, reason: Option<String>) -> Result<(), OrchestratorError> {
        let reason_clone = reason.clone();
        self.state
            .mutate(move |s| {
                s.paused = true;
                s.paused_at = Some(chrono::Utc::now());
                s.pause_reason = reason_clone;
            })
            .await?;
        info!(reason = reason.as_deref().unwrap_or("-"), "orchestrator paused");
        self.bus.publish(CosEvent::StatusPaused { reason });
        Ok(())
    }

    /// Resume evaluation and re-fire an evaluation shortly after.
    pub async fn resume(self: &Arc<Self>) -> Result<(), OrchestratorError> {
        self.state
            .mutate(|s| {
                s.paused = false;
                s.paused_at = None;
                s.pause_reason = None;
            })
            .await?;
        info!("orchestrator resumed");
        self.bus.publish(CosEvent::StatusResumed);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(RESUME_EVALUATION_DELAY).await;
            if let Err(e) = this.evaluate().await {
                warn!(error = %e, "post-resume evaluation failed");
            }
        });
        Ok(())
    }

    // -- Event handling --

    async fn handle_event(&self, envelope: EventEnvelope) {
        match envelope.event {
            CosEvent::AgentSpawned { agent } => {
                self.pending_spawns.lock().await.remove(&agent.task_id);
                if let Err(e) = self
                    .tasks
                    .update_task_status(&agent.task_id, TaskStatus::InProgress)
                    .await
                {
                    warn!(task = %agent.task_id, error = %e, "failed to mark task in progress");
                }
            }
            CosEvent::AgentCompleted { agent } => {
                self.handle_completion(agent).await;
            }
            CosEvent::TasksChanged { source } => {
                debug!(source, "task files changed, evaluating");
                if let Err(e) = self.evaluate().await {
                    warn!(error = %e, "change-triggered evaluation failed");
                }
            }
            _ => {}
        }
    }

    /// Route one persisted completion into the learning store, the daily
    /// report, the task files, and the re-dequeue fast path.
    async fn handle_completion(&self, agent: AgentRecord) {
        self.pending_spawns.lock().await.remove(&agent.task_id);

        let success = agent.result.as_ref().map_or(false, |r| r.success);
        let status = if success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        if let Err(e) = self.tasks.update_task_status(&agent.task_id, status).await {
            warn!(task = %agent.task_id, error = %e, "failed to record task outcome");
        }

        let task = self.find_task(&agent.task_id).await.unwrap_or_else(|| {
            // Generated tasks (on-demand, idle, missions) never live in the
            // task files; their metadata rode along on the agent.
            let mut task = Task::system(String::new(), agent.metadata.clone());
            task.id = agent.task_id.clone();
            task
        });

        match self.learning.record_task_completion(&agent, &task).await {
            Ok(task_type) => {
                if let Err(e) = self.reports.record_completion(&agent, &task_type).await {
                    warn!(error = %e, "failed to roll completion into daily report");
                }
            }
            Err(e) => warn!(agent = %agent.id, error = %e, "failed to record completion"),
        }

        if let Err(e) = self.dequeue_next_task().await {
            warn!(error = %e, "dequeue after completion failed");
        }
    }

    async fn find_task(&self, task_id: &str) -> Option<Task> {
        for loader in [
            self.tasks.load_user_tasks().await,
            self.tasks.load_system_tasks().await,
        ] {
            if let Ok(tasks) = loader {
                if let Some(task) = tasks.into_iter().find(|t| t.id == task_id) {
                    return Some(task);
                }
            }
        }
        None
    }

    /// Fast path for a freshly added user task: dispatch immediately when
    /// both caps allow it, without waiting for the next tick.
    pub async fn notify_task_added(&self, task: &Task) -> Result<bool, OrchestratorError> {
        if self.is_stopped() {
            return Err(OrchestratorError::Stopped);
        }
        let snapshot = self.state.snapshot().await;
        if snapshot.paused {
            return Ok(false);
        }
        if !task.is_dispatchable() || task.status != TaskStatus::Pending {
            return Ok(false);
        }
        if self.is_spawn_pending(&task.id).await {
            return Ok(false);
        }

        let mut admission = self.admission(&snapshot).await;
        if admission.admit(task.metadata.project()).is_ok() {
            self.dispatch(task.clone(), "immediate").await;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Projects of pending-spawn entries still within the grace window;
    /// prunes expired entries as a side effect.
    pub(super) async fn pending_spawn_projects(&self) -> Vec<String> {
        let mut pending = self.pending_spawns.lock().await;
        pending.retain(|_, spawn| spawn.at.elapsed() < PENDING_SPAWN_GRACE);
        pending.values().map(|spawn| spawn.project.clone()).collect()
    }

    pub(super) async fn is_spawn_pending(&self, task_id: &str) -> bool {
        self.pending_spawns
            .lock()
            .await
            .get(task_id)
            .map_or(false, |spawn| spawn.at.elapsed() < PENDING_SPAWN_GRACE)
    }

    /// Emit `task:ready` and remember the spawn until the spawner acks.
    pub(super) async fn dispatch(&self, task: Task, via: &str) {
        self.pending_spawns.lock().await.insert(
            task.id.clone(),
            PendingSpawn {
                at: Instant::now(),
                project: task.metadata.project().to_string(),
            },
        );
        info!(task = %task.id, via, "task ready");
        let decision = crate::domain::models::EvaluationDecision::new(
            crate::domain::models::DecisionReason::Dispatched,
        )
        .task_id(task.id.clone())
        .app(task.metadata.project().to_string())
        .detail(via.to_string());
        self.decisions.record(decision.clone()).await;
        self.bus.publish(CosEvent::Status { decision });
        self.bus.publish(CosEvent::TaskReady { task });
    }

    /// Ask the spawner to terminate an agent. The supervisor never kills
    /// processes itself; it signals and lets the spawner unwind the tree.
    pub async fn terminate_agent(&self, agent_id: &str) -> Result<(), crate::domain::error::ApiError> {
        let Some(agent) = self.registry.get(agent_id).await else {
            return Err(crate::domain::error::ApiError::NotFound(format!(
                "agent {agent_id}"
            )));
        };
        if !agent.is_running() {
            return Err(crate::domain::error::ApiError::BadRequest(format!(
                "agent {agent_id} is not running"
            )));
        }
        self.bus.publish(CosEvent::AgentTerminate {
            agent_id: agent_id.to_string(),
        });
        self.spawner.kill_agent(agent_id).await;
        Ok(())
    }

    pub(super) fn rehabilitation_grace_ms(&self) -> i64 {
        REHABILITATION_GRACE_MS
    }
}
