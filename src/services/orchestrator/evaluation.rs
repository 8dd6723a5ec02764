//! The per-tick evaluation pipeline.
//!
//! Candidates are considered in priority order - on-demand requests, user
//! tasks, auto-approved system tasks, mission tasks, due jobs - each subject
//! to the global and per-project admission budgets. Schedule-due improvement
//! work is enqueued into the system task file between P2 and P3, and the
//! idle-review generator keeps the system busy when everything else is
//! quiet. A failure in one priority never skips the next.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use super::Orchestrator;
use crate::domain::error::OrchestratorError;
use crate::domain::models::{
    CosState, DecisionReason, EvaluationDecision, IntervalType, Task, TaskMetadata, TaskPriority,
    TaskStatus,
};
use crate::services::event_bus::CosEvent;

/// What one tick did, for callers that want to assert on it.
#[derive(Debug, Default, Clone)]
pub struct EvaluationOutcome {
    /// Task ids for which `task:ready` was emitted, in emission order.
    pub dispatched: Vec<String>,
    /// Tasks appended to the system task file this tick.
    pub enqueued: Vec<String>,
}

/// Why admission turned a candidate away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum AdmitDenied {
    Global,
    Project { limit: usize },
}

/// Tracks the remaining global and per-project budgets across one tick.
pub(super) struct Admission {
    available: usize,
    per_project_cap: usize,
    by_project: BTreeMap<String, usize>,
}

impl Admission {
    pub(super) fn admit(&mut self, project: &str) -> Result<(), AdmitDenied> {
        if self.available == 0 {
            return Err(AdmitDenied::Global);
        }
        let count = self.by_project.entry(project.to_string()).or_insert(0);
        if *count >= self.per_project_cap {
            return Err(AdmitDenied::Project {
                limit: self.per_project_cap,
            });
        }
        self.available -= 1;
        *count += 1;
        Ok(())
    }

    pub(super) fn exhausted(&self) -> bool {
        self.available == 0
    }

    pub(super) fn available(&self) -> usize {
        self.available
    }
}

impl Orchestrator {
    /// Build the tick's admission budget from the live agent counts plus
    /// dispatches still waiting for the spawner's acknowledgment.
    pub(super) async fn admission(&self, snapshot: &CosState) -> Admission {
        let mut by_project = snapshot.running_by_project();
        let mut pending_total = 0;
        for project in self.pending_spawn_projects().await {
            *by_project.entry(project).or_insert(0) += 1;
            pending_total += 1;
        }
        let running = snapshot.running_agents().count() + pending_total;
        Admission {
            available: snapshot.config.max_concurrent_agents.saturating_sub(running),
            per_project_cap: snapshot.config.max_concurrent_agents_per_project,
            by_project,
        }
    }

    /// One evaluation tick. Returns what was dispatched and enqueued.
    pub async fn evaluate(&self) -> Result<EvaluationOutcome, OrchestratorError> {
        if self.is_stopped() {
            return Err(OrchestratorError::Stopped);
        }
        let _tick = self.eval_lock.lock().await;

        let snapshot = self
            .state
            .mutate(|s| {
                s.stats.last_evaluation = Some(Utc::now());
                s.clone()
            })
            .await?;
        if snapshot.paused {
            debug!("evaluation skipped: paused");
            return Ok(EvaluationOutcome::default());
        }

        let user_tasks = self.tasks.load_user_tasks().await.unwrap_or_else(|e| {
            warn!(error = %e, "user task file unreadable");
            vec![]
        });
        let system_tasks = self.tasks.load_system_tasks().await.unwrap_or_else(|e| {
            warn!(error = %e, "system task file unreadable");
            vec![]
        });
        let user_pending: Vec<&Task> = user_tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .collect();
        let system_pending: Vec<&Task> = system_tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .collect();

        let mut outcome = EvaluationOutcome::default();
        let mut decided = false;
        let mut admission = self.admission(&snapshot).await;

        if admission.exhausted() {
            self.note(
                EvaluationDecision::new(DecisionReason::CapacityFull)
                    .limit(snapshot.config.max_concurrent_agents)
                    .detail("global agent budget exhausted"),
            )
            .await;
            self.finish_tick().await?;
            return Ok(outcome);
        }

        // P0: drain on-demand requests.
        if let Err(e) = self
            .drain_on_demand(&snapshot, &mut admission, &mut outcome, &mut decided)
            .await
        {
            warn!(error = %e, "on-demand drain failed");
        }

        // P1: user pending tasks in file order.
        for task in &user_pending {
            if admission.exhausted() {
                break;
            }
            if !task.is_dispatchable() || self.is_spawn_pending(&task.id).await {
                continue;
            }
            match admission.admit(task.metadata.project()) {
                Ok(()) => {
                    self.dispatch((*task).clone(), "user").await;
                    outcome.dispatched.push(task.id.clone());
                }
                Err(denied) => {
                    self.note_denied(task, denied).await;
                    decided = true;
                }
            }
        }

        // P2: auto-approved system tasks outside their app cooldown.
        for task in &system_pending {
            if admission.exhausted() {
                break;
            }
            if !task.is_dispatchable() || self.is_spawn_pending(&task.id).await {
                continue;
            }
            if let Some(cooldown) = self.active_app_cooldown(&snapshot, task) {
                self.note(
                    EvaluationDecision::new(DecisionReason::CooldownActive)
                        .task_id(task.id.clone())
                        .app(task.metadata.project().to_string())
                        .cooldown_ms(snapshot.config.app_review_cooldown_ms)
                        .next_run_at(cooldown),
                )
                .await;
                decided = true;
                continue;
            }
            match admission.admit(task.metadata.project()) {
                Ok(()) => {
                    self.dispatch((*task).clone(), "system").await;
                    outcome.dispatched.push(task.id.clone());
                }
                Err(denied) => {
                    self.note_denied(task, denied).await;
                    decided = true;
                }
            }
        }

        // Between P2 and P3: keep the system task file fed with schedule-due
        // improvement work, regardless of remaining slots.
        if user_pending.is_empty() {
            match self
                .enqueue_due_improvements(&snapshot, &system_tasks)
                .await
            {
                Ok(enqueued) => outcome.enqueued.extend(enqueued),
                Err(e) => warn!(error = %e, "improvement enqueue failed"),
            }
        }

        // P3: mission-driven tasks, proactive mode only.
        if snapshot.config.proactive_mode && user_pending.is_empty() && !admission.exhausted() {
            match self.proactive.mission_tasks().await {
                Ok(missions) => {
                    for task in missions.into_iter().take(admission.available()) {
                        if self.is_spawn_pending(&task.id).await {
                            continue;
                        }
                        if admission.admit(task.metadata.project()).is_ok() {
                            outcome.dispatched.push(task.id.clone());
                            self.dispatch(task, "mission").await;
                        }
                    }
                }
                Err(e) => warn!(error = %e, "mission source failed"),
            }
        }

        // P3.5: autonomous recurring jobs past their due time.
        match self.proactive.due_jobs(Utc::now()).await {
            Ok(jobs) => {
                for task in jobs {
                    if admission.exhausted() {
                        break;
                    }
                    if self.is_spawn_pending(&task.id).await {
                        continue;
                    }
                    if admission.admit(task.metadata.project()).is_ok() {
                        let job_id = task.metadata.job_id.clone().unwrap_or_default();
                        outcome.dispatched.push(task.id.clone());
                        self.bus.publish(CosEvent::JobSpawned {
                            job_id: job_id.clone(),
                            task_id: task.id.clone(),
                        });
                        self.dispatch(task, "job").await;
                        if !job_id.is_empty() {
                            if let Err(e) = self.proactive.mark_job_dispatched(&job_id).await {
                                warn!(job = %job_id, error = %e, "failed to advance job schedule");
                            }
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "job source failed"),
        }

        // P4: idle review. Only when this tick produced nothing and both
        // task lists were empty at load time - the generated task goes into
        // the system file for the next tick to pick up, so the supervisor is
        // never left without queued work.
        if outcome.dispatched.is_empty()
            && outcome.enqueued.is_empty()
            && user_pending.is_empty()
            && system_pending.is_empty()
        {
            match self.generate_idle_review_task(&snapshot).await {
                Ok(task) => {
                    let task_type = task
                        .metadata
                        .analysis_type
                        .clone()
                        .unwrap_or_else(|| "self-improvement".into());
                    if let Err(e) = self.tasks.append_system_tasks(&[task.clone()]).await {
                        warn!(error = %e, "failed to enqueue idle review task");
                    } else {
                        outcome.enqueued.push(task.id.clone());
                        self.note(
                            EvaluationDecision::new(DecisionReason::Idle)
                                .task_id(task.id)
                                .task_type(task_type)
                                .app(task.metadata.project().to_string()),
                        )
                        .await;
                        decided = true;
                    }
                }
                Err(e) => warn!(error = %e, "idle review generation failed"),
            }
        }

        if outcome.dispatched.is_empty() && outcome.enqueued.is_empty() && !decided {
            self.note(
                EvaluationDecision::new(DecisionReason::NotDue)
                    .detail("no eligible tasks this tick"),
            )
            .await;
        }

        self.finish_tick().await?;
        Ok(outcome)
    }

    /// P0 body: consume queued on-demand requests. A request is only
    /// cleared once admission accepts it; a blocked request stays queued
    /// and leaves a decision record.
    async fn drain_on_demand(
        &self,
        snapshot: &CosState,
        admission: &mut Admission,
        outcome: &mut EvaluationOutcome,
        decided: &mut bool,
    ) -> Result<(), OrchestratorError> {
        for request in self.schedule.pending_requests().await {
            if admission.exhausted() {
                break;
            }
            let project = request
                .app_id
                .clone()
                .unwrap_or_else(|| TaskMetadata::SELF_PROJECT.to_string());
            match admission.admit(&project) {
                Err(denied) => {
                    *decided = true;
                    self.note(
                        EvaluationDecision::new(DecisionReason::CapacityFull)
                            .task_type(request.task_type.clone())
                            .app(project)
                            .limit(match denied {
                                AdmitDenied::Global => snapshot.config.max_concurrent_agents,
                                AdmitDenied::Project { limit } => limit,
                            }),
                    )
                    .await;
                }
                Ok(()) => {
                    self.schedule.clear_request(&request.id).await?;
                    self.schedule
                        .record_execution(&request.task_type, request.app_id.as_deref())
                        .await?;
                    let task = self
                        .build_scheduled_task(&request.task_type, request.app_id.as_deref())
                        .await
                        .with_priority(TaskPriority::High);
                    outcome.dispatched.push(task.id.clone());
                    self.dispatch(task, "on-demand").await;
                }
            }
        }
        Ok(())
    }

    /// Enqueue daily/weekly/once types that are due, one per scope, into
    /// the system task file. Execution is recorded at enqueue time so the
    /// cooldown window starts now and the next tick does not re-enqueue.
    async fn enqueue_due_improvements(
        &self,
        snapshot: &CosState,
        system_tasks: &[Task],
    ) -> Result<Vec<String>, OrchestratorError> {
        let mut scopes: Vec<Option<String>> = vec![None];
        scopes.extend(snapshot.config.enabled_apps().map(|a| Some(a.to_string())));

        let mut enqueued = Vec::new();
        let schedule = self.schedule.snapshot().await;
        for scope in scopes {
            let scope_ref = scope.as_deref();
            // A scope with queued system work does not need more.
            let has_pending = system_tasks.iter().any(|t| {
                t.status == TaskStatus::Pending && t.metadata.app.as_deref() == scope_ref
            });
            if has_pending {
                continue;
            }

            for (task_type, entry) in &schedule.tasks {
                let effective = entry.effective_interval_type(scope_ref);
                if !matches!(
                    effective,
                    IntervalType::Daily | IntervalType::Weekly | IntervalType::Once
                ) {
                    continue;
                }
                let decision = self.schedule.should_run_task(task_type, scope_ref).await?;
                if !decision.should_run {
                    continue;
                }
                self.schedule.record_execution(task_type, scope_ref).await?;
                let task = self.build_scheduled_task(task_type, scope_ref).await;
                info!(task_type = %task_type, app = scope_ref.unwrap_or("_self"), "enqueued improvement task");
                enqueued.push(task.id.clone());
                self.tasks.append_system_tasks(&[task]).await?;
                break; // one per scope per tick
            }
        }

        if !enqueued.is_empty() {
            self.bus.publish(CosEvent::TasksChanged {
                source: "schedule".into(),
            });
        }
        Ok(enqueued)
    }

    /// Construct the task a schedule entry (or on-demand request) asks for,
    /// honoring the entry's prompt/model/provider overrides.
    pub(super) async fn build_scheduled_task(
        &self,
        task_type: &str,
        app_id: Option<&str>,
    ) -> Task {
        let entry = self.schedule.entry(task_type).await;
        let description = entry
            .as_ref()
            .and_then(|e| e.prompt.clone())
            .unwrap_or_else(|| match app_id {
                Some(app) => format!("Run {task_type} analysis for app {app}"),
                None => format!("Run {task_type} analysis"),
            });
        Task::system(
            description,
            TaskMetadata {
                app: app_id.map(String::from),
                analysis_type: Some(task_type.to_string()),
                model: entry.as_ref().and_then(|e| e.model.clone()),
                provider_id: entry.as_ref().and_then(|e| e.provider_id.clone()),
                ..TaskMetadata::default()
            },
        )
    }

    /// The idle-review fallback: alternate between reviewing the supervisor
    /// itself and reviewing the least-recently-touched app, falling back to
    /// self-improvement when no app qualifies.
    pub(super) async fn generate_idle_review_task(
        &self,
        snapshot: &CosState,
    ) -> Result<Task, OrchestratorError> {
        let stats = &snapshot.stats;
        let prefer_app = match (stats.last_self_improvement, stats.last_idle_review) {
            // Self ran more recently than any app review: apps' turn.
            (Some(self_at), Some(app_at)) => self_at >= app_at,
            (Some(_), None) => true,
            _ => false,
        };

        if prefer_app {
            let app = snapshot
                .config
                .enabled_apps()
                .map(|a| (a.to_string(), snapshot.last_completion_for_app(a)))
                .min_by_key(|(_, last)| last.unwrap_or(chrono::DateTime::<Utc>::MIN_UTC))
                .map(|(app, _)| app);
            if let Some(app) = app {
                let last = self.schedule.last_rotation_type(Some(&app)).await;
                if let Some((task_type, _)) = self
                    .schedule
                    .next_task_type(Some(&app), last.as_deref())
                    .await?
                {
                    self.schedule
                        .record_execution(&task_type, Some(&app))
                        .await?;
                    self.state
                        .mutate(|s| {
                            s.stats.last_idle_review = Some(Utc::now());
                            s.stats.last_self_improvement_type = Some("app".into());
                        })
                        .await?;
                    let mut task = self.build_scheduled_task(&task_type, Some(&app)).await;
                    task.metadata.review_type = Some("idle".into());
                    return Ok(task);
                }
            }
        }

        // Final fallback: the supervisor reviews itself.
        self.state
            .mutate(|s| {
                s.stats.last_self_improvement = Some(Utc::now());
                s.stats.last_self_improvement_type = Some("self".into());
            })
            .await?;
        Ok(Task::system(
            "Review the supervisor's recent decisions and improve a weak spot",
            TaskMetadata {
                review_type: Some("idle".into()),
                task_type: Some("self-improvement".into()),
                ..TaskMetadata::default()
            },
        ))
    }

    /// Dequeue at most one task after an agent completes: user pending
    /// first, then auto-approved system tasks outside their cooldown.
    pub async fn dequeue_next_task(&self) -> Result<Option<String>, OrchestratorError> {
        if self.is_stopped() {
            return Err(OrchestratorError::Stopped);
        }
        let snapshot = self.state.snapshot().await;
        if snapshot.paused {
            return Ok(None);
        }
        let mut admission = self.admission(&snapshot).await;

        let user_tasks = self.tasks.load_user_tasks().await.unwrap_or_default();
        for task in user_tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending && t.is_dispatchable())
        {
            if self.is_spawn_pending(&task.id).await {
                continue;
            }
            if admission.admit(task.metadata.project()).is_ok() {
                self.dispatch(task.clone(), "dequeue").await;
                return Ok(Some(task.id.clone()));
            }
        }

        let system_tasks = self.tasks.load_system_tasks().await.unwrap_or_default();
        for task in system_tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending && t.is_dispatchable())
        {
            if self.is_spawn_pending(&task.id).await {
                continue;
            }
            if self.active_app_cooldown(&snapshot, task).is_some() {
                continue;
            }
            if admission.admit(task.metadata.project()).is_ok() {
                self.dispatch(task.clone(), "dequeue").await;
                return Ok(Some(task.id.clone()));
            }
        }
        Ok(None)
    }

    /// When the task's app is inside its review cooldown, the instant the
    /// cooldown ends.
    fn active_app_cooldown(
        &self,
        snapshot: &CosState,
        task: &Task,
    ) -> Option<chrono::DateTime<Utc>> {
        let app = task.metadata.app.as_deref()?;
        let last = snapshot.last_completion_for_app(app)?;
        let until = last + Duration::milliseconds(snapshot.config.app_review_cooldown_ms as i64);
        (Utc::now() < until).then_some(until)
    }

    async fn note(&self, decision: EvaluationDecision) {
        debug!(reason = decision.reason.as_str(), "evaluation decision");
        self.decisions.record(decision.clone()).await;
        self.bus.publish(CosEvent::Status { decision });
    }

    async fn note_denied(&self, task: &Task, denied: AdmitDenied) {
        let decision = EvaluationDecision::new(DecisionReason::CapacityFull)
            .task_id(task.id.clone())
            .app(task.metadata.project().to_string());
        let decision = match denied {
            AdmitDenied::Global => decision.detail("global agent budget exhausted"),
            AdmitDenied::Project { limit } => decision.limit(limit),
        };
        self.note(decision).await;
    }

    /// Step 8: bump the evaluation counter and run the periodic cadences.
    async fn finish_tick(&self) -> Result<(), OrchestratorError> {
        let count = self
            .state
            .mutate(|s| {
                s.stats.evaluation_count += 1;
                s.stats.evaluation_count
            })
            .await?;

        if count % 10 == 0 {
            let snapshot = self.state.snapshot().await;
            info!(
                evaluations = count,
                tasks_completed = snapshot.stats.tasks_completed,
                agents_spawned = snapshot.stats.agents_spawned,
                errors = snapshot.stats.errors,
                "performance summary"
            );
        }
        if count % 20 == 0 {
            let recommendations = self.learning.recommendations().await;
            if !recommendations.is_empty() {
                self.bus
                    .publish(CosEvent::LearningRecommendations { recommendations });
            }
        }
        if count % 100 == 0 {
            let reset = self
                .learning
                .rehabilitation_sweep(self.rehabilitation_grace_ms())
                .await?;
            if !reset.is_empty() {
                info!(types = ?reset, "rehabilitation sweep reset task types");
            }
        }
        Ok(())
    }
}
