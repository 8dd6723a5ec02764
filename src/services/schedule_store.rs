//! Schedule store (`cos/task-schedule.json`).
//!
//! Owns the per-type interval policy, execution history, per-app overrides,
//! and the on-demand queue, and answers the one question the evaluator asks:
//! should this task type run now, in this scope?

use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::domain::error::ScheduleError;
use crate::domain::models::{
    execution_key, migrate_v1, IntervalType, OnDemandRequest, ScheduleDocument, ScheduleEntry,
    V1ScheduleDocument, SCHEDULE_VERSION,
};
use crate::infrastructure::fsio;
use crate::infrastructure::paths::DataPaths;
use crate::services::learning_store::LearningStore;

/// Why `should_run_task` answered the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleReason {
    Disabled,
    DisabledForApp,
    Rotation,
    Due,
    Cooldown,
    FirstRun,
    OnceCompleted,
    OnDemandOnly,
    SkipFailing,
}

impl ScheduleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::DisabledForApp => "disabled-for-app",
            Self::Rotation => "rotation",
            Self::Due => "due",
            Self::Cooldown => "cooldown",
            Self::FirstRun => "first-run",
            Self::OnceCompleted => "once-completed",
            Self::OnDemandOnly => "on-demand-only",
            Self::SkipFailing => "skip-failing",
        }
    }
}

/// Eligibility verdict for one (task type, scope) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleDecision {
    pub should_run: bool,
    pub reason: ScheduleReason,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl ScheduleDecision {
    fn yes(reason: ScheduleReason) -> Self {
        Self {
            should_run: true,
            reason,
            next_run_at: None,
        }
    }

    fn no(reason: ScheduleReason) -> Self {
        Self {
            should_run: false,
            reason,
            next_run_at: None,
        }
    }
}

/// Which branch of `next_task_type` produced the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextReason {
    DailyDue,
    WeeklyDue,
    OnceDue,
    Rotation,
}

impl NextReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DailyDue => "daily-due",
            Self::WeeklyDue => "weekly-due",
            Self::OnceDue => "once-due",
            Self::Rotation => "rotation",
        }
    }
}

pub struct ScheduleStore {
    path: PathBuf,
    lock: Mutex<()>,
    cache: RwLock<Arc<ScheduleDocument>>,
    learning: Arc<LearningStore>,
}

impl ScheduleStore {
    /// Load the document, migrating v1 files in place and seeding any
    /// missing well-known entries, then write the result back.
    pub async fn open(
        paths: &DataPaths,
        learning: Arc<LearningStore>,
    ) -> Result<Self, ScheduleError> {
        let path = paths.schedule_file();
        let doc = match fsio::read_raw(&path).await? {
            None => ScheduleDocument::default(),
            Some(raw) => Self::parse(raw)?,
        };
        let mut doc = doc;
        Self::seed_missing_entries(&mut doc);
        doc.last_updated = Some(Utc::now());
        fsio::write_atomic(&path, &doc).await?;
        info!(
            path = %path.display(),
            entries = doc.tasks.len(),
            queued = doc.on_demand_queue.len(),
            "schedule store opened"
        );
        Ok(Self {
            path,
            lock: Mutex::new(()),
            cache: RwLock::new(Arc::new(doc)),
            learning,
        })
    }

    fn parse(raw: serde_json::Value) -> Result<ScheduleDocument, ScheduleError> {
        let version = raw.get("version").and_then(serde_json::Value::as_u64).unwrap_or(1);
        let is_v1 = version < u64::from(SCHEDULE_VERSION)
            || raw.get("selfImprovement").is_some()
            || raw.get("appImprovement").is_some();
        if is_v1 {
            let v1: V1ScheduleDocument = serde_json::from_value(raw)
                .map_err(crate::domain::error::StateError::Serialize)?;
            let doc = migrate_v1(v1);
            info!(
                entries = doc.tasks.len(),
                "migrated schedule document v1 -> v2"
            );
            Ok(doc)
        } else {
            let doc: ScheduleDocument = serde_json::from_value(raw)
                .map_err(crate::domain::error::StateError::Serialize)?;
            Ok(doc)
        }
    }

    /// Exactly one entry per well-known task type: fill in any the document
    /// is missing, without touching entries it already has.
    fn seed_missing_entries(doc: &mut ScheduleDocument) {
        let defaults = ScheduleDocument::default();
        for (key, entry) in defaults.tasks {
            doc.tasks.entry(key).or_insert(entry);
        }
    }

    pub async fn snapshot(&self) -> Arc<ScheduleDocument> {
        self.cache.read().await.clone()
    }

    pub async fn entry(&self, task_type: &str) -> Option<ScheduleEntry> {
        self.snapshot().await.tasks.get(task_type).cloned()
    }

    /// Eligibility for one task type, optionally scoped to an app.
    pub async fn should_run_task(
        &self,
        task_type: &str,
        app_id: Option<&str>,
    ) -> Result<ScheduleDecision, ScheduleError> {
        let doc = self.snapshot().await;
        let entry = doc
            .tasks
            .get(task_type)
            .ok_or_else(|| ScheduleError::UnknownTaskType(task_type.to_string()))?;

        if !entry.enabled {
            return Ok(ScheduleDecision::no(ScheduleReason::Disabled));
        }
        if let Some(app) = app_id {
            if entry.disabled_for_app(app) {
                return Ok(ScheduleDecision::no(ScheduleReason::DisabledForApp));
            }
        }

        let effective = entry.effective_interval_type(app_id);
        let bucket = doc.execution(task_type);
        let (last_run, count) = match app_id {
            Some(app) => {
                let per_app = bucket.for_app(app);
                (per_app.last_run, per_app.count)
            }
            None => (bucket.last_run, bucket.count),
        };

        match effective {
            IntervalType::Rotation => Ok(ScheduleDecision::yes(ScheduleReason::Rotation)),
            IntervalType::Daily | IntervalType::Weekly | IntervalType::Custom => {
                let adjustment = self
                    .learning
                    .cooldown_adjustment(&execution_key(task_type))
                    .await;
                if adjustment.skip {
                    return Ok(ScheduleDecision::no(ScheduleReason::SkipFailing));
                }
                let base = entry.base_interval_ms();
                let adjusted_ms = (base as f64 * adjustment.multiplier) as i64;
                match last_run {
                    None => Ok(ScheduleDecision::yes(ScheduleReason::Due)),
                    Some(last) => {
                        let due_at = last + Duration::milliseconds(adjusted_ms);
                        if Utc::now() >= due_at {
                            Ok(ScheduleDecision::yes(ScheduleReason::Due))
                        } else {
                            Ok(ScheduleDecision {
                                should_run: false,
                                reason: ScheduleReason::Cooldown,
                                next_run_at: Some(due_at),
                            })
                        }
                    }
                }
            }
            IntervalType::Once => {
                if count == 0 {
                    Ok(ScheduleDecision::yes(ScheduleReason::FirstRun))
                } else {
                    Ok(ScheduleDecision::no(ScheduleReason::OnceCompleted))
                }
            }
            IntervalType::OnDemand => Ok(ScheduleDecision::no(ScheduleReason::OnDemandOnly)),
        }
    }

    /// Next task type for a scope, by priority: daily due, weekly due, once
    /// due, then the rotation successor of `last_type`.
    pub async fn next_task_type(
        &self,
        app_id: Option<&str>,
        last_type: Option<&str>,
    ) -> Result<Option<(String, NextReason)>, ScheduleError> {
        let doc = self.snapshot().await;

        for (interval, reason) in [
            (IntervalType::Daily, NextReason::DailyDue),
            (IntervalType::Weekly, NextReason::WeeklyDue),
            (IntervalType::Once, NextReason::OnceDue),
        ] {
            for (key, entry) in &doc.tasks {
                if entry.effective_interval_type(app_id) != interval {
                    continue;
                }
                if self.should_run_task(key, app_id).await?.should_run {
                    return Ok(Some((key.clone(), reason)));
                }
            }
        }

        let rotation: Vec<&String> = doc
            .rotation_entries()
            .filter(|(_, e)| app_id.map_or(true, |a| !e.disabled_for_app(a)))
            .map(|(key, _)| key)
            .collect();
        if rotation.is_empty() {
            return Ok(None);
        }
        let next = match last_type {
            Some(last) => rotation
                .iter()
                .position(|key| key.as_str() == last)
                .map_or(rotation[0], |i| rotation[(i + 1) % rotation.len()]),
            None => rotation[0],
        };
        Ok(Some((next.clone(), NextReason::Rotation)))
    }

    /// The rotation entry that ran most recently in this scope, used as the
    /// rotation cursor across restarts.
    pub async fn last_rotation_type(&self, app_id: Option<&str>) -> Option<String> {
        let doc = self.snapshot().await;
        doc.rotation_entries()
            .filter_map(|(key, _)| {
                let bucket = doc.execution(key);
                let last = match app_id {
                    Some(app) => bucket.for_app(app).last_run,
                    None => bucket.last_run,
                };
                last.map(|at| (key.clone(), at))
            })
            .max_by_key(|(_, at)| *at)
            .map(|(key, _)| key)
    }

    /// Record one execution of a task type, optionally scoped to an app.
    pub async fn record_execution(
        &self,
        task_type: &str,
        app_id: Option<&str>,
    ) -> Result<(), ScheduleError> {
        let now = Utc::now();
        self.mutate(|doc| {
            let bucket = doc.executions.entry(execution_key(task_type)).or_default();
            bucket.last_run = Some(now);
            bucket.count += 1;
            if let Some(app) = app_id {
                let per_app = bucket.per_app.entry(app.to_string()).or_default();
                per_app.last_run = Some(now);
                per_app.count += 1;
            }
        })
        .await?;
        debug!(task_type, app = app_id.unwrap_or("_self"), "recorded execution");
        Ok(())
    }

    /// Append an on-demand request.
    pub async fn trigger(
        &self,
        task_type: &str,
        app_id: Option<String>,
    ) -> Result<OnDemandRequest, ScheduleError> {
        let known = self.snapshot().await.tasks.contains_key(task_type);
        if !known {
            return Err(ScheduleError::UnknownTaskType(task_type.to_string()));
        }
        let request = OnDemandRequest::new(task_type, app_id);
        let out = request.clone();
        self.mutate(move |doc| doc.on_demand_queue.push(request)).await?;
        Ok(out)
    }

    /// Remove one on-demand request by id.
    pub async fn clear_request(&self, id: &str) -> Result<(), ScheduleError> {
        let id = id.to_string();
        let removed = self
            .mutate(move |doc| {
                let before = doc.on_demand_queue.len();
                doc.on_demand_queue.retain(|r| r.id != id);
                before != doc.on_demand_queue.len()
            })
            .await?;
        if removed {
            Ok(())
        } else {
            Err(ScheduleError::RequestNotFound("request not in queue".into()))
        }
    }

    pub async fn pending_requests(&self) -> Vec<OnDemandRequest> {
        self.snapshot().await.on_demand_queue.clone()
    }

    /// Serialized read-modify-write against the schedule file.
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut ScheduleDocument) -> T + Send,
    ) -> Result<T, ScheduleError> {
        let _guard = self.lock.lock().await;
        let mut doc: ScheduleDocument = fsio::read_or_default(&self.path).await?;
        Self::seed_missing_entries(&mut doc);
        let out = f(&mut doc);
        doc.last_updated = Some(Utc::now());
        fsio::write_atomic(&self.path, &doc).await?;
        *self.cache.write().await = Arc::new(doc);
        Ok(out)
    }
}
