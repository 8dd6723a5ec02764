//! Common test utilities for integration tests
//!
//! Provides shared fixtures, helpers, and test utilities used across
//! multiple integration test files.
#![allow(dead_code)]

use std::sync::Arc;
use tempfile::TempDir;

use cos::adapters::process::{ProcessProbe, StubProbe};
use cos::adapters::MarkdownTaskSource;
use cos::domain::models::{AgentRecord, TaskMetadata};
use cos::domain::ports::StubSpawner;
use cos::infrastructure::paths::DataPaths;
use cos::services::event_bus::{CosEvent, EventEnvelope};
use cos::services::{
    AgentRegistry, EventBus, LearningStore, Orchestrator, ReportService, ScheduleStore, StateStore,
};

/// A fully wired supervisor over a temp directory, with stub collaborators.
pub struct Harness {
    pub dir: TempDir,
    pub paths: DataPaths,
    pub state: Arc<StateStore>,
    pub learning: Arc<LearningStore>,
    pub schedule: Arc<ScheduleStore>,
    pub registry: Arc<AgentRegistry>,
    pub bus: Arc<EventBus>,
    pub spawner: Arc<StubSpawner>,
    pub tasks: Arc<MarkdownTaskSource>,
    pub orchestrator: Arc<Orchestrator>,
}

pub async fn harness() -> Harness {
    harness_with_probe(Arc::new(StubProbe::default())).await
}

pub async fn harness_with_probe(probe: Arc<dyn ProcessProbe>) -> Harness {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let paths = DataPaths::new(dir.path());
    let state = Arc::new(StateStore::open(&paths).await.unwrap());
    let learning = Arc::new(LearningStore::open(&paths).await.unwrap());
    let schedule = Arc::new(ScheduleStore::open(&paths, learning.clone()).await.unwrap());
    let bus = Arc::new(EventBus::with_defaults());
    let registry = Arc::new(AgentRegistry::new(state.clone(), paths.clone(), bus.clone()));
    let reports = Arc::new(ReportService::new(paths.clone()));
    let tasks = Arc::new(MarkdownTaskSource::new(
        paths.user_tasks_file(),
        paths.system_tasks_file(),
    ));
    let spawner = Arc::new(StubSpawner::default());

    let orchestrator = Arc::new(
        Orchestrator::new(
            state.clone(),
            learning.clone(),
            schedule.clone(),
            registry.clone(),
            bus.clone(),
            reports,
        )
        .with_task_source(tasks.clone())
        .with_spawner(spawner.clone())
        .with_probe(probe),
    );

    Harness {
        dir,
        paths,
        state,
        learning,
        schedule,
        registry,
        bus,
        spawner,
        tasks,
        orchestrator,
    }
}

impl Harness {
    /// Write the user task file verbatim.
    pub async fn write_user_tasks(&self, content: &str) {
        tokio::fs::write(self.paths.user_tasks_file(), content)
            .await
            .unwrap();
    }

    /// Register a running agent owning `task_id`, optionally scoped to an
    /// app, and return its record.
    pub async fn running_agent(
        &self,
        agent_id: &str,
        task_id: &str,
        app: Option<&str>,
    ) -> AgentRecord {
        let record = AgentRecord::new(agent_id, task_id).with_metadata(TaskMetadata {
            app: app.map(String::from),
            ..TaskMetadata::default()
        });
        self.registry.register_agent(record).await.unwrap()
    }

    /// Mark every scheduled (daily/weekly/once) default entry as executed so
    /// nothing is due. Rotation and on-demand entries are untouched.
    pub async fn exhaust_scheduled_entries(&self) {
        for key in ["triage", "security", "dependencies", "repo-baseline"] {
            self.schedule.record_execution(key, None).await.unwrap();
        }
    }
}

/// Drain every buffered event from a subscription, non-blocking.
pub fn drain_events(
    rx: &mut tokio::sync::broadcast::Receiver<EventEnvelope>,
) -> Vec<EventEnvelope> {
    let mut out = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        out.push(envelope);
    }
    out
}

/// The task ids of every `task:ready` event in a drained batch.
pub fn task_ready_ids(events: &[EventEnvelope]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match &e.event {
            CosEvent::TaskReady { task } => Some(task.id.clone()),
            _ => None,
        })
        .collect()
}
