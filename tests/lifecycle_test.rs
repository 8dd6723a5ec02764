//! Completion routing through the running event loop: learning, reports,
//! and task-file updates all fire off one `agent:completed` event.

mod common;

use chrono::Utc;
use common::harness;
use cos::domain::models::{
    AgentRecord, AgentResult, ErrorAnalysis, ErrorCategory, ModelTier, TaskMetadata, TaskStatus,
};
use cos::domain::ports::{SpawnerHandle, TaskSource};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn completion_feeds_learning_reports_and_task_files() {
    let h = harness().await;
    h.exhaust_scheduled_entries().await;
    h.write_user_tasks("- [~] task-t1 Ship the newsletter\n").await;

    let runner = Arc::clone(&h.orchestrator);
    let loop_handle = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let record = AgentRecord::new("agent-1", "task-t1")
        .with_metadata(TaskMetadata {
            analysis_type: Some("security".into()),
            ..TaskMetadata::default()
        })
        .with_model_tier(ModelTier::Medium);
    h.registry.register_agent(record).await.unwrap();
    h.registry
        .complete_agent("agent-1", AgentResult::success(2_500))
        .await
        .unwrap();

    // Give the loop a moment to route the completion.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let learning = h.learning.snapshot().await;
    let bucket = learning
        .by_task_type
        .get("task:security")
        .expect("completion was classified and recorded");
    assert_eq!(bucket.completed, 1);
    assert_eq!(bucket.succeeded, 1);
    assert_eq!(learning.by_model_tier["medium"].completed, 1);

    let date = Utc::now().format("%Y-%m-%d").to_string();
    let report_path = h.paths.report_file(&date);
    assert!(report_path.exists(), "daily report was written");

    let tasks = h.tasks.load_user_tasks().await.unwrap();
    assert_eq!(tasks[0].status, TaskStatus::Completed);

    h.orchestrator.stop();
    let _ = loop_handle.await.unwrap();
}

#[tokio::test]
async fn terminate_signals_the_spawner() {
    let h = harness().await;
    h.running_agent("agent-1", "task-t1", None).await;
    h.spawner.track("agent-1");

    let mut rx = h.bus.subscribe();
    h.orchestrator.terminate_agent("agent-1").await.unwrap();

    // The spawner was asked to kill it and the terminate event went out.
    assert!(h.spawner.active_agent_ids().await.is_empty());
    let events = common::drain_events(&mut rx);
    assert!(events.iter().any(|e| e.event.topic() == "agent:terminate"));

    assert!(h.orchestrator.terminate_agent("ghost").await.is_err());
}

#[tokio::test]
async fn failed_completion_marks_task_failed_and_counts_error() {
    let h = harness().await;
    h.exhaust_scheduled_entries().await;
    h.write_user_tasks("- [~] task-t1 Flaky thing\n").await;

    let runner = Arc::clone(&h.orchestrator);
    let loop_handle = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    h.registry
        .register_agent(AgentRecord::new("agent-1", "task-t1"))
        .await
        .unwrap();
    h.registry
        .complete_agent(
            "agent-1",
            AgentResult::failure(800, ErrorAnalysis::new(ErrorCategory::Timeout, "hung")),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    let tasks = h.tasks.load_user_tasks().await.unwrap();
    assert_eq!(tasks[0].status, TaskStatus::Failed);
    assert_eq!(h.state.snapshot().await.stats.errors, 1);

    let learning = h.learning.snapshot().await;
    assert_eq!(learning.error_patterns["timeout"].count, 1);

    h.orchestrator.stop();
    let _ = loop_handle.await.unwrap();
}
