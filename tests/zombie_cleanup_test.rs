//! Zombie sweep behavior against stubbed process tracking.

mod common;

use chrono::{Duration, Utc};
use common::{drain_events, harness, harness_with_probe};
use cos::adapters::process::StubProbe;
use cos::domain::models::AgentStatus;
use cos::domain::ports::TaskSource;
use cos::services::event_bus::CosEvent;
use std::sync::Arc;

#[tokio::test]
async fn dead_pid_untracked_agent_is_reaped() {
    // pid 42 is dead as far as the probe is concerned.
    let h = harness_with_probe(Arc::new(StubProbe::alive([]))).await;

    h.running_agent("agent-a", "task-a", None).await;
    h.registry
        .update_agent(
            "agent-a",
            cos::services::AgentPatch {
                pid: Some(42),
                model_tier: None,
            },
        )
        .await
        .unwrap();
    // Old enough that nothing is "still initializing".
    h.state
        .mutate(|s| {
            if let Some(agent) = s.agents.get_mut("agent-a") {
                agent.started_at = Utc::now() - Duration::seconds(45);
            }
        })
        .await
        .unwrap();

    let mut rx = h.bus.subscribe();
    let reaped = h.orchestrator.cleanup_zombies().await;
    assert_eq!(reaped, vec!["agent-a".to_string()]);

    let agent = h.registry.get("agent-a").await.unwrap();
    assert_eq!(agent.status, AgentStatus::Completed);
    let result = agent.result.unwrap();
    assert!(!result.success);
    assert!(result.error.unwrap().message.contains("42"));

    let events = drain_events(&mut rx);
    assert!(events.iter().any(|e| matches!(
        &e.event,
        CosEvent::AgentsChanged { action } if action == "zombie-cleanup"
    )));
}

#[tokio::test]
async fn live_pid_is_never_demoted() {
    let h = harness_with_probe(Arc::new(StubProbe::alive([77]))).await;

    h.running_agent("agent-b", "task-b", None).await;
    h.registry
        .update_agent(
            "agent-b",
            cos::services::AgentPatch {
                pid: Some(77),
                model_tier: None,
            },
        )
        .await
        .unwrap();
    h.state
        .mutate(|s| {
            if let Some(agent) = s.agents.get_mut("agent-b") {
                agent.started_at = Utc::now() - Duration::hours(6);
            }
        })
        .await
        .unwrap();

    assert!(h.orchestrator.cleanup_zombies().await.is_empty());
    assert!(h.registry.get("agent-b").await.unwrap().is_running());
}

#[tokio::test]
async fn spawner_tracked_agent_survives_without_pid() {
    let h = harness().await;
    h.running_agent("agent-c", "task-c", None).await;
    h.state
        .mutate(|s| {
            if let Some(agent) = s.agents.get_mut("agent-c") {
                agent.started_at = Utc::now() - Duration::seconds(120);
            }
        })
        .await
        .unwrap();
    h.spawner.track("agent-c");

    assert!(h.orchestrator.cleanup_zombies().await.is_empty());

    // Once the spawner drops it, the pid-less record past its grace window
    // is reaped.
    h.spawner.untrack("agent-c");
    assert_eq!(
        h.orchestrator.cleanup_zombies().await,
        vec!["agent-c".to_string()]
    );
}

#[tokio::test]
async fn fresh_pidless_agent_gets_startup_grace() {
    let h = harness().await;
    h.running_agent("agent-d", "task-d", None).await;

    // Registered seconds ago with no pid: still initializing.
    assert!(h.orchestrator.cleanup_zombies().await.is_empty());
    assert!(h.registry.get("agent-d").await.unwrap().is_running());
}

#[tokio::test]
async fn orphaned_in_progress_tasks_reset_to_pending() {
    let h = harness().await;
    h.write_user_tasks("- [~] task-t1 Halfway through something\n").await;

    let reset = h.orchestrator.reset_orphaned_tasks().await.unwrap();
    assert_eq!(reset, 1);

    let tasks = h.tasks.load_user_tasks().await.unwrap();
    assert_eq!(tasks[0].status, cos::domain::models::TaskStatus::Pending);

    // A task owned by a live agent is left alone.
    h.write_user_tasks("- [~] task-t2 Being worked on\n").await;
    h.running_agent("agent-e", "task-t2", None).await;
    assert_eq!(h.orchestrator.reset_orphaned_tasks().await.unwrap(), 0);
}
