//! End-to-end evaluation scenarios driven through the full store stack.

mod common;

use chrono::{Duration, Utc};
use common::{drain_events, harness, task_ready_ids};
use cos::domain::models::{DecisionReason, Task, TaskMetadata, TaskStatus};
use cos::domain::ports::TaskSource;
use cos::services::event_bus::CosEvent;

#[tokio::test]
async fn cooldown_respected_for_app_system_tasks() {
    let h = harness().await;

    // App a1 had an agent complete one minute ago.
    h.running_agent("agent-old", "task-old", Some("a1")).await;
    h.registry
        .complete_agent("agent-old", cos::domain::models::AgentResult::success(5_000))
        .await
        .unwrap();

    // An auto-approved system task targets a1.
    let task = Task::system(
        "review a1",
        TaskMetadata {
            app: Some("a1".into()),
            analysis_type: Some("code-quality".into()),
            ..TaskMetadata::default()
        },
    );
    let task_id = task.id.clone();
    h.tasks.append_system_tasks(&[task]).await.unwrap();

    let mut rx = h.bus.subscribe();
    let outcome = h.orchestrator.evaluate().await.unwrap();
    assert!(outcome.dispatched.is_empty());
    assert!(!task_ready_ids(&drain_events(&mut rx)).contains(&task_id));

    let decisions = h.orchestrator.decisions().recent(50).await;
    let cooldown = decisions
        .iter()
        .find(|d| d.reason == DecisionReason::CooldownActive)
        .expect("a cooldown decision is recorded");
    assert_eq!(cooldown.app.as_deref(), Some("a1"));
    assert_eq!(cooldown.cooldown_ms, Some(1_800_000));

    // Thirty minutes later the same evaluation dispatches it.
    h.state
        .mutate(|s| {
            for agent in s.agents.values_mut() {
                agent.completed_at = Some(Utc::now() - Duration::milliseconds(1_800_001));
            }
        })
        .await
        .unwrap();

    let mut rx = h.bus.subscribe();
    let outcome = h.orchestrator.evaluate().await.unwrap();
    assert!(outcome.dispatched.contains(&task_id));
    assert!(task_ready_ids(&drain_events(&mut rx)).contains(&task_id));
}

#[tokio::test]
async fn per_project_cap_defers_only_the_saturated_project() {
    let h = harness().await;

    // Two agents already running against a1 (global cap 3, per-project 2).
    h.running_agent("agent-1", "task-r1", Some("a1")).await;
    h.running_agent("agent-2", "task-r2", Some("a1")).await;

    h.write_user_tasks(
        "- [ ] task-t1 Polish the a1 dashboard\n  app=a1\n- [ ] task-t2 Tidy the home office\n",
    )
    .await;

    let mut rx = h.bus.subscribe();
    let outcome = h.orchestrator.evaluate().await.unwrap();

    assert_eq!(outcome.dispatched, vec!["task-t2".to_string()]);
    assert_eq!(task_ready_ids(&drain_events(&mut rx)), vec!["task-t2"]);

    let decisions = h.orchestrator.decisions().recent(50).await;
    let deferred = decisions
        .iter()
        .find(|d| d.reason == DecisionReason::CapacityFull && d.task_id.as_deref() == Some("task-t1"))
        .expect("the saturated project leaves a capacity decision");
    assert_eq!(deferred.app.as_deref(), Some("a1"));
    assert_eq!(deferred.limit, Some(2));
}

#[tokio::test]
async fn global_capacity_exhaustion_records_one_decision() {
    let h = harness().await;
    h.running_agent("agent-1", "task-r1", Some("a1")).await;
    h.running_agent("agent-2", "task-r2", Some("a2")).await;
    h.running_agent("agent-3", "task-r3", None).await;

    h.write_user_tasks("- [ ] task-t1 Anything at all\n").await;

    let outcome = h.orchestrator.evaluate().await.unwrap();
    assert!(outcome.dispatched.is_empty());

    let decisions = h.orchestrator.decisions().recent(50).await;
    assert!(decisions
        .iter()
        .any(|d| d.reason == DecisionReason::CapacityFull && d.limit == Some(3)));
}

#[tokio::test]
async fn on_demand_precedes_user_tasks_and_records_execution() {
    let h = harness().await;

    h.running_agent("agent-1", "task-r1", Some("b1")).await;
    h.running_agent("agent-2", "task-r2", Some("b2")).await;

    h.write_user_tasks("- [ ] task-t1 Write the weekly update\n").await;
    h.schedule.trigger("security", Some("a2".into())).await.unwrap();

    let mut rx = h.bus.subscribe();
    let outcome = h.orchestrator.evaluate().await.unwrap();

    // One slot was available; the on-demand request consumed it first.
    assert_eq!(outcome.dispatched.len(), 1);
    let ready = drain_events(&mut rx);
    let tasks: Vec<&Task> = ready
        .iter()
        .filter_map(|e| match &e.event {
            CosEvent::TaskReady { task } => Some(task),
            _ => None,
        })
        .collect();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].metadata.app.as_deref(), Some("a2"));
    assert_eq!(tasks[0].metadata.analysis_type.as_deref(), Some("security"));
    assert!(tasks[0].description.contains("a2"));

    // The request is consumed and the execution recorded per-app.
    assert!(h.schedule.pending_requests().await.is_empty());
    let doc = h.schedule.snapshot().await;
    assert_eq!(doc.executions["task:security"].per_app["a2"].count, 1);
}

#[tokio::test]
async fn idle_evaluation_records_exactly_one_idle_decision() {
    let h = harness().await;
    h.exhaust_scheduled_entries().await;

    let mut rx = h.bus.subscribe();
    let outcome = h.orchestrator.evaluate().await.unwrap();

    // Zero agents, zero tasks: no task:ready, one idle decision, and the
    // generated self-improvement task is queued for the next tick.
    assert!(outcome.dispatched.is_empty());
    assert_eq!(outcome.enqueued.len(), 1);
    assert!(task_ready_ids(&drain_events(&mut rx)).is_empty());

    let decisions = h.orchestrator.decisions().recent(50).await;
    let idle: Vec<_> = decisions
        .iter()
        .filter(|d| d.reason == DecisionReason::Idle)
        .collect();
    assert_eq!(idle.len(), 1);

    let stats = h.state.snapshot().await.stats.clone();
    assert!(stats.last_self_improvement.is_some());
    assert_eq!(stats.last_self_improvement_type.as_deref(), Some("self"));

    // The next tick picks the queued idle task up as a system task.
    let mut rx = h.bus.subscribe();
    let outcome = h.orchestrator.evaluate().await.unwrap();
    assert_eq!(outcome.dispatched.len(), 1);
    assert_eq!(task_ready_ids(&drain_events(&mut rx)).len(), 1);
}

#[tokio::test]
async fn improvement_tasks_enqueue_only_without_user_pending() {
    let h = harness().await;

    // With a pending user task, nothing is enqueued.
    h.write_user_tasks("- [ ] task-t1 Answer the mail\n").await;
    let outcome = h.orchestrator.evaluate().await.unwrap();
    assert!(outcome.enqueued.is_empty());

    // Clear the user queue; the first due scheduled entry gets enqueued and
    // its execution recorded immediately.
    h.write_user_tasks("").await;
    let outcome = h.orchestrator.evaluate().await.unwrap();
    assert_eq!(outcome.enqueued.len(), 1);
    let doc = h.schedule.snapshot().await;
    assert_eq!(doc.executions["task:dependencies"].count, 1);

    // The enqueued task is waiting in the system file.
    let system = h.tasks.load_system_tasks().await.unwrap();
    assert_eq!(system.len(), 1);
    assert_eq!(
        system[0].metadata.analysis_type.as_deref(),
        Some("dependencies")
    );
}

#[tokio::test]
async fn paused_supervisor_dispatches_nothing() {
    let h = harness().await;
    h.write_user_tasks("- [ ] task-t1 Anything\n").await;
    h.orchestrator.pause(Some("test".into())).await.unwrap();

    let mut rx = h.bus.subscribe();
    let outcome = h.orchestrator.evaluate().await.unwrap();
    assert!(outcome.dispatched.is_empty());
    assert!(task_ready_ids(&drain_events(&mut rx)).is_empty());
}

#[tokio::test]
async fn immediate_spawn_honors_caps() {
    let h = harness().await;

    let task = Task {
        id: "task-fresh".into(),
        description: "Just added".into(),
        priority: Default::default(),
        status: TaskStatus::Pending,
        origin: cos::domain::models::TaskOrigin::User,
        approval_required: false,
        auto_approved: false,
        metadata: TaskMetadata::default(),
        created_at: Utc::now(),
    };
    assert!(h.orchestrator.notify_task_added(&task).await.unwrap());

    // The same task is now pending-spawn; a duplicate add does not
    // double-dispatch, and a saturated project refuses.
    h.running_agent("agent-1", "task-r1", Some("a1")).await;
    h.running_agent("agent-2", "task-r2", Some("a1")).await;
    let crowded = Task {
        id: "task-crowded".into(),
        metadata: TaskMetadata {
            app: Some("a1".into()),
            ..TaskMetadata::default()
        },
        ..task.clone()
    };
    assert!(!h.orchestrator.notify_task_added(&crowded).await.unwrap());
}

#[tokio::test]
async fn dequeue_after_completion_dispatches_at_most_one() {
    let h = harness().await;
    h.write_user_tasks(
        "- [ ] task-t1 First in line\n- [ ] task-t2 Second in line\n",
    )
    .await;

    let dispatched = h.orchestrator.dequeue_next_task().await.unwrap();
    assert_eq!(dispatched.as_deref(), Some("task-t1"));

    // The first is still awaiting its spawner ack, so the next dequeue
    // picks the second, not the first again.
    let dispatched = h.orchestrator.dequeue_next_task().await.unwrap();
    assert_eq!(dispatched.as_deref(), Some("task-t2"));
}

#[tokio::test]
async fn approval_gated_tasks_are_not_dispatched() {
    let h = harness().await;
    h.write_user_tasks("- [ ] task-t1 Wire money somewhere !approval\n").await;

    let outcome = h.orchestrator.evaluate().await.unwrap();
    assert!(outcome.dispatched.is_empty());
}
