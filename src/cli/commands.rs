//! Command handlers for the operational CLI.

use anyhow::{Context, Result};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use console::style;
use std::sync::Arc;

use crate::adapters::{MarkdownTaskSource, NixProcessProbe, Pm2Client};
use crate::infrastructure::paths::DataPaths;
use crate::services::{
    AgentRegistry, EventBus, LearningStore, Orchestrator, ReportService, ScheduleStore, StateStore,
};

/// Wire the store stack up from a data directory.
async fn open_stores(
    paths: &DataPaths,
) -> Result<(Arc<StateStore>, Arc<LearningStore>, Arc<ScheduleStore>)> {
    let state = Arc::new(
        StateStore::open(paths)
            .await
            .context("Failed to open state store")?,
    );
    let learning = Arc::new(
        LearningStore::open(paths)
            .await
            .context("Failed to open learning store")?,
    );
    let schedule = Arc::new(
        ScheduleStore::open(paths, learning.clone())
            .await
            .context("Failed to open schedule store")?,
    );
    Ok((state, learning, schedule))
}

/// `cos run` - foreground daemon until ctrl-c.
pub async fn handle_run(paths: DataPaths) -> Result<()> {
    let (state, learning, schedule) = open_stores(&paths).await?;
    let bus = Arc::new(EventBus::with_defaults());
    let registry = Arc::new(AgentRegistry::new(state.clone(), paths.clone(), bus.clone()));
    let reports = Arc::new(ReportService::new(paths.clone()));
    let tasks = Arc::new(MarkdownTaskSource::new(
        paths.user_tasks_file(),
        paths.system_tasks_file(),
    ));

    let process_manager_bin = state.snapshot().await.config.process_manager_bin.clone();
    let orchestrator = Arc::new(
        Orchestrator::new(state, learning, schedule, registry, bus, reports)
            .with_task_source(tasks)
            .with_process_manager(Arc::new(Pm2Client::new(process_manager_bin)))
            .with_probe(Arc::new(NixProcessProbe)),
    );

    let runner = Arc::clone(&orchestrator);
    let handle = tokio::spawn(async move { runner.run().await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    eprintln!("{}", style("shutting down...").dim());
    orchestrator.stop();
    handle.await?.context("Orchestrator exited with error")?;
    Ok(())
}

/// `cos status` - render the persisted state.
pub async fn handle_status(paths: DataPaths, json: bool) -> Result<()> {
    let (state, _learning, schedule) = open_stores(&paths).await?;
    let snapshot = state.snapshot().await;
    let queue = schedule.pending_requests().await;

    if json {
        let out = serde_json::json!({
            "running": snapshot.running,
            "paused": snapshot.paused,
            "pauseReason": snapshot.pause_reason,
            "stats": snapshot.stats,
            "agents": snapshot.agents,
            "onDemandQueue": queue,
            "health": snapshot.health,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let run_state = if snapshot.paused {
        style("paused").yellow()
    } else if snapshot.running {
        style("running").green()
    } else {
        style("stopped").red()
    };
    println!("state: {run_state}");
    if let Some(reason) = &snapshot.pause_reason {
        println!("pause reason: {reason}");
    }
    println!(
        "completed: {}  spawned: {}  errors: {}  evaluations: {}",
        snapshot.stats.tasks_completed,
        snapshot.stats.agents_spawned,
        snapshot.stats.errors,
        snapshot.stats.evaluation_count,
    );
    if !queue.is_empty() {
        println!("on-demand queue: {}", queue.len());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["agent", "task", "status", "app", "tier", "started"]);
    for agent in snapshot.agents.values() {
        table.add_row(vec![
            agent.id.clone(),
            agent.task_id.clone(),
            agent.status.as_str().to_string(),
            agent.metadata.project().to_string(),
            agent.model_tier.as_str().to_string(),
            agent.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]);
    }
    if table.row_iter().next().is_some() {
        println!("{table}");
    } else {
        println!("{}", style("no agents tracked").dim());
    }
    Ok(())
}

/// `cos trigger` - queue an on-demand request.
pub async fn handle_trigger(
    paths: DataPaths,
    task_type: &str,
    app: Option<String>,
    json: bool,
) -> Result<()> {
    let (_state, _learning, schedule) = open_stores(&paths).await?;
    let request = schedule
        .trigger(task_type, app)
        .await
        .context("Failed to queue on-demand request")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&request)?);
    } else {
        println!(
            "queued {} for {} (request {})",
            style(&request.task_type).cyan(),
            request.app_id.as_deref().unwrap_or("_self"),
            request.id,
        );
    }
    Ok(())
}

/// `cos pause` - flip the persisted pause flag.
pub async fn handle_pause(paths: DataPaths, reason: Option<String>) -> Result<()> {
    let (state, _learning, _schedule) = open_stores(&paths).await?;
    let reason_clone = reason.clone();
    state
        .mutate(move |s| {
            s.paused = true;
            s.paused_at = Some(chrono::Utc::now());
            s.pause_reason = reason_clone;
        })
        .await?;
    println!("{}", style("paused").yellow());
    Ok(())
}

/// `cos resume` - clear the persisted pause flag.
pub async fn handle_resume(paths: DataPaths) -> Result<()> {
    let (state, _learning, _schedule) = open_stores(&paths).await?;
    state
        .mutate(|s| {
            s.paused = false;
            s.paused_at = None;
            s.pause_reason = None;
        })
        .await?;
    println!("{}", style("resumed").green());
    Ok(())
}
