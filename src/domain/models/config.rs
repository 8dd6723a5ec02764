//! Orchestration configuration persisted inside the state envelope.
//!
//! These knobs travel with `cos/state.json` so every component of the
//! platform reads the same values. Serde defaults double as the merge layer:
//! a document written by an older version gains new keys on load.

use serde::{Deserialize, Serialize};

/// A project the supervisor watches and reviews.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Stable app id, matches `metadata.app` on tasks.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Orchestration knobs, merged with defaults on every load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CosConfig {
    /// Global cap on simultaneously running agents.
    #[serde(default = "default_max_concurrent_agents")]
    pub max_concurrent_agents: usize,

    /// Cap on simultaneously running agents per project (`metadata.app`).
    #[serde(default = "default_max_concurrent_agents_per_project")]
    pub max_concurrent_agents_per_project: usize,

    /// Evaluation tick interval.
    #[serde(default = "default_evaluation_interval_ms")]
    pub evaluation_interval_ms: u64,

    /// Health-check tick interval.
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,

    /// Minimum gap between two agent runs against the same app.
    #[serde(default = "default_app_review_cooldown_ms")]
    pub app_review_cooldown_ms: u64,

    /// When enabled, mission-driven tasks are dispatched at P3.
    #[serde(default)]
    pub proactive_mode: bool,

    /// Process-manager CLI used by the health check.
    #[serde(default = "default_process_manager_bin")]
    pub process_manager_bin: String,

    /// Processes above this resident size are flagged by the health check.
    #[serde(default = "default_high_memory_mb")]
    pub high_memory_mb: u64,

    /// Projects the supervisor reviews when idle.
    #[serde(default)]
    pub apps: Vec<AppConfig>,
}

const fn default_max_concurrent_agents() -> usize {
    3
}

const fn default_max_concurrent_agents_per_project() -> usize {
    2
}

const fn default_evaluation_interval_ms() -> u64 {
    60_000
}

const fn default_health_check_interval_ms() -> u64 {
    900_000
}

const fn default_app_review_cooldown_ms() -> u64 {
    1_800_000
}

fn default_process_manager_bin() -> String {
    "pm2".to_string()
}

const fn default_high_memory_mb() -> u64 {
    1_024
}

const fn default_true() -> bool {
    true
}

impl Default for CosConfig {
    fn default() -> Self {
        Self {
            max_concurrent_agents: default_max_concurrent_agents(),
            max_concurrent_agents_per_project: default_max_concurrent_agents_per_project(),
            evaluation_interval_ms: default_evaluation_interval_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
            app_review_cooldown_ms: default_app_review_cooldown_ms(),
            proactive_mode: false,
            process_manager_bin: default_process_manager_bin(),
            high_memory_mb: default_high_memory_mb(),
            apps: vec![],
        }
    }
}

impl CosConfig {
    /// Enabled app ids, in declaration order.
    pub fn enabled_apps(&self) -> impl Iterator<Item = &str> {
        self.apps.iter().filter(|a| a.enabled).map(|a| a.id.as_str())
    }
}
