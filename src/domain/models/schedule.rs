//! Schedule document model (`cos/task-schedule.json`).
//!
//! One entry per well-known task type: interval policy, per-app overrides,
//! and execution history. The document is versioned; v1 documents (split
//! self/app maps) are migrated to the unified v2 task map on load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Current schedule document version.
pub const SCHEDULE_VERSION: u32 = 2;

pub const DAY_MS: u64 = 86_400_000;
pub const WEEK_MS: u64 = 604_800_000;

/// How often a task type becomes eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntervalType {
    /// Eligible whenever its turn in the rotation comes up.
    Rotation,
    Daily,
    Weekly,
    /// Runs at most once (globally, or once per app when scoped).
    Once,
    /// Only runs for an explicit on-demand request.
    OnDemand,
    /// Fixed interval from `interval_ms`.
    Custom,
}

impl IntervalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rotation => "rotation",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Once => "once",
            Self::OnDemand => "on-demand",
            Self::Custom => "custom",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "rotation" => Some(Self::Rotation),
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "once" => Some(Self::Once),
            "on-demand" | "on_demand" => Some(Self::OnDemand),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

/// Per-app override of an entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_type: Option<IntervalType>,
}

/// Policy for one task type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub interval_type: IntervalType,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Interval for `custom` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// App-scoped overrides, keyed by app id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub apps: BTreeMap<String, AppOverride>,
}

const fn default_true() -> bool {
    true
}

impl ScheduleEntry {
    pub fn new(interval_type: IntervalType) -> Self {
        Self {
            interval_type,
            enabled: true,
            interval_ms: None,
            provider_id: None,
            model: None,
            prompt: None,
            apps: BTreeMap::new(),
        }
    }

    /// Effective interval type for an app, honoring its override.
    pub fn effective_interval_type(&self, app_id: Option<&str>) -> IntervalType {
        app_id
            .and_then(|a| self.apps.get(a))
            .and_then(|o| o.interval_type)
            .unwrap_or(self.interval_type)
    }

    /// Whether the entry is disabled specifically for this app.
    pub fn disabled_for_app(&self, app_id: &str) -> bool {
        self.apps
            .get(app_id)
            .and_then(|o| o.enabled)
            .map_or(false, |enabled| !enabled)
    }

    /// Base cooldown interval in milliseconds, before learning adjustment.
    pub fn base_interval_ms(&self) -> u64 {
        match self.interval_type {
            IntervalType::Daily => DAY_MS,
            IntervalType::Weekly => WEEK_MS,
            IntervalType::Custom => self.interval_ms.unwrap_or(DAY_MS),
            _ => DAY_MS,
        }
    }
}

/// Execution tally for one app under a scoped entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerAppExecution {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub count: u64,
}

/// Execution history for one task type (`task:<type>` key).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionBucket {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub count: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub per_app: BTreeMap<String, PerAppExecution>,
}

impl ExecutionBucket {
    /// History for one app scope, empty when never run there.
    pub fn for_app(&self, app_id: &str) -> PerAppExecution {
        self.per_app.get(app_id).cloned().unwrap_or_default()
    }
}

/// Out-of-band request for a task of a given type on the next evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnDemandRequest {
    pub id: String,
    pub task_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    pub requested_at: DateTime<Utc>,
}

impl OnDemandRequest {
    pub fn new(task_type: impl Into<String>, app_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            app_id,
            requested_at: Utc::now(),
        }
    }
}

/// The full schedule document, v2.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDocument {
    #[serde(default)]
    pub version: u32,
    /// Policy per task type (bare type key, e.g. `security`).
    #[serde(default)]
    pub tasks: BTreeMap<String, ScheduleEntry>,
    /// Execution history keyed `task:<type>`.
    #[serde(default)]
    pub executions: BTreeMap<String, ExecutionBucket>,
    #[serde(default)]
    pub on_demand_queue: Vec<OnDemandRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Execution-history key for a task type.
pub fn execution_key(task_type: &str) -> String {
    format!("task:{task_type}")
}

impl Default for ScheduleDocument {
    fn default() -> Self {
        Self {
            version: SCHEDULE_VERSION,
            tasks: default_entries(),
            executions: BTreeMap::new(),
            on_demand_queue: Vec::new(),
            last_updated: None,
        }
    }
}

impl ScheduleDocument {
    /// Entries participating in the rotation, in key order.
    pub fn rotation_entries(&self) -> impl Iterator<Item = (&String, &ScheduleEntry)> {
        self.tasks
            .iter()
            .filter(|(_, e)| e.enabled && e.interval_type == IntervalType::Rotation)
    }

    pub fn execution(&self, task_type: &str) -> ExecutionBucket {
        self.executions
            .get(&execution_key(task_type))
            .cloned()
            .unwrap_or_default()
    }
}

/// Seed entries for the well-known task types.
fn default_entries() -> BTreeMap<String, ScheduleEntry> {
    let mut tasks = BTreeMap::new();
    for key in ["code-quality", "refactoring", "test-coverage", "documentation"] {
        tasks.insert(key.to_string(), ScheduleEntry::new(IntervalType::Rotation));
    }
    for key in ["security", "dependencies"] {
        tasks.insert(key.to_string(), ScheduleEntry::new(IntervalType::Weekly));
    }
    tasks.insert("triage".to_string(), ScheduleEntry::new(IntervalType::Daily));
    tasks.insert("repo-baseline".to_string(), ScheduleEntry::new(IntervalType::Once));
    for key in ["performance", "ui-bugs"] {
        tasks.insert(key.to_string(), ScheduleEntry::new(IntervalType::OnDemand));
    }
    tasks
}

// ---------------------------------------------------------------------------
// v1 migration
// ---------------------------------------------------------------------------

/// v1 entry shape (shared by the self/app maps).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V1Entry {
    #[serde(rename = "type")]
    pub interval_type: IntervalType,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub interval_ms: Option<u64>,
}

/// v1 document: split self/app maps and `self-improve:*` / `app-improve:*`
/// execution keys.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V1ScheduleDocument {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub self_improvement: BTreeMap<String, V1Entry>,
    #[serde(default)]
    pub app_improvement: BTreeMap<String, V1Entry>,
    #[serde(default)]
    pub executions: BTreeMap<String, ExecutionBucket>,
    #[serde(default)]
    pub on_demand_queue: Vec<OnDemandRequest>,
}

/// Task-type renames applied during migration.
fn migrate_type_name(v1_name: &str) -> Option<&str> {
    match v1_name {
        "security-audit" => Some("security"),
        // Superseded by the supervisor's own idle self-review path.
        "cos-enhancement" => None,
        other => Some(other),
    }
}

fn merge_buckets(into: &mut ExecutionBucket, from: ExecutionBucket) {
    into.count += from.count;
    into.last_run = match (into.last_run, from.last_run) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
    for (app, from_app) in from.per_app {
        let entry = into.per_app.entry(app).or_default();
        entry.count += from_app.count;
        entry.last_run = match (entry.last_run, from_app.last_run) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

/// Merge a v1 document into the unified v2 shape.
///
/// Self and app entries for the same (renamed) type collapse into one entry;
/// execution keys are rewritten from `self-improve:*` / `app-improve:*` to
/// `task:*`, merging counts and keeping the latest `lastRun` when both sides
/// recorded history.
pub fn migrate_v1(v1: V1ScheduleDocument) -> ScheduleDocument {
    let mut doc = ScheduleDocument {
        version: SCHEDULE_VERSION,
        tasks: BTreeMap::new(),
        executions: BTreeMap::new(),
        on_demand_queue: v1.on_demand_queue,
        last_updated: Some(Utc::now()),
    };

    let entries = v1
        .self_improvement
        .into_iter()
        .chain(v1.app_improvement.into_iter());
    for (name, entry) in entries {
        let Some(name) = migrate_type_name(&name) else {
            continue;
        };
        let merged = doc.tasks.entry(name.to_string()).or_insert_with(|| {
            let mut fresh = ScheduleEntry::new(entry.interval_type);
            fresh.enabled = false;
            fresh
        });
        // Either half enabling the type keeps it enabled.
        merged.enabled = merged.enabled || entry.enabled;
        if merged.interval_ms.is_none() {
            merged.interval_ms = entry.interval_ms;
        }
    }

    for (key, bucket) in v1.executions {
        let task_type = key
            .strip_prefix("self-improve:")
            .or_else(|| key.strip_prefix("app-improve:"))
            .unwrap_or(&key);
        let task_type = task_type.strip_prefix("task:").unwrap_or(task_type);
        let Some(task_type) = migrate_type_name(task_type) else {
            continue;
        };
        let entry = doc.executions.entry(execution_key(task_type)).or_default();
        merge_buckets(entry, bucket);
    }

    doc
}
