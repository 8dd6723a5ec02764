//! Learning store (`cos/learning.json`).
//!
//! Records the outcome of every agent completion and turns the accumulated
//! record into scheduling adjustments: adaptive cooldown multipliers, skip
//! decisions with later rehabilitation, and model-tier routing advice.

use chrono::{Duration, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::domain::error::LearningError;
use crate::domain::models::{
    AgentRecord, BucketStats, CooldownAdjustment, ErrorCategory, LearningDocument, ModelTier,
    RoutingSuggestion, Task, TaskOrigin, UnknownErrorSample, MAX_UNKNOWN_SAMPLES,
};
use crate::infrastructure::fsio;
use crate::infrastructure::paths::DataPaths;

/// Grace period before a skipped task type gets a fresh trial.
pub const REHABILITATION_GRACE_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Buckets with fewer completions than this and no recent activity are
/// pruned on save.
const PRUNE_MIN_COMPLETIONS: u64 = 2;
const PRUNE_AGE_DAYS: i64 = 30;

/// Keywords the description classifier recognizes, mapped to task types.
const DESCRIPTION_KEYWORDS: &[(&str, &str)] = &[
    ("security", "security"),
    ("performance", "performance"),
    ("test", "test-coverage"),
    ("documentation", "documentation"),
    ("refactor", "refactoring"),
    ("dependenc", "dependencies"),
];

/// Deterministic classifier from a task to its learning key.
pub fn classify_task(task: &Task) -> String {
    if let Some(analysis) = task.metadata.analysis_type.as_deref() {
        return format!("task:{analysis}");
    }
    if task.metadata.review_type.as_deref() == Some("idle") {
        return "idle-review".to_string();
    }
    if let Some(mission) = task.metadata.mission_name.as_deref() {
        return format!("mission:{mission}");
    }
    let description = task.description.to_lowercase();
    for (needle, label) in DESCRIPTION_KEYWORDS {
        if description.contains(needle) {
            return format!("task:{label}");
        }
    }
    if task.metadata.task_type.as_deref() == Some("user") || task.origin == TaskOrigin::User {
        return "user-task".to_string();
    }
    "unknown".to_string()
}

pub struct LearningStore {
    path: PathBuf,
    lock: Mutex<()>,
    cache: RwLock<Arc<LearningDocument>>,
}

impl LearningStore {
    /// Load the document, rebuild the model-tier aggregates from routing
    /// accuracy (self-heal), and write the result back.
    pub async fn open(paths: &DataPaths) -> Result<Self, LearningError> {
        let path = paths.learning_file();
        let mut doc: LearningDocument = fsio::read_or_default(&path).await?;
        let corrected = Self::self_heal(&mut doc);
        if corrected > 0 {
            info!(corrected, "learning store: rebuilt model-tier aggregates");
        }
        fsio::write_atomic(&path, &doc).await?;
        Ok(Self {
            path,
            lock: Mutex::new(()),
            cache: RwLock::new(Arc::new(doc)),
        })
    }

    pub async fn snapshot(&self) -> Arc<LearningDocument> {
        self.cache.read().await.clone()
    }

    /// Record one agent completion. Returns the task-type key the completion
    /// was filed under.
    pub async fn record_task_completion(
        &self,
        agent: &AgentRecord,
        task: &Task,
    ) -> Result<String, LearningError> {
        let result = agent
            .result
            .as_ref()
            .ok_or_else(|| LearningError::MissingResult(agent.id.clone()))?;
        let task_type = classify_task(task);
        let tier = agent.model_tier;
        let now = Utc::now();

        let _guard = self.lock.lock().await;
        let mut doc: LearningDocument = fsio::read_or_default(&self.path).await?;

        doc.by_task_type
            .entry(task_type.clone())
            .or_default()
            .record(result.success, result.duration_ms, now);
        doc.by_model_tier
            .entry(tier.as_str().to_string())
            .or_default()
            .record(result.success, result.duration_ms, now);

        let cell = doc
            .routing_accuracy
            .entry(task_type.clone())
            .or_default()
            .entry(tier.as_str().to_string())
            .or_default();
        cell.attempts += 1;
        if result.success {
            cell.successes += 1;
        }

        if let Some(error) = result.error.as_ref().filter(|_| !result.success) {
            let pattern = doc
                .error_patterns
                .entry(error.category.as_str().to_string())
                .or_default();
            pattern.count += 1;
            *pattern.by_task_type.entry(task_type.clone()).or_insert(0) += 1;

            if error.category == ErrorCategory::Unknown {
                doc.unknown_error_samples.push(UnknownErrorSample {
                    task_type: task_type.clone(),
                    message: truncate(&error.message, 200),
                    details: error.details.as_deref().map(|d| truncate(d, 500)),
                    recorded_at: now,
                });
                let overflow = doc
                    .unknown_error_samples
                    .len()
                    .saturating_sub(MAX_UNKNOWN_SAMPLES);
                if overflow > 0 {
                    doc.unknown_error_samples.drain(..overflow);
                }
            }
        }

        doc.totals.completed += 1;
        if result.success {
            doc.totals.succeeded += 1;
        } else {
            doc.totals.failed += 1;
        }
        doc.totals.total_duration_ms += result.duration_ms;

        self.save(&mut doc).await?;
        debug!(
            task_type = %task_type,
            tier = tier.as_str(),
            success = result.success,
            "recorded task completion"
        );
        Ok(task_type)
    }

    /// Adaptive cooldown multiplier for a task type, from the latest
    /// snapshot. Unknown types get the neutral adjustment.
    pub async fn cooldown_adjustment(&self, task_type: &str) -> CooldownAdjustment {
        let doc = self.snapshot().await;
        doc.by_task_type
            .get(task_type)
            .map(CooldownAdjustment::for_bucket)
            .unwrap_or(CooldownAdjustment::NEUTRAL)
    }

    /// Reset skipped task types whose last completion is older than
    /// `grace_ms`, giving them a fresh trial. Returns the reset keys.
    pub async fn rehabilitation_sweep(&self, grace_ms: i64) -> Result<Vec<String>, LearningError> {
        let now = Utc::now();
        let _guard = self.lock.lock().await;
        let mut doc: LearningDocument = fsio::read_or_default(&self.path).await?;

        let candidates: Vec<String> = doc
            .by_task_type
            .iter()
            .filter(|(_, stats)| stats.completed >= 5 && stats.success_rate < 30)
            .filter(|(_, stats)| match stats.last_completed {
                Some(last) => now - last >= Duration::milliseconds(grace_ms),
                None => true,
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in &candidates {
            Self::reset_bucket(&mut doc, key);
            info!(task_type = %key, "rehabilitated skipped task type");
        }

        if !candidates.is_empty() {
            self.save(&mut doc).await?;
        }
        Ok(candidates)
    }

    /// Remove one bucket's contribution everywhere it was counted. Routing
    /// accuracy is the source of truth for per-tier counts; the bucket's
    /// average duration estimates the per-tier time share.
    fn reset_bucket(doc: &mut LearningDocument, key: &str) {
        let Some(stats) = doc.by_task_type.remove(key) else {
            return;
        };

        doc.totals.completed = doc.totals.completed.saturating_sub(stats.completed);
        doc.totals.succeeded = doc.totals.succeeded.saturating_sub(stats.succeeded);
        doc.totals.failed = doc.totals.failed.saturating_sub(stats.failed);
        doc.totals.total_duration_ms = doc
            .totals
            .total_duration_ms
            .saturating_sub(stats.total_duration_ms);

        if let Some(cells) = doc.routing_accuracy.remove(key) {
            for (tier, cell) in cells {
                if let Some(tier_stats) = doc.by_model_tier.get_mut(&tier) {
                    tier_stats.subtract(
                        cell.attempts,
                        cell.successes,
                        cell.attempts * stats.avg_duration_ms,
                    );
                }
            }
        }

        doc.error_patterns.retain(|_, pattern| {
            if let Some(count) = pattern.by_task_type.remove(key) {
                pattern.count = pattern.count.saturating_sub(count);
            }
            pattern.count > 0
        });

        doc.unknown_error_samples.retain(|s| s.task_type != key);
    }

    /// Tier routing advice for a task type.
    pub async fn suggest_model_tier(&self, task_type: &str) -> RoutingSuggestion {
        let doc = self.snapshot().await;
        Self::suggestion_from(&doc, task_type)
    }

    fn suggestion_from(doc: &LearningDocument, task_type: &str) -> RoutingSuggestion {
        let cells = doc.routing_accuracy.get(task_type);

        let mut preferred: Option<(ModelTier, u8)> = None;
        let mut avoid = Vec::new();
        if let Some(cells) = cells {
            for (tier_name, cell) in cells {
                let Some(tier) = ModelTier::parse_str(tier_name) else {
                    continue;
                };
                if cell.attempts < 3 {
                    continue;
                }
                let rate = cell.success_rate();
                if rate >= 80 && preferred.map_or(true, |(_, best)| rate > best) {
                    preferred = Some((tier, rate));
                }
                if rate < 40 {
                    avoid.push(tier);
                }
            }
        }

        if let Some((tier, rate)) = preferred {
            return RoutingSuggestion {
                preferred: Some(tier),
                avoid,
                reason: Some(format!("{}% success on {}", rate, tier.as_str())),
            };
        }

        let overall = doc.by_task_type.get(task_type);
        if overall.map_or(false, |b| b.completed > 0 && b.success_rate < 60) {
            return RoutingSuggestion {
                preferred: Some(ModelTier::Heavy),
                avoid,
                reason: Some("low overall success, escalating to heavy".to_string()),
            };
        }

        RoutingSuggestion {
            preferred: None,
            avoid,
            reason: None,
        }
    }

    /// Non-empty suggestions across all known task types, for the periodic
    /// recommendation event.
    pub async fn recommendations(&self) -> Vec<(String, RoutingSuggestion)> {
        let doc = self.snapshot().await;
        doc.by_task_type
            .keys()
            .map(|key| (key.clone(), Self::suggestion_from(&doc, key)))
            .filter(|(_, suggestion)| !suggestion.is_empty())
            .collect()
    }

    /// Rebuild `by_model_tier` from routing accuracy and the per-type
    /// average durations. Returns how many tier aggregates changed.
    fn self_heal(doc: &mut LearningDocument) -> usize {
        let mut rebuilt: std::collections::BTreeMap<String, BucketStats> = Default::default();
        for (task_type, cells) in &doc.routing_accuracy {
            let avg = doc
                .by_task_type
                .get(task_type)
                .map_or(0, |b| b.avg_duration_ms);
            for (tier, cell) in cells {
                let stats = rebuilt.entry(tier.clone()).or_default();
                stats.completed += cell.attempts;
                stats.succeeded += cell.successes;
                stats.failed += cell.attempts - cell.successes;
                stats.total_duration_ms += cell.attempts * avg;
            }
        }
        for (tier, stats) in &mut rebuilt {
            if stats.completed > 0 {
                stats.avg_duration_ms = stats.total_duration_ms / stats.completed;
                stats.success_rate = (stats.succeeded * 100 / stats.completed) as u8;
            }
            // Maxima are not recoverable from routing accuracy; keep what the
            // old aggregate had so p80 stays within bounds.
            if let Some(old) = doc.by_model_tier.get(tier) {
                stats.max_duration_ms = old.max_duration_ms.max(stats.avg_duration_ms);
                stats.last_completed = old.last_completed;
            } else {
                stats.max_duration_ms = stats.avg_duration_ms;
            }
            stats.p80_duration_ms =
                stats.avg_duration_ms + (stats.max_duration_ms - stats.avg_duration_ms) * 6 / 10;
        }

        let mut corrected = 0;
        for (tier, stats) in &rebuilt {
            let drifted = doc
                .by_model_tier
                .get(tier)
                .map_or(true, |old| {
                    old.completed != stats.completed || old.succeeded != stats.succeeded
                });
            if drifted {
                corrected += 1;
                warn!(
                    tier = %tier,
                    completed = stats.completed,
                    "model-tier aggregate drifted, corrected from routing accuracy"
                );
            }
        }
        let stale = doc
            .by_model_tier
            .keys()
            .filter(|k| !rebuilt.contains_key(*k))
            .count();
        doc.by_model_tier = rebuilt;
        corrected + stale
    }

    /// Prune low-signal buckets, stamp, and write.
    async fn save(&self, doc: &mut LearningDocument) -> Result<(), LearningError> {
        let cutoff = Utc::now() - Duration::days(PRUNE_AGE_DAYS);
        doc.by_task_type.retain(|key, stats| {
            let keep = stats.completed >= PRUNE_MIN_COMPLETIONS
                || stats.last_completed.map_or(true, |last| last >= cutoff);
            if !keep {
                debug!(task_type = %key, "pruned stale learning bucket");
            }
            keep
        });
        doc.last_updated = Some(Utc::now());
        fsio::write_atomic(&self.path, doc).await?;
        *self.cache.write().await = Arc::new(doc.clone());
        Ok(())
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AgentResult, ErrorAnalysis, TaskMetadata};
    use tempfile::tempdir;

    fn task_with_analysis(analysis: &str) -> Task {
        Task::system(
            format!("run {analysis}"),
            TaskMetadata {
                analysis_type: Some(analysis.to_string()),
                ..TaskMetadata::default()
            },
        )
    }

    fn completed_agent(id: &str, tier: ModelTier, success: bool, duration_ms: u64) -> AgentRecord {
        let mut agent = AgentRecord::new(id, format!("task-{id}")).with_model_tier(tier);
        agent.result = Some(if success {
            AgentResult::success(duration_ms)
        } else {
            AgentResult::failure(
                duration_ms,
                ErrorAnalysis::new(ErrorCategory::Unknown, "mystery failure"),
            )
        });
        agent.completed_at = Some(Utc::now());
        agent
    }

    async fn open_store() -> (tempfile::TempDir, LearningStore) {
        let dir = tempdir().unwrap();
        let store = LearningStore::open(&DataPaths::new(dir.path())).await.unwrap();
        (dir, store)
    }

    #[test]
    fn test_classifier_order() {
        let task = task_with_analysis("code-quality");
        assert_eq!(classify_task(&task), "task:code-quality");

        let idle = Task::system(
            "look around",
            TaskMetadata {
                review_type: Some("idle".into()),
                ..TaskMetadata::default()
            },
        );
        assert_eq!(classify_task(&idle), "idle-review");

        let mission = Task::system(
            "do the thing",
            TaskMetadata {
                mission_name: Some("launch".into()),
                ..TaskMetadata::default()
            },
        );
        assert_eq!(classify_task(&mission), "mission:launch");

        let mut keyword = Task::system("tighten security posture", TaskMetadata::default());
        keyword.origin = TaskOrigin::Internal;
        assert_eq!(classify_task(&keyword), "task:security");

        let mut user = Task::system("ship the newsletter", TaskMetadata::default());
        user.origin = TaskOrigin::User;
        assert_eq!(classify_task(&user), "user-task");

        let mut opaque = Task::system("zzzzz", TaskMetadata::default());
        opaque.origin = TaskOrigin::Internal;
        assert_eq!(classify_task(&opaque), "unknown");
    }

    #[tokio::test]
    async fn test_record_updates_buckets_and_routing() {
        let (_dir, store) = open_store().await;
        let task = task_with_analysis("security");

        let agent = completed_agent("a1", ModelTier::Medium, true, 2_000);
        let key = store.record_task_completion(&agent, &task).await.unwrap();
        assert_eq!(key, "task:security");

        let doc = store.snapshot().await;
        let bucket = &doc.by_task_type["task:security"];
        assert_eq!(bucket.completed, 1);
        assert_eq!(bucket.succeeded, 1);
        assert_eq!(bucket.success_rate, 100);
        assert_eq!(doc.by_model_tier["medium"].completed, 1);
        assert_eq!(doc.routing_accuracy["task:security"]["medium"].attempts, 1);
        assert_eq!(doc.totals.completed, 1);
    }

    #[tokio::test]
    async fn test_unknown_failures_keep_bounded_samples() {
        let (_dir, store) = open_store().await;
        let task = task_with_analysis("flaky");
        for i in 0..25 {
            let agent = completed_agent(&format!("a{i}"), ModelTier::Light, false, 100);
            store.record_task_completion(&agent, &task).await.unwrap();
        }
        let doc = store.snapshot().await;
        assert_eq!(doc.unknown_error_samples.len(), MAX_UNKNOWN_SAMPLES);
        assert_eq!(doc.error_patterns["unknown"].count, 25);
        assert_eq!(doc.error_patterns["unknown"].by_task_type["task:flaky"], 25);
    }

    #[tokio::test]
    async fn test_missing_result_is_rejected() {
        let (_dir, store) = open_store().await;
        let task = task_with_analysis("security");
        let agent = AgentRecord::new("a1", "task-1");
        assert!(matches!(
            store.record_task_completion(&agent, &task).await,
            Err(LearningError::MissingResult(_))
        ));
    }

    #[tokio::test]
    async fn test_skip_then_rehabilitate() {
        let (_dir, store) = open_store().await;
        let task = task_with_analysis("ui-bugs");
        for i in 0..6 {
            let agent = completed_agent(&format!("a{i}"), ModelTier::Light, i == 0, 1_000);
            store.record_task_completion(&agent, &task).await.unwrap();
        }

        let adjustment = store.cooldown_adjustment("task:ui-bugs").await;
        assert!(adjustment.skip);

        // Inside the grace window nothing resets.
        let reset = store.rehabilitation_sweep(REHABILITATION_GRACE_MS).await.unwrap();
        assert!(reset.is_empty());

        // Past the grace window the bucket gets a fresh trial.
        let reset = store.rehabilitation_sweep(0).await.unwrap();
        assert_eq!(reset, vec!["task:ui-bugs".to_string()]);

        let doc = store.snapshot().await;
        assert!(!doc.by_task_type.contains_key("task:ui-bugs"));
        assert!(!doc.routing_accuracy.contains_key("task:ui-bugs"));
        assert_eq!(doc.totals.completed, 0);
        assert_eq!(doc.by_model_tier.get("light").map_or(0, |b| b.completed), 0);
        assert_eq!(store.cooldown_adjustment("task:ui-bugs").await.skip, false);
    }

    #[tokio::test]
    async fn test_reset_subtracts_exactly_routing_counts() {
        let (_dir, store) = open_store().await;
        // Healthy type on the same tier must survive the reset untouched.
        let good = task_with_analysis("code-quality");
        for i in 0..4 {
            let agent = completed_agent(&format!("g{i}"), ModelTier::Light, true, 1_000);
            store.record_task_completion(&agent, &good).await.unwrap();
        }
        let bad = task_with_analysis("ui-bugs");
        for i in 0..6 {
            let agent = completed_agent(&format!("b{i}"), ModelTier::Light, false, 1_000);
            store.record_task_completion(&agent, &bad).await.unwrap();
        }

        let before = store.snapshot().await.by_model_tier["light"].completed;
        assert_eq!(before, 10);

        store.rehabilitation_sweep(0).await.unwrap();

        let doc = store.snapshot().await;
        assert_eq!(doc.by_model_tier["light"].completed, 4);
        assert_eq!(doc.by_task_type["task:code-quality"].completed, 4);
        assert_eq!(doc.totals.completed, 4);
    }

    #[tokio::test]
    async fn test_suggest_model_tier() {
        let (_dir, store) = open_store().await;
        let task = task_with_analysis("security");
        for i in 0..4 {
            let agent = completed_agent(&format!("h{i}"), ModelTier::Heavy, true, 1_000);
            store.record_task_completion(&agent, &task).await.unwrap();
        }
        for i in 0..4 {
            let agent = completed_agent(&format!("l{i}"), ModelTier::Light, i == 0, 1_000);
            store.record_task_completion(&agent, &task).await.unwrap();
        }

        let suggestion = store.suggest_model_tier("task:security").await;
        assert_eq!(suggestion.preferred, Some(ModelTier::Heavy));
        assert_eq!(suggestion.avoid, vec![ModelTier::Light]);

        // Unknown type yields nothing.
        assert!(store.suggest_model_tier("task:nothing").await.is_empty());
    }

    #[tokio::test]
    async fn test_self_heal_rebuilds_tier_aggregates() {
        let dir = tempdir().unwrap();
        let paths = DataPaths::new(dir.path());
        {
            let store = LearningStore::open(&paths).await.unwrap();
            let task = task_with_analysis("security");
            for i in 0..3 {
                let agent = completed_agent(&format!("a{i}"), ModelTier::Medium, true, 2_000);
                store.record_task_completion(&agent, &task).await.unwrap();
            }
        }

        // Corrupt the tier aggregate on disk, as an older version would have.
        let mut doc: LearningDocument =
            serde_json::from_str(&std::fs::read_to_string(paths.learning_file()).unwrap()).unwrap();
        doc.by_model_tier.get_mut("medium").unwrap().completed = 99;
        std::fs::write(
            paths.learning_file(),
            serde_json::to_string(&doc).unwrap(),
        )
        .unwrap();

        let store = LearningStore::open(&paths).await.unwrap();
        let healed = store.snapshot().await;
        assert_eq!(healed.by_model_tier["medium"].completed, 3);
        assert_eq!(healed.by_model_tier["medium"].succeeded, 3);
    }
}
