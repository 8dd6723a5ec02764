//! Daily report rollups (`cos/reports/<YYYY-MM-DD>.json`).
//!
//! Every agent completion is folded into the current day's document so the
//! UI can render history without replaying events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::error::StateError;
use crate::domain::models::AgentRecord;
use crate::infrastructure::fsio;
use crate::infrastructure::paths::DataPaths;

/// Per-task-type counters inside a daily report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportLine {
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub succeeded: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub total_duration_ms: u64,
}

/// One day's rollup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyReport {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub succeeded: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub by_task_type: BTreeMap<String, ReportLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

pub struct ReportService {
    paths: DataPaths,
    lock: Mutex<()>,
}

impl ReportService {
    pub fn new(paths: DataPaths) -> Self {
        Self {
            paths,
            lock: Mutex::new(()),
        }
    }

    /// Fold one completion into today's report.
    pub async fn record_completion(
        &self,
        agent: &AgentRecord,
        task_type: &str,
    ) -> Result<(), StateError> {
        let Some(result) = agent.result.as_ref() else {
            return Ok(());
        };
        let now = Utc::now();
        let date = now.format("%Y-%m-%d").to_string();
        let path = self.paths.report_file(&date);

        let _guard = self.lock.lock().await;
        let mut report: DailyReport = fsio::read_or_default(&path).await?;
        report.date = date;
        report.completed += 1;
        if result.success {
            report.succeeded += 1;
        } else {
            report.failed += 1;
        }
        let line = report.by_task_type.entry(task_type.to_string()).or_default();
        line.completed += 1;
        if result.success {
            line.succeeded += 1;
        } else {
            line.failed += 1;
        }
        line.total_duration_ms += result.duration_ms;
        report.last_updated = Some(now);
        fsio::write_atomic(&path, &report).await?;
        debug!(task_type, "completion rolled into daily report");
        Ok(())
    }

    /// Load a report by `YYYY-MM-DD` date, if one exists.
    pub async fn load(&self, date: &str) -> Result<Option<DailyReport>, StateError> {
        let path = self.paths.report_file(date);
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Ok(Some(fsio::read_or_default(&path).await?)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AgentResult, ErrorAnalysis, ErrorCategory};
    use tempfile::tempdir;

    fn agent_with(success: bool) -> AgentRecord {
        let mut agent = AgentRecord::new("a1", "t1");
        agent.result = Some(if success {
            AgentResult::success(500)
        } else {
            AgentResult::failure(500, ErrorAnalysis::new(ErrorCategory::Timeout, "slow"))
        });
        agent
    }

    #[tokio::test]
    async fn test_rollup_accumulates() {
        let dir = tempdir().unwrap();
        let service = ReportService::new(DataPaths::new(dir.path()));

        service
            .record_completion(&agent_with(true), "task:security")
            .await
            .unwrap();
        service
            .record_completion(&agent_with(false), "task:security")
            .await
            .unwrap();
        service
            .record_completion(&agent_with(true), "user-task")
            .await
            .unwrap();

        let date = Utc::now().format("%Y-%m-%d").to_string();
        let report = service.load(&date).await.unwrap().unwrap();
        assert_eq!(report.completed, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.by_task_type["task:security"].completed, 2);
        assert_eq!(report.by_task_type["task:security"].failed, 1);
        assert_eq!(report.by_task_type["user-task"].succeeded, 1);
    }

    #[tokio::test]
    async fn test_missing_report_is_none() {
        let dir = tempdir().unwrap();
        let service = ReportService::new(DataPaths::new(dir.path()));
        assert!(service.load("1999-01-01").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resultless_agent_is_ignored() {
        let dir = tempdir().unwrap();
        let service = ReportService::new(DataPaths::new(dir.path()));
        let agent = AgentRecord::new("a1", "t1");
        service.record_completion(&agent, "unknown").await.unwrap();

        let date = Utc::now().format("%Y-%m-%d").to_string();
        assert!(service.load(&date).await.unwrap().is_none());
    }
}
