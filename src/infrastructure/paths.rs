//! Well-known file locations, derived from the configured data directory.

use std::path::{Path, PathBuf};

/// Paths to every document the supervisor owns.
#[derive(Debug, Clone)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    /// `root` is the working directory; documents live under `<root>/cos/`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cos_dir(&self) -> PathBuf {
        self.root.join("cos")
    }

    pub fn state_file(&self) -> PathBuf {
        self.cos_dir().join("state.json")
    }

    pub fn learning_file(&self) -> PathBuf {
        self.cos_dir().join("learning.json")
    }

    pub fn schedule_file(&self) -> PathBuf {
        self.cos_dir().join("task-schedule.json")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.cos_dir().join("reports")
    }

    /// Daily report document for a `YYYY-MM-DD` date.
    pub fn report_file(&self, date: &str) -> PathBuf {
        self.reports_dir().join(format!("{date}.json"))
    }

    pub fn agents_dir(&self) -> PathBuf {
        self.cos_dir().join("agents")
    }

    /// Archived metadata for one completed agent.
    pub fn agent_metadata_file(&self, agent_id: &str) -> PathBuf {
        self.agents_dir().join(agent_id).join("metadata.json")
    }

    pub fn user_tasks_file(&self) -> PathBuf {
        self.root.join("TASKS.md")
    }

    pub fn system_tasks_file(&self) -> PathBuf {
        self.cos_dir().join("system-tasks.md")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.cos_dir().join("logs")
    }
}
