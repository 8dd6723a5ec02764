//! Port for the proactive task generators.
//!
//! Mission-driven tasks (P3) and autonomous recurring jobs (P3.5) come from
//! domain services outside the core. The orchestrator only pulls candidates
//! and reports which ones it dispatched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::error::StateError;
use crate::domain::models::Task;

/// Source of mission-driven tasks and due autonomous jobs.
#[async_trait]
pub trait ProactiveSource: Send + Sync {
    /// Candidate mission tasks, best first. Only consulted when proactive
    /// mode is on and no user tasks are pending.
    async fn mission_tasks(&self) -> Result<Vec<Task>, StateError>;

    /// Recurring jobs whose next-due time has passed.
    async fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Task>, StateError>;

    /// Called once a job task was dispatched so the generator can advance
    /// its next-due time.
    async fn mark_job_dispatched(&self, job_id: &str) -> Result<(), StateError>;
}

/// Generator that never proposes anything.
#[derive(Debug, Default, Clone)]
pub struct NullProactiveSource;

#[async_trait]
impl ProactiveSource for NullProactiveSource {
    async fn mission_tasks(&self) -> Result<Vec<Task>, StateError> {
        Ok(vec![])
    }

    async fn due_jobs(&self, _now: DateTime<Utc>) -> Result<Vec<Task>, StateError> {
        Ok(vec![])
    }

    async fn mark_job_dispatched(&self, _job_id: &str) -> Result<(), StateError> {
        Ok(())
    }
}
