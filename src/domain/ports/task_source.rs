//! Port for the markdown task files.
//!
//! The file format is owned by the external parser component; the supervisor
//! only consumes parsed task lists and hands back status updates and new
//! system tasks.

use async_trait::async_trait;

use crate::domain::error::StateError;
use crate::domain::models::{Task, TaskStatus};

/// Access to the two human-readable task files (user-authored and
/// system-generated).
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Parse the user task file. Invalid content yields an empty list.
    async fn load_user_tasks(&self) -> Result<Vec<Task>, StateError>;

    /// Parse the system task file. Invalid content yields an empty list.
    async fn load_system_tasks(&self) -> Result<Vec<Task>, StateError>;

    /// Append system-generated tasks to the system task file.
    async fn append_system_tasks(&self, tasks: &[Task]) -> Result<(), StateError>;

    /// Update the status of one task in whichever file owns it. This is the
    /// only mutation the supervisor applies to user tasks.
    async fn update_task_status(&self, task_id: &str, status: TaskStatus)
        -> Result<(), StateError>;

    /// Remove a system task (after completion). User tasks are never removed.
    async fn remove_system_task(&self, task_id: &str) -> Result<(), StateError>;
}

/// Task source with no files behind it. Used by tests and by a daemon that
/// has not been pointed at a workspace yet.
#[derive(Debug, Default, Clone)]
pub struct NullTaskSource;

#[async_trait]
impl TaskSource for NullTaskSource {
    async fn load_user_tasks(&self) -> Result<Vec<Task>, StateError> {
        Ok(vec![])
    }

    async fn load_system_tasks(&self) -> Result<Vec<Task>, StateError> {
        Ok(vec![])
    }

    async fn append_system_tasks(&self, _tasks: &[Task]) -> Result<(), StateError> {
        Ok(())
    }

    async fn update_task_status(
        &self,
        _task_id: &str,
        _status: TaskStatus,
    ) -> Result<(), StateError> {
        Ok(())
    }

    async fn remove_system_task(&self, _task_id: &str) -> Result<(), StateError> {
        Ok(())
    }
}
