//! Markdown task-file adapter.
//!
//! Implements the `TaskSource` port over the two human-readable task files.
//! The recognized surface is deliberately small: a status checkbox, an
//! optional priority tag, the description, indented `key=value` metadata
//! lines, and an approval marker. Anything else is ignored; an unreadable
//! file parses as empty and never aborts an evaluation.
//!
//! ```text
//! - [ ] task-3f2a [HIGH] Fix the login redirect !approval
//!   app=portal analysisType=ui-bugs
//! ```

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::error::StateError;
use crate::domain::models::{Task, TaskMetadata, TaskOrigin, TaskPriority, TaskStatus};
use crate::domain::ports::TaskSource;

const APPROVAL_MARKER: &str = "!approval";

/// Task source backed by the user and system markdown files.
pub struct MarkdownTaskSource {
    user_path: PathBuf,
    system_path: PathBuf,
    lock: Mutex<()>,
}

impl MarkdownTaskSource {
    pub fn new(user_path: PathBuf, system_path: PathBuf) -> Self {
        Self {
            user_path,
            system_path,
            lock: Mutex::new(()),
        }
    }

    async fn read_file(path: &PathBuf) -> String {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "task file unreadable, treating as empty");
                String::new()
            }
        }
    }

    async fn write_file(path: &PathBuf, content: &str) -> Result<(), StateError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StateError::io(parent.display().to_string(), e))?;
        }
        let tmp = path.with_extension("md.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| StateError::io(tmp.display().to_string(), e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| StateError::io(path.display().to_string(), e))?;
        Ok(())
    }

    async fn load(path: &PathBuf, origin: TaskOrigin) -> Result<Vec<Task>, StateError> {
        let content = Self::read_file(path).await;
        let (tasks, needs_rewrite) = parse_tasks(&content, origin);
        if needs_rewrite {
            // Materialize generated ids so they stay stable across reloads.
            debug!(path = %path.display(), "materializing generated task ids");
            Self::write_file(path, &serialize_tasks(&tasks, true)).await?;
        }
        Ok(tasks)
    }

    async fn rewrite<F>(&self, path: &PathBuf, origin: TaskOrigin, f: F) -> Result<bool, StateError>
    where
        F: FnOnce(&mut Vec<Task>) -> bool,
    {
        let content = Self::read_file(path).await;
        let (mut tasks, _) = parse_tasks(&content, origin);
        let changed = f(&mut tasks);
        if changed {
            Self::write_file(path, &serialize_tasks(&tasks, true)).await?;
        }
        Ok(changed)
    }
}

#[async_trait]
impl TaskSource for MarkdownTaskSource {
    async fn load_user_tasks(&self) -> Result<Vec<Task>, StateError> {
        let _guard = self.lock.lock().await;
        Self::load(&self.user_path, TaskOrigin::User).await
    }

    async fn load_system_tasks(&self) -> Result<Vec<Task>, StateError> {
        let _guard = self.lock.lock().await;
        Self::load(&self.system_path, TaskOrigin::Internal).await
    }

    async fn append_system_tasks(&self, new_tasks: &[Task]) -> Result<(), StateError> {
        let _guard = self.lock.lock().await;
        self.rewrite(&self.system_path, TaskOrigin::Internal, |tasks| {
            tasks.extend(new_tasks.iter().cloned());
            !new_tasks.is_empty()
        })
        .await?;
        Ok(())
    }

    async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<(), StateError> {
        let _guard = self.lock.lock().await;
        let in_user = self
            .rewrite(&self.user_path, TaskOrigin::User, |tasks| {
                set_status(tasks, task_id, status)
            })
            .await?;
        if !in_user {
            self.rewrite(&self.system_path, TaskOrigin::Internal, |tasks| {
                set_status(tasks, task_id, status)
            })
            .await?;
        }
        Ok(())
    }

    async fn remove_system_task(&self, task_id: &str) -> Result<(), StateError> {
        let _guard = self.lock.lock().await;
        self.rewrite(&self.system_path, TaskOrigin::Internal, |tasks| {
            let before = tasks.len();
            tasks.retain(|t| t.id != task_id);
            before != tasks.len()
        })
        .await?;
        Ok(())
    }
}

fn set_status(tasks: &mut [Task], task_id: &str, status: TaskStatus) -> bool {
    for task in tasks {
        if task.id == task_id {
            task.status = status;
            return true;
        }
    }
    false
}

fn status_marker(status: TaskStatus) -> char {
    match status {
        TaskStatus::Pending => ' ',
        TaskStatus::InProgress => '~',
        TaskStatus::Completed => 'x',
        TaskStatus::Failed => '!',
    }
}

fn status_from_marker(marker: char) -> Option<TaskStatus> {
    match marker {
        ' ' => Some(TaskStatus::Pending),
        '~' => Some(TaskStatus::InProgress),
        'x' | 'X' => Some(TaskStatus::Completed),
        '!' => Some(TaskStatus::Failed),
        _ => None,
    }
}

/// Parse a task list out of markdown. Returns the tasks in file order plus
/// whether any task needed a generated id (and the file should be
/// rewritten). Never fails: malformed lines are skipped.
pub fn parse_tasks(content: &str, origin: TaskOrigin) -> (Vec<Task>, bool) {
    let mut tasks: Vec<Task> = Vec::new();
    let mut metadata_lines: Vec<(usize, String)> = Vec::new();
    let mut generated_ids = false;

    for line in content.lines() {
        let trimmed = line.trim_end();
        if let Some(rest) = trimmed.strip_prefix("- [") {
            let mut chars = rest.chars();
            let marker = chars.next();
            let Some(status) = marker.and_then(status_from_marker) else {
                continue;
            };
            let rest = chars.as_str();
            let Some(rest) = rest.strip_prefix("] ") else {
                continue;
            };

            let mut tokens: Vec<&str> = rest.split_whitespace().collect();
            if tokens.is_empty() {
                continue;
            }

            let id = if tokens[0].starts_with("task-") || tokens[0].starts_with("sys-") {
                tokens.remove(0).to_string()
            } else {
                generated_ids = true;
                format!("task-{}", uuid::Uuid::new_v4())
            };

            let tagged = tokens.first().and_then(|t| {
                t.strip_prefix('[')
                    .and_then(|t| t.strip_suffix(']'))
                    .and_then(TaskPriority::from_str)
            });
            let priority = match tagged {
                Some(p) => {
                    tokens.remove(0);
                    p
                }
                None => TaskPriority::default(),
            };

            let approval_required = tokens.last() == Some(&APPROVAL_MARKER);
            if approval_required {
                tokens.pop();
            }

            let description = tokens.join(" ");
            if description.is_empty() {
                continue;
            }

            tasks.push(Task {
                id,
                description,
                priority,
                status,
                origin,
                approval_required,
                auto_approved: origin == TaskOrigin::Internal && !approval_required,
                metadata: TaskMetadata::default(),
                created_at: chrono::Utc::now(),
            });
        } else if trimmed.starts_with("  ") && trimmed.contains('=') && !tasks.is_empty() {
            metadata_lines.push((tasks.len() - 1, trimmed.trim().to_string()));
        }
    }

    for (index, line) in metadata_lines {
        let mut map = serde_json::Map::new();
        for pair in line.split_whitespace() {
            if let Some((key, value)) = pair.split_once('=') {
                if !key.is_empty() {
                    map.insert(key.to_string(), serde_json::Value::String(value.to_string()));
                }
            }
        }
        if map.is_empty() {
            continue;
        }
        // Merge over anything already parsed for this task.
        let mut existing = serde_json::to_value(&tasks[index].metadata)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        existing.extend(map);
        if let Ok(metadata) = serde_json::from_value(serde_json::Value::Object(existing)) {
            tasks[index].metadata = metadata;
        }
    }

    (tasks, generated_ids)
}

/// Serialize a task list back to markdown. When `with_approval_flags` is
/// false the approval markers are omitted (the shape shared with surfaces
/// that should not see them).
pub fn serialize_tasks(tasks: &[Task], with_approval_flags: bool) -> String {
    let mut out = String::new();
    for task in tasks {
        out.push_str(&format!(
            "- [{}] {} [{}] {}",
            status_marker(task.status),
            task.id,
            task.priority.as_str(),
            task.description
        ));
        if with_approval_flags && task.approval_required {
            out.push(' ');
            out.push_str(APPROVAL_MARKER);
        }
        out.push('\n');

        let metadata = serde_json::to_value(&task.metadata).unwrap_or_default();
        if let Some(map) = metadata.as_object() {
            let pairs: Vec<String> = map
                .iter()
                .filter_map(|(k, v)| match v {
                    serde_json::Value::String(s) => Some(format!("{k}={s}")),
                    serde_json::Value::Number(n) => Some(format!("{k}={n}")),
                    serde_json::Value::Bool(b) => Some(format!("{k}={b}")),
                    _ => None,
                })
                .collect();
            if !pairs.is_empty() {
                out.push_str("  ");
                out.push_str(&pairs.join(" "));
                out.push('\n');
            }
        }
    }
    out
}
