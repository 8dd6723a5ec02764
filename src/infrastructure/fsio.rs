//! Atomic JSON document I/O.
//!
//! Every persisted document is written to a sibling `*.tmp` file and renamed
//! into place, so a torn file is impossible short of a crash mid-rename.
//! Unparseable documents are backed up with a timestamp suffix and replaced
//! by defaults so one bad write never wedges the supervisor.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

use crate::domain::error::StateError;

/// Read a JSON document, falling back to `T::default()` when the file is
/// missing or corrupt. Corrupt files are moved aside, never overwritten.
pub async fn read_or_default<T>(path: &Path) -> Result<T, StateError>
where
    T: DeserializeOwned + Default,
{
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "document missing, using defaults");
            return Ok(T::default());
        }
        Err(e) => return Err(StateError::io(path.display().to_string(), e)),
    };

    match serde_json::from_str(&raw) {
        Ok(doc) => Ok(doc),
        Err(e) => {
            let backup = backup_path(path);
            warn!(
                path = %path.display(),
                backup = %backup.display(),
                error = %e,
                "corrupt document, backing up and using defaults"
            );
            if let Err(rename_err) = fs::rename(path, &backup).await {
                warn!(error = %rename_err, "failed to back up corrupt document");
            }
            Ok(T::default())
        }
    }
}

/// Read a JSON document as a raw value, for documents that need version
/// inspection before typed parsing. Missing file yields `None`; corrupt
/// files are backed up and yield `None`.
pub async fn read_raw(path: &Path) -> Result<Option<serde_json::Value>, StateError> {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StateError::io(path.display().to_string(), e)),
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            let backup = backup_path(path);
            warn!(
                path = %path.display(),
                backup = %backup.display(),
                error = %e,
                "corrupt document, backing up"
            );
            if let Err(rename_err) = fs::rename(path, &backup).await {
                warn!(error = %rename_err, "failed to back up corrupt document");
            }
            Ok(None)
        }
    }
}

/// Write a document atomically: serialize, write `*.tmp`, rename into place.
pub async fn write_atomic<T: Serialize>(path: &Path, doc: &T) -> Result<(), StateError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StateError::io(parent.display().to_string(), e))?;
    }

    let json = serde_json::to_string_pretty(doc)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json)
        .await
        .map_err(|e| StateError::io(tmp.display().to_string(), e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| StateError::io(path.display().to_string(), e))?;
    Ok(())
}

fn backup_path(path: &Path) -> std::path::PathBuf {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S");
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    path.with_file_name(format!("{name}.corrupt-{stamp}"))
}
