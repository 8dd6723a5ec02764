//! State store for the `cos/state.json` envelope.
//!
//! All mutations funnel through one fair mutex: each caller submits a
//! closure, the store re-reads the persisted document under the lock,
//! applies the closure, and writes the result atomically. Readers that can
//! tolerate a stale snapshot read the in-memory copy without the lock.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::domain::error::StateError;
use crate::domain::models::CosState;
use crate::infrastructure::fsio;
use crate::infrastructure::paths::DataPaths;

pub struct StateStore {
    path: PathBuf,
    /// tokio's Mutex queues waiters fairly, which gives writers FIFO order.
    lock: Mutex<()>,
    cache: RwLock<Arc<CosState>>,
}

impl StateStore {
    /// Load (or initialize) the state document. Corrupt documents are backed
    /// up and replaced by defaults; the merged result is written back so the
    /// on-disk file always carries every current key.
    pub async fn open(paths: &DataPaths) -> Result<Self, StateError> {
        let path = paths.state_file();
        let mut state: CosState = fsio::read_or_default(&path).await?;
        state.last_updated = Some(Utc::now());
        fsio::write_atomic(&path, &state).await?;
        info!(
            path = %path.display(),
            agents = state.agents.len(),
            "state store opened"
        );
        Ok(Self {
            path,
            lock: Mutex::new(()),
            cache: RwLock::new(Arc::new(state)),
        })
    }

    /// Latest known state. May lag a concurrent mutation; never blocks on
    /// the writer queue.
    pub async fn snapshot(&self) -> Arc<CosState> {
        self.cache.read().await.clone()
    }

    /// Serialized read-modify-write. The closure sees the latest persisted
    /// document; its return value is handed back after the atomic write
    /// succeeds.
    pub async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut CosState) -> T + Send,
    ) -> Result<T, StateError> {
        let _guard = self.lock.lock().await;
        let mut state: CosState = fsio::read_or_default(&self.path).await?;
        let out = f(&mut state);
        state.last_updated = Some(Utc::now());
        fsio::write_atomic(&self.path, &state).await?;
        *self.cache.write().await = Arc::new(state);
        debug!("state mutated");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn open_store() -> (tempfile::TempDir, StateStore) {
        let dir = tempdir().unwrap();
        let paths = DataPaths::new(dir.path());
        let store = StateStore::open(&paths).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_open_materializes_defaults() {
        let (dir, store) = open_store().await;
        assert!(dir.path().join("cos/state.json").exists());
        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.config.max_concurrent_agents, 3);
    }

    #[tokio::test]
    async fn test_mutate_persists_and_returns() {
        let (dir, store) = open_store().await;
        let count = store
            .mutate(|s| {
                s.stats.tasks_completed += 1;
                s.stats.tasks_completed
            })
            .await
            .unwrap();
        assert_eq!(count, 1);

        // A fresh store sees the write.
        let paths = DataPaths::new(dir.path());
        let reopened = StateStore::open(&paths).await.unwrap();
        assert_eq!(reopened.snapshot().await.stats.tasks_completed, 1);
    }

    #[tokio::test]
    async fn test_mutations_are_serialized() {
        let (_dir, store) = open_store().await;
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .mutate(|s| {
                        s.stats.evaluation_count += 1;
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        // No increments lost to read-modify-write races.
        assert_eq!(store.snapshot().await.stats.evaluation_count, 20);
    }

    #[tokio::test]
    async fn test_corrupt_state_backed_up_and_defaulted() {
        let dir = tempdir().unwrap();
        let paths = DataPaths::new(dir.path());
        tokio::fs::create_dir_all(paths.cos_dir()).await.unwrap();
        tokio::fs::write(paths.state_file(), "{running: true,,,")
            .await
            .unwrap();

        let store = StateStore::open(&paths).await.unwrap();
        assert!(!store.snapshot().await.running);

        let backups: Vec<_> = std::fs::read_dir(paths.cos_dir())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains("corrupt-"))
            .collect();
        assert_eq!(backups.len(), 1);
    }
}
