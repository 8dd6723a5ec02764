//! Process-manager and pid-probe adapters.
//!
//! The health check shells out to a pm2-compatible CLI; its absence is a
//! normal condition, never an error. The pid probe backs the zombie sweep.

use async_trait::async_trait;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::models::{ProcessHealth, ProcessStatus};

/// Listing and restarting managed processes.
#[async_trait]
pub trait ProcessManager: Send + Sync {
    /// Current process list; empty when the manager CLI is unavailable.
    async fn list(&self) -> Vec<ProcessHealth>;

    /// Restart one process by name; false when the restart did not happen.
    async fn restart(&self, name: &str) -> bool;
}

/// Checking whether an OS pid is alive.
pub trait ProcessProbe: Send + Sync {
    fn pid_alive(&self, pid: u32) -> bool;
}

/// pm2-compatible client driven through its CLI (`jlist` / `restart`).
pub struct Pm2Client {
    bin: String,
}

impl Pm2Client {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    fn parse_jlist(raw: &str) -> Vec<ProcessHealth> {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
            warn!("process manager returned unparseable listing");
            return vec![];
        };
        let Some(rows) = value.as_array() else {
            return vec![];
        };
        rows.iter()
            .filter_map(|row| {
                let name = row.get("name")?.as_str()?.to_string();
                let status = match row
                    .pointer("/pm2_env/status")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("stopped")
                {
                    "online" | "launching" => ProcessStatus::Online,
                    "errored" => ProcessStatus::Errored,
                    _ => ProcessStatus::Stopped,
                };
                let pid = row
                    .get("pid")
                    .and_then(serde_json::Value::as_u64)
                    .and_then(|p| u32::try_from(p).ok())
                    .filter(|p| *p > 0);
                let memory_mb = row
                    .pointer("/monit/memory")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(0)
                    / (1024 * 1024);
                let restarts = row
                    .pointer("/pm2_env/restart_time")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(0);
                Some(ProcessHealth {
                    name,
                    status,
                    pid,
                    memory_mb,
                    restarts,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ProcessManager for Pm2Client {
    async fn list(&self) -> Vec<ProcessHealth> {
        let output = Command::new(&self.bin).arg("jlist").output().await;
        match output {
            Ok(out) if out.status.success() => {
                Self::parse_jlist(&String::from_utf8_lossy(&out.stdout))
            }
            Ok(out) => {
                debug!(status = %out.status, "process manager listing failed");
                vec![]
            }
            Err(e) => {
                debug!(error = %e, "process manager unavailable");
                vec![]
            }
        }
    }

    async fn restart(&self, name: &str) -> bool {
        match Command::new(&self.bin).args(["restart", name]).output().await {
            Ok(out) => out.status.success(),
            Err(e) => {
                debug!(error = %e, name, "process restart failed to launch");
                false
            }
        }
    }
}

/// Probe backed by signal 0: alive when the kernel accepts the null signal
/// (including EPERM, which still proves the pid exists).
#[derive(Debug, Default, Clone)]
pub struct NixProcessProbe;

impl ProcessProbe for NixProcessProbe {
    fn pid_alive(&self, pid: u32) -> bool {
        let Ok(pid) = i32::try_from(pid) else {
            return false;
        };
        match kill(Pid::from_raw(pid), None) {
            Ok(()) => true,
            Err(nix::errno::Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

/// Manager with no processes, for environments without pm2 and for tests.
#[derive(Debug, Default, Clone)]
pub struct NullProcessManager;

#[async_trait]
impl ProcessManager for NullProcessManager {
    async fn list(&self) -> Vec<ProcessHealth> {
        vec![]
    }

    async fn restart(&self, _name: &str) -> bool {
        false
    }
}

/// Probe with a fixed answer set, for zombie-sweep tests.
#[derive(Debug, Default)]
pub struct StubProbe {
    alive: std::sync::Mutex<std::collections::HashSet<u32>>,
}

impl StubProbe {
    pub fn alive(pids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            alive: std::sync::Mutex::new(pids.into_iter().collect()),
        }
    }
}

impl ProcessProbe for StubProbe {
    fn pid_alive(&self, pid: u32) -> bool {
        self.alive.lock().unwrap().contains(&pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_jlist() {
        let raw = r#"[
            {"name": "portal", "pid": 100,
             "pm2_env": {"status": "online", "restart_time": 2},
             "monit": {"memory": 157286400, "cpu": 1}},
            {"name": "worker", "pid": 0,
             "pm2_env": {"status": "errored", "restart_time": 9},
             "monit": {"memory": 0, "cpu": 0}},
            {"name": "cron", "pid": 200,
             "pm2_env": {"status": "stopped"},
             "monit": {}}
        ]"#;
        let rows = Pm2Client::parse_jlist(raw);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].status, ProcessStatus::Online);
        assert_eq!(rows[0].memory_mb, 150);
        assert_eq!(rows[0].pid, Some(100));
        assert_eq!(rows[1].status, ProcessStatus::Errored);
        assert_eq!(rows[1].pid, None);
        assert_eq!(rows[2].status, ProcessStatus::Stopped);
    }

    #[test]
    fn test_parse_jlist_tolerates_garbage() {
        assert!(Pm2Client::parse_jlist("pm2 not installed").is_empty());
        assert!(Pm2Client::parse_jlist("{}").is_empty());
        assert!(Pm2Client::parse_jlist("[{\"nameless\": true}]").is_empty());
    }

    #[tokio::test]
    async fn test_missing_binary_lists_empty() {
        let client = Pm2Client::new("definitely-not-a-real-binary-for-tests");
        assert!(client.list().await.is_empty());
        assert!(!client.restart("anything").await);
    }

    #[test]
    fn test_stub_probe() {
        let probe = StubProbe::alive([42]);
        assert!(probe.pid_alive(42));
        assert!(!probe.pid_alive(43));
    }

    #[test]
    fn test_own_pid_is_alive() {
        let probe = NixProcessProbe;
        assert!(probe.pid_alive(std::process::id()));
    }
}
