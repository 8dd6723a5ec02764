//! Domain ports (interfaces) for the CoS supervisor's collaborators.

pub mod proactive;
pub mod spawner;
pub mod task_source;

pub use proactive::{NullProactiveSource, ProactiveSource};
pub use spawner::{AgentProcessStats, NullSpawner, SpawnerHandle, StubSpawner};
pub use task_source::{NullTaskSource, TaskSource};
