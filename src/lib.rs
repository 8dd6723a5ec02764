//! CoS - a personal autonomous-operations supervisor.
//!
//! The core is a task orchestration engine: an evaluation loop over the
//! user-authored and system-generated task lists, an adaptive scheduler
//! (interval + rotation + on-demand + learning-adjusted cooldowns), a
//! concurrency admission controller, an agent lifecycle registry with
//! zombie cleanup, and a learning feedback store that tunes future
//! scheduling. External collaborators (the sub-agent spawner, the task-file
//! parser surface, the HTTP facade) connect through ports and the event
//! bus.

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export the main entry points for convenience
pub use services::{EventBus, LearningStore, Orchestrator, ScheduleStore, StateStore};
