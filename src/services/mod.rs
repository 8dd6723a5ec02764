//! Application services for the CoS supervisor.

pub mod agent_registry;
pub mod event_bus;
pub mod learning_store;
pub mod orchestrator;
pub mod reports;
pub mod schedule_store;
pub mod state_store;

pub use agent_registry::{AgentPatch, AgentRegistry, RegistryError, SCROLLBACK_LINES};
pub use event_bus::{CosEvent, EventBus, EventBusConfig, EventEnvelope, SequenceNumber};
pub use learning_store::{classify_task, LearningStore, REHABILITATION_GRACE_MS};
pub use orchestrator::{DecisionLog, EvaluationOutcome, Orchestrator};
pub use reports::{DailyReport, ReportService};
pub use schedule_store::{NextReason, ScheduleDecision, ScheduleReason, ScheduleStore};
pub use state_store::StateStore;
