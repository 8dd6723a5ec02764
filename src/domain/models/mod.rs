//! Domain models
//!
//! Pure domain entities with business logic and validation rules.
//! These models are framework-agnostic and contain no infrastructure concerns.

pub mod agent;
pub mod config;
pub mod decision;
pub mod learning;
pub mod schedule;
pub mod state;
pub mod task;

pub use agent::{
    AgentRecord, AgentResult, AgentStatus, ErrorAnalysis, ErrorCategory, ModelTier,
};
pub use config::{AppConfig, CosConfig};
pub use decision::{DecisionReason, EvaluationDecision};
pub use learning::{
    BucketStats, CooldownAdjustment, CooldownPolicy, ErrorPattern, LearningDocument,
    LearningTotals, RoutingCell, RoutingSuggestion, UnknownErrorSample, LEARNING_VERSION,
    MAX_UNKNOWN_SAMPLES,
};
pub use schedule::{
    execution_key, migrate_v1, AppOverride, ExecutionBucket, IntervalType, OnDemandRequest,
    PerAppExecution, ScheduleDocument, ScheduleEntry, V1ScheduleDocument, DAY_MS,
    SCHEDULE_VERSION, WEEK_MS,
};
pub use state::{CosState, CosStats, HealthSnapshot, ProcessHealth, ProcessStatus};
pub use task::{Task, TaskMetadata, TaskOrigin, TaskPriority, TaskStatus};
