//! EventBus service for domain event distribution.
//!
//! Broadcast-based fire-and-forget dispatch. Topics are well-known strings;
//! payloads are one typed enum. Per-topic FIFO holds from a single
//! publisher; slow subscribers lag and drop oldest events rather than
//! back-pressuring the publisher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::models::{
    AgentRecord, EvaluationDecision, HealthSnapshot, OnDemandRequest, RoutingSuggestion, Task,
};

/// Monotonically increasing sequence number assigned by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything that flows over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CosEvent {
    /// A task cleared admission and should be spawned.
    TaskReady { task: Task },
    TaskOnDemandRequested { request: OnDemandRequest },
    TasksChanged {
        /// Which file or generator changed.
        source: String,
    },

    AgentSpawned { agent: AgentRecord },
    AgentUpdated { agent: AgentRecord },
    AgentCompleted { agent: AgentRecord },
    AgentOutput { agent_id: String, line: String },
    /// Request to the spawner to terminate an agent's process tree.
    AgentTerminate { agent_id: String },
    AgentsChanged { action: String },

    ConfigChanged,
    Status { decision: EvaluationDecision },
    StatusPaused { reason: Option<String> },
    StatusResumed,

    HealthCheck { snapshot: HealthSnapshot },
    HealthCritical { snapshot: HealthSnapshot },

    ScheduleChanged,
    Log { level: String, message: String },
    LearningRecommendations {
        recommendations: Vec<(String, RoutingSuggestion)>,
    },
    JobSpawned { job_id: String, task_id: String },

    /// Memory-extraction boundary; the kind completes the `memory:<kind>`
    /// topic and the payload passes through opaque.
    Memory { kind: String, payload: Value },
}

impl CosEvent {
    /// The well-known topic string for this event.
    pub fn topic(&self) -> String {
        match self {
            Self::TaskReady { .. } => "task:ready".into(),
            Self::TaskOnDemandRequested { .. } => "task:on-demand-requested".into(),
            Self::TasksChanged { .. } => "tasks:changed".into(),
            Self::AgentSpawned { .. } => "agent:spawned".into(),
            Self::AgentUpdated { .. } => "agent:updated".into(),
            Self::AgentCompleted { .. } => "agent:completed".into(),
            Self::AgentOutput { .. } => "agent:output".into(),
            Self::AgentTerminate { .. } => "agent:terminate".into(),
            Self::AgentsChanged { .. } => "agents:changed".into(),
            Self::ConfigChanged => "config:changed".into(),
            Self::Status { .. } => "status".into(),
            Self::StatusPaused { .. } => "status:paused".into(),
            Self::StatusResumed => "status:resumed".into(),
            Self::HealthCheck { .. } => "health:check".into(),
            Self::HealthCritical { .. } => "health:critical".into(),
            Self::ScheduleChanged => "schedule:changed".into(),
            Self::Log { .. } => "log".into(),
            Self::LearningRecommendations { .. } => "learning:recommendations".into(),
            Self::JobSpawned { .. } => "job:spawned".into(),
            Self::Memory { kind, .. } => format!("memory:{kind}"),
        }
    }
}

/// Envelope with bus-assigned ordering metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub sequence: SequenceNumber,
    pub timestamp: DateTime<Utc>,
    pub event: CosEvent,
}

/// Configuration for the EventBus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Per-subscriber queue depth before lagging subscribers drop events.
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// Central event bus for broadcasting events to multiple consumers.
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    sequence: AtomicU64,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity);
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(EventBusConfig::default())
    }

    /// Publish an event. Send errors (no subscribers) are ignored.
    pub fn publish(&self, event: CosEvent) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(topic = %event.topic(), sequence = seq, "publish");
        let envelope = EventEnvelope {
            id: Uuid::new_v4(),
            sequence: SequenceNumber(seq),
            timestamp: Utc::now(),
            event,
        };
        let _ = self.sender.send(envelope);
    }

    /// Subscribe to the event stream. A lagging subscriber receives
    /// `RecvError::Lagged` and should log the dropped count and continue.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Get the current sequence number.
    pub fn current_sequence(&self) -> SequenceNumber {
        SequenceNumber(self.sequence.load(Ordering::SeqCst))
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_defaults()
    }
}
