//! Bounded ring of evaluation decisions.
//!
//! The status surface reads this to explain why an evaluation took no
//! action; it is in-memory only and restarts empty.

use std::collections::VecDeque;
use tokio::sync::RwLock;

use crate::domain::models::EvaluationDecision;

pub const DEFAULT_DECISION_CAPACITY: usize = 200;

pub struct DecisionLog {
    ring: RwLock<VecDeque<EvaluationDecision>>,
    capacity: usize,
}

impl DecisionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_DECISION_CAPACITY)
    }

    pub async fn record(&self, decision: EvaluationDecision) {
        let mut ring = self.ring.write().await;
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(decision);
    }

    /// Most recent decisions, newest last.
    pub async fn recent(&self, n: usize) -> Vec<EvaluationDecision> {
        let ring = self.ring.read().await;
        ring.iter().rev().take(n).rev().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.ring.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ring.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::DecisionReason;

    #[tokio::test]
    async fn test_ring_is_bounded() {
        let log = DecisionLog::new(3);
        for i in 0..5 {
            log.record(
                EvaluationDecision::new(DecisionReason::Idle).detail(format!("tick {i}")),
            )
            .await;
        }
        assert_eq!(log.len().await, 3);
        let recent = log.recent(10).await;
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].detail.as_deref(), Some("tick 2"));
        assert_eq!(recent[2].detail.as_deref(), Some("tick 4"));
    }

    #[tokio::test]
    async fn test_recent_limits() {
        let log = DecisionLog::with_defaults();
        for _ in 0..10 {
            log.record(EvaluationDecision::new(DecisionReason::Dispatched)).await;
        }
        assert_eq!(log.recent(4).await.len(), 4);
    }
}
