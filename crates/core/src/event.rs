//! Domain event system — observe runs without coupling to the engines.
//!
//! Task engines, agents and pipes publish events as they make progress.
//! Embedders subscribe and filter for what they care about.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::provider::Usage;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A sequential step finished (successfully or not)
    StepCompleted {
        operation: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A parallel block joined
    ParallelBlockCompleted {
        successes: usize,
        failures: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// An agent's goal check produced a verdict (or failed to parse)
    GoalChecked {
        agent: String,
        attempt: u32,
        satisfied: bool,
        timestamp: DateTime<Utc>,
    },

    /// An agent finished all its attempts
    AgentFinished {
        agent: String,
        attempts: u32,
        satisfied: bool,
        usage: Usage,
        timestamp: DateTime<Utc>,
    },

    /// A pipe stopped early on an unsatisfied agent
    PipeHalted {
        agent: String,
        completed_agents: usize,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Publish on an optional bus.
pub fn emit(bus: Option<&Arc<EventBus>>, event: DomainEvent) {
    if let Some(bus) = bus {
        bus.publish(event);
    }
}
