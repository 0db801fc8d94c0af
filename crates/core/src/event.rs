//! Runtime event system — decoupled communication between components.
//!
//! Events are published when something interesting happens in the loop.
//! Observers can subscribe to react without tight coupling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use crate::state::AgentStatus;

/// All runtime events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RuntimeEvent {
    /// One control-loop iteration finished
    LoopCompleted {
        iteration: u64,
        status: AgentStatus,
        timestamp: DateTime<Utc>,
    },

    /// The reasoning engine was asked a question
    EngineAsked {
        conversation: String,
        estimated_tokens: u64,
        tool_invocations: usize,
        timestamp: DateTime<Utc>,
    },

    /// An operator command was processed
    CommandProcessed {
        command_id: String,
        kind: String,
        success: bool,
        timestamp: DateTime<Utc>,
    },

    /// The governor denied an iteration
    GovernorDenied {
        reason: String,
        consecutive_denials: u32,
        timestamp: DateTime<Utc>,
    },

    /// A consolidation batch finished
    ConsolidationFinished {
        promoted: usize,
        learnings: usize,
        evicted: usize,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred somewhere in the runtime
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for runtime events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Components can
/// subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<RuntimeEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: RuntimeEvent) {
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RuntimeEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(RuntimeEvent::GovernorDenied {
            reason: "loop limit".into(),
            consecutive_denials: 3,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            RuntimeEvent::GovernorDenied {
                reason,
                consecutive_denials,
                ..
            } => {
                assert_eq!(reason, "loop limit");
                assert_eq!(*consecutive_denials, 3);
            }
            _ => panic!("Expected GovernorDenied event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(RuntimeEvent::ErrorOccurred {
            context: "test".into(),
            error_message: "no subscribers".into(),
            timestamp: Utc::now(),
        });
    }
}
