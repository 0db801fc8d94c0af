//! Command queue processor — drains operator commands and dispatches them.
//!
//! The queue is shared infrastructure with at-least-once delivery, so the
//! processor tolerates redelivery (handlers are idempotent), discards poison
//! messages past the delivery-count ceiling, and deletes message kinds it
//! does not own without side effects. One bad command never aborts the batch
//! or the loop.

use async_trait::async_trait;
use chrono::Utc;
use everloop_core::queue::CommandQueue;
use everloop_core::{
    AgentSnapshot, Command, CommandKind, CommandResponse, Error, EventBus, QueueError,
    RuntimeEvent,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// The controller-side surface commands dispatch onto.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn update_prompt(&self, prompt: &str) -> Result<(), Error>;
    async fn pause(&self) -> Result<(), Error>;
    async fn resume(&self) -> Result<(), Error>;
    async fn trigger_batch_learning(&self) -> Result<(), Error>;
    async fn trigger_consolidation(&self) -> Result<(), Error>;
    async fn add_goal(&self, goal: &str) -> Result<(), Error>;
    async fn query_state(&self) -> AgentSnapshot;
}

/// Drains the durable queue and dispatches commands to a handler.
pub struct CommandProcessor {
    queue: Arc<dyn CommandQueue>,
    event_bus: Arc<EventBus>,
    /// Max messages leased per drain
    batch_size: usize,
    /// Lease duration while a message is being processed
    visibility_secs: u64,
    /// Delivery count above which a message is poison
    max_delivery_count: u32,
}

impl CommandProcessor {
    pub fn new(queue: Arc<dyn CommandQueue>, event_bus: Arc<EventBus>) -> Self {
        Self {
            queue,
            event_bus,
            batch_size: 16,
            visibility_secs: 60,
            max_delivery_count: 5,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_delivery_count(mut self, max: u32) -> Self {
        self.max_delivery_count = max;
        self
    }

    /// Enqueue a command locally (used for self-referential commands).
    pub async fn submit(&self, command: &Command) -> Result<String, QueueError> {
        let body = serde_json::to_string(command)
            .map_err(|e| QueueError::SendFailed(e.to_string()))?;
        self.queue.send(&body).await?;
        Ok(command.id.clone())
    }

    /// Drain up to one batch of pending commands and dispatch each.
    ///
    /// Messages are deleted only after their handler completes (success or
    /// handled failure), so a crash mid-processing causes safe redelivery.
    pub async fn process_pending(&self, handler: &dyn CommandHandler) -> Vec<CommandResponse> {
        let batch = match self
            .queue
            .receive(self.batch_size, self.visibility_secs)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "Failed to receive from command queue");
                return Vec::new();
            }
        };

        let mut responses = Vec::new();
        for msg in batch {
            // Poison: delivered too many times without terminal processing
            if msg.delivery_count > self.max_delivery_count {
                warn!(
                    message_id = %msg.id,
                    delivery_count = msg.delivery_count,
                    "Discarding poison message"
                );
                self.delete(&msg.id, &msg.pop_receipt).await;
                continue;
            }

            let command: Command = match serde_json::from_str(&msg.body) {
                Ok(cmd) => cmd,
                Err(e) => {
                    warn!(message_id = %msg.id, error = %e, "Discarding unparsable command");
                    self.delete(&msg.id, &msg.pop_receipt).await;
                    responses.push(CommandResponse::failed(&msg.id, format!("unparsable: {e}")));
                    continue;
                }
            };

            // The queue is shared; kinds the loop doesn't own are deleted
            // without side effects
            if command.kind == CommandKind::ChatWithAgent {
                debug!(command_id = %command.id, "Skipping chat message owned by another consumer");
                self.delete(&msg.id, &msg.pop_receipt).await;
                continue;
            }

            let response = self.dispatch(handler, &command).await;
            self.event_bus.publish(RuntimeEvent::CommandProcessed {
                command_id: command.id.clone(),
                kind: format!("{:?}", command.kind),
                success: response.success,
                timestamp: Utc::now(),
            });

            // Delete after the handler finished, success or handled failure
            self.delete(&msg.id, &msg.pop_receipt).await;
            responses.push(response);
        }
        responses
    }

    async fn dispatch(&self, handler: &dyn CommandHandler, command: &Command) -> CommandResponse {
        let result = match command.kind {
            CommandKind::UpdatePrompt => handler.update_prompt(&command.content).await,
            CommandKind::PauseAgent => handler.pause().await,
            CommandKind::ResumeAgent => handler.resume().await,
            CommandKind::TriggerBatchLearning => handler.trigger_batch_learning().await,
            CommandKind::TriggerMemoryConsolidation => handler.trigger_consolidation().await,
            CommandKind::AddGoal => handler.add_goal(&command.content).await,
            CommandKind::QueryState => {
                let snapshot = handler.query_state().await;
                let data = serde_json::to_value(&snapshot).unwrap_or_default();
                return CommandResponse::ok(&command.id, "state snapshot").with_data(data);
            }
            // Filtered above; kept for exhaustiveness
            CommandKind::ChatWithAgent => Ok(()),
        };

        match result {
            Ok(()) => CommandResponse::ok(&command.id, format!("{:?} applied", command.kind)),
            Err(e) => {
                warn!(command_id = %command.id, kind = ?command.kind, error = %e, "Command handler failed");
                CommandResponse::failed(&command.id, e.to_string())
            }
        }
    }

    async fn delete(&self, id: &str, receipt: &str) {
        if let Err(e) = self.queue.delete(id, receipt).await {
            // Redelivery is safe: handlers are idempotent
            warn!(message_id = %id, error = %e, "Failed to delete queue message");
        }
    }
}
