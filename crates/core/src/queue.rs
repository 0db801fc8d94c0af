//! Durable queue trait — the boundary to the external command queue.
//!
//! Delivery is at-least-once: a message that is received but not deleted
//! before its visibility timeout elapses becomes visible again with an
//! incremented delivery count. Queue creation is lazy and idempotent (the
//! first send creates the queue if absent).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::QueueError;

/// A message leased from the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// Queue-assigned message id
    pub id: String,
    /// Lease token; required to delete the message
    pub pop_receipt: String,
    /// The serialized message body
    pub body: String,
    /// How many times this message has been delivered (1 on first receive)
    pub delivery_count: u32,
    /// When the message was first enqueued
    pub inserted_at: DateTime<Utc>,
}

/// The durable queue boundary.
#[async_trait]
pub trait CommandQueue: Send + Sync {
    /// Enqueue a message body. Creates the queue if it does not exist.
    async fn send(&self, body: &str) -> std::result::Result<String, QueueError>;

    /// Lease up to `max_count` messages for `visibility_secs` seconds.
    async fn receive(
        &self,
        max_count: usize,
        visibility_secs: u64,
    ) -> std::result::Result<Vec<QueuedMessage>, QueueError>;

    /// Delete a leased message. Fails if the receipt is stale.
    async fn delete(&self, id: &str, pop_receipt: &str) -> std::result::Result<(), QueueError>;

    /// Approximate number of messages currently in the queue.
    async fn approximate_count(&self) -> std::result::Result<usize, QueueError>;

    /// Remove all messages.
    async fn clear(&self) -> std::result::Result<(), QueueError>;
}
