//! In-process queue with durable-queue semantics.
//!
//! Faithful to the external boundary: leased messages become invisible for
//! the visibility timeout and reappear with an incremented delivery count if
//! not deleted — which is exactly how poison messages accumulate delivery
//! counts. Creation is lazy and idempotent (the first send "creates" the
//! queue).

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use everloop_core::queue::{CommandQueue, QueuedMessage};
use everloop_core::QueueError;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

struct StoredMessage {
    id: String,
    body: String,
    inserted_at: DateTime<Utc>,
    delivery_count: u32,
    /// When this message becomes receivable again
    visible_at: DateTime<Utc>,
    /// Current lease token; stale receipts cannot delete
    pop_receipt: Option<String>,
}

/// An in-memory FIFO queue with visibility timeouts and pop receipts.
pub struct InMemoryQueue {
    messages: Arc<Mutex<Vec<StoredMessage>>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            messages: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandQueue for InMemoryQueue {
    async fn send(&self, body: &str) -> Result<String, QueueError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        self.messages.lock().await.push(StoredMessage {
            id: id.clone(),
            body: body.to_string(),
            inserted_at: now,
            delivery_count: 0,
            visible_at: now,
            pop_receipt: None,
        });
        debug!(message_id = %id, "Enqueued message");
        Ok(id)
    }

    async fn receive(
        &self,
        max_count: usize,
        visibility_secs: u64,
    ) -> Result<Vec<QueuedMessage>, QueueError> {
        let now = Utc::now();
        let visibility = Duration::seconds(visibility_secs as i64);
        let mut messages = self.messages.lock().await;

        let mut leased = Vec::new();
        for msg in messages.iter_mut() {
            if leased.len() >= max_count {
                break;
            }
            if msg.visible_at > now {
                continue;
            }
            msg.delivery_count += 1;
            msg.visible_at = now + visibility;
            let receipt = Uuid::new_v4().to_string();
            msg.pop_receipt = Some(receipt.clone());

            leased.push(QueuedMessage {
                id: msg.id.clone(),
                pop_receipt: receipt,
                body: msg.body.clone(),
                delivery_count: msg.delivery_count,
                inserted_at: msg.inserted_at,
            });
        }
        Ok(leased)
    }

    async fn delete(&self, id: &str, pop_receipt: &str) -> Result<(), QueueError> {
        let mut messages = self.messages.lock().await;
        let Some(pos) = messages.iter().position(|m| m.id == id) else {
            // Already deleted — at-least-once consumers may race; not an error
            return Ok(());
        };
        if messages[pos].pop_receipt.as_deref() != Some(pop_receipt) {
            return Err(QueueError::InvalidReceipt(id.to_string()));
        }
        messages.remove(pos);
        Ok(())
    }

    async fn approximate_count(&self) -> Result<usize, QueueError> {
        Ok(self.messages.lock().await.len())
    }

    async fn clear(&self) -> Result<(), QueueError> {
        self.messages.lock().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_receive_and_delete() {
        let q = InMemoryQueue::new();
        q.send("first").await.unwrap();
        q.send("second").await.unwrap();

        let batch = q.receive(10, 30).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].body, "first");
        assert_eq!(batch[0].delivery_count, 1);

        q.delete(&batch[0].id, &batch[0].pop_receipt).await.unwrap();
        assert_eq!(q.approximate_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn leased_messages_are_invisible() {
        let q = InMemoryQueue::new();
        q.send("m").await.unwrap();

        let first = q.receive(10, 30).await.unwrap();
        assert_eq!(first.len(), 1);
        // Still leased — nothing to receive
        assert!(q.receive(10, 30).await.unwrap().is_empty());
        // But still counted
        assert_eq!(q.approximate_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expired_lease_redelivers_with_higher_count() {
        let q = InMemoryQueue::new();
        q.send("m").await.unwrap();

        let first = q.receive(10, 0).await.unwrap();
        assert_eq!(first[0].delivery_count, 1);

        // Zero visibility: immediately receivable again
        let second = q.receive(10, 30).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].delivery_count, 2);
        assert_ne!(second[0].pop_receipt, first[0].pop_receipt);
    }

    #[tokio::test]
    async fn stale_receipt_cannot_delete() {
        let q = InMemoryQueue::new();
        q.send("m").await.unwrap();

        let first = q.receive(10, 0).await.unwrap();
        let second = q.receive(10, 30).await.unwrap();

        // The first lease's receipt is stale after redelivery
        let err = q.delete(&first[0].id, &first[0].pop_receipt).await;
        assert!(matches!(err, Err(QueueError::InvalidReceipt(_))));

        q.delete(&second[0].id, &second[0].pop_receipt).await.unwrap();
        assert_eq!(q.approximate_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_of_missing_message_is_idempotent() {
        let q = InMemoryQueue::new();
        q.delete("gone", "receipt").await.unwrap();
    }

    #[tokio::test]
    async fn receive_respects_batch_bound() {
        let q = InMemoryQueue::new();
        for i in 0..5 {
            q.send(&format!("m{i}")).await.unwrap();
        }
        let batch = q.receive(3, 30).await.unwrap();
        assert_eq!(batch.len(), 3);
    }

    #[tokio::test]
    async fn clear_empties_the_queue() {
        let q = InMemoryQueue::new();
        q.send("a").await.unwrap();
        q.clear().await.unwrap();
        assert_eq!(q.approximate_count().await.unwrap(), 0);
    }
}
