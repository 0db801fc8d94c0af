//! Command queue implementations for Everloop.
//!
//! Implements the `CommandQueue` boundary with durable-queue semantics:
//! visibility timeouts, pop receipts, delivery counts, at-least-once
//! delivery. The external durable queue (cloud-hosted in production) is
//! consumed through the same trait.

pub mod in_memory;

pub use in_memory::InMemoryQueue;
