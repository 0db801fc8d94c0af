//! # Everloop Core
//!
//! Domain types, traits, and error definitions for the Everloop autonomous
//! agent runtime. This crate has **zero framework dependencies** — it defines
//! the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external boundary (reasoning engine, durable queue, object store) is
//! defined as a trait here. Implementations live in their respective crates.
//! This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod blob;
pub mod cache;
pub mod command;
pub mod engine;
pub mod entry;
pub mod error;
pub mod event;
pub mod queue;
pub mod state;
pub mod usage;

// Re-export key types at crate root for ergonomics
pub use blob::{BlobMetadata, BlobStore, ListedBlob};
pub use cache::CacheEntry;
pub use command::{Command, CommandKind, CommandResponse};
pub use engine::{EngineReply, ReasoningEngine, ToolInvocation};
pub use entry::{EntryKind, MemoryEntry};
pub use error::{EngineError, Error, QueueError, Result, StoreError};
pub use event::{EventBus, RuntimeEvent};
pub use queue::{CommandQueue, QueuedMessage};
pub use state::{ActionRecord, ActionStatus, AgentSnapshot, AgentStatus, Thought, ThoughtKind};
pub use usage::UsageRecord;
