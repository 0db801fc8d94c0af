//! Tiered memory for Everloop.
//!
//! Two tiers over one blob boundary:
//! - **Short-term**: TTL-bounded key/value cache for working context
//! - **Long-term**: durable, searchable, append-mostly store of scored
//!   knowledge entries, partitioned by calendar date
//!
//! Every blob operation goes through a retry policy (exponential backoff
//! with jitter, transient failures only). If a tier is constructed in
//! degraded mode — e.g. no connectivity at startup — every operation becomes
//! a logged no-op so the control loop keeps running without persistence.

pub mod file_blob;
pub mod in_memory;
pub mod long_term;
pub mod retry;
pub mod short_term;

pub use file_blob::FileBlobStore;
pub use in_memory::InMemoryBlobStore;
pub use long_term::LongTermMemory;
pub use retry::RetryPolicy;
pub use short_term::ShortTermMemory;
