//! Error types for the Everloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Everloop operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Reasoning engine errors ---
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    // --- Store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Queue errors ---
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Engine request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by engine, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Engine not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Rate limited by storage backend")]
    RateLimited,

    #[error("Storage request timed out: {0}")]
    Timeout(String),

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Store is not initialized")]
    NotInitialized,
}

impl StoreError {
    /// Whether a retry could plausibly succeed.
    ///
    /// The retry policy only re-attempts transient failures; everything else
    /// propagates immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::RateLimited | StoreError::Timeout(_) | StoreError::Storage(_)
        )
    }
}

#[derive(Debug, Clone, Error)]
pub enum QueueError {
    #[error("Queue send failed: {0}")]
    SendFailed(String),

    #[error("Queue receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Invalid pop receipt for message {0}")]
    InvalidReceipt(String),

    #[error("Queue is unavailable: {0}")]
    Unavailable(String),
}
