//! Short-term cache entries — TTL-bounded working context.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A single short-term key/value record.
///
/// A read past `expires_at` behaves as absent and triggers lazy removal;
/// the cache never resurrects an expired value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cache key
    pub key: String,

    /// The serialized value
    pub value: serde_json::Value,

    /// When this entry was written
    pub created_at: DateTime<Utc>,

    /// When this entry stops being readable (None = no expiry)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Create an entry with an optional time-to-live.
    pub fn new(key: impl Into<String>, value: serde_json::Value, ttl: Option<Duration>) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            value,
            created_at: now,
            expires_at: ttl.map(|t| now + t),
        }
    }

    /// Whether this entry has passed its expiration time.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}
