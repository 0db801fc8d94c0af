//! Long-term memory entries — durable units of knowledge.
//!
//! Entries are append-only: consolidation creates *new* entries referencing
//! their sources, it never rewrites stored content in place. The only hard
//! deletion path is the consolidation engine's eviction pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The closed set of knowledge kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Observation,
    Learning,
    CodeChange,
    Decision,
    Reflection,
    Error,
    Success,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Observation => write!(f, "observation"),
            Self::Learning => write!(f, "learning"),
            Self::CodeChange => write!(f, "code_change"),
            Self::Decision => write!(f, "decision"),
            Self::Reflection => write!(f, "reflection"),
            Self::Error => write!(f, "error"),
            Self::Success => write!(f, "success"),
        }
    }
}

/// A single unit of durable knowledge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique, time-sortable ID. Immutable after creation.
    pub id: String,

    /// When this entry was created
    pub created_at: DateTime<Utc>,

    /// What kind of knowledge this is
    pub kind: EntryKind,

    /// Full content (unbounded text)
    pub content: String,

    /// A short human-readable summary
    pub summary: String,

    /// Arbitrary string metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,

    /// Tags for categorization and search
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Importance score, always in [0.0, 1.0]
    pub importance: f32,

    /// How many times this entry has been read
    #[serde(default)]
    pub access_count: u32,

    /// When this entry was last read
    pub last_accessed: DateTime<Utc>,
}

impl MemoryEntry {
    /// Create a new entry with a freshly minted time-sortable id.
    pub fn new(kind: EntryKind, content: impl Into<String>, summary: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: sortable_id(now),
            created_at: now,
            kind,
            content: content.into(),
            summary: summary.into(),
            metadata: HashMap::new(),
            tags: Vec::new(),
            importance: 0.5,
            access_count: 0,
            last_accessed: now,
        }
    }

    /// Set the importance, clamped to [0.0, 1.0].
    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Add a metadata key/value pair.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Record a read access.
    pub fn touch(&mut self) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed = Utc::now();
    }

    /// Age of this entry relative to `now`, in whole days.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.created_at).num_days()
    }
}

/// Mint a time-sortable opaque id: zero-padded unix millis + uuid v4.
///
/// Lexical ordering equals creation ordering at millisecond granularity.
pub fn sortable_id(at: DateTime<Utc>) -> String {
    format!("{:013}-{}", at.timestamp_millis().max(0), Uuid::new_v4())
}
