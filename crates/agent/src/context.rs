//! Context assembly — selecting what the agent should remember right now.
//!
//! Pulls recent long-term entries, ranks them by a blend of importance and
//! recency, and renders a compact prompt section grouped by kind. Only the
//! most important entries carry their full content; the rest contribute a
//! summary line, keeping the prompt bounded no matter how much history
//! accumulates.

use chrono::Utc;
use everloop_core::{MemoryEntry, StoreError};
use everloop_store::LongTermMemory;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

const IMPORTANCE_WEIGHT: f32 = 0.7;
const RECENCY_WEIGHT: f32 = 0.3;
/// Recency decays linearly to zero over this many days
const RECENCY_HORIZON_DAYS: f32 = 30.0;
/// Entries at or above this importance are rendered in full
const FULL_CONTENT_FLOOR: f32 = 0.8;
const FETCH_CAP: usize = 200;

pub struct ContextBuilder {
    long_term: Arc<LongTermMemory>,
    /// Entries included in a rendered context
    max_entries: usize,
}

impl ContextBuilder {
    pub fn new(long_term: Arc<LongTermMemory>) -> Self {
        Self {
            long_term,
            max_entries: 25,
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    /// The top-ranked recent entries, best first.
    pub async fn select(&self) -> Result<Vec<MemoryEntry>, StoreError> {
        let mut candidates = self.long_term.recent(FETCH_CAP).await?;
        candidates.sort_by(|a, b| {
            rank(b)
                .partial_cmp(&rank(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(self.max_entries);
        Ok(candidates)
    }

    /// Render the ranked selection as a prompt section.
    ///
    /// Empty history renders to an empty string so callers can skip the
    /// section entirely.
    pub async fn build(&self) -> Result<String, StoreError> {
        let selected = self.select().await?;
        if selected.is_empty() {
            return Ok(String::new());
        }

        let mut by_kind: BTreeMap<String, Vec<&MemoryEntry>> = BTreeMap::new();
        for entry in &selected {
            by_kind.entry(entry.kind.to_string()).or_default().push(entry);
        }

        let mut out = String::from("## Relevant memories\n");
        for (kind, entries) in &by_kind {
            out.push_str(&format!("\n### {}\n", heading(kind)));
            for entry in entries {
                if entry.importance >= FULL_CONTENT_FLOOR {
                    out.push_str(&format!(
                        "- [{:.2}] {}\n  {}\n",
                        entry.importance,
                        entry.summary,
                        entry.content.replace('\n', "\n  ")
                    ));
                } else {
                    out.push_str(&format!("- [{:.2}] {}\n", entry.importance, entry.summary));
                }
            }
        }

        debug!(
            entries = selected.len(),
            kinds = by_kind.len(),
            chars = out.len(),
            "Built memory context"
        );
        Ok(out)
    }
}

/// Blend of importance and linear recency decay.
fn rank(entry: &MemoryEntry) -> f32 {
    let age_days = entry.age_days(Utc::now()) as f32;
    let recency = (1.0 - age_days / RECENCY_HORIZON_DAYS).max(0.0);
    entry.importance * IMPORTANCE_WEIGHT + recency * RECENCY_WEIGHT
}

fn heading(kind: &str) -> &str {
    match kind {
        "observation" => "Observations",
        "learning" => "Learnings",
        "code_change" => "Code changes",
        "decision" => "Decisions",
        "reflection" => "Reflections",
        "error" => "Errors",
        "success" => "Successes",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use everloop_core::entry::sortable_id;
    use everloop_core::EntryKind;
    use everloop_store::InMemoryBlobStore;

    fn builder() -> (Arc<LongTermMemory>, ContextBuilder) {
        let mem = Arc::new(LongTermMemory::new(Arc::new(InMemoryBlobStore::new())));
        (mem.clone(), ContextBuilder::new(mem))
    }

    fn aged(kind: EntryKind, summary: &str, importance: f32, days_old: i64) -> MemoryEntry {
        let mut e = MemoryEntry::new(kind, format!("content of {summary}"), summary)
            .with_importance(importance);
        e.created_at = Utc::now() - Duration::days(days_old);
        e.id = sortable_id(e.created_at);
        e
    }

    #[tokio::test]
    async fn importance_dominates_but_recency_breaks_ties() {
        let (mem, b) = builder();
        mem.store(aged(EntryKind::Learning, "old but vital", 0.9, 20))
            .await
            .unwrap();
        mem.store(aged(EntryKind::Observation, "fresh but minor", 0.2, 0))
            .await
            .unwrap();
        mem.store(aged(EntryKind::Observation, "fresh twin", 0.5, 0))
            .await
            .unwrap();
        mem.store(aged(EntryKind::Observation, "stale twin", 0.5, 25))
            .await
            .unwrap();

        let ranked = b.select().await.unwrap();
        assert_eq!(ranked[0].summary, "old but vital");
        let fresh = ranked.iter().position(|e| e.summary == "fresh twin").unwrap();
        let stale = ranked.iter().position(|e| e.summary == "stale twin").unwrap();
        assert!(fresh < stale);
    }

    #[tokio::test]
    async fn selection_is_bounded() {
        let (mem, b) = builder();
        let b = b.with_max_entries(3);
        for i in 0..10 {
            mem.store(aged(EntryKind::Observation, &format!("e{i}"), 0.5, 0))
                .await
                .unwrap();
        }
        assert_eq!(b.select().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn full_content_only_for_high_importance() {
        let (mem, b) = builder();
        mem.store(aged(EntryKind::Decision, "critical call", 0.9, 1))
            .await
            .unwrap();
        mem.store(aged(EntryKind::Decision, "routine call", 0.5, 1))
            .await
            .unwrap();

        let rendered = b.build().await.unwrap();
        assert!(rendered.contains("content of critical call"));
        assert!(rendered.contains("routine call"));
        assert!(!rendered.contains("content of routine call"));
    }

    #[tokio::test]
    async fn grouped_by_kind_with_headings() {
        let (mem, b) = builder();
        mem.store(aged(EntryKind::Error, "it broke", 0.6, 1)).await.unwrap();
        mem.store(aged(EntryKind::Learning, "it taught", 0.6, 1))
            .await
            .unwrap();

        let rendered = b.build().await.unwrap();
        assert!(rendered.contains("### Errors"));
        assert!(rendered.contains("### Learnings"));
    }

    #[tokio::test]
    async fn empty_history_renders_empty() {
        let (_, b) = builder();
        assert_eq!(b.build().await.unwrap(), "");
    }
}
