//! Long-term memory — durable, searchable, append-mostly entry store.
//!
//! Entries are partitioned by calendar date (`memory/YYYY/MM/DD/{id}`) for
//! write locality and bounded-cost scans. Lookups without a usable date hint
//! in the id degrade to scanning a bounded recent window (default 30 days)
//! rather than the entire history — a deliberate cost/completeness tradeoff
//! carried over from the original design, not a bug.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use everloop_core::blob::{BlobMetadata, BlobStore};
use everloop_core::{EntryKind, MemoryEntry, StoreError};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::retry::RetryPolicy;

const MEMORY_PREFIX: &str = "memory/";
const SUMMARY_SIDECAR_LEN: usize = 120;
const SIDECAR_TAG_LIMIT: usize = 5;

/// The long-term tier.
pub struct LongTermMemory {
    store: Option<Arc<dyn BlobStore>>,
    retry: RetryPolicy,
    /// How many days of partitions an id-less scan covers
    scan_window_days: i64,
}

impl LongTermMemory {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store: Some(store),
            retry: RetryPolicy::default(),
            scan_window_days: 30,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_scan_window_days(mut self, days: i64) -> Self {
        self.scan_window_days = days.max(1);
        self
    }

    /// A degraded instance whose operations are all no-ops.
    pub fn disabled() -> Self {
        warn!("Long-term memory unavailable — operating without durable knowledge");
        Self {
            store: None,
            retry: RetryPolicy::default(),
            scan_window_days: 30,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Store an entry, returning its id. Importance is clamped to [0, 1].
    pub async fn store(&self, mut entry: MemoryEntry) -> Result<String, StoreError> {
        let Some(store) = &self.store else {
            debug!(kind = %entry.kind, "Long-term store skipped (store disabled)");
            return Ok(entry.id);
        };

        entry.importance = entry.importance.clamp(0.0, 1.0);
        let path = entry_path(entry.created_at.date_naive(), &entry.id);
        let bytes = serde_json::to_vec(&entry)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let metadata = sidecar(&entry);

        self.retry
            .run("long_term.store", || {
                store.put(&path, bytes.clone(), metadata.clone())
            })
            .await?;
        Ok(entry.id)
    }

    /// Fetch an entry by id, recording the access.
    ///
    /// Uses the id's embedded timestamp as a date hint when present;
    /// otherwise scans the bounded recent window.
    pub async fn get(&self, id: &str) -> Result<Option<MemoryEntry>, StoreError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let Some(path) = self.find_path(id).await? else {
            return Ok(None);
        };
        let Some(mut entry) = self.load(&path).await? else {
            return Ok(None);
        };

        entry.touch();
        // Access tracking is the one permitted in-place update; failures
        // here must not hide the entry from the caller
        let bytes = serde_json::to_vec(&entry)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        if let Err(e) = store.put(&path, bytes, sidecar(&entry)).await {
            warn!(id, error = %e, "Failed to persist access tracking");
        }
        Ok(Some(entry))
    }

    /// Substring search over content, summary, and tags; newest first.
    ///
    /// Bounded to the recent scan window.
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<MemoryEntry>, StoreError> {
        let needle = query.to_lowercase();
        self.scan_window(max_results, |entry| {
            entry.content.to_lowercase().contains(&needle)
                || entry.summary.to_lowercase().contains(&needle)
                || entry.tags.iter().any(|t| t.to_lowercase().contains(&needle))
        })
        .await
    }

    /// The newest `count` entries in the scan window.
    pub async fn recent(&self, count: usize) -> Result<Vec<MemoryEntry>, StoreError> {
        self.scan_window(count, |_| true).await
    }

    /// The newest entries within an explicit window, overriding the default.
    ///
    /// Used by the eviction pass, which must see entries old enough to be
    /// outdated while still keeping the scan cost bounded.
    pub async fn recent_days(
        &self,
        days: i64,
        max_results: usize,
    ) -> Result<Vec<MemoryEntry>, StoreError> {
        self.scan_days(days.max(1), max_results, |_| true).await
    }

    /// The newest entries of one kind, up to `max_results`.
    ///
    /// Filters on the metadata sidecar before fetching content.
    pub async fn by_kind(
        &self,
        kind: EntryKind,
        max_results: usize,
    ) -> Result<Vec<MemoryEntry>, StoreError> {
        let Some(store) = &self.store else {
            return Ok(Vec::new());
        };

        let kind_str = kind.to_string();
        let mut results = Vec::new();
        for day in self.window_days() {
            if results.len() >= max_results {
                break;
            }
            let prefix = day_prefix(day);
            let mut listed = self
                .retry
                .run("long_term.by_kind", || store.list_prefix(&prefix))
                .await?;
            listed.sort_by(|a, b| b.path.cmp(&a.path));
            for blob in listed {
                if results.len() >= max_results {
                    break;
                }
                if blob.metadata.get("kind").map(String::as_str) != Some(kind_str.as_str()) {
                    continue;
                }
                if let Some(entry) = self.load(&blob.path).await? {
                    results.push(entry);
                }
            }
        }
        Ok(results)
    }

    /// Delete an entry by id; returns whether it existed.
    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let Some(path) = self.find_path(id).await? else {
            return Ok(false);
        };
        self.retry
            .run("long_term.delete", || store.delete(&path))
            .await
    }

    /// Total entry count across all partitions.
    pub async fn count(&self) -> Result<usize, StoreError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let listed = self
            .retry
            .run("long_term.count", || store.list_prefix(MEMORY_PREFIX))
            .await?;
        Ok(listed.len())
    }

    // ── Internals ─────────────────────────────────────────────────────

    /// Dates covered by a scan window, newest first.
    fn days_of(window: i64) -> impl Iterator<Item = NaiveDate> {
        let today = Utc::now().date_naive();
        (0..window).filter_map(move |offset| today.checked_sub_signed(Duration::days(offset)))
    }

    fn window_days(&self) -> impl Iterator<Item = NaiveDate> {
        Self::days_of(self.scan_window_days)
    }

    /// Scan the default window newest-first, collecting entries that pass `keep`.
    async fn scan_window<F>(
        &self,
        max_results: usize,
        keep: F,
    ) -> Result<Vec<MemoryEntry>, StoreError>
    where
        F: Fn(&MemoryEntry) -> bool,
    {
        self.scan_days(self.scan_window_days, max_results, keep).await
    }

    /// Scan an explicit window newest-first.
    async fn scan_days<F>(
        &self,
        window: i64,
        max_results: usize,
        keep: F,
    ) -> Result<Vec<MemoryEntry>, StoreError>
    where
        F: Fn(&MemoryEntry) -> bool,
    {
        let Some(store) = &self.store else {
            return Ok(Vec::new());
        };

        let mut results = Vec::new();
        for day in Self::days_of(window) {
            if results.len() >= max_results {
                break;
            }
            let prefix = day_prefix(day);
            let mut listed = self
                .retry
                .run("long_term.scan", || store.list_prefix(&prefix))
                .await?;
            // Ids are time-sortable, so descending path order is newest first
            listed.sort_by(|a, b| b.path.cmp(&a.path));
            for blob in listed {
                if results.len() >= max_results {
                    break;
                }
                if let Some(entry) = self.load(&blob.path).await? {
                    if keep(&entry) {
                        results.push(entry);
                    }
                }
            }
        }
        Ok(results)
    }

    /// Locate the blob path for an id.
    async fn find_path(&self, id: &str) -> Result<Option<String>, StoreError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };

        // Fast path: the id prefix encodes the creation date
        if let Some(date) = date_hint(id) {
            let path = entry_path(date, id);
            if self
                .retry
                .run("long_term.exists", || store.exists(&path))
                .await?
            {
                return Ok(Some(path));
            }
        }

        // Slow path: bounded window scan
        let suffix = format!("/{id}");
        for day in self.window_days() {
            let prefix = day_prefix(day);
            let listed = self
                .retry
                .run("long_term.find", || store.list_prefix(&prefix))
                .await?;
            if let Some(blob) = listed.into_iter().find(|b| b.path.ends_with(&suffix)) {
                return Ok(Some(blob.path));
            }
        }
        Ok(None)
    }

    async fn load(&self, path: &str) -> Result<Option<MemoryEntry>, StoreError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let bytes = self.retry.run("long_term.load", || store.get(path)).await?;
        let Some(bytes) = bytes else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(path, error = %e, "Skipping unreadable memory entry");
                Ok(None)
            }
        }
    }
}

fn day_prefix(day: NaiveDate) -> String {
    format!("{MEMORY_PREFIX}{}", day.format("%Y/%m/%d/"))
}

fn entry_path(day: NaiveDate, id: &str) -> String {
    format!("{}{id}", day_prefix(day))
}

/// Extract the creation date from a time-sortable id, if well-formed.
fn date_hint(id: &str) -> Option<NaiveDate> {
    let millis: i64 = id.split('-').next()?.parse().ok()?;
    Some(DateTime::from_timestamp_millis(millis)?.date_naive())
}

/// Build the indexed metadata sidecar for an entry.
fn sidecar(entry: &MemoryEntry) -> BlobMetadata {
    let mut m = BlobMetadata::new();
    m.insert("kind".into(), entry.kind.to_string());
    m.insert("importance".into(), format!("{:.3}", entry.importance));
    m.insert("timestamp".into(), entry.created_at.to_rfc3339());
    m.insert(
        "summary".into(),
        entry.summary.chars().take(SUMMARY_SIDECAR_LEN).collect(),
    );
    let tags: Vec<&str> = entry
        .tags
        .iter()
        .take(SIDECAR_TAG_LIMIT)
        .map(String::as_str)
        .collect();
    if !tags.is_empty() {
        m.insert("tags".into(), tags.join(","));
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryBlobStore;

    fn memory() -> LongTermMemory {
        LongTermMemory::new(Arc::new(InMemoryBlobStore::new()))
    }

    fn entry(kind: EntryKind, content: &str) -> MemoryEntry {
        MemoryEntry::new(kind, content, &content[..content.len().min(20)])
    }

    #[tokio::test]
    async fn store_then_get_round_trips() {
        let mem = memory();
        let original = entry(EntryKind::Decision, "chose the queue visibility timeout")
            .with_importance(0.7)
            .with_tag("loop");
        let id = mem.store(original.clone()).await.unwrap();

        let fetched = mem.get(&id).await.unwrap().unwrap();
        assert_eq!(fetched.id, original.id);
        assert_eq!(fetched.content, original.content);
        assert_eq!(fetched.kind, original.kind);
        assert_eq!(fetched.tags, original.tags);
        // Only access tracking differs
        assert_eq!(fetched.access_count, original.access_count + 1);
        assert!(fetched.last_accessed >= original.last_accessed);
    }

    #[tokio::test]
    async fn get_records_each_access() {
        let mem = memory();
        let id = mem.store(entry(EntryKind::Observation, "x")).await.unwrap();
        mem.get(&id).await.unwrap();
        mem.get(&id).await.unwrap();
        let e = mem.get(&id).await.unwrap().unwrap();
        assert_eq!(e.access_count, 3);
    }

    #[tokio::test]
    async fn search_matches_content_summary_and_tags() {
        let mem = memory();
        mem.store(entry(EntryKind::Observation, "the governor denied a loop"))
            .await
            .unwrap();
        mem.store(
            MemoryEntry::new(EntryKind::Learning, "unrelated", "about retries").with_tag("backoff"),
        )
        .await
        .unwrap();
        mem.store(entry(EntryKind::Success, "nothing relevant"))
            .await
            .unwrap();

        assert_eq!(mem.search("governor", 10).await.unwrap().len(), 1);
        assert_eq!(mem.search("retries", 10).await.unwrap().len(), 1);
        assert_eq!(mem.search("backoff", 10).await.unwrap().len(), 1);
        assert!(mem.search("absent", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recent_is_newest_first_and_bounded() {
        let mem = memory();
        for i in 0..5 {
            mem.store(entry(EntryKind::Observation, &format!("obs {i}")))
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(3)).await;
        }
        let recent = mem.recent(3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent[0].content.contains("obs 4"));
        assert!(recent[0].created_at >= recent[1].created_at);
    }

    #[tokio::test]
    async fn by_kind_filters_on_sidecar() {
        let mem = memory();
        mem.store(entry(EntryKind::Error, "boom")).await.unwrap();
        mem.store(entry(EntryKind::Success, "fine")).await.unwrap();
        mem.store(entry(EntryKind::Error, "boom again")).await.unwrap();

        let errors = mem.by_kind(EntryKind::Error, 10).await.unwrap();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.kind == EntryKind::Error));
    }

    #[tokio::test]
    async fn delete_and_count() {
        let mem = memory();
        let id = mem.store(entry(EntryKind::Reflection, "temp")).await.unwrap();
        assert_eq!(mem.count().await.unwrap(), 1);
        assert!(mem.delete(&id).await.unwrap());
        assert!(!mem.delete(&id).await.unwrap());
        assert_eq!(mem.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn explicit_window_sees_past_the_default() {
        let mem = memory();
        let mut old = entry(EntryKind::Observation, "from another month");
        old.created_at = Utc::now() - Duration::days(40);
        old.id = everloop_core::entry::sortable_id(old.created_at);
        mem.store(old).await.unwrap();

        assert!(mem.recent(10).await.unwrap().is_empty());
        let wide = mem.recent_days(60, 10).await.unwrap();
        assert_eq!(wide.len(), 1);
    }

    #[tokio::test]
    async fn importance_clamped_on_store() {
        let mem = memory();
        let mut e = entry(EntryKind::Observation, "over");
        e.importance = 3.0;
        let id = mem.store(e).await.unwrap();
        let fetched = mem.get(&id).await.unwrap().unwrap();
        assert!(fetched.importance <= 1.0);
    }

    #[tokio::test]
    async fn disabled_tier_is_a_safe_noop() {
        let mem = LongTermMemory::disabled();
        let id = mem.store(entry(EntryKind::Observation, "lost")).await.unwrap();
        assert!(!id.is_empty());
        assert!(mem.get(&id).await.unwrap().is_none());
        assert_eq!(mem.count().await.unwrap(), 0);
        assert!(mem.recent(5).await.unwrap().is_empty());
    }

    #[test]
    fn date_hint_parses_sortable_ids() {
        let now = Utc::now();
        let id = everloop_core::entry::sortable_id(now);
        assert_eq!(date_hint(&id), Some(now.date_naive()));
        assert_eq!(date_hint("not-a-sortable-id"), None);
    }
}
