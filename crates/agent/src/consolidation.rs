//! Memory consolidation engine — promotion, summarization, eviction.
//!
//! Runs on its own cadence, independent of the control loop: promote
//! important short-term entries into long-term storage, ask the reasoning
//! engine to distill clusters of related entries into higher-level
//! learnings, and evict outdated or low-value entries. A batch already in
//! flight makes a re-entrant trigger a no-op, not a queued run.

use chrono::{DateTime, Duration, Utc};
use everloop_core::{
    ActionRecord, ActionStatus, EntryKind, EventBus, MemoryEntry, ReasoningEngine, RuntimeEvent,
    StoreError, Thought, ThoughtKind,
};
use everloop_store::{LongTermMemory, ShortTermMemory};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::broadcast::StateBroadcaster;
use crate::scoring::{self, PROMOTION_THRESHOLD};

/// Eviction thresholds: (age > 30d AND accessed < 3 times) OR importance
/// below the floor OR an error entry old enough to be presumed resolved.
const OUTDATED_AGE_DAYS: i64 = 30;
const OUTDATED_ACCESS_FLOOR: u32 = 3;
const IMPORTANCE_FLOOR: f32 = 0.3;
const ERROR_RESOLVED_DAYS: i64 = 7;

/// How far back the eviction pass scans. Wider than the default read window
/// so that entries past the 30-day age threshold are actually visible.
const EVICTION_SCAN_DAYS: i64 = 60;
const EVICTION_SCAN_CAP: usize = 2_000;
const LEARNING_SOURCE_CAP: usize = 200;

/// Cadence and grouping configuration.
#[derive(Debug, Clone)]
pub struct ConsolidationConfig {
    /// Loop iterations between batches
    pub iteration_threshold: u64,
    /// Wall-clock interval between batches
    pub interval: Duration,
    /// Minimum entries of one kind before asking for a summary
    pub min_group_size: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            iteration_threshold: 100,
            interval: Duration::hours(4),
            min_group_size: 3,
        }
    }
}

/// A distilled higher-level insight produced from a cluster of entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Learning {
    pub topic: String,
    pub summary: String,
    #[serde(default)]
    pub insights: Vec<String>,
    pub confidence: f32,
    #[serde(default)]
    pub source_ids: Vec<String>,
}

impl Learning {
    /// A generic low-confidence learning used when the engine fails or its
    /// reply cannot be parsed.
    fn fallback(kind: EntryKind, sources: &[&MemoryEntry]) -> Self {
        Self {
            topic: format!("{kind} patterns"),
            summary: format!(
                "Observed {} related {kind} entries; no distilled summary available",
                sources.len()
            ),
            insights: Vec::new(),
            confidence: 0.3,
            source_ids: sources.iter().map(|e| e.id.clone()).collect(),
        }
    }

    fn to_entry(&self) -> MemoryEntry {
        let mut content = self.summary.clone();
        for insight in &self.insights {
            content.push_str("\n- ");
            content.push_str(insight);
        }
        MemoryEntry::new(EntryKind::Learning, content, self.topic.clone())
            .with_importance(self.confidence)
            .with_tag("learning")
            .with_metadata("confidence", format!("{:.2}", self.confidence))
            .with_metadata("source_count", self.source_ids.len().to_string())
    }
}

/// Result of one consolidation batch.
#[derive(Debug, Clone, Default)]
pub struct ConsolidationSummary {
    pub promoted: usize,
    pub learnings: usize,
    pub evicted: usize,
}

pub struct ConsolidationEngine {
    short_term: Arc<ShortTermMemory>,
    long_term: Arc<LongTermMemory>,
    engine: Arc<dyn ReasoningEngine>,
    broadcaster: Arc<StateBroadcaster>,
    event_bus: Arc<EventBus>,
    config: ConsolidationConfig,
    /// Mutual-exclusion guard; a batch in flight makes triggers no-ops
    running: AtomicBool,
    last_run: Mutex<DateTime<Utc>>,
    /// Broadcaster-buffer items already promoted; the rings are never
    /// drained, so without this each fallback batch would re-promote them
    promoted_sources: Mutex<HashSet<String>>,
}

impl ConsolidationEngine {
    pub fn new(
        short_term: Arc<ShortTermMemory>,
        long_term: Arc<LongTermMemory>,
        engine: Arc<dyn ReasoningEngine>,
        broadcaster: Arc<StateBroadcaster>,
        event_bus: Arc<EventBus>,
        config: ConsolidationConfig,
    ) -> Self {
        Self {
            short_term,
            long_term,
            engine,
            broadcaster,
            event_bus,
            config,
            running: AtomicBool::new(false),
            last_run: Mutex::new(Utc::now()),
            promoted_sources: Mutex::new(HashSet::new()),
        }
    }

    /// Spawn the independent wall-clock cadence: one batch per configured
    /// interval until the shutdown signal flips to true.
    ///
    /// Runs concurrently with the control loop's iteration-count trigger;
    /// the running guard makes overlapping triggers no-ops. This keeps
    /// consolidation alive while the loop is paused or throttled.
    pub fn spawn_cadence(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let period = engine
                .config
                .interval
                .to_std()
                .unwrap_or(StdDuration::from_secs(4 * 3600));
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; the cadence starts one
            // full period out
            ticker.tick().await;
            info!(period_secs = period.as_secs(), "Consolidation cadence started");
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        engine.run_batch().await;
                    }
                }
            }
            info!("Consolidation cadence stopped");
        })
    }

    /// Whether a batch is due, by iteration count or wall clock.
    pub fn is_due(&self, iterations_since_last: u64) -> bool {
        if iterations_since_last >= self.config.iteration_threshold {
            return true;
        }
        let last = *self.last_run.lock().expect("last_run lock poisoned");
        Utc::now().signed_duration_since(last) >= self.config.interval
    }

    /// Run a full batch: promote, distill, evict.
    ///
    /// Returns None if a batch was already running (re-entrant trigger).
    pub async fn run_batch(&self) -> Option<ConsolidationSummary> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Consolidation already running, trigger ignored");
            return None;
        }

        let since = *self.last_run.lock().expect("last_run lock poisoned");
        let mut summary = ConsolidationSummary::default();

        match self.consolidate_short_term().await {
            Ok(promoted) => summary.promoted = promoted,
            Err(e) => warn!(error = %e, "Short-term consolidation failed"),
        }

        match self.extract_learnings(since).await {
            Ok(learnings) => {
                for learning in &learnings {
                    if let Err(e) = self.store_learning(learning).await {
                        warn!(topic = %learning.topic, error = %e, "Failed to store learning");
                    } else {
                        summary.learnings += 1;
                    }
                }
            }
            Err(e) => warn!(error = %e, "Learning extraction failed"),
        }

        match self.cleanup_outdated().await {
            Ok(evicted) => summary.evicted = evicted,
            Err(e) => warn!(error = %e, "Eviction pass failed"),
        }

        *self.last_run.lock().expect("last_run lock poisoned") = Utc::now();
        self.running.store(false, Ordering::SeqCst);

        info!(
            promoted = summary.promoted,
            learnings = summary.learnings,
            evicted = summary.evicted,
            "Consolidation batch finished"
        );
        self.event_bus.publish(RuntimeEvent::ConsolidationFinished {
            promoted: summary.promoted,
            learnings: summary.learnings,
            evicted: summary.evicted,
            timestamp: Utc::now(),
        });
        Some(summary)
    }

    /// Promote important short-term thoughts and actions into long-term
    /// storage. Returns the number of promoted entries.
    pub async fn consolidate_short_term(&self) -> Result<usize, StoreError> {
        let (thoughts, actions, from_buffers) = self.gather_short_term().await?;

        let mut promoted = 0usize;
        let mut promoted_ids = Vec::new();
        for thought in &thoughts {
            let score = scoring::score_thought(thought);
            if score < PROMOTION_THRESHOLD {
                continue;
            }
            let kind = match thought.kind {
                ThoughtKind::Observation => EntryKind::Observation,
                ThoughtKind::Reasoning => EntryKind::Decision,
                ThoughtKind::Reflection => EntryKind::Reflection,
            };
            let entry = MemoryEntry::new(
                kind,
                thought.content.clone(),
                truncate(&thought.content, 100),
            )
            .with_importance(score)
            .with_tag("consolidated")
            .with_metadata("source", format!("thought:{}", thought.id));
            self.long_term.store(entry).await?;
            // Promotion moves the item; the cache copy has served its purpose
            let _ = self.short_term.delete(&format!("thought:{}", thought.id)).await;
            promoted_ids.push(thought.id.clone());
            promoted += 1;
        }

        for action in &actions {
            let score = scoring::score_action(action);
            if score < PROMOTION_THRESHOLD {
                continue;
            }
            let kind = match action.status {
                ActionStatus::Completed => EntryKind::Success,
                ActionStatus::Failed => EntryKind::Error,
                _ => EntryKind::Observation,
            };
            let entry = MemoryEntry::new(
                kind,
                format!("{}\n\n{}", action.description, action.output),
                truncate(&action.description, 100),
            )
            .with_importance(score)
            .with_tag("consolidated")
            .with_metadata("source", format!("action:{}", action.id));
            self.long_term.store(entry).await?;
            let _ = self.short_term.delete(&format!("action:{}", action.id)).await;
            promoted_ids.push(action.id.clone());
            promoted += 1;
        }

        if from_buffers && !promoted_ids.is_empty() {
            self.promoted_sources
                .lock()
                .expect("promoted_sources lock poisoned")
                .extend(promoted_ids);
        }

        debug!(
            thoughts = thoughts.len(),
            actions = actions.len(),
            promoted,
            "Short-term consolidation pass"
        );
        Ok(promoted)
    }

    /// Distill clusters of related recent entries into learnings.
    pub async fn extract_learnings(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Learning>, StoreError> {
        let recent = self.long_term.recent(LEARNING_SOURCE_CAP).await?;
        let mut groups: HashMap<EntryKind, Vec<&MemoryEntry>> = HashMap::new();
        for entry in &recent {
            // Learnings never feed back into themselves
            if entry.kind == EntryKind::Learning || entry.created_at < since {
                continue;
            }
            groups.entry(entry.kind).or_default().push(entry);
        }

        let mut learnings = Vec::new();
        for (kind, members) in groups {
            if members.len() < self.config.min_group_size {
                continue;
            }
            learnings.push(self.summarize_group(kind, &members).await);
        }
        Ok(learnings)
    }

    /// Persist a learning as its own long-term entry.
    pub async fn store_learning(&self, learning: &Learning) -> Result<String, StoreError> {
        self.long_term.store(learning.to_entry()).await
    }

    /// Entries meeting the outdated predicate, within the eviction window.
    pub async fn identify_outdated(&self) -> Result<Vec<MemoryEntry>, StoreError> {
        let now = Utc::now();
        let candidates = self
            .long_term
            .recent_days(EVICTION_SCAN_DAYS, EVICTION_SCAN_CAP)
            .await?;
        Ok(candidates
            .into_iter()
            .filter(|e| is_outdated(e, now))
            .collect())
    }

    /// Delete all outdated entries; returns how many were removed.
    pub async fn cleanup_outdated(&self) -> Result<usize, StoreError> {
        let outdated = self.identify_outdated().await?;
        let mut removed = 0usize;
        for entry in outdated {
            if self.long_term.delete(&entry.id).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Evicted outdated memory entries");
        }
        Ok(removed)
    }

    // ── Internals ─────────────────────────────────────────────────────

    /// Pull thoughts and actions from the short-term store, falling back to
    /// the broadcaster's in-memory buffers when the store is empty or
    /// unavailable. The flag says whether the fallback was taken.
    async fn gather_short_term(
        &self,
    ) -> Result<(Vec<Thought>, Vec<ActionRecord>, bool), StoreError> {
        let mut thoughts = Vec::new();
        let mut actions = Vec::new();

        if self.short_term.is_enabled() {
            for key in self.short_term.keys("thought:*").await? {
                if let Some(value) = self.short_term.get(&key).await? {
                    if let Ok(thought) = serde_json::from_value::<Thought>(value) {
                        thoughts.push(thought);
                    }
                }
            }
            for key in self.short_term.keys("action:*").await? {
                if let Some(value) = self.short_term.get(&key).await? {
                    if let Ok(action) = serde_json::from_value::<ActionRecord>(value) {
                        actions.push(action);
                    }
                }
            }
        }

        if thoughts.is_empty() && actions.is_empty() {
            let state = self.broadcaster.current_state();
            let mut seen = self
                .promoted_sources
                .lock()
                .expect("promoted_sources lock poisoned");
            // Ids evicted from the rings can never come back; dropping them
            // keeps the set bounded by the ring capacities
            seen.retain(|id| {
                state.recent_thoughts.iter().any(|t| &t.id == id)
                    || state.recent_actions.iter().any(|a| &a.id == id)
            });
            thoughts = state
                .recent_thoughts
                .into_iter()
                .filter(|t| !seen.contains(&t.id))
                .collect();
            actions = state
                .recent_actions
                .into_iter()
                .filter(|a| !seen.contains(&a.id))
                .collect();
            debug!(
                thoughts = thoughts.len(),
                actions = actions.len(),
                "Short-term store empty, using broadcaster buffers"
            );
            return Ok((thoughts, actions, true));
        }
        Ok((thoughts, actions, false))
    }

    /// Ask the engine to summarize one group; fall back on failure.
    async fn summarize_group(&self, kind: EntryKind, members: &[&MemoryEntry]) -> Learning {
        let mut prompt = format!(
            "Summarize the following {} related '{kind}' memory entries into a single \
             higher-level learning. Respond with only a JSON object: \
             {{\"topic\": string, \"summary\": string, \"insights\": [string], \
             \"confidence\": number between 0 and 1}}.\n\n",
            members.len()
        );
        for (i, entry) in members.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, entry.summary));
        }

        match self.engine.ask(&prompt, "consolidation").await {
            Ok(reply) => match parse_learning(&reply.text) {
                Some(mut learning) => {
                    learning.confidence = learning.confidence.clamp(0.0, 1.0);
                    learning.source_ids = members.iter().map(|e| e.id.clone()).collect();
                    learning
                }
                None => {
                    warn!(kind = %kind, "Unparsable learning reply, using fallback");
                    Learning::fallback(kind, members)
                }
            },
            Err(e) => {
                warn!(kind = %kind, error = %e, "Engine failed during learning extraction");
                Learning::fallback(kind, members)
            }
        }
    }
}

/// The outdated predicate.
fn is_outdated(entry: &MemoryEntry, now: DateTime<Utc>) -> bool {
    let age = entry.age_days(now);
    (age > OUTDATED_AGE_DAYS && entry.access_count < OUTDATED_ACCESS_FLOOR)
        || entry.importance < IMPORTANCE_FLOOR
        || (entry.kind == EntryKind::Error && age > ERROR_RESOLVED_DAYS)
}

/// Parse a learning from engine text, tolerating code fences and prose
/// around the JSON object.
fn parse_learning(text: &str) -> Option<Learning> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
