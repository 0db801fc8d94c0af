//! State broadcaster — the single owner of observable agent state.
//!
//! Recent thoughts and actions are bounded ring buffers; every mutation
//! updates the in-memory snapshot under one lock, then mirrors the changed
//! item into the short-term store (fixed TTL, for external observers) and a
//! derived entry into the long-term store. Both mirrors are fire-and-forget
//! detached tasks with their own error boundary: broadcasting state must
//! never be able to crash or stall the control loop that produced it.

use chrono::{Duration, Utc};
use everloop_core::{
    ActionRecord, ActionStatus, AgentSnapshot, AgentStatus, EntryKind, MemoryEntry, Thought,
};
use everloop_store::{LongTermMemory, ShortTermMemory};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::scoring;

const MAX_RECENT_THOUGHTS: usize = 100;
const MAX_RECENT_ACTIONS: usize = 50;
const MIRROR_TTL_HOURS: i64 = 24;

/// Fixed cache key under which the latest snapshot is mirrored.
const STATE_KEY: &str = "agent:state";

pub struct StateBroadcaster {
    state: Mutex<AgentSnapshot>,
    short_term: Arc<ShortTermMemory>,
    long_term: Arc<LongTermMemory>,
}

impl StateBroadcaster {
    pub fn new(short_term: Arc<ShortTermMemory>, long_term: Arc<LongTermMemory>) -> Self {
        Self {
            state: Mutex::new(AgentSnapshot::default()),
            short_term,
            long_term,
        }
    }

    /// A consistent point-in-time snapshot for external observers.
    pub fn current_state(&self) -> AgentSnapshot {
        self.state.lock().expect("state lock poisoned").clone()
    }

    pub fn add_thought(&self, thought: Thought) {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            state.recent_thoughts.push(thought.clone());
            if state.recent_thoughts.len() > MAX_RECENT_THOUGHTS {
                state.recent_thoughts.remove(0);
            }
            state.updated_at = Utc::now();
        }
        self.mirror_thought(thought);
    }

    pub fn add_action(&self, action: ActionRecord) {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            state.recent_actions.push(action.clone());
            if state.recent_actions.len() > MAX_RECENT_ACTIONS {
                state.recent_actions.remove(0);
            }
            state.updated_at = Utc::now();
        }
        self.mirror_action(action);
    }

    /// Replace an existing action record (matched by id) with its new state.
    pub fn update_action(&self, action: ActionRecord) {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if let Some(slot) = state
                .recent_actions
                .iter_mut()
                .find(|a| a.id == action.id)
            {
                *slot = action.clone();
            }
            state.updated_at = Utc::now();
        }
        self.mirror_action(action);
    }

    pub fn update_status(&self, status: AgentStatus) {
        let snapshot = {
            let mut state = self.state.lock().expect("state lock poisoned");
            if state.status != status {
                debug!(from = %state.status, to = %status, "Agent status changed");
            }
            state.status = status;
            state.updated_at = Utc::now();
            state.clone()
        };
        // Transitions are ephemeral; the snapshot mirror carries them
        self.mirror_state(snapshot);
    }

    pub fn update_goal(&self, goal: impl Into<String>) {
        let goal = goal.into();
        let snapshot = {
            let mut state = self.state.lock().expect("state lock poisoned");
            state.goal = goal.clone();
            state.updated_at = Utc::now();
            state.clone()
        };
        self.mirror_state(snapshot);
        self.mirror_direction_change("goal", goal);
    }

    pub fn update_prompt(&self, directive: impl Into<String>) {
        let directive = directive.into();
        let snapshot = {
            let mut state = self.state.lock().expect("state lock poisoned");
            state.directive = directive.clone();
            state.updated_at = Utc::now();
            state.clone()
        };
        self.mirror_state(snapshot);
        self.mirror_direction_change("directive", directive);
    }

    // ── Mirroring ─────────────────────────────────────────────────────

    /// Mirror the whole snapshot under a fixed key so store-side observers
    /// always see the current status, goal, and directive.
    fn mirror_state(&self, snapshot: AgentSnapshot) {
        let short_term = Arc::clone(&self.short_term);
        tokio::spawn(async move {
            if let Ok(value) = serde_json::to_value(&snapshot) {
                if let Err(e) = short_term
                    .set(STATE_KEY, value, Some(Duration::hours(MIRROR_TTL_HOURS)))
                    .await
                {
                    debug!(key = STATE_KEY, error = %e, "Snapshot mirror failed");
                }
            }
        });
    }

    /// Goal and directive changes also get a durable record.
    fn mirror_direction_change(&self, field: &'static str, value: String) {
        let long_term = Arc::clone(&self.long_term);
        tokio::spawn(async move {
            let entry = MemoryEntry::new(
                EntryKind::Decision,
                format!("Agent {field} changed to: {value}"),
                truncate(&format!("{field} changed: {value}"), 100),
            )
            .with_importance(0.6)
            .with_tag("stream")
            .with_metadata("field", field);
            if let Err(e) = long_term.store(entry).await {
                debug!(field, error = %e, "Direction-change mirror failed");
            }
        });
    }

    fn mirror_thought(&self, thought: Thought) {
        let short_term = Arc::clone(&self.short_term);
        let long_term = Arc::clone(&self.long_term);
        tokio::spawn(async move {
            let key = format!("thought:{}", thought.id);
            if let Ok(value) = serde_json::to_value(&thought) {
                if let Err(e) = short_term
                    .set(&key, value, Some(Duration::hours(MIRROR_TTL_HOURS)))
                    .await
                {
                    debug!(key, error = %e, "Thought mirror failed");
                }
            }

            let entry = MemoryEntry::new(
                EntryKind::Observation,
                thought.content.clone(),
                truncate(&thought.content, 100),
            )
            .with_importance(scoring::score_thought(&thought))
            .with_tag("stream")
            .with_metadata("thought_id", thought.id.clone())
            .with_metadata("thought_kind", format!("{:?}", thought.kind).to_lowercase());
            if let Err(e) = long_term.store(entry).await {
                debug!(thought_id = %thought.id, error = %e, "Thought long-term mirror failed");
            }
        });
    }

    fn mirror_action(&self, action: ActionRecord) {
        let short_term = Arc::clone(&self.short_term);
        let long_term = Arc::clone(&self.long_term);
        tokio::spawn(async move {
            let key = format!("action:{}", action.id);
            if let Ok(value) = serde_json::to_value(&action) {
                if let Err(e) = short_term
                    .set(&key, value, Some(Duration::hours(MIRROR_TTL_HOURS)))
                    .await
                {
                    debug!(key, error = %e, "Action mirror failed");
                }
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
            .with_importance(scoring::score_action(&action))
            .with_tag("stream")
            .with_metadata("action_id", action.id.clone());
            if let Err(e) = long_term.store(entry).await {
                debug!(action_id = %action.id, error = %e, "Action long-term mirror failed");
            }
        });
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use everloop_core::ThoughtKind;
    use everloop_store::InMemoryBlobStore;
    use std::time::Duration as StdDuration;

    fn broadcaster() -> StateBroadcaster {
        let blobs = Arc::new(InMemoryBlobStore::new());
        StateBroadcaster::new(
            Arc::new(ShortTermMemory::new(blobs.clone())),
            Arc::new(LongTermMemory::new(blobs)),
        )
    }

    /// Poll until `check` passes or a second elapses (mirrors are detached).
    async fn eventually<F, Fut>(check: F)
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        panic!("condition not reached within 1s");
    }

    #[tokio::test]
    async fn thought_ring_is_bounded() {
        let b = broadcaster();
        for i in 0..(MAX_RECENT_THOUGHTS + 10) {
            b.add_thought(Thought::new(ThoughtKind::Observation, format!("t{i}")));
        }
        let state = b.current_state();
        assert_eq!(state.recent_thoughts.len(), MAX_RECENT_THOUGHTS);
        // Oldest evicted, newest kept
        assert_eq!(state.recent_thoughts.last().unwrap().content, "t109");
        assert_eq!(state.recent_thoughts[0].content, "t10");
    }

    #[tokio::test]
    async fn action_ring_is_bounded() {
        let b = broadcaster();
        for i in 0..(MAX_RECENT_ACTIONS + 5) {
            b.add_action(ActionRecord::new(format!("a{i}")));
        }
        assert_eq!(b.current_state().recent_actions.len(), MAX_RECENT_ACTIONS);
    }

    #[tokio::test]
    async fn update_action_replaces_by_id() {
        let b = broadcaster();
        let mut action = ActionRecord::new("compile");
        b.add_action(action.clone());

        action.finish(ActionStatus::Completed, "ok");
        b.update_action(action.clone());

        let state = b.current_state();
        assert_eq!(state.recent_actions.len(), 1);
        assert_eq!(state.recent_actions[0].status, ActionStatus::Completed);
        assert_eq!(state.recent_actions[0].output, "ok");
    }

    #[tokio::test]
    async fn mutations_update_snapshot_fields() {
        let b = broadcaster();
        b.update_status(AgentStatus::Thinking);
        b.update_goal("learn the codebase");
        b.update_prompt("be curious");

        let state = b.current_state();
        assert_eq!(state.status, AgentStatus::Thinking);
        assert_eq!(state.goal, "learn the codebase");
        assert_eq!(state.directive, "be curious");
    }

    #[tokio::test]
    async fn thoughts_are_mirrored_to_short_term() {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let short_term = Arc::new(ShortTermMemory::new(blobs.clone()));
        let b = StateBroadcaster::new(short_term.clone(), Arc::new(LongTermMemory::new(blobs)));

        let thought = Thought::new(ThoughtKind::Reasoning, "mirrored");
        let key = format!("thought:{}", thought.id);
        b.add_thought(thought);

        eventually(|| {
            let st = short_term.clone();
            let key = key.clone();
            async move { st.exists(&key).await.unwrap() }
        })
        .await;
    }

    #[tokio::test]
    async fn state_mutations_mirror_the_snapshot() {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let short_term = Arc::new(ShortTermMemory::new(blobs.clone()));
        let long_term = Arc::new(LongTermMemory::new(blobs));
        let b = StateBroadcaster::new(short_term.clone(), long_term.clone());

        b.update_status(AgentStatus::Paused);
        b.update_goal("map the module graph");
        b.update_prompt("be methodical");

        // The fixed snapshot key appears, carrying the current status
        eventually(|| {
            let st = short_term.clone();
            async move {
                match st.get(STATE_KEY).await.unwrap() {
                    Some(value) => {
                        let snapshot: AgentSnapshot = serde_json::from_value(value).unwrap();
                        snapshot.status == AgentStatus::Paused
                    }
                    None => false,
                }
            }
        })
        .await;

        // Goal and directive changes also leave durable records
        eventually(|| {
            let lt = long_term.clone();
            async move {
                let decisions = lt.by_kind(EntryKind::Decision, 10).await.unwrap();
                decisions.iter().any(|e| e.content.contains("map the module graph"))
                    && decisions.iter().any(|e| e.content.contains("be methodical"))
            }
        })
        .await;
    }

    #[tokio::test]
    async fn mirror_failure_does_not_stall_mutations() {
        // Disabled tiers make every mirror a no-op failure path
        let b = StateBroadcaster::new(
            Arc::new(ShortTermMemory::disabled()),
            Arc::new(LongTermMemory::disabled()),
        );
        b.add_thought(Thought::new(ThoughtKind::Observation, "still recorded"));
        assert_eq!(b.current_state().recent_thoughts.len(), 1);
    }
}
