//! Importance scoring for thoughts and actions.
//!
//! Scores are always in [0.0, 1.0] regardless of input length or status.
//! The consolidation engine promotes anything at or above
//! `PROMOTION_THRESHOLD`; the broadcaster uses the same scores when deriving
//! long-term entries from the live stream.

use everloop_core::{ActionRecord, ActionStatus, Thought, ThoughtKind};

/// Minimum score for promotion into long-term storage.
pub const PROMOTION_THRESHOLD: f32 = 0.5;

/// Base score by thought kind plus a length bonus, clamped to 1.0.
pub fn score_thought(thought: &Thought) -> f32 {
    let base = match thought.kind {
        ThoughtKind::Observation => 0.3,
        ThoughtKind::Reasoning => 0.7,
        ThoughtKind::Reflection => 0.8,
    };
    let length_bonus = (thought.content.len() as f32 / 1_000.0).min(0.2);
    (base + length_bonus).clamp(0.0, 1.0)
}

/// Base score by action status plus a bonus for non-empty output, clamped.
pub fn score_action(action: &ActionRecord) -> f32 {
    let base: f32 = match action.status {
        ActionStatus::Completed => 0.7,
        ActionStatus::Failed => 0.6,
        ActionStatus::Running => 0.4,
        ActionStatus::Planned => 0.3,
    };
    let output_bonus = if action.output.trim().is_empty() {
        0.0
    } else {
        0.1
    };
    (base + output_bonus).clamp(0.0, 1.0)
}
