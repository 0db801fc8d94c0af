//! Agent state types — status, thoughts, actions, and observer snapshots.
//!
//! `AgentSnapshot` is derived state, not stored authoritatively: the state
//! broadcaster owns it and republishes a full snapshot on every mutation so
//! external observers never see partial updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where the control loop currently is in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Between iterations, ready to run
    Idle,
    /// Asking the reasoning engine for a plan
    Thinking,
    /// Executing planned actions
    Acting,
    /// Suspended by an operator command
    Paused,
    /// Denied by the usage governor, backing off
    Throttled,
    /// An unrecoverable iteration error; recovery pending
    Error,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Thinking => write!(f, "thinking"),
            Self::Acting => write!(f, "acting"),
            Self::Paused => write!(f, "paused"),
            Self::Throttled => write!(f, "throttled"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// The kind of a recorded thought.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtKind {
    Observation,
    Reasoning,
    Reflection,
}

/// One unit of reasoning output recorded by the loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thought {
    pub id: String,
    pub kind: ThoughtKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Thought {
    pub fn new(kind: ThoughtKind, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Lifecycle of a planned action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Planned,
    Running,
    Completed,
    Failed,
}

/// One planned (and possibly executed) action recorded by the loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: String,
    pub description: String,
    pub status: ActionStatus,
    /// Engine output or failure message, empty until the action runs
    #[serde(default)]
    pub output: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ActionRecord {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            status: ActionStatus::Planned,
            output: String::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Mark the action finished with the given status and output.
    pub fn finish(&mut self, status: ActionStatus, output: impl Into<String>) {
        self.status = status;
        self.output = output.into();
        self.finished_at = Some(Utc::now());
    }
}

/// A consistent point-in-time view of the agent for external observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub status: AgentStatus,
    pub goal: String,
    pub directive: String,
    pub updated_at: DateTime<Utc>,
    /// Most-recent thoughts, oldest evicted (bounded ring)
    pub recent_thoughts: Vec<Thought>,
    /// Most-recent actions, oldest evicted (bounded ring)
    pub recent_actions: Vec<ActionRecord>,
}

impl Default for AgentSnapshot {
    fn default() -> Self {
        Self {
            status: AgentStatus::Idle,
            goal: String::new(),
            directive: String::new(),
            updated_at: Utc::now(),
            recent_thoughts: Vec::new(),
            recent_actions: Vec::new(),
        }
    }
}
