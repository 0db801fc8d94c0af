//! Operator commands — the control plane for a running agent.
//!
//! Commands are enqueued durably by external callers and drained by the
//! control loop. Delivery is at-least-once, so every handler must be
//! idempotent: applying the same command twice leaves the agent in the same
//! state as applying it once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed set of operator command kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Replace the agent's standing directive/prompt
    UpdatePrompt,
    /// Suspend the control loop
    PauseAgent,
    /// Resume a paused loop
    ResumeAgent,
    /// Run the learning-extraction batch out-of-band
    TriggerBatchLearning,
    /// Run short-term consolidation out-of-band
    TriggerMemoryConsolidation,
    /// Update the agent's current goal
    AddGoal,
    /// Return a state snapshot to the caller
    QueryState,
    /// Conversational message owned by a different consumer; the loop
    /// deletes these without side effects
    ChatWithAgent,
}

/// An operator command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    pub kind: CommandKind,
    /// Free-text payload (new prompt, goal text, chat message, ...)
    #[serde(default)]
    pub content: String,
    /// Optional structured parameters
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
    /// When this command was created
    pub created_at: DateTime<Utc>,
    /// Set once the loop has terminally handled the command
    #[serde(default)]
    pub processed: bool,
}

impl Command {
    pub fn new(kind: CommandKind, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            content: content.into(),
            params: serde_json::Value::Null,
            created_at: Utc::now(),
            processed: false,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

/// The result of processing one command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub command_id: String,
    pub success: bool,
    pub message: String,
    /// Structured payload (e.g. the snapshot for `QueryState`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl CommandResponse {
    pub fn ok(command_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            success: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn failed(command_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            success: false,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}
