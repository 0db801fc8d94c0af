//! Reasoning engine trait — the abstraction over the external completion
//! service.
//!
//! The engine is an opaque `ask(prompt) -> text + tool invocations`
//! capability. The loop is agnostic to how tool invocations are performed; it
//! only extracts the listed metadata for display and logging, and it decodes
//! loosely-shaped replies defensively: any unexpected shape means "no tool
//! calls", never a failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::EngineError;

/// Metadata about one tool call the engine performed while answering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub duration_ms: u64,
}

/// A complete reply from the reasoning engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineReply {
    /// The generated text
    pub text: String,

    /// Tool calls the engine performed, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_invocations: Vec<ToolInvocation>,

    /// Rough token estimate for governor accounting (0 if unknown)
    #[serde(default)]
    pub estimated_tokens: u64,
}

impl EngineReply {
    /// Decode a loosely-typed engine response.
    ///
    /// Accepts `{text, toolInvocations: [...]}`-shaped values with either
    /// snake_case or camelCase keys. A plain string becomes a text-only
    /// reply; any unrecognized shape yields its JSON rendering as text with
    /// no tool calls.
    pub fn from_value(value: serde_json::Value) -> Self {
        if let serde_json::Value::String(text) = value {
            return Self {
                text,
                ..Default::default()
            };
        }

        let Some(obj) = value.as_object() else {
            return Self {
                text: value.to_string(),
                ..Default::default()
            };
        };

        let text = obj
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let raw_calls = obj
            .get("tool_invocations")
            .or_else(|| obj.get("toolInvocations"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let tool_invocations = raw_calls
            .into_iter()
            .filter_map(|v| serde_json::from_value::<ToolInvocation>(v).ok())
            .filter(|t| !t.name.is_empty())
            .collect();

        let estimated_tokens = obj
            .get("estimated_tokens")
            .or_else(|| obj.get("estimatedTokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        Self {
            text,
            tool_invocations,
            estimated_tokens,
        }
    }
}

/// The reasoning engine boundary.
///
/// Implementations are external to this workspace; tests use mocks.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    /// A human-readable name for this engine.
    fn name(&self) -> &str;

    /// Send a prompt within a named conversation and get a reply.
    async fn ask(
        &self,
        prompt: &str,
        conversation: &str,
    ) -> std::result::Result<EngineReply, EngineError>;
}
