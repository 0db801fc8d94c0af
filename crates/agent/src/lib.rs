//! The Everloop runtime: control loop, governor, commands, consolidation.
//!
//! The pieces compose around a few shared seams:
//! - [`controller::AgentController`] owns the think/act cycle and implements
//!   [`commands::CommandHandler`] so operator commands land on it directly
//! - [`governor::UsageGovernor`] gates every iteration against daily quotas
//! - [`broadcast::StateBroadcaster`] is the single owner of observable state
//! - [`consolidation::ConsolidationEngine`] runs promotion, distillation,
//!   and eviction on its own cadence

pub mod broadcast;
pub mod commands;
pub mod consolidation;
pub mod context;
pub mod controller;
pub mod governor;
pub mod scoring;

pub use broadcast::StateBroadcaster;
pub use commands::{CommandHandler, CommandProcessor};
pub use consolidation::{ConsolidationConfig, ConsolidationEngine, ConsolidationSummary, Learning};
pub use context::ContextBuilder;
pub use controller::{AgentController, ControllerConfig, IterationOutcome};
pub use governor::{backoff_minutes, GovernorConfig, LoopDecision, UsageGovernor};
pub use scoring::{score_action, score_thought, PROMOTION_THRESHOLD};
