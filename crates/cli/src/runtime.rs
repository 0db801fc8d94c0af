//! Shared wiring: build the full runtime from an `AppConfig`.

use async_trait::async_trait;
use chrono::Duration;
use everloop_agent::{
    AgentController, CommandProcessor, ConsolidationConfig, ConsolidationEngine, ContextBuilder,
    ControllerConfig, GovernorConfig, StateBroadcaster, UsageGovernor,
};
use everloop_config::AppConfig;
use everloop_core::blob::BlobStore;
use everloop_core::{EngineError, EngineReply, EventBus, ReasoningEngine};
use everloop_queue::InMemoryQueue;
use everloop_store::{FileBlobStore, LongTermMemory, ShortTermMemory};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::warn;

/// The stand-in engine used when no reasoning adapter is wired in.
///
/// Always answers with an empty plan, so the loop idles safely between
/// iterations instead of failing each one. Embedders replace this with a
/// real [`ReasoningEngine`] implementation.
pub struct OfflineEngine;

#[async_trait]
impl ReasoningEngine for OfflineEngine {
    fn name(&self) -> &str {
        "offline"
    }

    async fn ask(&self, _prompt: &str, _conversation: &str) -> Result<EngineReply, EngineError> {
        Ok(EngineReply {
            text: "[]".into(),
            ..Default::default()
        })
    }
}

pub struct Runtime {
    pub controller: Arc<AgentController>,
    pub consolidation: Arc<ConsolidationEngine>,
    pub queue: Arc<InMemoryQueue>,
    pub event_bus: Arc<EventBus>,
}

/// Assemble every component from configuration.
pub fn build(config: &AppConfig) -> Runtime {
    let blobs: Arc<dyn BlobStore> = Arc::new(FileBlobStore::new(config.store_root()));
    let short_term = Arc::new(ShortTermMemory::new(blobs.clone()));
    let long_term = Arc::new(
        LongTermMemory::new(blobs).with_scan_window_days(config.memory.scan_window_days),
    );

    let broadcaster = Arc::new(StateBroadcaster::new(short_term.clone(), long_term.clone()));
    if !config.agent.directive.is_empty() {
        broadcaster.update_prompt(config.agent.directive.clone());
    }
    if !config.agent.goal.is_empty() {
        broadcaster.update_goal(config.agent.goal.clone());
    }

    let engine = engine_for(config);
    let event_bus = Arc::new(EventBus::default());
    let queue = Arc::new(InMemoryQueue::new());

    let consolidation = Arc::new(ConsolidationEngine::new(
        short_term,
        long_term.clone(),
        engine.clone(),
        broadcaster.clone(),
        event_bus.clone(),
        ConsolidationConfig {
            iteration_threshold: config.consolidation.iteration_threshold,
            interval: Duration::hours(config.consolidation.interval_hours),
            min_group_size: config.consolidation.min_group_size,
        },
    ));

    let governor = Arc::new(UsageGovernor::new(GovernorConfig {
        max_loops_per_day: config.governor.max_loops_per_day,
        max_tokens_per_day: config.governor.max_tokens_per_day,
        retention_days: config.governor.retention_days,
    }));

    let context = ContextBuilder::new(long_term.clone())
        .with_max_entries(config.memory.context_entries);
    let processor = CommandProcessor::new(queue.clone(), event_bus.clone());

    let controller = Arc::new(
        AgentController::new(
            engine,
            governor,
            broadcaster,
            consolidation.clone(),
            context,
            processor,
            long_term,
            event_bus.clone(),
        )
        .with_config(ControllerConfig {
            loop_interval: StdDuration::from_secs(config.agent.loop_interval_secs),
            recovery_delay: StdDuration::from_secs(config.agent.recovery_delay_secs),
            max_parallel_actions: config.agent.max_parallel_actions,
            max_actions_per_iteration: config.agent.max_actions_per_iteration,
            context_refresh_iterations: config.agent.context_refresh_iterations,
        }),
    );

    Runtime {
        controller,
        consolidation,
        queue,
        event_bus,
    }
}

fn engine_for(config: &AppConfig) -> Arc<dyn ReasoningEngine> {
    if config.engine.api_key.is_some() {
        warn!(
            model = %config.engine.model,
            "No engine adapter is linked into this binary; running offline"
        );
    }
    Arc::new(OfflineEngine)
}
