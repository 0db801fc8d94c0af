//! The control loop — an always-on think/act cycle with operator control.
//!
//! Each iteration drains operator commands, runs any due consolidation,
//! asks the governor for permission, asks the reasoning engine for a plan,
//! and executes the planned actions with bounded parallelism. The
//! iteration body is separated from the outer loop so tests can drive single
//! iterations without timers.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use everloop_core::{
    ActionRecord, ActionStatus, AgentSnapshot, AgentStatus, EntryKind, Error, EventBus,
    MemoryEntry, ReasoningEngine, RuntimeEvent, Thought, ThoughtKind,
};
use everloop_store::LongTermMemory;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::broadcast::StateBroadcaster;
use crate::commands::{CommandHandler, CommandProcessor};
use crate::consolidation::ConsolidationEngine;
use crate::context::ContextBuilder;
use crate::governor::{self, UsageGovernor};

const PLAN_CONVERSATION: &str = "control-loop";
const ACTION_CONVERSATION: &str = "actions";

/// Loop pacing and execution bounds.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Sleep between iterations
    pub loop_interval: StdDuration,
    /// Sleep after a failed iteration before trying again
    pub recovery_delay: StdDuration,
    /// Concurrent action executions per iteration
    pub max_parallel_actions: usize,
    /// Planned actions accepted per iteration; the rest are dropped
    pub max_actions_per_iteration: usize,
    /// Iterations between memory-context rebuilds
    pub context_refresh_iterations: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            loop_interval: StdDuration::from_secs(60),
            recovery_delay: StdDuration::from_secs(300),
            max_parallel_actions: 3,
            max_actions_per_iteration: 5,
            context_refresh_iterations: 10,
        }
    }
}

/// What one iteration did, for the outer loop's pacing and for tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// Thought and acted normally
    Completed { actions: usize },
    /// The operator has the loop suspended
    Paused,
    /// The governor denied the iteration
    Throttled { backoff_minutes: u64 },
    /// The iteration aborted on an error; recovery delay applies
    Failed { reason: String },
}

pub struct AgentController {
    engine: Arc<dyn ReasoningEngine>,
    governor: Arc<UsageGovernor>,
    broadcaster: Arc<StateBroadcaster>,
    consolidation: Arc<ConsolidationEngine>,
    context: ContextBuilder,
    processor: CommandProcessor,
    long_term: Arc<LongTermMemory>,
    event_bus: Arc<EventBus>,
    config: ControllerConfig,
    paused: AtomicBool,
    iteration: AtomicU64,
    iterations_since_consolidation: AtomicU64,
    consecutive_denials: AtomicU32,
    cached_context: Mutex<String>,
}

impl AgentController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: Arc<dyn ReasoningEngine>,
        governor: Arc<UsageGovernor>,
        broadcaster: Arc<StateBroadcaster>,
        consolidation: Arc<ConsolidationEngine>,
        context: ContextBuilder,
        processor: CommandProcessor,
        long_term: Arc<LongTermMemory>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            engine,
            governor,
            broadcaster,
            consolidation,
            context,
            processor,
            long_term,
            event_bus,
            config: ControllerConfig::default(),
            paused: AtomicBool::new(false),
            iteration: AtomicU64::new(0),
            iterations_since_consolidation: AtomicU64::new(0),
            consecutive_denials: AtomicU32::new(0),
            cached_context: Mutex::new(String::new()),
        }
    }

    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Run until the shutdown signal flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(engine = self.engine.name(), "Control loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let outcome = self.run_iteration().await;
            let delay = match &outcome {
                IterationOutcome::Throttled { backoff_minutes } => {
                    StdDuration::from_secs(backoff_minutes * 60)
                }
                IterationOutcome::Failed { .. } => self.config.recovery_delay,
                IterationOutcome::Paused | IterationOutcome::Completed { .. } => {
                    self.config.loop_interval
                }
            };
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("Control loop stopped");
    }

    /// One full iteration: commands, consolidation, governor, think, act.
    pub async fn run_iteration(&self) -> IterationOutcome {
        // Commands first so pause/resume take effect within one iteration
        self.processor.process_pending(self).await;

        if self.paused.load(Ordering::SeqCst) {
            return IterationOutcome::Paused;
        }

        // Consolidation before the governor: a due batch must not be starved
        // for the rest of the day once the quota is exhausted
        if self
            .consolidation
            .is_due(self.iterations_since_consolidation.load(Ordering::SeqCst))
        {
            self.run_due_consolidation().await;
        }

        let decision = self.governor.can_execute_loop();
        if !decision.allowed {
            let reason = decision.reason.unwrap_or_else(|| "quota exhausted".into());
            let denials = self.consecutive_denials.fetch_add(1, Ordering::SeqCst) + 1;
            let backoff = governor::backoff_minutes(denials);
            warn!(reason, denials, backoff_minutes = backoff, "Iteration denied by governor");
            self.broadcaster.update_status(AgentStatus::Throttled);
            self.event_bus.publish(RuntimeEvent::GovernorDenied {
                reason,
                consecutive_denials: denials,
                timestamp: Utc::now(),
            });
            return IterationOutcome::Throttled {
                backoff_minutes: backoff,
            };
        }
        self.consecutive_denials.store(0, Ordering::SeqCst);

        // Think
        self.broadcaster.update_status(AgentStatus::Thinking);
        let prompt = self.compose_prompt().await;
        let reply = match self.engine.ask(&prompt, PLAN_CONVERSATION).await {
            Ok(reply) => reply,
            Err(e) => return self.fail_iteration("think", e.to_string()).await,
        };
        self.event_bus.publish(RuntimeEvent::EngineAsked {
            conversation: PLAN_CONVERSATION.into(),
            estimated_tokens: reply.estimated_tokens,
            tool_invocations: reply.tool_invocations.len(),
            timestamp: Utc::now(),
        });
        self.broadcaster
            .add_thought(Thought::new(ThoughtKind::Reasoning, reply.text.clone()));

        let mut planned = match parse_plan(&reply.text) {
            Some(actions) => actions,
            None => {
                // Not a plan; keep the text as a reflection and move on
                self.broadcaster.add_thought(Thought::new(
                    ThoughtKind::Reflection,
                    format!("No actionable plan this iteration: {}", reply.text),
                ));
                Vec::new()
            }
        };
        planned.truncate(self.config.max_actions_per_iteration);

        // Act
        let mut action_tokens = 0u64;
        let executed = planned.len();
        if !planned.is_empty() {
            self.broadcaster.update_status(AgentStatus::Acting);
            let results = self.execute_actions(planned).await;
            for (record, tokens) in &results {
                action_tokens += tokens;
                if record.status == ActionStatus::Failed {
                    debug!(action = %record.description, "Action failed");
                }
            }
        }

        self.governor.record_loop(reply.estimated_tokens + action_tokens);

        let iteration = self.iteration.fetch_add(1, Ordering::SeqCst) + 1;
        self.iterations_since_consolidation.fetch_add(1, Ordering::SeqCst);
        self.broadcaster.update_status(AgentStatus::Idle);
        self.event_bus.publish(RuntimeEvent::LoopCompleted {
            iteration,
            status: AgentStatus::Idle,
            timestamp: Utc::now(),
        });
        debug!(iteration, actions = executed, "Iteration completed");
        IterationOutcome::Completed { actions: executed }
    }

    // ── Internals ─────────────────────────────────────────────────────

    /// Consolidation suspends the loop for its duration; the prior status is
    /// restored afterwards.
    async fn run_due_consolidation(&self) {
        let prior = self.broadcaster.current_state().status;
        self.broadcaster.update_status(AgentStatus::Paused);
        if self.consolidation.run_batch().await.is_some() {
            self.iterations_since_consolidation.store(0, Ordering::SeqCst);
        }
        self.broadcaster.update_status(prior);
    }

    async fn compose_prompt(&self) -> String {
        let state = self.broadcaster.current_state();
        let context = self.refreshed_context().await;

        let mut prompt = String::new();
        if !state.directive.is_empty() {
            prompt.push_str(&state.directive);
            prompt.push_str("\n\n");
        }
        if !state.goal.is_empty() {
            prompt.push_str(&format!("Current goal: {}\n\n", state.goal));
        }
        if !context.is_empty() {
            prompt.push_str(&context);
            prompt.push_str("\n\n");
        }
        prompt.push_str(
            "Decide what to do next. Respond with a JSON array of action descriptions \
             (strings), or an object {\"actions\": [...]}. Respond with [] when nothing \
             is worth doing.",
        );
        prompt
    }

    /// The memory context, rebuilt every N iterations and cached in between.
    async fn refreshed_context(&self) -> String {
        let iteration = self.iteration.load(Ordering::SeqCst);
        let refresh_every = self.config.context_refresh_iterations.max(1);
        let cached = self
            .cached_context
            .lock()
            .expect("context cache lock poisoned")
            .clone();

        if !cached.is_empty() && iteration % refresh_every != 0 {
            return cached;
        }
        match self.context.build().await {
            Ok(fresh) => {
                *self
                    .cached_context
                    .lock()
                    .expect("context cache lock poisoned") = fresh.clone();
                fresh
            }
            Err(e) => {
                // A stale context beats no context
                warn!(error = %e, "Context rebuild failed, reusing cached context");
                cached
            }
        }
    }

    /// Execute planned actions with bounded parallelism, recording each
    /// action's lifecycle in the broadcaster.
    async fn execute_actions(&self, planned: Vec<String>) -> Vec<(ActionRecord, u64)> {
        stream::iter(planned.into_iter().map(|description| {
            let engine = Arc::clone(&self.engine);
            let broadcaster = Arc::clone(&self.broadcaster);
            async move {
                let mut record = ActionRecord::new(description.clone());
                record.status = ActionStatus::Running;
                broadcaster.add_action(record.clone());

                let prompt =
                    format!("Carry out this action and report the result:\n{description}");
                let tokens = match engine.ask(&prompt, ACTION_CONVERSATION).await {
                    Ok(reply) => {
                        record.finish(ActionStatus::Completed, reply.text);
                        reply.estimated_tokens
                    }
                    Err(e) => {
                        record.finish(ActionStatus::Failed, e.to_string());
                        0
                    }
                };
                broadcaster.update_action(record.clone());
                (record, tokens)
            }
        }))
        .buffer_unordered(self.config.max_parallel_actions.max(1))
        .collect()
        .await
    }

    /// An iteration-level failure: record it durably, surface it, and leave
    /// the loop in the error state until the next iteration recovers.
    async fn fail_iteration(&self, context: &str, message: String) -> IterationOutcome {
        warn!(context, error = %message, "Iteration failed");
        let entry = MemoryEntry::new(
            EntryKind::Error,
            format!("{context} failed: {message}"),
            format!("{context} failure"),
        )
        .with_importance(0.6)
        .with_tag("loop");
        if let Err(e) = self.long_term.store(entry).await {
            warn!(error = %e, "Failed to record iteration error");
        }
        self.broadcaster.update_status(AgentStatus::Error);
        self.event_bus.publish(RuntimeEvent::ErrorOccurred {
            context: context.to_string(),
            error_message: message.clone(),
            timestamp: Utc::now(),
        });
        IterationOutcome::Failed { reason: message }
    }
}

#[async_trait]
impl CommandHandler for AgentController {
    async fn update_prompt(&self, prompt: &str) -> Result<(), Error> {
        self.broadcaster.update_prompt(prompt);
        info!("Standing directive updated");
        Ok(())
    }

    async fn pause(&self) -> Result<(), Error> {
        self.paused.store(true, Ordering::SeqCst);
        self.broadcaster.update_status(AgentStatus::Paused);
        info!("Agent paused");
        Ok(())
    }

    async fn resume(&self) -> Result<(), Error> {
        self.paused.store(false, Ordering::SeqCst);
        self.broadcaster.update_status(AgentStatus::Idle);
        info!("Agent resumed");
        Ok(())
    }

    async fn trigger_batch_learning(&self) -> Result<(), Error> {
        let since = Utc::now() - Duration::hours(24);
        let learnings = self.consolidation.extract_learnings(since).await?;
        let count = learnings.len();
        for learning in &learnings {
            self.consolidation.store_learning(learning).await?;
        }
        info!(learnings = count, "Batch learning finished");
        Ok(())
    }

    async fn trigger_consolidation(&self) -> Result<(), Error> {
        // Out-of-band; the engine's own guard makes duplicates no-ops
        let consolidation = Arc::clone(&self.consolidation);
        tokio::spawn(async move {
            consolidation.run_batch().await;
        });
        Ok(())
    }

    async fn add_goal(&self, goal: &str) -> Result<(), Error> {
        self.broadcaster.update_goal(goal);
        info!(goal, "Goal updated");
        Ok(())
    }

    async fn query_state(&self) -> AgentSnapshot {
        self.broadcaster.current_state()
    }
}

/// Parse an engine reply into action descriptions.
///
/// Accepts a JSON array (of strings or of objects carrying `description` or
/// `action`) or an object with an `actions` array, optionally wrapped in a
/// code fence. Returns None when the text is not a plan; an explicit empty
/// array is a valid empty plan.
fn parse_plan(text: &str) -> Option<Vec<String>> {
    let cleaned = strip_code_fence(text);
    let value: serde_json::Value = serde_json::from_str(cleaned.trim()).ok()?;
    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(map) => map.get("actions")?.as_array()?.clone(),
        _ => return None,
    };
    Some(
        items
            .into_iter()
            .filter_map(|item| match item {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Object(m) => m
                    .get("description")
                    .or_else(|| m.get("action"))
                    .and_then(|d| d.as_str())
                    .map(String::from),
                _ => None,
            })
            .collect(),
    )
}

/// Strip a surrounding markdown code fence, tolerating a language tag.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidation::ConsolidationConfig;
    use crate::governor::GovernorConfig;
    use everloop_core::{Command, CommandKind, CommandQueue, EngineError, EngineReply};
    use everloop_queue::InMemoryQueue;
    use everloop_store::{InMemoryBlobStore, ShortTermMemory};
    use std::collections::VecDeque;

    /// Replies are consumed front-to-back; an exhausted script errors.
    struct ScriptedEngine {
        replies: Mutex<VecDeque<Result<EngineReply, EngineError>>>,
        asks: AtomicU64,
    }

    impl ScriptedEngine {
        fn new(replies: Vec<Result<EngineReply, EngineError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                asks: AtomicU64::new(0),
            }
        }

        fn reply(text: &str, tokens: u64) -> Result<EngineReply, EngineError> {
            Ok(EngineReply {
                text: text.to_string(),
                estimated_tokens: tokens,
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl ReasoningEngine for ScriptedEngine {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn ask(&self, _prompt: &str, _conversation: &str) -> Result<EngineReply, EngineError> {
            self.asks.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(EngineError::Network("script exhausted".into())))
        }
    }

    struct Harness {
        controller: AgentController,
        queue: Arc<InMemoryQueue>,
        long_term: Arc<LongTermMemory>,
        event_bus: Arc<EventBus>,
    }

    fn harness_with(
        replies: Vec<Result<EngineReply, EngineError>>,
        governor_config: GovernorConfig,
        consolidation_config: ConsolidationConfig,
    ) -> Harness {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let short_term = Arc::new(ShortTermMemory::new(blobs.clone()));
        let long_term = Arc::new(LongTermMemory::new(blobs));
        let broadcaster = Arc::new(StateBroadcaster::new(
            short_term.clone(),
            long_term.clone(),
        ));
        let engine: Arc<dyn ReasoningEngine> = Arc::new(ScriptedEngine::new(replies));
        let event_bus = Arc::new(EventBus::default());
        let queue = Arc::new(InMemoryQueue::new());

        let consolidation = Arc::new(ConsolidationEngine::new(
            short_term,
            long_term.clone(),
            engine.clone(),
            broadcaster.clone(),
            event_bus.clone(),
            consolidation_config,
        ));
        let controller = AgentController::new(
            engine,
            Arc::new(UsageGovernor::new(governor_config)),
            broadcaster,
            consolidation,
            ContextBuilder::new(long_term.clone()),
            CommandProcessor::new(queue.clone(), event_bus.clone()),
            long_term.clone(),
            event_bus.clone(),
        );
        Harness {
            controller,
            queue,
            long_term,
            event_bus,
        }
    }

    fn harness(replies: Vec<Result<EngineReply, EngineError>>) -> Harness {
        harness_with(
            replies,
            GovernorConfig::default(),
            // High thresholds keep consolidation out of unrelated tests
            ConsolidationConfig {
                iteration_threshold: 1_000,
                ..ConsolidationConfig::default()
            },
        )
    }

    async fn submit(h: &Harness, kind: CommandKind, content: &str) {
        let body = serde_json::to_string(&Command::new(kind, content)).unwrap();
        h.queue.send(&body).await.unwrap();
    }

    #[tokio::test]
    async fn completed_iteration_plans_acts_and_accounts() {
        let h = harness(vec![
            ScriptedEngine::reply(r#"["inspect the repo", "summarize findings"]"#, 100),
            ScriptedEngine::reply("done", 50),
            ScriptedEngine::reply("done", 50),
        ]);

        let outcome = h.controller.run_iteration().await;
        assert_eq!(outcome, IterationOutcome::Completed { actions: 2 });

        let state = h.controller.query_state().await;
        assert_eq!(state.status, AgentStatus::Idle);
        assert_eq!(state.recent_thoughts.len(), 1);
        assert_eq!(state.recent_actions.len(), 2);
        assert!(state
            .recent_actions
            .iter()
            .all(|a| a.status == ActionStatus::Completed));

        let usage = h.controller.governor.today();
        assert_eq!(usage.loops, 1);
        assert_eq!(usage.estimated_tokens, 200);
    }

    #[tokio::test]
    async fn unparsable_plan_becomes_a_reflection() {
        let h = harness(vec![ScriptedEngine::reply(
            "I should take a moment to reflect.",
            10,
        )]);

        let outcome = h.controller.run_iteration().await;
        assert_eq!(outcome, IterationOutcome::Completed { actions: 0 });

        let state = h.controller.query_state().await;
        assert_eq!(state.recent_thoughts.len(), 2);
        assert_eq!(
            state.recent_thoughts.last().unwrap().kind,
            ThoughtKind::Reflection
        );
        assert!(state.recent_actions.is_empty());
    }

    #[tokio::test]
    async fn empty_plan_is_a_quiet_iteration() {
        let h = harness(vec![ScriptedEngine::reply("```json\n[]\n```", 10)]);
        let outcome = h.controller.run_iteration().await;
        assert_eq!(outcome, IterationOutcome::Completed { actions: 0 });
        // No reflection: an explicit empty plan is a valid answer
        assert_eq!(h.controller.query_state().await.recent_thoughts.len(), 1);
    }

    #[tokio::test]
    async fn pause_and_resume_within_one_iteration_each() {
        let h = harness(vec![
            ScriptedEngine::reply("[]", 10),
            ScriptedEngine::reply("[]", 10),
        ]);

        // Seed a thought so we can check the buffers survive the pause
        h.controller
            .broadcaster
            .add_thought(Thought::new(ThoughtKind::Observation, "before pause"));

        submit(&h, CommandKind::PauseAgent, "").await;
        let outcome = h.controller.run_iteration().await;
        assert_eq!(outcome, IterationOutcome::Paused);
        assert_eq!(h.controller.query_state().await.status, AgentStatus::Paused);

        // While paused nothing is asked of the engine
        let outcome = h.controller.run_iteration().await;
        assert_eq!(outcome, IterationOutcome::Paused);

        submit(&h, CommandKind::ResumeAgent, "").await;
        let outcome = h.controller.run_iteration().await;
        assert!(matches!(outcome, IterationOutcome::Completed { .. }));

        let state = h.controller.query_state().await;
        assert_eq!(state.status, AgentStatus::Idle);
        assert!(state
            .recent_thoughts
            .iter()
            .any(|t| t.content == "before pause"));
    }

    #[tokio::test]
    async fn governor_denial_escalates_backoff() {
        let h = harness_with(
            vec![],
            GovernorConfig {
                max_loops_per_day: 0,
                ..GovernorConfig::default()
            },
            ConsolidationConfig {
                iteration_threshold: 1_000,
                ..ConsolidationConfig::default()
            },
        );

        let first = h.controller.run_iteration().await;
        assert_eq!(first, IterationOutcome::Throttled { backoff_minutes: 2 });
        let second = h.controller.run_iteration().await;
        assert_eq!(second, IterationOutcome::Throttled { backoff_minutes: 4 });
        assert_eq!(
            h.controller.query_state().await.status,
            AgentStatus::Throttled
        );
    }

    #[tokio::test]
    async fn engine_failure_is_recorded_and_recoverable() {
        let h = harness(vec![
            Err(EngineError::Timeout("deadline".into())),
            ScriptedEngine::reply("[]", 10),
        ]);

        let outcome = h.controller.run_iteration().await;
        assert!(matches!(outcome, IterationOutcome::Failed { .. }));
        assert_eq!(h.controller.query_state().await.status, AgentStatus::Error);

        let errors = h.long_term.by_kind(EntryKind::Error, 10).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].content.contains("deadline"));

        // The next iteration recovers on its own
        let outcome = h.controller.run_iteration().await;
        assert!(matches!(outcome, IterationOutcome::Completed { .. }));
        assert_eq!(h.controller.query_state().await.status, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn failed_action_does_not_fail_the_iteration() {
        let h = harness(vec![
            ScriptedEngine::reply(r#"["works", "breaks"]"#, 10),
            ScriptedEngine::reply("ok", 5),
            Err(EngineError::Network("down".into())),
        ]);

        let outcome = h.controller.run_iteration().await;
        assert_eq!(outcome, IterationOutcome::Completed { actions: 2 });

        let state = h.controller.query_state().await;
        let failed = state
            .recent_actions
            .iter()
            .filter(|a| a.status == ActionStatus::Failed)
            .count();
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn consolidation_runs_when_due_and_restores_status() {
        let h = harness_with(
            vec![
                ScriptedEngine::reply("[]", 10),
                ScriptedEngine::reply("[]", 10),
                ScriptedEngine::reply("[]", 10),
                ScriptedEngine::reply("[]", 10),
            ],
            GovernorConfig::default(),
            ConsolidationConfig {
                iteration_threshold: 2,
                min_group_size: 100,
                ..ConsolidationConfig::default()
            },
        );
        let mut events = h.event_bus.subscribe();

        // Iterations 1 and 2 raise the counter to 2; iteration 3 is due
        h.controller.run_iteration().await;
        h.controller.run_iteration().await;
        h.controller.run_iteration().await;

        let mut finished = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event.as_ref(), RuntimeEvent::ConsolidationFinished { .. }) {
                finished += 1;
            }
        }
        assert_eq!(finished, 1);
        assert_eq!(h.controller.query_state().await.status, AgentStatus::Idle);

        // The counter was reset, so the next iteration is not due again
        h.controller.run_iteration().await;
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(
                event.as_ref(),
                RuntimeEvent::ConsolidationFinished { .. }
            ));
        }
    }

    #[tokio::test]
    async fn due_consolidation_runs_even_when_throttled() {
        let h = harness_with(
            vec![],
            GovernorConfig {
                max_loops_per_day: 0,
                ..GovernorConfig::default()
            },
            // Always due: the iteration counter starts at the threshold
            ConsolidationConfig {
                iteration_threshold: 0,
                ..ConsolidationConfig::default()
            },
        );
        let mut events = h.event_bus.subscribe();

        let outcome = h.controller.run_iteration().await;
        assert_eq!(outcome, IterationOutcome::Throttled { backoff_minutes: 2 });

        let mut finished = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event.as_ref(), RuntimeEvent::ConsolidationFinished { .. }) {
                finished += 1;
            }
        }
        assert_eq!(finished, 1);
    }

    #[tokio::test]
    async fn commands_update_directive_and_goal() {
        let h = harness(vec![ScriptedEngine::reply("[]", 10)]);
        submit(&h, CommandKind::UpdatePrompt, "be methodical").await;
        submit(&h, CommandKind::AddGoal, "map the module graph").await;

        h.controller.run_iteration().await;

        let state = h.controller.query_state().await;
        assert_eq!(state.directive, "be methodical");
        assert_eq!(state.goal, "map the module graph");
    }

    #[test]
    fn plan_parsing_accepts_common_shapes() {
        assert_eq!(
            parse_plan(r#"["a", "b"]"#),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(
            parse_plan(r#"{"actions": [{"description": "c"}]}"#),
            Some(vec!["c".to_string()])
        );
        assert_eq!(
            parse_plan("```json\n[\"fenced\"]\n```"),
            Some(vec!["fenced".to_string()])
        );
        assert_eq!(parse_plan("[]"), Some(vec![]));
        assert_eq!(parse_plan("just prose"), None);
        assert_eq!(parse_plan(r#"{"thoughts": "no actions key"}"#), None);
    }
}
