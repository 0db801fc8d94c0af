//! Usage governor — enforces daily loop and token quotas.
//!
//! The governor never errors: a denial is a normal control-flow outcome the
//! controller answers with escalating backoff. Per-day counters live in a
//! day-keyed map behind a single mutex; reads of returned decisions are
//! unsynchronized immutable values.

use chrono::{Duration, Utc};
use everloop_core::UsageRecord;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Quota configuration, immutable after construction.
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    pub max_loops_per_day: u32,
    pub max_tokens_per_day: u64,
    /// Days of usage history kept before pruning
    pub retention_days: i64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_loops_per_day: 500,
            max_tokens_per_day: 2_000_000,
            retention_days: 7,
        }
    }
}

/// The outcome of asking whether another iteration may run.
#[derive(Debug, Clone)]
pub struct LoopDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl LoopDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: String) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Tracks per-day loop and token consumption against configured ceilings.
pub struct UsageGovernor {
    config: GovernorConfig,
    days: Mutex<HashMap<chrono::NaiveDate, UsageRecord>>,
}

impl UsageGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            days: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// May another loop iteration run today?
    pub fn can_execute_loop(&self) -> LoopDecision {
        let today = Utc::now().date_naive();
        let mut days = self.days.lock().expect("governor lock poisoned");
        Self::prune(&mut days, self.config.retention_days);

        let record = days.entry(today).or_insert_with(|| UsageRecord::new(today));

        if record.loops >= self.config.max_loops_per_day {
            return LoopDecision::deny(format!(
                "daily loop limit reached ({}/{})",
                record.loops, self.config.max_loops_per_day
            ));
        }
        if record.estimated_tokens >= self.config.max_tokens_per_day {
            return LoopDecision::deny(format!(
                "daily token limit reached ({}/{})",
                record.estimated_tokens, self.config.max_tokens_per_day
            ));
        }
        LoopDecision::allow()
    }

    /// Account one completed iteration and its token estimate.
    ///
    /// Both counters move under one critical section; a warning fires once
    /// when usage crosses 90% of either ceiling.
    pub fn record_loop(&self, estimated_tokens: u64) {
        let today = Utc::now().date_naive();
        let mut days = self.days.lock().expect("governor lock poisoned");
        Self::prune(&mut days, self.config.retention_days);

        let record = days.entry(today).or_insert_with(|| UsageRecord::new(today));

        let loops_before = record.loops;
        let tokens_before = record.estimated_tokens;
        record.record(estimated_tokens);

        let loop_threshold = self.config.max_loops_per_day as u64 * 9 / 10;
        if (loops_before as u64) < loop_threshold && record.loops as u64 >= loop_threshold {
            warn!(
                loops = record.loops,
                limit = self.config.max_loops_per_day,
                "Daily loop usage crossed 90% of ceiling"
            );
        }
        let token_threshold = self.config.max_tokens_per_day * 9 / 10;
        if tokens_before < token_threshold && record.estimated_tokens >= token_threshold {
            warn!(
                tokens = record.estimated_tokens,
                limit = self.config.max_tokens_per_day,
                "Daily token usage crossed 90% of ceiling"
            );
        }

        debug!(
            loops = record.loops,
            tokens = record.estimated_tokens,
            "Recorded loop usage"
        );
    }

    /// Today's usage, for status reporting.
    pub fn today(&self) -> UsageRecord {
        let today = Utc::now().date_naive();
        let mut days = self.days.lock().expect("governor lock poisoned");
        days.entry(today)
            .or_insert_with(|| UsageRecord::new(today))
            .clone()
    }

    fn prune(days: &mut HashMap<chrono::NaiveDate, UsageRecord>, retention_days: i64) {
        let cutoff = Utc::now().date_naive() - Duration::days(retention_days);
        days.retain(|day, _| *day >= cutoff);
    }
}

/// Escalating wait after consecutive governor denials: 2^denials minutes,
/// capped at 60 minutes.
pub fn backoff_minutes(consecutive_denials: u32) -> u64 {
    2u64.saturating_pow(consecutive_denials.min(6)).min(60)
}
