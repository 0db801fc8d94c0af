//! Per-day usage accounting for the governor.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Usage counters for one UTC calendar day.
///
/// Counters are monotonically non-decreasing within a day; old days are
/// evicted by the governor after its retention window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    /// The UTC calendar day this record covers
    pub day: NaiveDate,
    /// Loop iterations executed today
    pub loops: u32,
    /// Estimated tokens consumed today
    pub estimated_tokens: u64,
    /// When a counter last changed
    pub updated_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(day: NaiveDate) -> Self {
        Self {
            day,
            loops: 0,
            estimated_tokens: 0,
            updated_at: Utc::now(),
        }
    }

    /// Account one loop iteration and its token estimate.
    pub fn record(&mut self, estimated_tokens: u64) {
        self.loops = self.loops.saturating_add(1);
        self.estimated_tokens = self.estimated_tokens.saturating_add(estimated_tokens);
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_only_grow() {
        let mut r = UsageRecord::new(Utc::now().date_naive());
        r.record(100);
        r.record(250);
        assert_eq!(r.loops, 2);
        assert_eq!(r.estimated_tokens, 350);
    }
}
