/// Global unread aggregator
///
/// Incrementally tracks the sum of per-conversation unread counts, and is
/// periodically re-verified against a full recompute so missed events
/// self-heal instead of accumulating drift.
use crate::index::ConversationIndex;
use tracing::warn;

pub struct UnreadAggregator {
    total: u64,
}

impl UnreadAggregator {
    pub fn new() -> Self {
        Self { total: 0 }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Apply an incremental change (e.g. +1 on an unread push, -n on a
    /// conversation clear). Saturates at zero rather than underflowing.
    pub fn apply_delta(&mut self, delta: i64) {
        if delta >= 0 {
            self.total = self.total.saturating_add(delta as u64);
        } else {
            self.total = self.total.saturating_sub(delta.unsigned_abs());
        }
    }

    /// Recompute from the index and report whether drift was found.
    pub fn recompute_from(&mut self, index: &ConversationIndex) -> bool {
        let actual = index.total_unread();
        let drifted = actual != self.total;
        if drifted {
            warn!(
                tracked = self.total,
                actual = actual,
                "unread drift corrected"
            );
            self.total = actual;
        }
        drifted
    }
}

impl Default for UnreadAggregator {
    fn default() -> Self {
        Self::new()
    }
}
