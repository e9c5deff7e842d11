//! Per (torrent, rule) cooldown.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::rules::RuleId;

/// Entries beyond this count trigger a sweep of expired ones.
const PRUNE_THRESHOLD: usize = 4096;

/// Remembers when a rule last processed a torrent.
///
/// A pair is debounced while fewer than `window` has passed since it was
/// recorded. Expired entries are ignored on lookup and swept only when the
/// map grows large.
#[derive(Debug, Clone)]
pub struct DebounceTracker {
    window: Duration,
    processed: HashMap<(String, RuleId), DateTime<Utc>>,
}

impl DebounceTracker {
    pub fn new(window: std::time::Duration) -> Self {
        Self {
            window: Duration::from_std(window).unwrap_or_else(|_| Duration::days(36_500)),
            processed: HashMap::new(),
        }
    }

    pub fn is_debounced(&self, hash: &str, rule_id: RuleId, now: DateTime<Utc>) -> bool {
        self.processed
            .get(&(hash.to_string(), rule_id))
            .is_some_and(|at| now.signed_duration_since(*at) < self.window)
    }

    pub fn record(&mut self, hash: &str, rule_id: RuleId, now: DateTime<Utc>) {
        self.processed.insert((hash.to_string(), rule_id), now);
        if self.processed.len() > PRUNE_THRESHOLD {
            self.prune(now);
        }
    }

    /// Drop expired entries.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let window = self.window;
        self.processed
            .retain(|_, at| now.signed_duration_since(*at) < window);
    }

    /// Forget every entry of a rule.
    pub fn forget_rule(&mut self, rule_id: RuleId) {
        self.processed.retain(|(_, rule), _| *rule != rule_id);
    }

    pub fn len(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }
}
