use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{ActivityOutcome, ActivityRecord};
use crate::rules::{ActionKind, RuleId};

#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid stored value: {0}")]
    InvalidValue(String),
}

/// Filter for querying activity
#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    pub instance: Option<String>,
    pub rule_id: Option<RuleId>,
    pub torrent_hash: Option<String>,
    pub action: Option<ActionKind>,
    pub outcome: Option<ActivityOutcome>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl ActivityFilter {
    pub fn new() -> Self {
        Self {
            limit: 100,
            offset: 0,
            ..Default::default()
        }
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    pub fn with_rule_id(mut self, rule_id: RuleId) -> Self {
        self.rule_id = Some(rule_id);
        self
    }

    pub fn with_torrent_hash(mut self, hash: impl Into<String>) -> Self {
        self.torrent_hash = Some(hash.into());
        self
    }

    pub fn with_action(mut self, action: ActionKind) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_outcome(mut self, outcome: ActivityOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn with_time_range(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for activity storage
pub trait ActivityStore: Send + Sync {
    /// Insert a record, returns the assigned ID
    fn insert(&self, record: &ActivityRecord) -> Result<i64, ActivityError>;

    /// Query records, newest first
    fn query(&self, filter: &ActivityFilter) -> Result<Vec<ActivityRecord>, ActivityError>;

    /// Count matching records
    fn count(&self, filter: &ActivityFilter) -> Result<i64, ActivityError>;
}
