use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rules::{ActionKind, RuleId};

/// Result of one action on one torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityOutcome {
    Success,
    Failed,
    /// Refused before running, e.g. a program outside the allow-list.
    Rejected,
    Skipped,
}

impl ActivityOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityOutcome::Success => "success",
            ActivityOutcome::Failed => "failed",
            ActivityOutcome::Rejected => "rejected",
            ActivityOutcome::Skipped => "skipped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(ActivityOutcome::Success),
            "failed" => Some(ActivityOutcome::Failed),
            "rejected" => Some(ActivityOutcome::Rejected),
            "skipped" => Some(ActivityOutcome::Skipped),
            _ => None,
        }
    }
}

/// Something the engine did, or tried to do, to a torrent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub instance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<RuleId>,
    pub torrent_hash: String,
    pub action: ActionKind,
    pub outcome: ActivityOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ActivityEvent {
    pub fn new(
        instance: impl Into<String>,
        rule_id: Option<RuleId>,
        torrent_hash: impl Into<String>,
        action: ActionKind,
        outcome: ActivityOutcome,
    ) -> Self {
        Self {
            instance: instance.into(),
            rule_id,
            torrent_hash: torrent_hash.into(),
            action,
            outcome,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// A stored activity event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: ActivityEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_names() {
        for outcome in [
            ActivityOutcome::Success,
            ActivityOutcome::Failed,
            ActivityOutcome::Rejected,
            ActivityOutcome::Skipped,
        ] {
            assert_eq!(ActivityOutcome::parse(outcome.as_str()), Some(outcome));
        }
    }

    #[test]
    fn test_record_serializes_flat() {
        let record = ActivityRecord {
            id: 1,
            timestamp: Utc::now(),
            event: ActivityEvent::new("main", Some(3), "abc", ActionKind::Delete, ActivityOutcome::Failed)
                .with_detail("boom"),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["instance"], "main");
        assert_eq!(json["rule_id"], 3);
        assert_eq!(json["action"], "delete");
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["detail"], "boom");
    }
}
