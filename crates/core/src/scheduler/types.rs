//! Types for the rule scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::executor::ExecutionReport;
use crate::free_space::FreeSpaceProjection;
use crate::rules::{RuleError, RuleId};

/// Errors that can occur while running a cycle or managing rules.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The torrent listing failed; the cycle did nothing.
    #[error("failed to list torrents: {0}")]
    ListTorrents(#[from] crate::torrent_client::TorrentClientError),

    /// Apply-now named a rule the instance does not have.
    #[error("rule not found: {0}")]
    RuleNotFound(RuleId),

    /// Apply-now named a disabled rule.
    #[error("rule {0} is disabled")]
    RuleDisabled(RuleId),

    /// A replacement rule set failed validation.
    #[error("invalid rule set: {0}")]
    InvalidRules(#[from] RuleError),
}

/// Outcome of a rule's most recent evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleResult {
    /// Not evaluated yet.
    Waiting,
    /// Matched at least one torrent and every action went through.
    Applied,
    /// Matched nothing.
    NoMatch,
    /// The cycle failed or some of the rule's actions did.
    Failed,
}

impl RuleResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleResult::Waiting => "waiting",
            RuleResult::Applied => "applied",
            RuleResult::NoMatch => "no_match",
            RuleResult::Failed => "failed",
        }
    }
}

/// Scheduling state of one rule, as shown by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleRunStatus {
    pub rule_id: RuleId,
    pub name: String,
    pub enabled: bool,
    pub interval_secs: u64,
    /// Last time the rule was evaluated.
    pub last_run_at: Option<DateTime<Utc>>,
    /// When the rule becomes due again; `None` if it is due now or disabled.
    pub next_due_at: Option<DateTime<Utc>>,
    pub last_result: RuleResult,
    /// Torrents the rule matched in its last evaluation.
    pub last_matched: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Per-rule bookkeeping kept between cycles.
#[derive(Debug, Clone)]
pub(crate) struct RunRecord {
    /// Unset until the rule is first evaluated.
    pub last_run_at: Option<DateTime<Utc>>,
    pub result: RuleResult,
    pub matched: usize,
    pub error: Option<String>,
}

/// What a rule did in one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct RuleOutcome {
    pub rule_id: RuleId,
    /// Torrents whose evaluation produced at least one intent.
    pub matched: usize,
    /// Torrents skipped by the debounce window.
    pub debounced: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection: Option<FreeSpaceProjection>,
}

/// Summary of one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub instance: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub torrents: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_space: Option<u64>,
    pub rules: Vec<RuleOutcome>,
    pub execution: ExecutionReport,
}

impl CycleReport {
    /// Report of a cycle with no due rules.
    pub fn idle(instance: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            instance: instance.into(),
            started_at,
            duration_ms: 0,
            torrents: 0,
            free_space: None,
            rules: Vec::new(),
            execution: ExecutionReport::default(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Current status of an engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub instance: String,
    pub running: bool,
    pub rule_set_version: u64,
    pub rule_count: usize,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_result_serialization() {
        assert_eq!(
            serde_json::to_string(&RuleResult::NoMatch).unwrap(),
            "\"no_match\""
        );
        let parsed: RuleResult = serde_json::from_str("\"applied\"").unwrap();
        assert_eq!(parsed, RuleResult::Applied);
        assert_eq!(RuleResult::Waiting.as_str(), "waiting");
    }

    #[test]
    fn test_status_omits_missing_error() {
        let status = RuleRunStatus {
            rule_id: 3,
            name: "cleanup".to_string(),
            enabled: true,
            interval_secs: 900,
            last_run_at: None,
            next_due_at: None,
            last_result: RuleResult::Waiting,
            last_matched: 0,
            last_error: None,
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"last_result\":\"waiting\""));
        assert!(!json.contains("last_error"));
    }

    #[test]
    fn test_idle_report() {
        let report = CycleReport::idle("main", Utc::now());
        assert!(report.is_idle());
        assert_eq!(report.execution.succeeded, 0);
    }
}
