//! Turns a cycle plan into client calls.
//!
//! Desired values are diffed against the snapshot, torrents needing the same
//! value are batched together, and each stage is dispatched in a fixed
//! order: deletes, category, tags added, tags removed, speed limits, share
//! limits, pause/resume, move, external programs. A failed batch only affects
//! its own torrents.

mod dispatch;
mod intents;
mod program;
mod template;

pub use dispatch::{build_batches, Batch, DispatchItem, Operation};
pub use intents::{CyclePlan, DeleteIntent, Intent, PlanBuilder, TorrentPlan};
pub use program::{
    run_program, AllowList, ProcessProgramRunner, ProgramContext, ProgramDefinition, ProgramError,
    ProgramRunner,
};
pub use template::{
    isolation_folder, sanitize, Template, TemplateError, TemplateField, MOVE_FIELDS,
    PROGRAM_FIELDS,
};

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::activity::{ActivityEvent, ActivityHandle, ActivityOutcome};
use crate::identity::normalize_path;
use crate::metrics;
use crate::rules::{ActionKind, RuleId, RunState};
use crate::torrent_client::{ActionSink, ShareLimits, SpeedLimits, TorrentSnapshot, TorrentState};

/// Default maximum hashes per client call.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// What one execution did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
    /// Per-torrent actions the client accepted.
    pub succeeded: usize,
    /// Per-torrent actions that failed.
    pub failed: usize,
    /// Program runs refused before starting.
    pub rejected: usize,
    /// Actions skipped because the torrent already had the value.
    pub noops: usize,
    pub programs_started: usize,
    /// (hash, rule) pairs with at least one action sent to the client or
    /// program runner.
    #[serde(skip)]
    pub dispatched_pairs: BTreeSet<(String, RuleId)>,
    /// (hash, rule) pairs with at least one failed action.
    #[serde(skip)]
    pub failed_pairs: BTreeSet<(String, RuleId)>,
}

impl ExecutionReport {
    pub fn pair_failed(&self, hash: &str, rule_id: RuleId) -> bool {
        self.failed_pairs.contains(&(hash.to_string(), rule_id))
    }

    pub fn pair_dispatched(&self, hash: &str, rule_id: RuleId) -> bool {
        self.dispatched_pairs.contains(&(hash.to_string(), rule_id))
    }
}

/// Applies cycle plans to one client instance.
pub struct ActionExecutor {
    instance: String,
    sink: Arc<dyn ActionSink>,
    programs: Arc<dyn ProgramRunner>,
    activity: ActivityHandle,
    batch_size: usize,
}

impl ActionExecutor {
    pub fn new(
        instance: impl Into<String>,
        sink: Arc<dyn ActionSink>,
        programs: Arc<dyn ProgramRunner>,
        activity: ActivityHandle,
    ) -> Self {
        Self {
            instance: instance.into(),
            sink,
            programs,
            activity,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub async fn execute(&self, plan: &CyclePlan, torrents: &[TorrentSnapshot]) -> ExecutionReport {
        let snapshots: HashMap<&str, &TorrentSnapshot> =
            torrents.iter().map(|t| (t.hash.as_str(), t)).collect();
        let mut report = ExecutionReport::default();

        let deletes: Vec<_> = plan
            .deletes()
            .map(|(hash, delete)| {
                (
                    Operation::Delete {
                        delete_files: delete.delete_files,
                    },
                    DispatchItem::new(hash.clone(), vec![delete.rule_id]),
                )
            })
            .collect();
        self.dispatch(deletes, &mut report).await;

        let mut category = Vec::new();
        let mut tags_added = Vec::new();
        let mut tags_removed = Vec::new();
        let mut speed = Vec::new();
        let mut share = Vec::new();
        let mut run_state = Vec::new();
        let mut moves = Vec::new();
        let mut programs = Vec::new();

        for (hash, torrent_plan) in &plan.torrents {
            if torrent_plan.is_terminal() {
                continue;
            }
            let Some(snapshot) = snapshots.get(hash.as_str()).copied() else {
                continue;
            };

            if let Some(intent) = &torrent_plan.category {
                if snapshot.category.as_deref().unwrap_or("") != intent.value {
                    category.push((
                        Operation::Category(intent.value.clone()),
                        DispatchItem::new(hash.clone(), vec![intent.rule_id]),
                    ));
                } else {
                    self.noop(ActionKind::Category, &mut report);
                }
            }

            let to_add = torrent_plan.tags_to_add(&snapshot.tags);
            if !to_add.is_empty() {
                tags_added.push(tag_entry(hash, to_add, Operation::AddTags));
            }
            let to_remove = torrent_plan.tags_to_remove(&snapshot.tags);
            if !to_remove.is_empty() {
                tags_removed.push(tag_entry(hash, to_remove, Operation::RemoveTags));
            }

            if let Some(intent) = &torrent_plan.speed_limits {
                if speed_differs(&intent.value, snapshot) {
                    speed.push((
                        Operation::SpeedLimits(intent.value),
                        DispatchItem::new(hash.clone(), vec![intent.rule_id]),
                    ));
                } else {
                    self.noop(ActionKind::SpeedLimits, &mut report);
                }
            }

            if let Some(intent) = &torrent_plan.share_limits {
                if share_differs(&intent.value, snapshot) {
                    share.push((
                        Operation::ShareLimits(intent.value),
                        DispatchItem::new(hash.clone(), vec![intent.rule_id]),
                    ));
                } else {
                    self.noop(ActionKind::ShareLimits, &mut report);
                }
            }

            if let Some(intent) = &torrent_plan.run_state {
                let paused = snapshot.state == TorrentState::Paused;
                match (intent.value, paused) {
                    (RunState::Paused, false) => run_state.push((
                        Operation::Pause,
                        DispatchItem::new(hash.clone(), vec![intent.rule_id]),
                    )),
                    (RunState::Resumed, true) => run_state.push((
                        Operation::Resume,
                        DispatchItem::new(hash.clone(), vec![intent.rule_id]),
                    )),
                    (RunState::Paused, true) => self.noop(ActionKind::Pause, &mut report),
                    (RunState::Resumed, false) => self.noop(ActionKind::Resume, &mut report),
                }
            }

            if let Some(intent) = &torrent_plan.move_to {
                match intent.value.render(snapshot) {
                    Ok(location) if normalize_path(&location) == normalize_path(&snapshot.save_path) => {
                        self.noop(ActionKind::Move, &mut report);
                    }
                    Ok(location) => moves.push((
                        Operation::Move(location),
                        DispatchItem::new(hash.clone(), vec![intent.rule_id]),
                    )),
                    Err(e) => {
                        warn!(hash = %hash, rule_id = intent.rule_id, error = %e, "Move destination failed to render");
                        self.fail(hash, intent.rule_id, ActionKind::Move, e.to_string(), &mut report)
                            .await;
                    }
                }
            }

            if let Some(intent) = &torrent_plan.program {
                programs.push((snapshot, intent));
            }
        }

        for stage in [category, tags_added, tags_removed, speed, share, run_state, moves] {
            self.dispatch(stage, &mut report).await;
        }

        for (snapshot, intent) in programs {
            let context = ProgramContext {
                instance: self.instance.clone(),
                rule_id: intent.rule_id,
                program_id: intent.value.clone(),
                torrent: snapshot.clone(),
            };
            report
                .dispatched_pairs
                .insert((snapshot.hash.clone(), intent.rule_id));
            match self.programs.run(context) {
                Ok(()) => report.programs_started += 1,
                Err(e) if e.is_rejection() => {
                    warn!(hash = %snapshot.hash, program = %intent.value, error = %e, "Program rejected");
                    report.rejected += 1;
                    self.record(
                        &snapshot.hash,
                        Some(intent.rule_id),
                        ActionKind::ExternalProgram,
                        ActivityOutcome::Rejected,
                        Some(e.to_string()),
                    )
                    .await;
                }
                Err(e) => {
                    warn!(hash = %snapshot.hash, program = %intent.value, error = %e, "Program could not start");
                    self.fail(
                        &snapshot.hash,
                        intent.rule_id,
                        ActionKind::ExternalProgram,
                        e.to_string(),
                        &mut report,
                    )
                    .await;
                }
            }
        }

        report
    }

    async fn dispatch(&self, entries: Vec<(Operation, DispatchItem)>, report: &mut ExecutionReport) {
        for batch in build_batches(entries, self.batch_size) {
            let kind = batch.operation.kind();
            let hashes = batch.hashes();
            for item in &batch.items {
                for rule in &item.rules {
                    report.dispatched_pairs.insert((item.hash.clone(), *rule));
                }
            }
            match batch.operation.send(self.sink.as_ref(), &hashes).await {
                Ok(()) => {
                    debug!(action = kind.as_str(), count = hashes.len(), "Dispatched batch");
                    let detail = batch.operation.detail();
                    for item in &batch.items {
                        report.succeeded += 1;
                        metrics::ACTIONS_TOTAL
                            .with_label_values(&[kind.as_str(), ActivityOutcome::Success.as_str()])
                            .inc();
                        self.record(
                            &item.hash,
                            item.primary_rule(),
                            kind,
                            ActivityOutcome::Success,
                            detail.clone(),
                        )
                        .await;
                    }
                }
                Err(e) => {
                    warn!(action = kind.as_str(), count = hashes.len(), error = %e, "Batch failed");
                    for item in &batch.items {
                        report.failed += 1;
                        metrics::ACTIONS_TOTAL
                            .with_label_values(&[kind.as_str(), ActivityOutcome::Failed.as_str()])
                            .inc();
                        for rule in &item.rules {
                            report.failed_pairs.insert((item.hash.clone(), *rule));
                        }
                        self.record(
                            &item.hash,
                            item.primary_rule(),
                            kind,
                            ActivityOutcome::Failed,
                            Some(e.to_string()),
                        )
                        .await;
                    }
                }
            }
        }
    }

    async fn fail(
        &self,
        hash: &str,
        rule_id: RuleId,
        kind: ActionKind,
        detail: String,
        report: &mut ExecutionReport,
    ) {
        report.failed += 1;
        report.dispatched_pairs.insert((hash.to_string(), rule_id));
        report.failed_pairs.insert((hash.to_string(), rule_id));
        metrics::ACTIONS_TOTAL
            .with_label_values(&[kind.as_str(), ActivityOutcome::Failed.as_str()])
            .inc();
        self.record(hash, Some(rule_id), kind, ActivityOutcome::Failed, Some(detail))
            .await;
    }

    fn noop(&self, kind: ActionKind, report: &mut ExecutionReport) {
        report.noops += 1;
        metrics::ACTIONS_NOOP.with_label_values(&[kind.as_str()]).inc();
    }

    async fn record(
        &self,
        hash: &str,
        rule_id: Option<RuleId>,
        kind: ActionKind,
        outcome: ActivityOutcome,
        detail: Option<String>,
    ) {
        let mut event = ActivityEvent::new(&self.instance, rule_id, hash, kind, outcome);
        event.detail = detail;
        self.activity.emit(event).await;
    }
}

fn tag_entry(
    hash: &str,
    tags: std::collections::BTreeMap<String, RuleId>,
    operation: fn(Vec<String>) -> Operation,
) -> (Operation, DispatchItem) {
    let rules: BTreeSet<RuleId> = tags.values().copied().collect();
    let names: Vec<String> = tags.into_keys().collect();
    (
        operation(names),
        DispatchItem::new(hash, rules.into_iter().collect()),
    )
}

fn speed_differs(desired: &SpeedLimits, snapshot: &TorrentSnapshot) -> bool {
    desired.upload.is_some_and(|limit| limit != snapshot.upload_limit)
        || desired.download.is_some_and(|limit| limit != snapshot.download_limit)
}

fn share_differs(desired: &ShareLimits, snapshot: &TorrentSnapshot) -> bool {
    (desired.ratio_limit - snapshot.ratio_limit).abs() > 1e-9
        || desired.seeding_time_limit_mins != snapshot.seeding_time_limit_mins
}
