//! Per-instance automation engine.
//!
//! One engine drives one client instance:
//! - A background loop ticks every few seconds and runs the rules that are due
//! - Apply-now requests force a rule into the next cycle
//! - Cycles never overlap; callers queue on the cycle lock

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::cycle::{evaluate_rules, CycleInputs};
use super::debounce::DebounceTracker;
use super::types::{
    CycleReport, EngineError, EngineStatus, RuleResult, RuleRunStatus, RunRecord,
};
use crate::activity::ActivityHandle;
use crate::config::{EngineConfig, InstanceConfig};
use crate::evaluator::CategoryNameIndex;
use crate::executor::{ActionExecutor, ProgramRunner};
use crate::identity::{fetch_file_lists, FileLists, FileStat, HardlinkIndex, IdentityIndex};
use crate::metrics;
use crate::rules::{CompiledRule, Field, Rule, RuleId, RuleSet};
use crate::torrent_client::{ActionSink, TorrentFilters, TorrentSource};

/// Queued apply-now requests per engine.
const TRIGGER_CAPACITY: usize = 16;

/// Timing and per-instance knobs of an engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub tick_interval: Duration,
    pub debounce_window: Duration,
    /// Concurrent file-list fetches and stat calls.
    pub stat_workers: usize,
    pub batch_size: usize,
    /// Path passed to the free-space query.
    pub free_space_path: Option<String>,
    pub tracker_aliases: HashMap<String, String>,
}

impl EngineSettings {
    pub fn from_config(engine: &EngineConfig, instance: &InstanceConfig) -> Self {
        Self {
            tick_interval: Duration::from_secs(engine.tick_interval_secs),
            debounce_window: Duration::from_secs(engine.debounce_secs),
            stat_workers: engine.stat_workers,
            batch_size: engine.batch_size,
            free_space_path: instance.free_space_path.clone(),
            tracker_aliases: instance.tracker_aliases.clone(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(20),
            debounce_window: Duration::from_secs(120),
            stat_workers: 8,
            batch_size: crate::executor::DEFAULT_BATCH_SIZE,
            free_space_path: None,
            tracker_aliases: HashMap::new(),
        }
    }
}

/// State only touched while holding the cycle lock.
struct CycleState {
    debounce: DebounceTracker,
}

/// Run bookkeeping readable while a cycle is in flight.
#[derive(Default)]
struct RunBook {
    records: HashMap<RuleId, RunRecord>,
    last_cycle_at: Option<DateTime<Utc>>,
}

/// Drives the rules of one client instance.
pub struct AutomationEngine {
    instance: String,
    source: Arc<dyn TorrentSource>,
    executor: ActionExecutor,
    file_stat: Option<Arc<dyn FileStat>>,
    settings: EngineSettings,
    program_ids: HashSet<String>,

    rules: RwLock<Arc<RuleSet>>,
    runs: RwLock<RunBook>,
    cycle: Mutex<CycleState>,

    // Runtime state
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    trigger_tx: mpsc::Sender<RuleId>,
    trigger_rx: StdMutex<Option<mpsc::Receiver<RuleId>>>,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl AutomationEngine {
    /// Create an engine. Hardlink data is unavailable until a file stat
    /// backend is attached with [`with_file_stat`](Self::with_file_stat).
    pub fn new(
        instance: impl Into<String>,
        source: Arc<dyn TorrentSource>,
        sink: Arc<dyn ActionSink>,
        programs: Arc<dyn ProgramRunner>,
        activity: ActivityHandle,
        settings: EngineSettings,
        rules: RuleSet,
    ) -> Self {
        let instance = instance.into();
        let (shutdown_tx, _) = broadcast::channel(1);
        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_CAPACITY);
        let executor = ActionExecutor::new(instance.clone(), sink, programs, activity)
            .with_batch_size(settings.batch_size);

        Self {
            instance,
            source,
            executor,
            file_stat: None,
            program_ids: HashSet::new(),
            rules: RwLock::new(Arc::new(rules)),
            runs: RwLock::new(RunBook::default()),
            cycle: Mutex::new(CycleState {
                debounce: DebounceTracker::new(settings.debounce_window),
            }),
            settings,
            running: AtomicBool::new(false),
            shutdown_tx,
            trigger_tx,
            trigger_rx: StdMutex::new(Some(trigger_rx)),
            task: StdMutex::new(None),
        }
    }

    /// Enable hardlink checks through `stat`.
    pub fn with_file_stat(mut self, stat: Arc<dyn FileStat>) -> Self {
        self.file_stat = Some(stat);
        self
    }

    /// Program ids replacement rule sets may reference.
    pub fn with_program_ids(mut self, program_ids: HashSet<String>) -> Self {
        self.program_ids = program_ids;
        self
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the background loop.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!(instance = %self.instance, "Engine already running");
            return;
        }

        let triggers = self.trigger_rx.lock().ok().and_then(|mut slot| slot.take());
        let Some(mut triggers) = triggers else {
            error!(instance = %self.instance, "Engine trigger channel unavailable");
            self.running.store(false, Ordering::SeqCst);
            return;
        };

        info!(
            instance = %self.instance,
            tick_secs = self.settings.tick_interval.as_secs(),
            "Starting automation engine"
        );

        let engine = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.settings.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!(instance = %engine.instance, "Automation engine shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = engine.run_cycle(None).await {
                            debug!(instance = %engine.instance, error = %e, "Scheduled cycle failed");
                        }
                    }
                    Some(rule_id) = triggers.recv() => {
                        if let Err(e) = engine.run_cycle(Some(rule_id)).await {
                            warn!(instance = %engine.instance, rule_id, error = %e, "Apply-now cycle failed");
                        }
                    }
                }
            }

            if let Ok(mut slot) = engine.trigger_rx.lock() {
                *slot = Some(triggers);
            }
        });

        if let Ok(mut task) = self.task.lock() {
            *task = Some(handle);
        }
    }

    /// Stop the background loop and wait for an in-flight cycle to finish.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!(instance = %self.instance, "Engine not running");
            return;
        }

        let _ = self.shutdown_tx.send(());
        let handle = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(instance = %self.instance, error = %e, "Engine task panicked");
            }
        }
        info!(instance = %self.instance, "Automation engine stopped");
    }

    /// Queue `rule_id` for the background loop's next cycle.
    pub async fn request_apply(&self, rule_id: RuleId) -> Result<(), EngineError> {
        self.check_applicable(rule_id).await?;
        if self.trigger_tx.try_send(rule_id).is_err() {
            warn!(instance = %self.instance, rule_id, "Apply-now queue full, request dropped");
        }
        Ok(())
    }

    /// Run a cycle now with `rule_id` forced due, after any in-flight cycle.
    ///
    /// The interval is bypassed; the debounce window is not.
    pub async fn apply_now(&self, rule_id: RuleId) -> Result<CycleReport, EngineError> {
        self.check_applicable(rule_id).await?;
        self.run_cycle(Some(rule_id)).await
    }

    async fn check_applicable(&self, rule_id: RuleId) -> Result<(), EngineError> {
        let rules = self.rules().await;
        match rules.get(rule_id) {
            None => Err(EngineError::RuleNotFound(rule_id)),
            Some(rule) if !rule.rule.enabled => Err(EngineError::RuleDisabled(rule_id)),
            Some(_) => Ok(()),
        }
    }

    /// Current rule set.
    pub async fn rules(&self) -> Arc<RuleSet> {
        Arc::clone(&*self.rules.read().await)
    }

    /// Validate and swap in a new rule set. Returns its version.
    ///
    /// A cycle already running keeps the set it started with.
    pub async fn replace_rules(&self, rules: Vec<Rule>) -> Result<u64, EngineError> {
        let mut current = self.rules.write().await;
        let version = current.version() + 1;
        let compiled = RuleSet::compile(version, rules, &self.program_ids)?;

        let ids: HashSet<RuleId> = compiled.rules().iter().map(|r| r.id()).collect();
        self.runs
            .write()
            .await
            .records
            .retain(|id, _| ids.contains(id));

        info!(
            instance = %self.instance,
            version,
            rules = compiled.len(),
            "Replaced rule set"
        );
        *current = Arc::new(compiled);
        Ok(version)
    }

    /// Run status of every rule, in evaluation order.
    pub async fn rule_statuses(&self) -> Vec<RuleRunStatus> {
        let rules = self.rules().await;
        let runs = self.runs.read().await;
        let now = Utc::now();

        rules
            .rules()
            .iter()
            .map(|compiled| {
                let rule = &compiled.rule;
                let record = runs.records.get(&rule.id);
                let last_run_at = record.and_then(|r| r.last_run_at);
                let next_due_at = match last_run_at {
                    Some(at) if rule.enabled => {
                        let due = at + interval_of(compiled);
                        (due > now).then_some(due)
                    }
                    _ => None,
                };
                RuleRunStatus {
                    rule_id: rule.id,
                    name: rule.name.clone(),
                    enabled: rule.enabled,
                    interval_secs: rule.interval_secs,
                    last_run_at,
                    next_due_at,
                    last_result: record.map_or(RuleResult::Waiting, |r| r.result),
                    last_matched: record.map_or(0, |r| r.matched),
                    last_error: record.and_then(|r| r.error.clone()),
                }
            })
            .collect()
    }

    pub async fn status(&self) -> EngineStatus {
        let rules = self.rules().await;
        let runs = self.runs.read().await;
        EngineStatus {
            instance: self.instance.clone(),
            running: self.is_running(),
            rule_set_version: rules.version(),
            rule_count: rules.len(),
            last_cycle_at: runs.last_cycle_at,
        }
    }

    /// Run one cycle over the due rules, plus `forced` if given.
    pub async fn run_cycle(&self, forced: Option<RuleId>) -> Result<CycleReport, EngineError> {
        let mut state = self.cycle.lock().await;
        let started = Instant::now();
        let now = Utc::now();
        let rules = self.rules().await;

        let due: Vec<Arc<CompiledRule>> = {
            let runs = self.runs.read().await;
            rules
                .rules()
                .iter()
                .filter(|rule| {
                    rule.rule.enabled
                        && (forced == Some(rule.id())
                            || is_due(rule, runs.records.get(&rule.id()), now))
                })
                .cloned()
                .collect()
        };

        if due.is_empty() {
            metrics::CYCLES_TOTAL
                .with_label_values(&[self.instance.as_str(), "idle"])
                .inc();
            return Ok(CycleReport::idle(self.instance.clone(), now));
        }
        debug!(
            instance = %self.instance,
            rules = ?due.iter().map(|r| r.id()).collect::<Vec<_>>(),
            "Running cycle"
        );

        let torrents = match self.source.list_torrents(&TorrentFilters::default()).await {
            Ok(torrents) => torrents,
            Err(e) => {
                error!(instance = %self.instance, error = %e, "Cycle aborted: cannot list torrents");
                metrics::CYCLES_TOTAL
                    .with_label_values(&[self.instance.as_str(), "failed"])
                    .inc();
                self.mark_failed(&due, &e.to_string()).await;
                return Err(EngineError::ListTorrents(e));
            }
        };
        metrics::TORRENTS_MANAGED
            .with_label_values(&[self.instance.as_str()])
            .set(torrents.len() as i64);

        let needs_hardlinks = self.file_stat.is_some() && due.iter().any(|r| r.needs_hardlinks());
        let needs_files = needs_hardlinks
            || due
                .iter()
                .any(|r| r.grouping.as_ref().is_some_and(|g| g.needs_files()));
        let files = if needs_files {
            fetch_file_lists(self.source.as_ref(), &torrents, self.settings.stat_workers).await
        } else {
            FileLists::new()
        };

        let hardlinks = match &self.file_stat {
            Some(stat) if needs_hardlinks => {
                HardlinkIndex::build(
                    &torrents,
                    &files,
                    Arc::clone(stat),
                    self.settings.stat_workers,
                )
                .await
            }
            _ => HardlinkIndex::unavailable(),
        };

        let free_space = if due
            .iter()
            .any(|r| r.rule.condition.references(Field::FreeSpace))
        {
            self.read_free_space().await
        } else {
            None
        };

        let identity = IdentityIndex::build(&torrents, hardlinks, &files);
        let category_names = CategoryNameIndex::build(&torrents);
        let inputs = CycleInputs {
            torrents: &torrents,
            identity: &identity,
            files: &files,
            category_names: &category_names,
            tracker_aliases: &self.settings.tracker_aliases,
            free_space,
            now,
        };
        let evaluation = evaluate_rules(&due, &inputs, &state.debounce);

        let execution = self.executor.execute(&evaluation.plan, &torrents).await;

        let mut contributing: BTreeSet<RuleId> = BTreeSet::new();
        for (hash, rule_id) in evaluation.plan.contributions() {
            contributing.insert(rule_id);
            // Only pairs that changed something start a window.
            if execution.pair_dispatched(hash, rule_id) && !execution.pair_failed(hash, rule_id) {
                state.debounce.record(hash, rule_id, now);
            }
        }
        let failed_rules: BTreeSet<RuleId> =
            execution.failed_pairs.iter().map(|(_, id)| *id).collect();

        {
            let mut runs = self.runs.write().await;
            for outcome in &evaluation.outcomes {
                let result = if failed_rules.contains(&outcome.rule_id) {
                    RuleResult::Failed
                } else if contributing.contains(&outcome.rule_id) {
                    RuleResult::Applied
                } else {
                    RuleResult::NoMatch
                };
                metrics::RULES_EVALUATED
                    .with_label_values(&[self.instance.as_str(), result.as_str()])
                    .inc();
                runs.records.insert(
                    outcome.rule_id,
                    RunRecord {
                        last_run_at: Some(now),
                        result,
                        matched: outcome.matched,
                        error: (result == RuleResult::Failed)
                            .then(|| "one or more actions failed".to_string()),
                    },
                );
            }
            runs.last_cycle_at = Some(now);
        }

        let debounced: usize = evaluation.outcomes.iter().map(|o| o.debounced).sum();
        if debounced > 0 {
            metrics::DEBOUNCE_SKIPS
                .with_label_values(&[self.instance.as_str()])
                .inc_by(debounced as u64);
        }

        let elapsed = started.elapsed();
        metrics::CYCLE_DURATION
            .with_label_values(&[self.instance.as_str()])
            .observe(elapsed.as_secs_f64());
        metrics::CYCLES_TOTAL
            .with_label_values(&[self.instance.as_str(), "completed"])
            .inc();

        info!(
            instance = %self.instance,
            rules = due.len(),
            torrents = torrents.len(),
            succeeded = execution.succeeded,
            failed = execution.failed,
            rejected = execution.rejected,
            noops = execution.noops,
            programs = execution.programs_started,
            debounced,
            duration_ms = elapsed.as_millis() as u64,
            "Cycle completed"
        );

        Ok(CycleReport {
            instance: self.instance.clone(),
            started_at: now,
            duration_ms: elapsed.as_millis() as u64,
            torrents: torrents.len(),
            free_space,
            rules: evaluation.outcomes,
            execution,
        })
    }

    async fn read_free_space(&self) -> Option<u64> {
        match self
            .source
            .free_space(self.settings.free_space_path.as_deref())
            .await
        {
            Ok(bytes) => {
                metrics::FREE_SPACE_BYTES
                    .with_label_values(&[self.instance.as_str()])
                    .set(bytes.min(i64::MAX as u64) as i64);
                Some(bytes)
            }
            Err(e) => {
                warn!(instance = %self.instance, error = %e, "Free space unavailable this cycle");
                None
            }
        }
    }

    /// Record a failed cycle without touching last-run times.
    async fn mark_failed(&self, rules: &[Arc<CompiledRule>], error: &str) {
        let mut runs = self.runs.write().await;
        for rule in rules {
            metrics::RULES_EVALUATED
                .with_label_values(&[self.instance.as_str(), RuleResult::Failed.as_str()])
                .inc();
            let record = runs.records.entry(rule.id()).or_insert(RunRecord {
                last_run_at: None,
                result: RuleResult::Failed,
                matched: 0,
                error: None,
            });
            record.result = RuleResult::Failed;
            record.matched = 0;
            record.error = Some(error.to_string());
        }
    }
}

fn interval_of(rule: &CompiledRule) -> chrono::Duration {
    chrono::Duration::seconds(rule.rule.interval_secs.min(i64::MAX as u64) as i64)
}

fn is_due(rule: &CompiledRule, record: Option<&RunRecord>, now: DateTime<Utc>) -> bool {
    match record.and_then(|r| r.last_run_at) {
        Some(at) => now.signed_duration_since(at) >= interval_of(rule),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Operator, TagMode};
    use crate::testing::{fixtures, MockProgramRunner, MockTorrentClient};
    use crate::torrent_client::TorrentClientError;

    fn engine(client: &Arc<MockTorrentClient>, rules: Vec<Rule>) -> Arc<AutomationEngine> {
        let rules = RuleSet::compile(1, rules, &HashSet::new()).unwrap();
        Arc::new(AutomationEngine::new(
            "main",
            client.clone(),
            client.clone(),
            Arc::new(MockProgramRunner::new()),
            ActivityHandle::disabled(),
            EngineSettings::default(),
            rules,
        ))
    }

    fn tag_all(id: RuleId) -> Rule {
        fixtures::tag_rule(
            id,
            fixtures::leaf(Field::Name, Operator::Contains, ""),
            &["managed"],
            TagMode::Add,
        )
    }

    #[tokio::test]
    async fn test_interval_gates_second_cycle() {
        let client = Arc::new(MockTorrentClient::new());
        client.add_torrent(fixtures::snapshot("aaa", "one")).await;
        let engine = engine(&client, vec![tag_all(1)]);

        let first = engine.run_cycle(None).await.unwrap();
        assert_eq!(first.execution.succeeded, 1);

        let second = engine.run_cycle(None).await.unwrap();
        assert!(second.is_idle());
        assert_eq!(client.list_count().await, 1);

        let statuses = engine.rule_statuses().await;
        assert_eq!(statuses[0].last_result, RuleResult::Applied);
        assert!(statuses[0].next_due_at.is_some());
    }

    #[tokio::test]
    async fn test_apply_now_bypasses_interval_not_debounce() {
        let client = Arc::new(MockTorrentClient::new());
        client.add_torrent(fixtures::snapshot("aaa", "one")).await;
        let engine = engine(&client, vec![tag_all(1)]);
        engine.run_cycle(None).await.unwrap();

        // Tag removed out of band; the pair is still inside the window.
        let mut torrent = client.torrent("aaa").await.unwrap();
        torrent.tags.clear();
        client.set_torrents(vec![torrent]).await;

        let report = engine.apply_now(1).await.unwrap();
        assert_eq!(report.rules.len(), 1);
        assert_eq!(report.rules[0].debounced, 1);
        assert_eq!(report.execution.succeeded, 0);
    }

    #[tokio::test]
    async fn test_noop_pairs_are_not_debounced() {
        let client = Arc::new(MockTorrentClient::new());
        let mut tagged = fixtures::snapshot("aaa", "one");
        tagged.tags.insert("managed".to_string());
        client.add_torrent(tagged).await;
        let engine = engine(&client, vec![tag_all(1)]);

        let first = engine.run_cycle(None).await.unwrap();
        assert_eq!(first.execution.succeeded, 0);

        // Tag removed out of band right after a cycle that changed nothing.
        let mut torrent = client.torrent("aaa").await.unwrap();
        torrent.tags.clear();
        client.set_torrents(vec![torrent]).await;

        let report = engine.apply_now(1).await.unwrap();
        assert_eq!(report.rules[0].debounced, 0);
        assert_eq!(report.execution.succeeded, 1);
    }

    #[tokio::test]
    async fn test_apply_now_unknown_or_disabled_rule() {
        let client = Arc::new(MockTorrentClient::new());
        let mut disabled = tag_all(2);
        disabled.enabled = false;
        let engine = engine(&client, vec![tag_all(1), disabled]);

        assert!(matches!(
            engine.apply_now(9).await,
            Err(EngineError::RuleNotFound(9))
        ));
        assert!(matches!(
            engine.apply_now(2).await,
            Err(EngineError::RuleDisabled(2))
        ));
    }

    #[tokio::test]
    async fn test_list_failure_keeps_rules_due() {
        let client = Arc::new(MockTorrentClient::new());
        client.add_torrent(fixtures::snapshot("aaa", "one")).await;
        let engine = engine(&client, vec![tag_all(1)]);

        client
            .set_next_error(TorrentClientError::ConnectionFailed("down".to_string()))
            .await;
        assert!(matches!(
            engine.run_cycle(None).await,
            Err(EngineError::ListTorrents(_))
        ));

        let statuses = engine.rule_statuses().await;
        assert_eq!(statuses[0].last_result, RuleResult::Failed);
        assert!(statuses[0].last_run_at.is_none());
        assert!(statuses[0].last_error.is_some());

        let report = engine.run_cycle(None).await.unwrap();
        assert_eq!(report.execution.succeeded, 1);
    }

    #[tokio::test]
    async fn test_replace_rules_bumps_version() {
        let client = Arc::new(MockTorrentClient::new());
        let engine = engine(&client, vec![tag_all(1)]);

        let version = engine.replace_rules(vec![tag_all(1), tag_all(2)]).await.unwrap();
        assert_eq!(version, 2);
        assert_eq!(engine.rules().await.len(), 2);

        let invalid = tag_all(3).with_interval(5);
        assert!(matches!(
            engine.replace_rules(vec![invalid]).await,
            Err(EngineError::InvalidRules(_))
        ));
        assert_eq!(engine.status().await.rule_set_version, 2);
    }

    #[tokio::test]
    async fn test_start_and_stop_loop() {
        let client = Arc::new(MockTorrentClient::new());
        client.add_torrent(fixtures::snapshot("aaa", "one")).await;
        let engine = engine(&client, vec![tag_all(1)]);

        engine.start();
        assert!(engine.is_running());
        // The first tick fires immediately.
        for _ in 0..50 {
            if client.list_count().await > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        engine.stop().await;
        assert!(!engine.is_running());
        assert!(client.torrent("aaa").await.unwrap().tags.contains("managed"));

        // Restartable after stop.
        engine.start();
        engine.stop().await;
    }
}
