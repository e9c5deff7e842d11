//! Automation engine integration tests.
//!
//! These tests run full cycles against the mock client:
//! list -> identity -> evaluate -> plan -> dispatch -> record

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tempfile::TempDir;

use seedwarden_core::{
    activity::ActivityFilter,
    create_activity_system,
    executor::Operation,
    rules::{
        ActionKind, ActionSet, ConditionNode, DeleteMode, Field, Operator, ProgramAction, TagMode,
    },
    testing::{
        fixtures::{self, GB},
        MockProgramRunner, MockTorrentClient,
    },
    ActivityHandle, ActivityOutcome, ActivityStore, AutomationEngine, EngineSettings, Rule,
    RuleError, RuleResult, RuleSet, SqliteActivityStore,
};

/// Test helper wiring an engine to mocks.
struct TestHarness {
    client: Arc<MockTorrentClient>,
    programs: Arc<MockProgramRunner>,
}

impl TestHarness {
    fn new() -> Self {
        Self {
            client: Arc::new(MockTorrentClient::new()),
            programs: Arc::new(MockProgramRunner::new()),
        }
    }

    fn engine(&self, rules: Vec<Rule>) -> AutomationEngine {
        self.engine_with(rules, ActivityHandle::disabled(), EngineSettings::default())
    }

    fn engine_with(
        &self,
        rules: Vec<Rule>,
        activity: ActivityHandle,
        settings: EngineSettings,
    ) -> AutomationEngine {
        let program_ids: HashSet<String> = HashSet::from(["notify".to_string()]);
        let rules = RuleSet::compile(1, rules, &program_ids).expect("rules should compile");
        AutomationEngine::new(
            "main",
            self.client.clone(),
            self.client.clone(),
            self.programs.clone(),
            activity,
            settings,
            rules,
        )
        .with_program_ids(program_ids)
    }
}

fn everything() -> ConditionNode {
    fixtures::leaf(Field::Name, Operator::Contains, "")
}

#[test]
fn test_delete_combined_with_other_actions_is_rejected() {
    let mut rule = fixtures::delete_rule(1, everything(), DeleteMode::Delete);
    rule.actions.tags = fixtures::tag_rule(1, everything(), &["x"], TagMode::Add)
        .actions
        .tags;

    let result = RuleSet::compile(1, vec![rule], &HashSet::new());
    assert!(matches!(result, Err(RuleError::DeleteNotExclusive(1))));
}

#[tokio::test]
async fn test_delete_wins_over_tag_from_any_rule() {
    let harness = TestHarness::new();
    harness
        .client
        .add_torrent(fixtures::snapshot("aaa", "Old.Release"))
        .await;

    // The tag rule runs first, the delete still takes the torrent.
    let engine = harness.engine(vec![
        fixtures::tag_rule(1, everything(), &["seen"], TagMode::Add).with_sort_order(0),
        fixtures::delete_rule(2, everything(), DeleteMode::DeleteWithFiles).with_sort_order(1),
    ]);

    let report = engine.run_cycle(None).await.unwrap();
    assert_eq!(report.execution.succeeded, 1);

    let calls = harness.client.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].operation, Operation::Delete { delete_files: true });
    assert_eq!(calls[0].hashes, vec!["aaa"]);
    assert_eq!(harness.client.torrent_count().await, 0);

    let statuses = engine.rule_statuses().await;
    assert_eq!(statuses[0].last_result, RuleResult::NoMatch);
    assert_eq!(statuses[1].last_result, RuleResult::Applied);
}

#[tokio::test]
async fn test_first_delete_by_sort_order_wins() {
    let harness = TestHarness::new();
    harness
        .client
        .add_torrent(fixtures::snapshot("aaa", "Some.Release"))
        .await;

    let engine = harness.engine(vec![
        fixtures::delete_rule(1, everything(), DeleteMode::DeleteWithFiles).with_sort_order(5),
        fixtures::delete_rule(2, everything(), DeleteMode::Delete).with_sort_order(1),
    ]);
    engine.run_cycle(None).await.unwrap();

    let deletes = harness.client.calls_for(ActionKind::Delete).await;
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].operation, Operation::Delete { delete_files: false });
}

#[tokio::test]
async fn test_debounce_blocks_repeat_within_window() {
    let harness = TestHarness::new();
    harness
        .client
        .add_torrent(fixtures::snapshot("aaa", "Some.Release"))
        .await;
    let engine = harness.engine(vec![fixtures::tag_rule(
        1,
        everything(),
        &["managed"],
        TagMode::Add,
    )]);

    engine.run_cycle(None).await.unwrap();
    assert_eq!(harness.client.calls_for(ActionKind::TagsAdded).await.len(), 1);

    // Someone removes the tag by hand; the rule would add it back.
    let mut torrent = harness.client.torrent("aaa").await.unwrap();
    torrent.tags.clear();
    harness.client.set_torrents(vec![torrent]).await;

    let report = engine.apply_now(1).await.unwrap();
    assert_eq!(report.rules[0].debounced, 1);
    assert_eq!(harness.client.calls_for(ActionKind::TagsAdded).await.len(), 1);
}

#[tokio::test]
async fn test_failed_action_is_not_debounced() {
    let harness = TestHarness::new();
    harness
        .client
        .add_torrent(fixtures::snapshot("aaa", "Some.Release"))
        .await;
    harness.client.fail_action(ActionKind::TagsAdded).await;
    let engine = harness.engine(vec![fixtures::tag_rule(
        1,
        everything(),
        &["managed"],
        TagMode::Add,
    )]);

    let report = engine.run_cycle(None).await.unwrap();
    assert_eq!(report.execution.failed, 1);
    assert_eq!(engine.rule_statuses().await[0].last_result, RuleResult::Failed);

    harness.client.clear_failures().await;
    let report = engine.apply_now(1).await.unwrap();
    assert_eq!(report.rules[0].debounced, 0);
    assert_eq!(report.execution.succeeded, 1);
}

#[tokio::test]
async fn test_remove_mode_strips_tag_from_non_matching() {
    let harness = TestHarness::new();
    let mut low = fixtures::snapshot("aaa", "Low.Ratio");
    low.ratio = 0.5;
    low.tags.insert("seeded".to_string());
    let mut high = fixtures::snapshot("bbb", "High.Ratio");
    high.ratio = 3.0;
    high.tags.insert("seeded".to_string());
    harness.client.set_torrents(vec![low, high]).await;

    let engine = harness.engine(vec![fixtures::tag_rule(
        1,
        fixtures::leaf(Field::Ratio, Operator::GreaterThan, "2"),
        &["seeded"],
        TagMode::Remove,
    )]);
    engine.run_cycle(None).await.unwrap();

    let calls = harness.client.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].operation,
        Operation::RemoveTags(vec!["seeded".to_string()])
    );
    assert_eq!(calls[0].hashes, vec!["aaa"]);

    let high = harness.client.torrent("bbb").await.unwrap();
    assert!(high.tags.contains("seeded"));
}

#[tokio::test]
async fn test_free_space_scenario_with_shared_group() {
    let harness = TestHarness::new();
    let mut first = fixtures::aged_snapshot("aaa", "Movie.2020", 0, 80);
    let mut second = fixtures::aged_snapshot("bbb", "Movie.2020.cross", 1, 30);
    first.content_path = "/downloads/Movie.2020".to_string();
    second.content_path = "/downloads/Movie.2020".to_string();
    let third = fixtures::aged_snapshot("ccc", "Show.S01", 2, 90);
    let fourth = fixtures::aged_snapshot("ddd", "Show.S02", 3, 50);
    harness
        .client
        .set_torrents(vec![first, second, third, fourth])
        .await;
    harness.client.set_free_space(Some(400 * GB)).await;

    let condition = ConditionNode::and(vec![
        fixtures::leaf(Field::FreeSpace, Operator::LessThan, "500 GB"),
        everything(),
    ]);
    let engine = harness.engine(vec![fixtures::delete_rule(
        1,
        condition,
        DeleteMode::DeleteWithFiles,
    )]);

    let report = engine.run_cycle(None).await.unwrap();
    assert_eq!(report.free_space, Some(400 * GB));

    let projection = report.rules[0].projection.as_ref().unwrap();
    assert_eq!(projection.accepted, vec!["aaa", "bbb", "ccc"]);
    assert_eq!(projection.freed_bytes, 170 * GB);
    assert_eq!(projection.projected_free_space, Some(570 * GB));
    assert!(projection.target_reached);

    let deletes = harness.client.calls_for(ActionKind::Delete).await;
    let deleted: BTreeSet<String> = deletes.iter().flat_map(|c| c.hashes.clone()).collect();
    let expected: BTreeSet<String> = ["aaa", "bbb", "ccc"].iter().map(|h| h.to_string()).collect();
    assert_eq!(deleted, expected);
    assert!(harness.client.torrent("ddd").await.is_some());
}

#[tokio::test]
async fn test_free_space_unavailable_deletes_nothing() {
    let harness = TestHarness::new();
    harness
        .client
        .add_torrent(fixtures::aged_snapshot("aaa", "Old", 0, 80))
        .await;
    harness.client.set_free_space(None).await;

    let engine = harness.engine(vec![fixtures::delete_rule(
        1,
        fixtures::leaf(Field::FreeSpace, Operator::LessThan, "500 GB"),
        DeleteMode::DeleteWithFiles,
    )]);

    let report = engine.run_cycle(None).await.unwrap();
    assert!(report.free_space.is_none());
    assert!(harness.client.calls().await.is_empty());
}

#[tokio::test]
async fn test_preserve_mode_keeps_files_of_surviving_cross_seed() {
    let harness = TestHarness::new();
    let mut kept = fixtures::snapshot("aaa", "Movie.2020");
    kept.category = Some("keep".to_string());
    let mut gone = fixtures::snapshot("bbb", "Movie.2020");
    gone.category = Some("cleanup".to_string());
    harness.client.set_torrents(vec![kept, gone]).await;

    let engine = harness.engine(vec![fixtures::delete_rule(
        1,
        fixtures::leaf(Field::Category, Operator::Equals, "cleanup"),
        DeleteMode::DeleteWithFilesPreserveCrossSeeds,
    )]);
    engine.run_cycle(None).await.unwrap();

    let deletes = harness.client.calls_for(ActionKind::Delete).await;
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].hashes, vec!["bbb"]);
    assert_eq!(deletes[0].operation, Operation::Delete { delete_files: false });
}

#[tokio::test]
async fn test_actions_are_batched() {
    let harness = TestHarness::new();
    let torrents = (0..120)
        .map(|i| fixtures::snapshot(&format!("{:040x}", i), &format!("Release.{}", i)))
        .collect();
    harness.client.set_torrents(torrents).await;

    let engine = harness.engine(vec![fixtures::tag_rule(
        1,
        everything(),
        &["bulk"],
        TagMode::Add,
    )]);
    let report = engine.run_cycle(None).await.unwrap();
    assert_eq!(report.execution.succeeded, 120);

    let sizes: Vec<usize> = harness
        .client
        .calls_for(ActionKind::TagsAdded)
        .await
        .iter()
        .map(|c| c.hashes.len())
        .collect();
    assert_eq!(sizes, vec![50, 50, 20]);
}

#[tokio::test]
async fn test_activity_is_recorded() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = Arc::new(
        SqliteActivityStore::new(&temp_dir.path().join("activity.db"))
            .expect("Failed to create activity store"),
    );
    let (handle, writer) = create_activity_system(store.clone(), 64);
    let writer_task = tokio::spawn(writer.run());

    let harness = TestHarness::new();
    harness
        .client
        .set_torrents(vec![
            fixtures::snapshot("aaa", "Allowed"),
            fixtures::snapshot("bbb", "Refused"),
        ])
        .await;
    harness.programs.reject_hash("bbb").await;

    let mut rule = Rule::new(
        1,
        everything(),
        ActionSet {
            external_program: Some(ProgramAction {
                enabled: true,
                program_id: "notify".to_string(),
            }),
            ..Default::default()
        },
    );
    rule.name = "notify all".to_string();
    let engine = harness.engine_with(vec![rule], handle, EngineSettings::default());

    let report = engine.run_cycle(None).await.unwrap();
    assert_eq!(report.execution.programs_started, 1);
    assert_eq!(report.execution.rejected, 1);
    assert_eq!(harness.programs.started().await.len(), 1);

    // Dropping the engine closes the channel and lets the writer drain.
    drop(engine);
    writer_task.await.unwrap();

    let rejected = store
        .query(&ActivityFilter::new().with_outcome(ActivityOutcome::Rejected))
        .unwrap();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].event.torrent_hash, "bbb");
    assert_eq!(rejected[0].event.rule_id, Some(1));
}
