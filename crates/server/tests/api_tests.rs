//! API tests driving the router in-process.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use chrono::{TimeZone, Utc};
use serde_json::json;
use tokio_test::assert_ok;

use common::{fixtures, TestFixture, INSTANCE};
use seedwarden_core::{
    rules::{ActionKind, DeleteMode, Field, Operator, TagMode},
    ActivityEvent, ActivityOutcome, ActivityRecord, TorrentClientError,
};

fn old_torrents_rule() -> seedwarden_core::Rule {
    fixtures::delete_rule(
        1,
        fixtures::leaf(Field::Name, Operator::Contains, "Old"),
        DeleteMode::Delete,
    )
}

fn record(hash: &str, rule_id: i64, action: ActionKind, outcome: ActivityOutcome, hour: u32) -> ActivityRecord {
    ActivityRecord {
        id: 0,
        timestamp: Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap(),
        event: ActivityEvent::new(INSTANCE, Some(rule_id), hash, action, outcome),
    }
}

// =============================================================================
// Health, config, metrics
// =============================================================================

#[tokio::test]
async fn test_health_reports_config_hash() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/health").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
    assert_eq!(response.body["config_hash"], "0123456789abcdef");
}

#[tokio::test]
async fn test_config_hides_password() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/config").await;

    assert_eq!(response.status, StatusCode::OK);
    let instance = &response.body["instances"][0];
    assert_eq!(instance["name"], INSTANCE);
    assert_eq!(instance["password_configured"], true);
    assert!(instance.get("password").is_none());
    assert!(!response.body.to_string().contains("secret"));
}

#[tokio::test]
async fn test_metrics_endpoint_serves_prometheus_text() {
    let fixture = TestFixture::new().await;
    fixture.get("/api/v1/health").await;

    let (status, body) = fixture.get_text("/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("seedwarden_http_requests_total"));
    assert!(body.contains("seedwarden_engine_running"));
}

// =============================================================================
// Instances and rules
// =============================================================================

#[tokio::test]
async fn test_list_instances() {
    let fixture = TestFixture::with_rules(vec![old_torrents_rule()]).await;

    let response = fixture.get("/api/v1/instances").await;

    assert_eq!(response.status, StatusCode::OK);
    let instances = response.body.as_array().unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0]["instance"], INSTANCE);
    assert_eq!(instances[0]["running"], false);
    assert_eq!(instances[0]["rule_count"], 1);
}

#[tokio::test]
async fn test_list_rules_includes_status() {
    let fixture = TestFixture::with_rules(vec![old_torrents_rule()]).await;

    let response = fixture.get("/api/v1/instances/main/rules").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["version"], 1);
    let rules = response.body["rules"].as_array().unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0]["id"], 1);
    assert_eq!(rules[0]["condition"]["kind"], "leaf");
    assert_eq!(rules[0]["status"]["last_result"], "waiting");
}

#[tokio::test]
async fn test_list_rules_unknown_instance() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/instances/backup/rules").await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(response.body["error"].as_str().unwrap().contains("backup"));
}

#[tokio::test]
async fn test_replace_rules_bumps_version() {
    let fixture = TestFixture::with_rules(vec![old_torrents_rule()]).await;

    let response = fixture
        .put(
            "/api/v1/instances/main/rules",
            json!({
                "rules": [{
                    "id": 5,
                    "name": "tag linux",
                    "condition": {
                        "kind": "leaf",
                        "field": "name",
                        "operator": "contains",
                        "value": "linux"
                    },
                    "actions": {
                        "tags": { "tags": ["distro"], "mode": "add" }
                    }
                }]
            }),
        )
        .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["version"], 2);
    assert_eq!(response.body["rule_count"], 1);

    let listed = fixture.get("/api/v1/instances/main/rules").await;
    let rules = listed.body["rules"].as_array().unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0]["id"], 5);
    assert_eq!(rules[0]["name"], "tag linux");
}

#[tokio::test]
async fn test_replace_rules_rejects_invalid_set() {
    let fixture = TestFixture::with_rules(vec![old_torrents_rule()]).await;

    // Delete combined with another action
    let response = fixture
        .put(
            "/api/v1/instances/main/rules",
            json!({
                "rules": [{
                    "id": 2,
                    "condition": { "kind": "leaf", "field": "name", "operator": "contains", "value": "" },
                    "actions": {
                        "delete": { "mode": "delete" },
                        "tags": { "tags": ["x"] }
                    }
                }]
            }),
        )
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.body["error"].is_string());

    // The previous set is untouched
    let listed = fixture.get("/api/v1/instances/main/rules").await;
    assert_eq!(listed.body["version"], 1);
    assert_eq!(listed.body["rules"][0]["id"], 1);
}

#[tokio::test]
async fn test_replace_rules_malformed_json() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .put_raw("/api/v1/instances/main/rules", "{ not json")
        .await;

    assert!(response.status.is_client_error());
}

#[tokio::test]
async fn test_apply_rule_runs_cycle() {
    let fixture = TestFixture::with_rules(vec![old_torrents_rule()]).await;
    fixture
        .client
        .add_torrent(fixtures::snapshot("aaa", "Old.Show.S01"))
        .await;
    fixture
        .client
        .add_torrent(fixtures::snapshot("bbb", "New.Show.S01"))
        .await;

    let response = fixture.post("/api/v1/instances/main/rules/1/apply").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["torrents"], 2);
    assert_eq!(response.body["execution"]["succeeded"], 1);
    assert_eq!(fixture.client.torrent_count().await, 1);
    assert!(fixture.client.torrent("bbb").await.is_some());

    let listed = fixture.get("/api/v1/instances/main/rules").await;
    assert_eq!(listed.body["rules"][0]["status"]["last_result"], "applied");
}

#[tokio::test]
async fn test_apply_unknown_rule() {
    let fixture = TestFixture::with_rules(vec![old_torrents_rule()]).await;

    let response = fixture.post("/api/v1/instances/main/rules/99/apply").await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_apply_disabled_rule_conflicts() {
    let mut rule = fixtures::tag_rule(
        3,
        fixtures::leaf(Field::Name, Operator::Contains, ""),
        &["seen"],
        TagMode::Add,
    );
    rule.enabled = false;
    let fixture = TestFixture::with_rules(vec![rule]).await;

    let response = fixture.post("/api/v1/instances/main/rules/3/apply").await;

    assert_eq!(response.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_apply_rule_client_unreachable() {
    let fixture = TestFixture::with_rules(vec![old_torrents_rule()]).await;
    fixture
        .client
        .set_next_error(TorrentClientError::ConnectionFailed("refused".to_string()))
        .await;

    let response = fixture.post("/api/v1/instances/main/rules/1/apply").await;

    assert_eq!(response.status, StatusCode::BAD_GATEWAY);

    let listed = fixture.get("/api/v1/instances/main/rules").await;
    assert_eq!(listed.body["rules"][0]["status"]["last_result"], "failed");
}

// =============================================================================
// Activity
// =============================================================================

#[tokio::test]
async fn test_activity_filters_and_pagination() {
    let fixture = TestFixture::new().await;
    let store = &fixture.activity_store;
    assert_ok!(store.insert(&record("aaa", 1, ActionKind::Delete, ActivityOutcome::Success, 1)));
    assert_ok!(store.insert(&record("bbb", 2, ActionKind::TagsAdded, ActivityOutcome::Success, 2)));
    assert_ok!(store.insert(&record("ccc", 2, ActionKind::TagsAdded, ActivityOutcome::Failed, 3)));

    let all = fixture.get("/api/v1/activity").await;
    assert_eq!(all.status, StatusCode::OK);
    assert_eq!(all.body["total"], 3);
    assert_eq!(all.body["limit"], 100);
    // Newest first
    assert_eq!(all.body["events"][0]["torrent_hash"], "ccc");

    let by_rule = fixture.get("/api/v1/activity?rule_id=2").await;
    assert_eq!(by_rule.body["total"], 2);

    let by_outcome = fixture
        .get("/api/v1/activity?action=tags_added&outcome=failed")
        .await;
    assert_eq!(by_outcome.body["total"], 1);
    assert_eq!(by_outcome.body["events"][0]["torrent_hash"], "ccc");

    let page = fixture.get("/api/v1/activity?limit=1&offset=1").await;
    assert_eq!(page.body["total"], 3);
    assert_eq!(page.body["events"].as_array().unwrap().len(), 1);
    assert_eq!(page.body["events"][0]["torrent_hash"], "bbb");
}

#[tokio::test]
async fn test_activity_hash_filter_is_case_insensitive() {
    let fixture = TestFixture::new().await;
    assert_ok!(fixture.activity_store.insert(&record("abcdef", 1, ActionKind::Pause, ActivityOutcome::Success, 1)));

    let response = fixture.get("/api/v1/activity?torrent_hash=ABCDEF").await;

    assert_eq!(response.body["total"], 1);
}

#[tokio::test]
async fn test_activity_limit_is_capped() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/activity?limit=50000").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["limit"], 1000);
}

#[tokio::test]
async fn test_activity_rejects_unknown_action() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/activity?action=explode").await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.body["error"].as_str().unwrap().contains("explode"));
}

#[tokio::test]
async fn test_activity_records_applied_actions() {
    let fixture = TestFixture::with_rules(vec![old_torrents_rule()]).await;
    fixture
        .client
        .add_torrent(fixtures::snapshot("aaa", "Old.Show.S01"))
        .await;

    let applied = fixture.post("/api/v1/instances/main/rules/1/apply").await;
    assert_eq!(applied.status, StatusCode::OK);

    // The writer persists asynchronously
    let mut total = 0;
    for _ in 0..50 {
        let response = fixture.get("/api/v1/activity?action=delete").await;
        total = response.body["total"].as_i64().unwrap_or(0);
        if total > 0 {
            assert_eq!(response.body["events"][0]["torrent_hash"], "aaa");
            assert_eq!(response.body["events"][0]["outcome"], "success");
            assert_eq!(response.body["events"][0]["rule_id"], 1);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(total, 1);
}
