//! Common test utilities for API testing with mocks.
//!
//! This module provides a fixture that builds the router in-process around
//! engines wired to mock clients, so every endpoint can be exercised without
//! a running qBittorrent.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use seedwarden_core::{
    config::{DatabaseConfig, InstanceConfig, QBittorrentConfig, ServerConfig},
    create_activity_system, ActivityHandle, ActivityStore, AutomationEngine, Config,
    EngineSettings, Rule, RuleSet, SqliteActivityStore,
    testing::{MockProgramRunner, MockTorrentClient},
};
use seedwarden_server::state::AppState;

/// Re-export fixtures for test convenience
pub use seedwarden_core::testing::fixtures;

/// Name of the single instance every fixture manages
pub const INSTANCE: &str = "main";

/// Test fixture for API testing with mock dependencies.
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Mock torrent client backing the instance
    pub client: Arc<MockTorrentClient>,
    /// Mock program runner backing the instance
    pub programs: Arc<MockProgramRunner>,
    /// Engine for the instance
    pub engine: Arc<AutomationEngine>,
    /// Activity store behind the activity endpoint
    pub activity_store: Arc<dyn ActivityStore>,
    /// Handle feeding the activity writer
    pub activity: ActivityHandle,
    /// Temporary directory holding the database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a fixture with no rules.
    pub async fn new() -> Self {
        Self::with_rules(Vec::new()).await
    }

    /// Create a fixture whose instance starts with `rules`.
    pub async fn with_rules(rules: Vec<Rule>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let client = Arc::new(MockTorrentClient::new());
        let programs = Arc::new(MockProgramRunner::new());

        let config = Config {
            server: ServerConfig {
                host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                port: 0, // Not used for in-process testing
            },
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            instances: vec![InstanceConfig {
                name: INSTANCE.to_string(),
                qbittorrent: QBittorrentConfig {
                    url: "http://localhost:8080".to_string(),
                    username: "admin".to_string(),
                    password: "secret".to_string(),
                    timeout_secs: 30,
                },
                local_filesystem_access: false,
                free_space_path: None,
                tracker_aliases: Default::default(),
                rules: rules.clone(),
            }],
            ..Default::default()
        };

        let activity_store: Arc<dyn ActivityStore> = Arc::new(
            SqliteActivityStore::new(&db_path).expect("Failed to create activity store"),
        );
        let (activity, writer) = create_activity_system(Arc::clone(&activity_store), 100);
        tokio::spawn(writer.run());

        let program_ids: HashSet<String> = HashSet::from(["notify".to_string()]);
        let rule_set = RuleSet::compile(1, rules, &program_ids).expect("rules should compile");
        let engine = Arc::new(
            AutomationEngine::new(
                INSTANCE,
                client.clone(),
                client.clone(),
                programs.clone(),
                activity.clone(),
                EngineSettings::default(),
                rule_set,
            )
            .with_program_ids(program_ids),
        );

        let state = Arc::new(AppState::new(
            config,
            "0123456789abcdef",
            [Arc::clone(&engine)],
            Arc::clone(&activity_store),
        ));
        let router = seedwarden_server::api::create_router(state);

        Self {
            router,
            client,
            programs,
            engine,
            activity_store,
            activity,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with no body.
    pub async fn post(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a PUT request with JSON body.
    pub async fn put(&self, path: &str, body: Value) -> TestResponse {
        self.request("PUT", path, Some(body)).await
    }

    /// Send a PUT request with raw string body (for testing malformed JSON).
    pub async fn put_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("PUT")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Fetch the raw text body of a GET request.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        self.send(request_builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}
