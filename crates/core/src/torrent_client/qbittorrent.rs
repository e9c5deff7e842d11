//! qBittorrent Web API adapter.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::QBittorrentConfig;

use super::{
    ActionSink, ShareLimits, SpeedLimits, TorrentClientError, TorrentFile, TorrentFilters,
    TorrentSnapshot, TorrentSource, TorrentState,
};

/// qBittorrent client implementation.
pub struct QBittorrentClient {
    client: Client,
    config: QBittorrentConfig,
    /// Session ID cookie (refreshed on auth failure).
    session: Arc<RwLock<Option<String>>>,
}

impl QBittorrentClient {
    /// Create a new qBittorrent client.
    pub fn new(config: QBittorrentConfig) -> Result<Self, TorrentClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .cookie_store(true)
            .build()
            .map_err(|e| TorrentClientError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            config,
            session: Arc::new(RwLock::new(None)),
        })
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    /// Login and store session cookie.
    async fn login(&self) -> Result<(), TorrentClientError> {
        let url = format!("{}/api/v2/auth/login", self.base_url());

        let params = [
            ("username", self.config.username.as_str()),
            ("password", self.config.password.as_str()),
        ];

        let response = self
            .client
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if body.contains("Ok.") {
            debug!("qBittorrent login successful");
            let mut session = self.session.write().await;
            *session = Some("authenticated".to_string());
            Ok(())
        } else if body.contains("Fails.") || status.as_u16() == 403 {
            Err(TorrentClientError::AuthenticationFailed(
                "Invalid credentials".to_string(),
            ))
        } else {
            Err(TorrentClientError::AuthenticationFailed(format!(
                "Unexpected response: {}",
                body.chars().take(100).collect::<String>()
            )))
        }
    }

    /// Ensure we have a valid session, logging in if needed.
    async fn ensure_authenticated(&self) -> Result<(), TorrentClientError> {
        let session = self.session.read().await;
        if session.is_some() {
            return Ok(());
        }
        drop(session);
        self.login().await
    }

    async fn expire_session(&self) {
        warn!("qBittorrent session expired, re-authenticating");
        let mut session = self.session.write().await;
        *session = None;
    }

    /// Make an authenticated GET request.
    async fn get(&self, endpoint: &str) -> Result<String, TorrentClientError> {
        self.ensure_authenticated().await?;

        let url = format!("{}{}", self.base_url(), endpoint);
        let mut response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(map_request_error)?;

        if response.status().as_u16() == 403 {
            self.expire_session().await;
            self.login().await?;
            response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(map_request_error)?;
        }

        read_body(response).await
    }

    /// Make an authenticated POST request with form data.
    async fn post_form(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<String, TorrentClientError> {
        self.ensure_authenticated().await?;

        let url = format!("{}{}", self.base_url(), endpoint);
        let mut response = self
            .client
            .post(&url)
            .form(params)
            .send()
            .await
            .map_err(map_request_error)?;

        if response.status().as_u16() == 403 {
            self.expire_session().await;
            self.login().await?;
            response = self
                .client
                .post(&url)
                .form(params)
                .send()
                .await
                .map_err(map_request_error)?;
        }

        read_body(response).await
    }
}

fn map_request_error(e: reqwest::Error) -> TorrentClientError {
    if e.is_timeout() {
        TorrentClientError::Timeout
    } else if e.is_connect() {
        TorrentClientError::ConnectionFailed(e.to_string())
    } else {
        TorrentClientError::ApiError(e.to_string())
    }
}

async fn read_body(response: reqwest::Response) -> Result<String, TorrentClientError> {
    let status = response.status();
    if !status.is_success() {
        return Err(TorrentClientError::ApiError(format!("HTTP {}", status)));
    }
    response
        .text()
        .await
        .map_err(|e| TorrentClientError::ApiError(e.to_string()))
}

/// Hashes in the `a|b|c` form the Web API expects.
fn join_hashes(hashes: &[String]) -> String {
    hashes
        .iter()
        .map(|h| h.to_lowercase())
        .collect::<Vec<_>>()
        .join("|")
}

/// qBittorrent torrent info response.
#[derive(Debug, Deserialize)]
struct QBTorrentInfo {
    hash: String,
    name: String,
    state: String,
    progress: f64,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    downloaded: i64,
    #[serde(default)]
    uploaded: i64,
    #[serde(default)]
    dlspeed: i64,
    #[serde(default)]
    upspeed: i64,
    #[serde(default)]
    num_seeds: i64,
    #[serde(default)]
    num_leechs: i64,
    #[serde(default)]
    ratio: f64,
    #[serde(default)]
    added_on: i64,
    #[serde(default)]
    completion_on: i64,
    #[serde(default)]
    last_activity: i64,
    #[serde(default)]
    seeding_time: i64,
    #[serde(default)]
    save_path: String,
    #[serde(default)]
    content_path: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    tags: String,
    #[serde(default)]
    tracker: String,
    #[serde(default)]
    trackers_count: i64,
    #[serde(default)]
    private: Option<bool>,
    #[serde(default)]
    up_limit: i64,
    #[serde(default)]
    dl_limit: i64,
    #[serde(default = "default_share_limit")]
    ratio_limit: f64,
    #[serde(default = "default_seeding_limit")]
    seeding_time_limit: i64,
}

fn default_share_limit() -> f64 {
    -2.0
}

fn default_seeding_limit() -> i64 {
    -2
}

impl QBTorrentInfo {
    fn into_snapshot(self) -> TorrentSnapshot {
        let tags: BTreeSet<String> = self
            .tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();

        TorrentSnapshot {
            hash: self.hash.to_lowercase(),
            name: self.name,
            category: non_empty(self.category),
            tags,
            state: parse_qb_state(&self.state),
            progress: self.progress,
            ratio: self.ratio,
            save_path: self.save_path,
            content_path: self.content_path,
            size_bytes: self.size.max(0) as u64,
            downloaded_bytes: self.downloaded.max(0) as u64,
            uploaded_bytes: self.uploaded.max(0) as u64,
            download_speed: self.dlspeed.max(0) as u64,
            upload_speed: self.upspeed.max(0) as u64,
            seeding_time_secs: self.seeding_time.max(0) as u64,
            added_at: timestamp_to_datetime(self.added_on),
            completed_at: timestamp_to_datetime(self.completion_on),
            last_activity_at: timestamp_to_datetime(self.last_activity),
            tracker: non_empty(self.tracker),
            seeders: self.num_seeds.max(0) as u32,
            leechers: self.num_leechs.max(0) as u32,
            trackers_count: self.trackers_count.max(0) as u32,
            private: self.private.unwrap_or(false),
            upload_limit: self.up_limit.max(0) as u64,
            download_limit: self.dl_limit.max(0) as u64,
            ratio_limit: self.ratio_limit,
            seeding_time_limit_mins: self.seeding_time_limit,
            files: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QBTorrentFile {
    name: String,
    size: i64,
}

#[derive(Debug, Deserialize)]
struct QBMainData {
    #[serde(default)]
    server_state: Option<HashMap<String, serde_json::Value>>,
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Parse qBittorrent state string to TorrentState.
fn parse_qb_state(state: &str) -> TorrentState {
    match state {
        "downloading" | "forcedDL" | "metaDL" | "forcedMetaDL" | "allocating" => {
            TorrentState::Downloading
        }
        "uploading" | "forcedUP" => TorrentState::Seeding,
        "pausedDL" | "pausedUP" | "stoppedDL" | "stoppedUP" => TorrentState::Paused,
        "checkingDL" | "checkingUP" | "checkingResumeData" => TorrentState::Checking,
        "moving" => TorrentState::Moving,
        "queuedDL" | "queuedUP" => TorrentState::Queued,
        "stalledDL" | "stalledUP" => TorrentState::Stalled,
        "error" | "missingFiles" => TorrentState::Error,
        _ => TorrentState::Unknown,
    }
}

/// Convert Unix timestamp to DateTime<Utc>.
fn timestamp_to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    if ts > 0 {
        Utc.timestamp_opt(ts, 0).single()
    } else {
        None
    }
}

#[async_trait]
impl TorrentSource for QBittorrentClient {
    fn name(&self) -> &str {
        "qbittorrent"
    }

    async fn list_torrents(
        &self,
        filters: &TorrentFilters,
    ) -> Result<Vec<TorrentSnapshot>, TorrentClientError> {
        let mut endpoint = "/api/v2/torrents/info".to_string();
        let mut query_parts = Vec::new();

        if let Some(state) = &filters.state {
            let filter = match state {
                TorrentState::Downloading => "downloading",
                TorrentState::Seeding => "seeding",
                TorrentState::Paused => "paused",
                TorrentState::Stalled => "stalled",
                TorrentState::Checking => "checking",
                TorrentState::Moving => "moving",
                TorrentState::Error => "errored",
                _ => "all",
            };
            if filter != "all" {
                query_parts.push(format!("filter={}", filter));
            }
        }

        if let Some(category) = &filters.category {
            query_parts.push(format!("category={}", urlencoding::encode(category)));
        }

        if !query_parts.is_empty() {
            endpoint.push('?');
            endpoint.push_str(&query_parts.join("&"));
        }

        let response = self.get(&endpoint).await?;
        let torrents: Vec<QBTorrentInfo> = serde_json::from_str(&response).map_err(|e| {
            TorrentClientError::ApiError(format!("Failed to parse response: {}", e))
        })?;

        let mut results: Vec<TorrentSnapshot> =
            torrents.into_iter().map(|t| t.into_snapshot()).collect();

        // Apply client-side search filter if specified
        if let Some(search) = &filters.search {
            let search_lower = search.to_lowercase();
            results.retain(|t| t.name.to_lowercase().contains(&search_lower));
        }

        Ok(results)
    }

    async fn torrent_files(&self, hash: &str) -> Result<Vec<TorrentFile>, TorrentClientError> {
        let endpoint = format!("/api/v2/torrents/files?hash={}", hash.to_lowercase());
        let response = self.get(&endpoint).await?;
        let files: Vec<QBTorrentFile> = serde_json::from_str(&response).map_err(|e| {
            TorrentClientError::ApiError(format!("Failed to parse response: {}", e))
        })?;

        Ok(files
            .into_iter()
            .map(|f| TorrentFile {
                path: f.name,
                size: f.size.max(0) as u64,
            })
            .collect())
    }

    async fn free_space(&self, path: Option<&str>) -> Result<u64, TorrentClientError> {
        if let Some(path) = path {
            debug!(path, "qBittorrent reports free space for its default location only");
        }
        let response = self.get("/api/v2/sync/maindata?rid=0").await?;
        let data: QBMainData = serde_json::from_str(&response).map_err(|e| {
            TorrentClientError::ApiError(format!("Failed to parse response: {}", e))
        })?;

        data.server_state
            .as_ref()
            .and_then(|state| state.get("free_space_on_disk"))
            .and_then(|v| v.as_u64())
            .ok_or_else(|| TorrentClientError::ApiError("free_space_on_disk missing".to_string()))
    }
}

#[async_trait]
impl ActionSink for QBittorrentClient {
    async fn set_category(
        &self,
        hashes: &[String],
        category: &str,
    ) -> Result<(), TorrentClientError> {
        let hashes = join_hashes(hashes);
        self.post_form(
            "/api/v2/torrents/setCategory",
            &[("hashes", &hashes), ("category", category)],
        )
        .await?;
        Ok(())
    }

    async fn add_tags(&self, hashes: &[String], tags: &[String]) -> Result<(), TorrentClientError> {
        let hashes = join_hashes(hashes);
        let tags = tags.join(",");
        self.post_form(
            "/api/v2/torrents/addTags",
            &[("hashes", &hashes), ("tags", &tags)],
        )
        .await?;
        Ok(())
    }

    async fn remove_tags(
        &self,
        hashes: &[String],
        tags: &[String],
    ) -> Result<(), TorrentClientError> {
        let hashes = join_hashes(hashes);
        let tags = tags.join(",");
        self.post_form(
            "/api/v2/torrents/removeTags",
            &[("hashes", &hashes), ("tags", &tags)],
        )
        .await?;
        Ok(())
    }

    async fn set_speed_limits(
        &self,
        hashes: &[String],
        limits: SpeedLimits,
    ) -> Result<(), TorrentClientError> {
        let hashes = join_hashes(hashes);
        if let Some(limit) = limits.upload {
            let limit = limit.to_string();
            self.post_form(
                "/api/v2/torrents/setUploadLimit",
                &[("hashes", &hashes), ("limit", &limit)],
            )
            .await?;
        }
        if let Some(limit) = limits.download {
            let limit = limit.to_string();
            self.post_form(
                "/api/v2/torrents/setDownloadLimit",
                &[("hashes", &hashes), ("limit", &limit)],
            )
            .await?;
        }
        Ok(())
    }

    async fn set_share_limits(
        &self,
        hashes: &[String],
        limits: ShareLimits,
    ) -> Result<(), TorrentClientError> {
        let hashes = join_hashes(hashes);
        let ratio = limits.ratio_limit.to_string();
        let seeding = limits.seeding_time_limit_mins.to_string();
        self.post_form(
            "/api/v2/torrents/setShareLimits",
            &[
                ("hashes", &hashes),
                ("ratioLimit", &ratio),
                ("seedingTimeLimit", &seeding),
                ("inactiveSeedingTimeLimit", "-2"),
            ],
        )
        .await?;
        Ok(())
    }

    async fn pause(&self, hashes: &[String]) -> Result<(), TorrentClientError> {
        let hashes = join_hashes(hashes);
        self.post_form("/api/v2/torrents/pause", &[("hashes", &hashes)])
            .await?;
        Ok(())
    }

    async fn resume(&self, hashes: &[String]) -> Result<(), TorrentClientError> {
        let hashes = join_hashes(hashes);
        self.post_form("/api/v2/torrents/resume", &[("hashes", &hashes)])
            .await?;
        Ok(())
    }

    async fn delete(&self, hashes: &[String], delete_files: bool) -> Result<(), TorrentClientError> {
        let hashes = join_hashes(hashes);
        let delete_str = if delete_files { "true" } else { "false" };
        self.post_form(
            "/api/v2/torrents/delete",
            &[("hashes", &hashes), ("deleteFiles", delete_str)],
        )
        .await?;
        Ok(())
    }

    async fn set_location(
        &self,
        hashes: &[String],
        location: &str,
    ) -> Result<(), TorrentClientError> {
        let hashes = join_hashes(hashes);
        self.post_form(
            "/api/v2/torrents/setLocation",
            &[("hashes", &hashes), ("location", location)],
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_parse_qb_state_downloading() {
        assert_eq!(parse_qb_state("downloading"), TorrentState::Downloading);
        assert_eq!(parse_qb_state("forcedDL"), TorrentState::Downloading);
        assert_eq!(parse_qb_state("metaDL"), TorrentState::Downloading);
    }

    #[test]
    fn test_parse_qb_state_paused() {
        assert_eq!(parse_qb_state("pausedDL"), TorrentState::Paused);
        assert_eq!(parse_qb_state("stoppedUP"), TorrentState::Paused);
    }

    #[test]
    fn test_parse_qb_state_moving_and_error() {
        assert_eq!(parse_qb_state("moving"), TorrentState::Moving);
        assert_eq!(parse_qb_state("missingFiles"), TorrentState::Error);
        assert_eq!(parse_qb_state("something_else"), TorrentState::Unknown);
    }

    #[test]
    fn test_timestamp_to_datetime() {
        let dt = timestamp_to_datetime(1703980800).unwrap();
        assert_eq!(dt.year(), 2023);
        assert!(timestamp_to_datetime(-1).is_none());
        assert!(timestamp_to_datetime(0).is_none());
    }

    #[test]
    fn test_join_hashes() {
        let hashes = vec!["ABC".to_string(), "def".to_string()];
        assert_eq!(join_hashes(&hashes), "abc|def");
    }

    #[test]
    fn test_qb_torrent_info_conversion() {
        let json = r#"{
            "hash": "ABC123",
            "name": "Some.Show.S01.1080p.WEB-DL",
            "state": "stalledUP",
            "progress": 1.0,
            "size": 1000000,
            "downloaded": 1000000,
            "uploaded": 2500000,
            "ratio": 2.5,
            "added_on": 1703980800,
            "completion_on": 1703984400,
            "save_path": "/data/tv",
            "content_path": "/data/tv/Some.Show.S01.1080p.WEB-DL",
            "category": "tv",
            "tags": "keep, seeded",
            "tracker": "https://tracker.example.org/announce",
            "trackers_count": 2,
            "private": true,
            "ratio_limit": -2,
            "seeding_time_limit": -2
        }"#;

        let qb: QBTorrentInfo = serde_json::from_str(json).unwrap();
        let snapshot = qb.into_snapshot();
        assert_eq!(snapshot.hash, "abc123");
        assert_eq!(snapshot.state, TorrentState::Stalled);
        assert_eq!(snapshot.category.as_deref(), Some("tv"));
        assert!(snapshot.tags.contains("keep"));
        assert!(snapshot.tags.contains("seeded"));
        assert!(snapshot.private);
        assert_eq!(snapshot.trackers_count, 2);
        assert!(snapshot.last_activity_at.is_none());
        assert_eq!(
            snapshot.tracker_domain().as_deref(),
            Some("tracker.example.org")
        );
    }

    #[test]
    fn test_qb_torrent_info_empty_category_is_none() {
        let json = r#"{"hash": "a", "name": "n", "state": "uploading", "progress": 1.0}"#;
        let qb: QBTorrentInfo = serde_json::from_str(json).unwrap();
        let snapshot = qb.into_snapshot();
        assert!(snapshot.category.is_none());
        assert!(snapshot.tags.is_empty());
        assert_eq!(snapshot.ratio_limit, -2.0);
    }

    #[test]
    fn test_maindata_free_space_parse() {
        let json = r#"{"rid": 1, "server_state": {"free_space_on_disk": 123456}}"#;
        let data: QBMainData = serde_json::from_str(json).unwrap();
        let free = data
            .server_state
            .unwrap()
            .get("free_space_on_disk")
            .and_then(|v| v.as_u64());
        assert_eq!(free, Some(123456));
    }
}
