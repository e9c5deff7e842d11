//! Mock torrent client for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::executor::Operation;
use crate::rules::ActionKind;
use crate::torrent_client::{
    ActionSink, ShareLimits, SpeedLimits, TorrentClientError, TorrentFile, TorrentFilters,
    TorrentSnapshot, TorrentSource, TorrentState,
};

/// A recorded write call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// The operation that was requested.
    pub operation: Operation,
    /// Hashes in the call, in the order they were sent.
    pub hashes: Vec<String>,
    /// When the call was made.
    pub timestamp: chrono::DateTime<Utc>,
}

/// Mock implementation of [`TorrentSource`] and [`ActionSink`].
///
/// Provides controllable behavior for testing:
/// - Seed torrents, file lists and a free-space reading
/// - Track every write call for assertions
/// - Simulate listing, file-list and per-action failures
///
/// Successful writes are applied to the stored torrents, so a following
/// cycle sees the result.
///
/// # Example
///
/// ```rust,ignore
/// let client = MockTorrentClient::new();
/// client.add_torrent(fixtures::snapshot("abc", "Some.Release.1080p")).await;
/// client.set_free_space(Some(400 * GB)).await;
///
/// // ... run a cycle ...
///
/// let calls = client.calls_for(ActionKind::Delete).await;
/// assert_eq!(calls[0].hashes, vec!["abc"]);
/// ```
#[derive(Debug)]
pub struct MockTorrentClient {
    torrents: Arc<RwLock<BTreeMap<String, TorrentSnapshot>>>,
    files: Arc<RwLock<HashMap<String, Vec<TorrentFile>>>>,
    failing_files: Arc<RwLock<HashSet<String>>>,
    failing_actions: Arc<RwLock<HashSet<ActionKind>>>,
    free_space: Arc<RwLock<Option<u64>>>,
    calls: Arc<RwLock<Vec<RecordedCall>>>,
    /// If set, the next listing fails with this error.
    next_error: Arc<RwLock<Option<TorrentClientError>>>,
    list_count: Arc<RwLock<usize>>,
}

impl Default for MockTorrentClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTorrentClient {
    /// Create a mock with no torrents and no free-space reading.
    pub fn new() -> Self {
        Self {
            torrents: Arc::new(RwLock::new(BTreeMap::new())),
            files: Arc::new(RwLock::new(HashMap::new())),
            failing_files: Arc::new(RwLock::new(HashSet::new())),
            failing_actions: Arc::new(RwLock::new(HashSet::new())),
            free_space: Arc::new(RwLock::new(None)),
            calls: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
            list_count: Arc::new(RwLock::new(0)),
        }
    }

    /// Add or replace a torrent.
    pub async fn add_torrent(&self, snapshot: TorrentSnapshot) {
        self.torrents
            .write()
            .await
            .insert(snapshot.hash.clone(), snapshot);
    }

    /// Replace every torrent.
    pub async fn set_torrents(&self, snapshots: Vec<TorrentSnapshot>) {
        let mut torrents = self.torrents.write().await;
        torrents.clear();
        for snapshot in snapshots {
            torrents.insert(snapshot.hash.clone(), snapshot);
        }
    }

    /// Current state of a torrent.
    pub async fn torrent(&self, hash: &str) -> Option<TorrentSnapshot> {
        self.torrents.read().await.get(hash).cloned()
    }

    /// Get the number of torrents.
    pub async fn torrent_count(&self) -> usize {
        self.torrents.read().await.len()
    }

    /// Set the file list returned for a torrent.
    pub async fn set_files(&self, hash: &str, files: Vec<TorrentFile>) {
        self.files.write().await.insert(hash.to_string(), files);
    }

    /// Make file-list requests for `hash` fail.
    pub async fn fail_files_for(&self, hash: &str) {
        self.failing_files.write().await.insert(hash.to_string());
    }

    /// Set the free-space reading; `None` makes the request fail.
    pub async fn set_free_space(&self, bytes: Option<u64>) {
        *self.free_space.write().await = bytes;
    }

    /// Make every write of this kind fail.
    pub async fn fail_action(&self, kind: ActionKind) {
        self.failing_actions.write().await.insert(kind);
    }

    /// Clear injected write failures.
    pub async fn clear_failures(&self) {
        self.failing_actions.write().await.clear();
    }

    /// Configure the next listing to fail with the given error.
    pub async fn set_next_error(&self, error: TorrentClientError) {
        *self.next_error.write().await = Some(error);
    }

    /// Every write call made so far, failed ones included.
    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.read().await.clone()
    }

    /// Write calls of one kind.
    pub async fn calls_for(&self, kind: ActionKind) -> Vec<RecordedCall> {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.operation.kind() == kind)
            .cloned()
            .collect()
    }

    /// Clear recorded calls.
    pub async fn clear_calls(&self) {
        self.calls.write().await.clear();
    }

    /// Number of listings served.
    pub async fn list_count(&self) -> usize {
        *self.list_count.read().await
    }

    async fn record(&self, operation: Operation, hashes: &[String]) -> Result<(), TorrentClientError> {
        let kind = operation.kind();
        self.calls.write().await.push(RecordedCall {
            operation: operation.clone(),
            hashes: hashes.to_vec(),
            timestamp: Utc::now(),
        });
        if self.failing_actions.read().await.contains(&kind) {
            return Err(TorrentClientError::ApiError(format!(
                "injected {} failure",
                kind.as_str()
            )));
        }

        let mut torrents = self.torrents.write().await;
        for hash in hashes {
            if matches!(operation, Operation::Delete { .. }) {
                torrents.remove(hash);
                continue;
            }
            let Some(torrent) = torrents.get_mut(hash) else {
                continue;
            };
            match &operation {
                Operation::Delete { .. } => {}
                Operation::Category(category) => torrent.category = Some(category.clone()),
                Operation::AddTags(tags) => torrent.tags.extend(tags.iter().cloned()),
                Operation::RemoveTags(tags) => {
                    for tag in tags {
                        torrent.tags.remove(tag);
                    }
                }
                Operation::SpeedLimits(limits) => {
                    if let Some(up) = limits.upload {
                        torrent.upload_limit = up;
                    }
                    if let Some(down) = limits.download {
                        torrent.download_limit = down;
                    }
                }
                Operation::ShareLimits(limits) => {
                    torrent.ratio_limit = limits.ratio_limit;
                    torrent.seeding_time_limit_mins = limits.seeding_time_limit_mins;
                }
                Operation::Pause => torrent.state = TorrentState::Paused,
                Operation::Resume => {
                    torrent.state = if torrent.is_complete() {
                        TorrentState::Seeding
                    } else {
                        TorrentState::Downloading
                    }
                }
                Operation::Move(location) => torrent.save_path = location.clone(),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TorrentSource for MockTorrentClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn list_torrents(
        &self,
        filters: &TorrentFilters,
    ) -> Result<Vec<TorrentSnapshot>, TorrentClientError> {
        *self.list_count.write().await += 1;
        if let Some(err) = self.next_error.write().await.take() {
            return Err(err);
        }

        let torrents = self.torrents.read().await;
        let result = torrents
            .values()
            .filter(|t| {
                if let Some(state) = &filters.state {
                    if &t.state != state {
                        return false;
                    }
                }
                if let Some(category) = &filters.category {
                    if t.category.as_ref() != Some(category) {
                        return false;
                    }
                }
                if let Some(search) = &filters.search {
                    if !t.name.to_lowercase().contains(&search.to_lowercase()) {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();
        Ok(result)
    }

    async fn torrent_files(&self, hash: &str) -> Result<Vec<TorrentFile>, TorrentClientError> {
        if self.failing_files.read().await.contains(hash) {
            return Err(TorrentClientError::ApiError("injected files failure".to_string()));
        }
        if let Some(files) = self.files.read().await.get(hash) {
            return Ok(files.clone());
        }
        match self.torrents.read().await.get(hash) {
            Some(t) => Ok(t.files.clone()),
            None => Err(TorrentClientError::TorrentNotFound(hash.to_string())),
        }
    }

    async fn free_space(&self, _path: Option<&str>) -> Result<u64, TorrentClientError> {
        self.free_space
            .read()
            .await
            .ok_or_else(|| TorrentClientError::ApiError("free space unavailable".to_string()))
    }
}

#[async_trait]
impl ActionSink for MockTorrentClient {
    async fn set_category(&self, hashes: &[String], category: &str) -> Result<(), TorrentClientError> {
        self.record(Operation::Category(category.to_string()), hashes)
            .await
    }

    async fn add_tags(&self, hashes: &[String], tags: &[String]) -> Result<(), TorrentClientError> {
        self.record(Operation::AddTags(tags.to_vec()), hashes).await
    }

    async fn remove_tags(&self, hashes: &[String], tags: &[String]) -> Result<(), TorrentClientError> {
        self.record(Operation::RemoveTags(tags.to_vec()), hashes).await
    }

    async fn set_speed_limits(
        &self,
        hashes: &[String],
        limits: SpeedLimits,
    ) -> Result<(), TorrentClientError> {
        self.record(Operation::SpeedLimits(limits), hashes).await
    }

    async fn set_share_limits(
        &self,
        hashes: &[String],
        limits: ShareLimits,
    ) -> Result<(), TorrentClientError> {
        self.record(Operation::ShareLimits(limits), hashes).await
    }

    async fn pause(&self, hashes: &[String]) -> Result<(), TorrentClientError> {
        self.record(Operation::Pause, hashes).await
    }

    async fn resume(&self, hashes: &[String]) -> Result<(), TorrentClientError> {
        self.record(Operation::Resume, hashes).await
    }

    async fn delete(&self, hashes: &[String], delete_files: bool) -> Result<(), TorrentClientError> {
        self.record(Operation::Delete { delete_files }, hashes).await
    }

    async fn set_location(&self, hashes: &[String], location: &str) -> Result<(), TorrentClientError> {
        self.record(Operation::Move(location.to_string()), hashes)
            .await
    }
}
