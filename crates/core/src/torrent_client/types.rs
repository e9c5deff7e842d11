//! Types for torrent client operations.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during torrent client operations.
#[derive(Debug, Error)]
pub enum TorrentClientError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Torrent not found: {0}")]
    TorrentNotFound(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// State of a torrent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentState {
    /// Downloading from peers.
    Downloading,
    /// Seeding to peers.
    Seeding,
    /// Download or upload is paused.
    Paused,
    /// Checking file integrity.
    Checking,
    /// Queued for download.
    Queued,
    /// Stalled (no peers).
    Stalled,
    /// Files are being relocated.
    Moving,
    /// Error state.
    Error,
    /// Unknown state.
    #[default]
    Unknown,
}

impl TorrentState {
    /// Returns the string representation for API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            TorrentState::Downloading => "downloading",
            TorrentState::Seeding => "seeding",
            TorrentState::Paused => "paused",
            TorrentState::Checking => "checking",
            TorrentState::Queued => "queued",
            TorrentState::Stalled => "stalled",
            TorrentState::Moving => "moving",
            TorrentState::Error => "error",
            TorrentState::Unknown => "unknown",
        }
    }
}

/// A file inside a torrent, relative to the torrent's save path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentFile {
    pub path: String,
    pub size: u64,
}

/// Immutable per-cycle view of one torrent.
///
/// Re-fetched every cycle and never mutated in place; actions compare their
/// desired values against these fields to skip no-ops.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TorrentSnapshot {
    /// Info hash (lowercase hex).
    pub hash: String,
    /// Display name.
    pub name: String,
    /// Category/label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Tags assigned in the client.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Current state.
    pub state: TorrentState,
    /// Download progress (0.0 - 1.0).
    pub progress: f64,
    /// Share ratio (uploaded/downloaded).
    pub ratio: f64,
    /// Directory the torrent is saved under.
    pub save_path: String,
    /// Root file or folder of the torrent's content.
    pub content_path: String,
    /// Total size in bytes.
    pub size_bytes: u64,
    /// Downloaded bytes.
    pub downloaded_bytes: u64,
    /// Uploaded bytes.
    pub uploaded_bytes: u64,
    /// Current download speed in bytes/second.
    pub download_speed: u64,
    /// Current upload speed in bytes/second.
    pub upload_speed: u64,
    /// Total time spent seeding, in seconds.
    pub seeding_time_secs: u64,
    /// When the torrent was added.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<DateTime<Utc>>,
    /// When the torrent completed downloading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Last time data was transferred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<DateTime<Utc>>,
    /// Current tracker URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracker: Option<String>,
    /// Number of connected seeders.
    pub seeders: u32,
    /// Number of connected leechers.
    pub leechers: u32,
    /// Number of trackers attached to the torrent.
    pub trackers_count: u32,
    /// Whether the torrent comes from a private tracker.
    pub private: bool,
    /// Upload speed limit in bytes/second (0 = unlimited).
    pub upload_limit: u64,
    /// Download speed limit in bytes/second (0 = unlimited).
    pub download_limit: u64,
    /// Ratio limit (-2 = global, -1 = unlimited).
    pub ratio_limit: f64,
    /// Seeding time limit in minutes (-2 = global, -1 = unlimited).
    pub seeding_time_limit_mins: i64,
    /// Files, when the source includes them in the listing.
    #[serde(default)]
    pub files: Vec<TorrentFile>,
}

impl TorrentSnapshot {
    /// Whether the torrent finished downloading.
    pub fn is_complete(&self) -> bool {
        self.progress >= 1.0
    }

    /// Host part of the tracker URL, lowercased.
    pub fn tracker_domain(&self) -> Option<String> {
        self.tracker.as_deref().and_then(extract_domain)
    }

    /// Tags joined the way the client reports them.
    pub fn joined_tags(&self) -> String {
        self.tags.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

/// Extract the host from a tracker URL (`udp://tracker.example.org:1337/announce`).
pub fn extract_domain(url: &str) -> Option<String> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let host = rest.split(['/', '?']).next()?;
    let host = host.rsplit_once('@').map_or(host, |(_, h)| h);
    let host = host.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}

/// Per-torrent transfer limits. `None` leaves that direction unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeedLimits {
    /// Upload limit in bytes/second (0 = unlimited).
    pub upload: Option<u64>,
    /// Download limit in bytes/second (0 = unlimited).
    pub download: Option<u64>,
}

/// Per-torrent share limits using the client's sentinel values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShareLimits {
    /// Ratio limit (-2 = global, -1 = unlimited).
    pub ratio_limit: f64,
    /// Seeding time limit in minutes (-2 = global, -1 = unlimited).
    pub seeding_time_limit_mins: i64,
}

/// Filters for listing torrents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TorrentFilters {
    /// Filter by state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TorrentState>,
    /// Filter by category.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Search by name (partial match).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

impl TorrentFilters {
    /// Check if any filters are set.
    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.category.is_none() && self.search.is_none()
    }
}

/// Read side of a managed client instance.
#[async_trait]
pub trait TorrentSource: Send + Sync {
    /// Backend name for logging/activity.
    fn name(&self) -> &str;

    /// List all torrents, optionally filtered.
    async fn list_torrents(
        &self,
        filters: &TorrentFilters,
    ) -> Result<Vec<TorrentSnapshot>, TorrentClientError>;

    /// List the files of a single torrent.
    async fn torrent_files(&self, hash: &str) -> Result<Vec<TorrentFile>, TorrentClientError>;

    /// Free bytes on the disk holding `path` (or the client's default location).
    async fn free_space(&self, path: Option<&str>) -> Result<u64, TorrentClientError>;
}

/// Write side of a managed client instance.
///
/// Every call is idempotent and takes at most one batch of hashes.
#[async_trait]
pub trait ActionSink: Send + Sync {
    async fn set_category(&self, hashes: &[String], category: &str)
        -> Result<(), TorrentClientError>;

    async fn add_tags(&self, hashes: &[String], tags: &[String]) -> Result<(), TorrentClientError>;

    async fn remove_tags(&self, hashes: &[String], tags: &[String])
        -> Result<(), TorrentClientError>;

    async fn set_speed_limits(
        &self,
        hashes: &[String],
        limits: SpeedLimits,
    ) -> Result<(), TorrentClientError>;

    async fn set_share_limits(
        &self,
        hashes: &[String],
        limits: ShareLimits,
    ) -> Result<(), TorrentClientError>;

    async fn pause(&self, hashes: &[String]) -> Result<(), TorrentClientError>;

    async fn resume(&self, hashes: &[String]) -> Result<(), TorrentClientError>;

    /// Remove torrents. If `delete_files` is true, also delete downloaded files.
    async fn delete(&self, hashes: &[String], delete_files: bool)
        -> Result<(), TorrentClientError>;

    async fn set_location(&self, hashes: &[String], location: &str)
        -> Result<(), TorrentClientError>;
}
