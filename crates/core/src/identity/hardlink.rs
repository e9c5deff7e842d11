//! Hardlink scope classification.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::fs::{FileIdentity, FileStat};
use super::FileLists;
use crate::torrent_client::TorrentSnapshot;

/// Where a torrent's files are hardlinked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardlinkScope {
    /// No file has more than one link.
    None,
    /// Every extra link is another path inside the managed set.
    TorrentsOnly,
    /// Some file is linked from a path the client does not know about.
    OutsideQbittorrent,
}

impl HardlinkScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            HardlinkScope::None => "none",
            HardlinkScope::TorrentsOnly => "torrents_only",
            HardlinkScope::OutsideQbittorrent => "outside_qbittorrent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "none" => Some(HardlinkScope::None),
            "torrents_only" => Some(HardlinkScope::TorrentsOnly),
            "outside_qbittorrent" => Some(HardlinkScope::OutsideQbittorrent),
            _ => None,
        }
    }
}

/// Result of one stat call, tagged with the torrent it belongs to.
pub type StatResult = (String, PathBuf, io::Result<FileIdentity>);

#[derive(Debug, Default)]
struct InodeEntry {
    paths: HashSet<PathBuf>,
    nlink: u64,
}

/// Per-cycle hardlink index over every file of the managed set.
///
/// Torrents with any failed stat, or without a file list, have no entry and
/// their scope is unknown.
#[derive(Debug, Clone, Default)]
pub struct HardlinkIndex {
    scopes: HashMap<String, HardlinkScope>,
    signatures: HashMap<String, String>,
}

impl HardlinkIndex {
    /// Index for an instance without local filesystem access.
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Stat every file of every torrent on a bounded worker pool.
    pub async fn build(
        torrents: &[TorrentSnapshot],
        files: &FileLists,
        stat: Arc<dyn FileStat>,
        workers: usize,
    ) -> Self {
        let mut jobs = Vec::new();
        for torrent in torrents {
            let Some(list) = files.get(&torrent.hash) else {
                continue;
            };
            for file in list {
                let path = Path::new(&torrent.save_path).join(&file.path);
                jobs.push((torrent.hash.clone(), path));
            }
        }
        debug!(files = jobs.len(), workers, "Starting hardlink stat sweep");

        let results: Vec<StatResult> = stream::iter(jobs)
            .map(|(hash, path)| {
                let stat = Arc::clone(&stat);
                async move {
                    let target = path.clone();
                    let result = tokio::task::spawn_blocking(move || stat.lstat(&target))
                        .await
                        .unwrap_or_else(|e| Err(io::Error::other(e.to_string())));
                    (hash, path, result)
                }
            })
            .buffer_unordered(workers.max(1))
            .collect()
            .await;

        Self::from_stats(results)
    }

    /// Classify torrents from collected stat results.
    pub fn from_stats(results: impl IntoIterator<Item = StatResult>) -> Self {
        let mut inodes: HashMap<(u64, u64), InodeEntry> = HashMap::new();
        let mut per_torrent: HashMap<String, Option<Vec<FileIdentity>>> = HashMap::new();

        for (hash, path, result) in results {
            let slot = per_torrent.entry(hash.clone()).or_insert_with(|| Some(Vec::new()));
            match result {
                Ok(identity) => {
                    let entry = inodes.entry(identity.key()).or_default();
                    entry.paths.insert(path);
                    entry.nlink = entry.nlink.max(identity.nlink);
                    if let Some(ids) = slot {
                        ids.push(identity);
                    }
                }
                Err(e) => {
                    warn!(hash = %hash, path = %path.display(), error = %e, "Failed to stat torrent file");
                    *slot = None;
                }
            }
        }

        let mut index = HardlinkIndex::default();
        for (hash, ids) in per_torrent {
            let Some(ids) = ids else {
                continue;
            };

            let outside = ids.iter().any(|id| {
                inodes
                    .get(&id.key())
                    .is_some_and(|entry| entry.nlink > entry.paths.len() as u64)
            });
            let scope = if outside {
                HardlinkScope::OutsideQbittorrent
            } else if ids.iter().any(|id| id.nlink > 1) {
                HardlinkScope::TorrentsOnly
            } else {
                HardlinkScope::None
            };

            let keys: BTreeSet<(u64, u64)> = ids.iter().map(FileIdentity::key).collect();
            let signature = keys
                .iter()
                .map(|(dev, ino)| format!("{}:{}", dev, ino))
                .collect::<Vec<_>>()
                .join(",");

            index.scopes.insert(hash.clone(), scope);
            index.signatures.insert(hash, signature);
        }
        index
    }

    /// Scope of a torrent, `None` when unknown.
    pub fn scope(&self, hash: &str) -> Option<HardlinkScope> {
        self.scopes.get(hash).copied()
    }

    /// Sorted set of (device, inode) pairs backing the torrent's files.
    pub fn signature(&self, hash: &str) -> Option<&str> {
        self.signatures.get(hash).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}
