//! Cross-seed and hardlink identity of torrents.
//!
//! Everything here is built once per cycle from the cycle's snapshot and is
//! read-only afterwards.

mod cross_seed;
mod fs;
mod group_key;
mod hardlink;

pub use cross_seed::{overlap_percent, GroupIndex, GroupSpec};
pub use fs::{FileIdentity, FileStat, LocalFileStat};
pub use group_key::{
    builtin_key, effective_name, group_key, is_ambiguous, normalize_name, normalize_path,
    release_attributes, KeyField, BUILTIN_KEYS, KEY_SEPARATOR,
};
pub use hardlink::{HardlinkIndex, HardlinkScope, StatResult};

use std::collections::HashMap;

use futures::stream::{self, StreamExt};
use tracing::warn;

use crate::rules::AmbiguityPolicy;
use crate::torrent_client::{TorrentFile, TorrentSnapshot, TorrentSource};

/// File lists by torrent hash. Missing entries mean the list is unknown.
pub type FileLists = HashMap<String, Vec<TorrentFile>>;

/// Collect file lists, fetching those the listing did not include.
///
/// A failed fetch leaves the torrent out; callers treat it as unknown.
pub async fn fetch_file_lists(
    source: &dyn TorrentSource,
    torrents: &[TorrentSnapshot],
    workers: usize,
) -> FileLists {
    let mut lists = FileLists::new();
    let mut missing = Vec::new();
    for torrent in torrents {
        if torrent.files.is_empty() {
            missing.push(torrent.hash.clone());
        } else {
            lists.insert(torrent.hash.clone(), torrent.files.clone());
        }
    }

    let fetched: Vec<_> = stream::iter(missing)
        .map(|hash| async move {
            let result = source.torrent_files(&hash).await;
            (hash, result)
        })
        .buffer_unordered(workers.max(1))
        .collect()
        .await;

    for (hash, result) in fetched {
        match result {
            Ok(files) => {
                lists.insert(hash, files);
            }
            Err(e) => warn!(hash = %hash, error = %e, "Failed to fetch torrent files"),
        }
    }
    lists
}

/// Identity annotations for one cycle.
#[derive(Debug, Clone, Default)]
pub struct IdentityIndex {
    pub hardlinks: HardlinkIndex,
    /// Default cross-seed grouping by content path.
    pub cross_seeds: GroupIndex,
    /// Torrents with equal content path and save path.
    pub locations: GroupIndex,
}

impl IdentityIndex {
    /// Index with no hardlink data and no groups.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn build(torrents: &[TorrentSnapshot], hardlinks: HardlinkIndex, files: &FileLists) -> Self {
        let cross_seeds = GroupIndex::build(
            torrents,
            &GroupSpec::new(&[KeyField::ContentPath]),
            &hardlinks,
            files,
        );
        let locations = GroupIndex::build(
            torrents,
            &GroupSpec {
                ambiguous_policy: AmbiguityPolicy::Skip,
                ..GroupSpec::new(&[KeyField::ContentPath, KeyField::SavePath])
            },
            &hardlinks,
            files,
        );
        Self {
            hardlinks,
            cross_seeds,
            locations,
        }
    }

    pub fn hardlink_scope(&self, hash: &str) -> Option<HardlinkScope> {
        self.hardlinks.scope(hash)
    }

    pub fn cross_seed_count(&self, hash: &str) -> usize {
        self.cross_seeds.cross_seed_count(hash)
    }
}
