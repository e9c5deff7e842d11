//! Grouping of torrents that share content.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use super::group_key::{group_key, is_ambiguous, KeyField};
use super::hardlink::HardlinkIndex;
use super::FileLists;
use crate::rules::AmbiguityPolicy;
use crate::torrent_client::{TorrentFile, TorrentSnapshot};

/// How to build groups for one key configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupSpec {
    pub fields: Vec<KeyField>,
    pub ambiguous_policy: AmbiguityPolicy,
    pub min_file_overlap_percent: u8,
}

impl GroupSpec {
    pub fn new(fields: &[KeyField]) -> Self {
        Self {
            fields: fields.to_vec(),
            ambiguous_policy: AmbiguityPolicy::default(),
            min_file_overlap_percent: crate::rules::DEFAULT_MIN_FILE_OVERLAP_PERCENT,
        }
    }

    /// Whether building groups may need file lists.
    pub fn needs_files(&self) -> bool {
        self.ambiguous_policy == AmbiguityPolicy::VerifyOverlap
            && self.fields.contains(&KeyField::ContentPath)
            && self.fields.contains(&KeyField::SavePath)
    }
}

/// Torrents partitioned by group key.
///
/// Torrents without a group (unique key, unknown key, or excluded as
/// ambiguous) are singletons.
#[derive(Debug, Clone, Default)]
pub struct GroupIndex {
    group_of: HashMap<String, usize>,
    groups: Vec<Vec<String>>,
}

impl GroupIndex {
    pub fn build(
        torrents: &[TorrentSnapshot],
        spec: &GroupSpec,
        hardlinks: &HardlinkIndex,
        files: &FileLists,
    ) -> Self {
        // BTreeMap keeps group ids stable across cycles.
        let mut buckets: BTreeMap<String, Vec<&TorrentSnapshot>> = BTreeMap::new();
        for torrent in torrents {
            if let Some(key) = group_key(&spec.fields, torrent, hardlinks) {
                buckets.entry(key).or_default().push(torrent);
            }
        }

        let mut index = GroupIndex::default();
        for (key, mut members) in buckets {
            if members.len() < 2 {
                continue;
            }
            members.sort_by(|a, b| a.hash.cmp(&b.hash));

            let accepted = if members.iter().any(|t| is_ambiguous(&spec.fields, t)) {
                resolve_ambiguous(&key, &members, spec, files)
            } else {
                members.iter().map(|t| t.hash.clone()).collect()
            };

            if accepted.len() >= 2 {
                let id = index.groups.len();
                for hash in &accepted {
                    index.group_of.insert(hash.clone(), id);
                }
                index.groups.push(accepted);
            }
        }
        index
    }

    /// Members of the torrent's group, including itself.
    pub fn members<'a>(&'a self, hash: &'a str) -> Vec<&'a str> {
        match self.group_of.get(hash) {
            Some(id) => self.groups[*id].iter().map(String::as_str).collect(),
            None => vec![hash],
        }
    }

    /// Number of other torrents sharing the group.
    pub fn cross_seed_count(&self, hash: &str) -> usize {
        self.group_of
            .get(hash)
            .map_or(0, |id| self.groups[*id].len() - 1)
    }

    /// Stable identifier for the torrent's group, unique per singleton.
    pub fn dedup_key(&self, hash: &str) -> String {
        match self.group_of.get(hash) {
            Some(id) => format!("group:{}", id),
            None => format!("torrent:{}", hash),
        }
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

/// Keep members that share files with the bucket's anchor.
fn resolve_ambiguous(
    key: &str,
    members: &[&TorrentSnapshot],
    spec: &GroupSpec,
    files: &FileLists,
) -> Vec<String> {
    if spec.ambiguous_policy == AmbiguityPolicy::Skip {
        return members
            .iter()
            .filter(|t| !is_ambiguous(&spec.fields, t))
            .map(|t| t.hash.clone())
            .collect();
    }

    let anchor = members
        .iter()
        .find(|t| !is_ambiguous(&spec.fields, t) && file_list(files, &t.hash).is_some())
        .or_else(|| members.iter().find(|t| file_list(files, &t.hash).is_some()));
    let Some(anchor) = anchor else {
        debug!(key = %key, "No file lists available to verify ambiguous group");
        return members
            .iter()
            .filter(|t| !is_ambiguous(&spec.fields, t))
            .map(|t| t.hash.clone())
            .collect();
    };
    let anchor_files = file_list(files, &anchor.hash).cloned().unwrap_or_default();

    let mut accepted = Vec::new();
    for member in members {
        if member.hash == anchor.hash || !is_ambiguous(&spec.fields, member) {
            accepted.push(member.hash.clone());
            continue;
        }
        let overlap = file_list(files, &member.hash)
            .map_or(0, |list| overlap_percent(&anchor_files, list));
        if overlap >= u32::from(spec.min_file_overlap_percent) {
            accepted.push(member.hash.clone());
        } else {
            debug!(
                hash = %member.hash,
                anchor = %anchor.hash,
                overlap,
                "Excluding ambiguous torrent from group"
            );
        }
    }
    accepted
}

fn file_list<'a>(files: &'a FileLists, hash: &str) -> Option<&'a Vec<TorrentFile>> {
    files.get(hash).filter(|list| !list.is_empty())
}

/// Percentage of files matching by lowercased file name and size.
pub fn overlap_percent(a: &[TorrentFile], b: &[TorrentFile]) -> u32 {
    let total = a.len().max(b.len());
    if total == 0 {
        return 0;
    }
    let file_key = |f: &TorrentFile| {
        let name = f.path.rsplit(['/', '\\']).next().unwrap_or(&f.path);
        (name.to_lowercase(), f.size)
    };
    let left: HashSet<_> = a.iter().map(file_key).collect();
    let matched = b.iter().filter(|f| left.contains(&file_key(f))).count();
    (matched * 100 / total) as u32
}
