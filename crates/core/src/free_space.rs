//! Projection of which deletions reach a free-space target.

use std::collections::HashSet;

use serde::Serialize;

use crate::identity::GroupIndex;
use crate::rules::DeleteMode;
use crate::torrent_client::TorrentSnapshot;

/// Outcome of one projection run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FreeSpaceProjection {
    /// Every candidate, oldest first.
    pub eligible: Vec<String>,
    /// The prefix of `eligible` needed to reach the target.
    pub accepted: Vec<String>,
    /// Bytes freed by the accepted prefix, each group counted once.
    pub freed_bytes: u64,
    /// Free space after the accepted deletions; `None` without a reading.
    pub projected_free_space: Option<u64>,
    pub target_reached: bool,
}

/// Free space a delete rule aims for, taken from its `free_space` leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeSpaceTarget {
    pub threshold: u64,
    /// `lte` leaf: free space equal to the threshold still matches.
    pub inclusive: bool,
}

impl FreeSpaceTarget {
    /// `free_space lt threshold`
    pub fn below(threshold: u64) -> Self {
        Self {
            threshold,
            inclusive: false,
        }
    }

    /// `free_space lte threshold`
    pub fn at_most(threshold: u64) -> Self {
        Self {
            threshold,
            inclusive: true,
        }
    }

    /// Whether the leaf still holds with `free` bytes available.
    pub fn needs_space(&self, free: u64) -> bool {
        if self.inclusive {
            free <= self.threshold
        } else {
            free < self.threshold
        }
    }
}

/// Inputs of a projection besides the candidates.
#[derive(Debug, Clone, Copy)]
pub struct ProjectionParams<'a> {
    /// Current free bytes, if known.
    pub free_space: Option<u64>,
    /// Accepting stops once the target's leaf no longer holds.
    pub target: FreeSpaceTarget,
    pub mode: DeleteMode,
    /// Torrents sharing files on disk. Each group frees its bytes once, and
    /// in preserve mode only when every member is accepted.
    pub groups: &'a GroupIndex,
    /// Bytes already projected free by earlier delete rules this cycle.
    pub already_freed: u64,
}

/// Sort key: oldest first, missing timestamp last, then hash.
pub fn sort_oldest_first(candidates: &mut [&TorrentSnapshot]) {
    candidates.sort_by(|a, b| {
        (a.added_at.is_none(), a.added_at, &a.hash).cmp(&(b.added_at.is_none(), b.added_at, &b.hash))
    });
}

/// Greedily accept candidates oldest-first until the target is reached.
pub fn project(
    candidates: &[&TorrentSnapshot],
    params: &ProjectionParams<'_>,
) -> FreeSpaceProjection {
    let mut ordered = candidates.to_vec();
    sort_oldest_first(&mut ordered);
    let eligible: Vec<String> = ordered.iter().map(|t| t.hash.clone()).collect();

    let Some(free_space) = params.free_space else {
        return FreeSpaceProjection {
            eligible,
            ..Default::default()
        };
    };
    let base = free_space.saturating_add(params.already_freed);

    let mut running: u64 = 0;
    let mut accepted = Vec::new();
    let mut accepted_set: HashSet<&str> = HashSet::new();
    let mut counted_groups: HashSet<String> = HashSet::new();

    for torrent in &ordered {
        if !params.target.needs_space(base.saturating_add(running)) {
            break;
        }
        accepted.push(torrent.hash.clone());
        accepted_set.insert(torrent.hash.as_str());

        let group = params.groups.dedup_key(&torrent.hash);
        let frees = match params.mode {
            DeleteMode::Delete => false,
            DeleteMode::DeleteWithFiles | DeleteMode::DeleteWithFilesIncludeCrossSeeds => true,
            // Files stay on disk until every torrent referencing them goes.
            DeleteMode::DeleteWithFilesPreserveCrossSeeds => params
                .groups
                .members(&torrent.hash)
                .iter()
                .all(|member| accepted_set.contains(member)),
        };
        if frees && counted_groups.insert(group) {
            running = running.saturating_add(torrent.size_bytes);
        }
    }

    let projected = base.saturating_add(running);
    FreeSpaceProjection {
        eligible,
        accepted,
        freed_bytes: running,
        projected_free_space: Some(projected),
        target_reached: !params.target.needs_space(projected),
    }
}
