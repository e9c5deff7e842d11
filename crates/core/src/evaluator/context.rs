//! Per-cycle inputs the evaluator reads besides the torrent itself.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::identity::{normalize_name, IdentityIndex};
use crate::torrent_client::TorrentSnapshot;

/// What a `free_space` leaf sees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FreeSpaceView {
    /// No reading for this cycle; the leaf is unknown.
    Unavailable,
    /// Compare against this many free bytes.
    Reading(u64),
    /// Treat every free-space leaf as satisfied. Used to find the eligible
    /// set before projecting.
    AssumeSatisfied,
}

#[derive(Debug, Clone)]
struct NameEntry {
    hash: String,
    exact: String,
    normalized: String,
}

/// Torrent names by category, for `exists_in` and `contains_in`.
#[derive(Debug, Clone, Default)]
pub struct CategoryNameIndex {
    by_category: HashMap<String, Vec<NameEntry>>,
}

impl CategoryNameIndex {
    pub fn build(torrents: &[TorrentSnapshot]) -> Self {
        let mut by_category: HashMap<String, Vec<NameEntry>> = HashMap::new();
        for torrent in torrents {
            let Some(category) = torrent.category.as_deref() else {
                continue;
            };
            by_category
                .entry(category.to_lowercase())
                .or_default()
                .push(NameEntry {
                    hash: torrent.hash.clone(),
                    exact: torrent.name.to_lowercase(),
                    normalized: normalize_name(&torrent.name),
                });
        }
        Self { by_category }
    }

    /// Another torrent in `category` has exactly this name, ignoring case.
    pub fn exists_in(&self, category: &str, hash: &str, name: &str) -> bool {
        let name = name.to_lowercase();
        self.entries(category)
            .any(|entry| entry.hash != hash && entry.exact == name)
    }

    /// Another torrent in `category` has a name containing, or contained in,
    /// this one after normalization.
    pub fn contains_in(&self, category: &str, hash: &str, name: &str) -> bool {
        let name = normalize_name(name);
        if name.is_empty() {
            return false;
        }
        self.entries(category).any(|entry| {
            entry.hash != hash
                && !entry.normalized.is_empty()
                && (entry.normalized.contains(&name) || name.contains(&entry.normalized))
        })
    }

    fn entries<'a>(&'a self, category: &str) -> impl Iterator<Item = &'a NameEntry> + 'a {
        self.by_category
            .get(&category.to_lowercase())
            .into_iter()
            .flatten()
    }
}

/// Everything a condition may consult besides the torrent.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub now: DateTime<Utc>,
    pub identity: &'a IdentityIndex,
    pub category_names: &'a CategoryNameIndex,
    /// Tracker domain to display name.
    pub tracker_aliases: &'a HashMap<String, String>,
    pub free_space: FreeSpaceView,
}

impl<'a> EvalContext<'a> {
    pub fn with_free_space(self, free_space: FreeSpaceView) -> Self {
        Self { free_space, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn torrent(hash: &str, name: &str, category: &str) -> TorrentSnapshot {
        TorrentSnapshot {
            hash: hash.to_string(),
            name: name.to_string(),
            category: Some(category.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_exists_in_is_exact_and_case_insensitive() {
        let index = CategoryNameIndex::build(&[
            torrent("a", "Film.2020.1080p", "Movies"),
            torrent("b", "Other", "movies"),
        ]);
        assert!(index.exists_in("movies", "x", "film.2020.1080p"));
        assert!(!index.exists_in("movies", "x", "Film 2020 1080p"));
        assert!(!index.exists_in("tv", "x", "Other"));
    }

    #[test]
    fn test_contains_in_normalizes_both_directions() {
        let index = CategoryNameIndex::build(&[torrent("a", "Film.2020", "archive")]);
        assert!(index.contains_in("archive", "x", "Film 2020 1080p BluRay"));
        assert!(index.contains_in("archive", "x", "film"));
        assert!(!index.contains_in("archive", "x", "Different"));
    }

    #[test]
    fn test_torrent_does_not_match_itself() {
        let index = CategoryNameIndex::build(&[torrent("a", "Film", "movies")]);
        assert!(!index.exists_in("movies", "a", "Film"));
        assert!(!index.contains_in("movies", "a", "Film"));
    }
}
