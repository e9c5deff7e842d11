//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of every collaborator trait,
//! allowing full engine cycles to run without a torrent client, a
//! filesystem or external programs.
//!
//! # Example
//!
//! ```rust,ignore
//! use seedwarden_core::testing::{fixtures, MockProgramRunner, MockTorrentClient};
//!
//! let client = MockTorrentClient::new();
//! client.add_torrent(fixtures::snapshot("abc", "Some.Release.1080p")).await;
//! client.set_free_space(Some(400 * fixtures::GB)).await;
//!
//! // Build an AutomationEngine around the mocks...
//! ```

mod mock_file_stat;
mod mock_program_runner;
mod mock_torrent_client;

pub use mock_file_stat::MockFileStat;
pub use mock_program_runner::{MockProgramRunner, RecordedRun};
pub use mock_torrent_client::{MockTorrentClient, RecordedCall};

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::{Duration, TimeZone, Utc};

    use crate::rules::{
        ActionSet, ConditionLeaf, ConditionNode, DeleteAction, DeleteMode, Field, Operator, Rule,
        TagAction, TagMode,
    };
    use crate::torrent_client::{TorrentFile, TorrentSnapshot, TorrentState};

    pub const GB: u64 = 1_000_000_000;

    /// A completed, seeding torrent with reasonable defaults.
    pub fn snapshot(hash: &str, name: &str) -> TorrentSnapshot {
        TorrentSnapshot {
            hash: hash.to_string(),
            name: name.to_string(),
            state: TorrentState::Seeding,
            progress: 1.0,
            ratio: 1.0,
            save_path: "/downloads".to_string(),
            content_path: format!("/downloads/{}", name),
            size_bytes: GB,
            downloaded_bytes: GB,
            uploaded_bytes: GB,
            added_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            completed_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap()),
            tracker: Some("https://tracker.example.org/announce".to_string()),
            trackers_count: 1,
            ratio_limit: -2.0,
            seeding_time_limit_mins: -2,
            files: vec![TorrentFile {
                path: format!("{}/{}.mkv", name, name),
                size: GB,
            }],
            ..Default::default()
        }
    }

    /// A torrent added `days` days after the fixture epoch, of `size_gb` GB.
    pub fn aged_snapshot(hash: &str, name: &str, days: i64, size_gb: u64) -> TorrentSnapshot {
        let mut torrent = snapshot(hash, name);
        torrent.added_at = torrent.added_at.map(|at| at + Duration::days(days));
        torrent.size_bytes = size_gb * GB;
        torrent
    }

    /// A single leaf condition.
    pub fn leaf(field: Field, operator: Operator, value: &str) -> ConditionNode {
        ConditionNode::leaf(ConditionLeaf::new(field, operator, value))
    }

    /// A rule deleting matches in `mode`.
    pub fn delete_rule(id: i64, condition: ConditionNode, mode: DeleteMode) -> Rule {
        Rule::new(
            id,
            condition,
            ActionSet {
                delete: Some(DeleteAction {
                    enabled: true,
                    mode,
                }),
                ..Default::default()
            },
        )
    }

    /// A rule tagging matches.
    pub fn tag_rule(id: i64, condition: ConditionNode, tags: &[&str], mode: TagMode) -> Rule {
        Rule::new(
            id,
            condition,
            ActionSet {
                tags: Some(TagAction {
                    enabled: true,
                    tags: tags.iter().map(|t| t.to_string()).collect(),
                    mode,
                }),
                ..Default::default()
            },
        )
    }
}
