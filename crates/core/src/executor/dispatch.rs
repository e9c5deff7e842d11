//! Client operations and their batching.

use crate::rules::{ActionKind, RuleId};
use crate::torrent_client::{ActionSink, ShareLimits, SpeedLimits, TorrentClientError};

/// One client call, applied to a batch of hashes.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Delete { delete_files: bool },
    Category(String),
    AddTags(Vec<String>),
    RemoveTags(Vec<String>),
    SpeedLimits(SpeedLimits),
    ShareLimits(ShareLimits),
    Pause,
    Resume,
    Move(String),
}

impl Operation {
    pub fn kind(&self) -> ActionKind {
        match self {
            Operation::Delete { .. } => ActionKind::Delete,
            Operation::Category(_) => ActionKind::Category,
            Operation::AddTags(_) => ActionKind::TagsAdded,
            Operation::RemoveTags(_) => ActionKind::TagsRemoved,
            Operation::SpeedLimits(_) => ActionKind::SpeedLimits,
            Operation::ShareLimits(_) => ActionKind::ShareLimits,
            Operation::Pause => ActionKind::Pause,
            Operation::Resume => ActionKind::Resume,
            Operation::Move(_) => ActionKind::Move,
        }
    }

    /// Human readable value for activity records.
    pub fn detail(&self) -> Option<String> {
        match self {
            Operation::Delete { delete_files } => Some(if *delete_files {
                "with files".to_string()
            } else {
                "keep files".to_string()
            }),
            Operation::Category(category) => Some(category.clone()),
            Operation::AddTags(tags) | Operation::RemoveTags(tags) => Some(tags.join(", ")),
            Operation::SpeedLimits(limits) => Some(format!(
                "up={} down={}",
                limit_label(limits.upload),
                limit_label(limits.download)
            )),
            Operation::ShareLimits(limits) => Some(format!(
                "ratio={} seeding_time={}m",
                limits.ratio_limit, limits.seeding_time_limit_mins
            )),
            Operation::Pause | Operation::Resume => None,
            Operation::Move(location) => Some(location.clone()),
        }
    }

    pub async fn send(
        &self,
        sink: &dyn ActionSink,
        hashes: &[String],
    ) -> Result<(), TorrentClientError> {
        match self {
            Operation::Delete { delete_files } => sink.delete(hashes, *delete_files).await,
            Operation::Category(category) => sink.set_category(hashes, category).await,
            Operation::AddTags(tags) => sink.add_tags(hashes, tags).await,
            Operation::RemoveTags(tags) => sink.remove_tags(hashes, tags).await,
            Operation::SpeedLimits(limits) => sink.set_speed_limits(hashes, *limits).await,
            Operation::ShareLimits(limits) => sink.set_share_limits(hashes, *limits).await,
            Operation::Pause => sink.pause(hashes).await,
            Operation::Resume => sink.resume(hashes).await,
            Operation::Move(location) => sink.set_location(hashes, location).await,
        }
    }
}

fn limit_label(limit: Option<u64>) -> String {
    match limit {
        None => "unchanged".to_string(),
        Some(0) => "unlimited".to_string(),
        Some(bytes) => format!("{}B/s", bytes),
    }
}

/// A torrent awaiting an operation and the rules that asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchItem {
    pub hash: String,
    pub rules: Vec<RuleId>,
}

impl DispatchItem {
    pub fn new(hash: impl Into<String>, rules: Vec<RuleId>) -> Self {
        Self {
            hash: hash.into(),
            rules,
        }
    }

    /// Rule credited in the activity record.
    pub fn primary_rule(&self) -> Option<RuleId> {
        self.rules.last().copied()
    }
}

#[derive(Debug, Clone)]
pub struct Batch {
    pub operation: Operation,
    pub items: Vec<DispatchItem>,
}

impl Batch {
    pub fn hashes(&self) -> Vec<String> {
        self.items.iter().map(|i| i.hash.clone()).collect()
    }
}

/// Group items by identical operation, in first-seen order, and split each
/// group into batches of at most `batch_size` hashes.
pub fn build_batches(entries: Vec<(Operation, DispatchItem)>, batch_size: usize) -> Vec<Batch> {
    let batch_size = batch_size.max(1);
    let mut groups: Vec<(Operation, Vec<DispatchItem>)> = Vec::new();
    for (operation, item) in entries {
        match groups.iter_mut().find(|(op, _)| *op == operation) {
            Some((_, items)) => items.push(item),
            None => groups.push((operation, vec![item])),
        }
    }

    let mut batches = Vec::new();
    for (operation, items) in groups {
        for chunk in items.chunks(batch_size) {
            batches.push(Batch {
                operation: operation.clone(),
                items: chunk.to_vec(),
            });
        }
    }
    batches
}
