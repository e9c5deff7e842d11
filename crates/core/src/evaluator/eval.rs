//! Evaluation of compiled conditions against a torrent.

use chrono::{DateTime, Utc};

use super::compile::{CompiledCondition, CompiledLeaf, Matcher};
use super::context::{EvalContext, FreeSpaceView};
use crate::rules::{Field, Operator};
use crate::torrent_client::TorrentSnapshot;

const EPSILON: f64 = 1e-9;

/// Evaluate `condition` for `torrent`.
///
/// Leaves whose input is unknown (hardlink scope, free space) are neither
/// true nor false; the unknown propagates through the tree and an unknown
/// result counts as no match.
pub fn evaluate(
    condition: &CompiledCondition,
    torrent: &TorrentSnapshot,
    ctx: &EvalContext<'_>,
) -> bool {
    eval_node(condition, torrent, ctx).unwrap_or(false)
}

fn eval_node(
    node: &CompiledCondition,
    torrent: &TorrentSnapshot,
    ctx: &EvalContext<'_>,
) -> Option<bool> {
    match node {
        CompiledCondition::And(children) => {
            let mut unknown = false;
            for child in children {
                match eval_node(child, torrent, ctx) {
                    Some(false) => return Some(false),
                    Some(true) => {}
                    None => unknown = true,
                }
            }
            if unknown {
                None
            } else {
                Some(true)
            }
        }
        CompiledCondition::Or(children) => {
            let mut unknown = false;
            for child in children {
                match eval_node(child, torrent, ctx) {
                    Some(true) => return Some(true),
                    Some(false) => {}
                    None => unknown = true,
                }
            }
            if unknown {
                None
            } else {
                Some(false)
            }
        }
        CompiledCondition::Not(child) => eval_node(child, torrent, ctx).map(|v| !v),
        CompiledCondition::Leaf(leaf) => eval_leaf(leaf, torrent, ctx).map(|v| v != leaf.negate),
    }
}

fn eval_leaf(leaf: &CompiledLeaf, torrent: &TorrentSnapshot, ctx: &EvalContext<'_>) -> Option<bool> {
    match &leaf.matcher {
        Matcher::CrossCategory(category) => Some(match leaf.operator {
            Operator::ExistsIn => ctx
                .category_names
                .exists_in(category, &torrent.hash, &torrent.name),
            _ => ctx
                .category_names
                .contains_in(category, &torrent.hash, &torrent.name),
        }),
        Matcher::State(bucket) => {
            let member = bucket.contains(torrent);
            Some(if leaf.operator.is_negative() { !member } else { member })
        }
        Matcher::Bool(expected) => {
            let equal = torrent_bool(leaf.field, torrent) == *expected;
            Some(if leaf.operator.is_negative() { !equal } else { equal })
        }
        Matcher::Number(_) | Matcher::Range { .. } => {
            if leaf.field == Field::FreeSpace {
                match ctx.free_space {
                    FreeSpaceView::AssumeSatisfied => return Some(!leaf.negate),
                    FreeSpaceView::Unavailable => return None,
                    FreeSpaceView::Reading(_) => {}
                }
            }
            // A missing timestamp is a plain non-match, not an unknown.
            let Some(actual) = numeric_value(leaf.field, torrent, ctx) else {
                return Some(false);
            };
            Some(compare_numeric(leaf.operator, &leaf.matcher, actual))
        }
        Matcher::Text(_) | Matcher::Regex(_) => {
            let values = text_values(leaf, torrent, ctx)?;
            let positive = match &leaf.matcher {
                Matcher::Regex(re) => values.iter().any(|v| re.is_match(v)),
                Matcher::Text(needle) => values
                    .iter()
                    .any(|v| text_positive(leaf.operator, &v.to_lowercase(), needle)),
                _ => false,
            };
            Some(if leaf.operator.is_negative() { !positive } else { positive })
        }
    }
}

/// Positive form of a string operator.
fn text_positive(operator: Operator, haystack: &str, needle: &str) -> bool {
    match operator {
        Operator::Equals | Operator::NotEquals => haystack == needle,
        Operator::Contains | Operator::NotContains => haystack.contains(needle),
        Operator::StartsWith => haystack.starts_with(needle),
        Operator::EndsWith => haystack.ends_with(needle),
        _ => false,
    }
}

fn compare_numeric(operator: Operator, matcher: &Matcher, actual: f64) -> bool {
    match (operator, matcher) {
        (Operator::Between, Matcher::Range { min, max }) => actual >= *min && actual <= *max,
        (Operator::Equals, Matcher::Number(v)) => (actual - v).abs() < EPSILON,
        (Operator::NotEquals, Matcher::Number(v)) => (actual - v).abs() >= EPSILON,
        (Operator::GreaterThan, Matcher::Number(v)) => actual > *v,
        (Operator::GreaterThanOrEqual, Matcher::Number(v)) => actual >= *v,
        (Operator::LessThan, Matcher::Number(v)) => actual < *v,
        (Operator::LessThanOrEqual, Matcher::Number(v)) => actual <= *v,
        _ => false,
    }
}

/// Candidate strings a text leaf tests. `None` when the value is unknown.
fn text_values(
    leaf: &CompiledLeaf,
    torrent: &TorrentSnapshot,
    ctx: &EvalContext<'_>,
) -> Option<Vec<String>> {
    let regex = matches!(leaf.matcher, Matcher::Regex(_));
    let values = match leaf.field {
        Field::Name => vec![torrent.name.clone()],
        Field::Hash => vec![torrent.hash.clone()],
        Field::Category => vec![torrent.category.clone().unwrap_or_default()],
        Field::Tags if regex => vec![torrent.joined_tags()],
        Field::Tags => torrent.tags.iter().cloned().collect(),
        Field::SavePath => vec![torrent.save_path.clone()],
        Field::ContentPath => vec![torrent.content_path.clone()],
        Field::State => vec![torrent.state.as_str().to_string()],
        Field::Tracker => tracker_candidates(torrent, ctx),
        Field::HardlinkScope => {
            let scope = ctx.identity.hardlink_scope(&torrent.hash)?;
            vec![scope.as_str().to_string()]
        }
        _ => Vec::new(),
    };
    Some(values)
}

/// Raw URL, domain and configured alias.
fn tracker_candidates(torrent: &TorrentSnapshot, ctx: &EvalContext<'_>) -> Vec<String> {
    let mut candidates = Vec::new();
    if let Some(url) = torrent.tracker.as_deref().filter(|u| !u.is_empty()) {
        candidates.push(url.to_string());
    }
    if let Some(domain) = torrent.tracker_domain() {
        if let Some(alias) = ctx.tracker_aliases.get(&domain) {
            candidates.push(alias.clone());
        }
        candidates.push(domain);
    }
    candidates
}

fn age_secs(now: DateTime<Utc>, at: Option<DateTime<Utc>>) -> Option<f64> {
    at.map(|at| (now - at).num_seconds().max(0) as f64)
}

fn numeric_value(field: Field, torrent: &TorrentSnapshot, ctx: &EvalContext<'_>) -> Option<f64> {
    let value = match field {
        Field::Size => torrent.size_bytes as f64,
        Field::Downloaded => torrent.downloaded_bytes as f64,
        Field::Uploaded => torrent.uploaded_bytes as f64,
        Field::Ratio => torrent.ratio,
        Field::Progress => torrent.progress,
        Field::DownloadSpeed => torrent.download_speed as f64,
        Field::UploadSpeed => torrent.upload_speed as f64,
        Field::SeedingTime => torrent.seeding_time_secs as f64,
        Field::AddedOnAge => return age_secs(ctx.now, torrent.added_at),
        Field::CompletionAge => return age_secs(ctx.now, torrent.completed_at),
        Field::LastActivityAge => return age_secs(ctx.now, torrent.last_activity_at),
        Field::NumSeeds => f64::from(torrent.seeders),
        Field::NumLeechs => f64::from(torrent.leechers),
        Field::TrackersCount => f64::from(torrent.trackers_count),
        Field::FreeSpace => match ctx.free_space {
            FreeSpaceView::Reading(bytes) => bytes as f64,
            _ => return None,
        },
        Field::CrossSeedCount => ctx.identity.cross_seed_count(&torrent.hash) as f64,
        _ => return None,
    };
    Some(value)
}

fn torrent_bool(field: Field, torrent: &TorrentSnapshot) -> bool {
    match field {
        Field::Private => torrent.private,
        _ => false,
    }
}
