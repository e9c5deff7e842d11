//! Evaluation of the due rules of one cycle into a plan.
//!
//! Everything here is synchronous and works on the cycle's snapshot; the
//! engine does the I/O before and after.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::debounce::DebounceTracker;
use super::types::RuleOutcome;
use crate::evaluator::{evaluate, CategoryNameIndex, EvalContext, FreeSpaceView};
use crate::executor::{CyclePlan, PlanBuilder};
use crate::free_space::{self, ProjectionParams};
use crate::identity::{FileLists, GroupIndex, IdentityIndex};
use crate::rules::CompiledRule;
use crate::torrent_client::TorrentSnapshot;

/// Read-only inputs gathered by the engine for one cycle.
#[derive(Debug, Clone, Copy)]
pub struct CycleInputs<'a> {
    pub torrents: &'a [TorrentSnapshot],
    pub identity: &'a IdentityIndex,
    pub files: &'a FileLists,
    pub category_names: &'a CategoryNameIndex,
    pub tracker_aliases: &'a HashMap<String, String>,
    /// Free bytes reported this cycle, if any.
    pub free_space: Option<u64>,
    pub now: DateTime<Utc>,
}

/// Plan and per-rule outcomes of one evaluation pass.
#[derive(Debug, Clone, Default)]
pub struct CycleEvaluation {
    pub plan: CyclePlan,
    pub outcomes: Vec<RuleOutcome>,
}

/// Evaluate `rules` in order against every torrent.
///
/// `rules` must already be in sort order. A torrent claimed by a delete is
/// skipped by every later rule, and pairs inside the debounce window are
/// skipped entirely.
pub fn evaluate_rules(
    rules: &[Arc<CompiledRule>],
    inputs: &CycleInputs<'_>,
    debounce: &DebounceTracker,
) -> CycleEvaluation {
    let ctx = EvalContext {
        now: inputs.now,
        identity: inputs.identity,
        category_names: inputs.category_names,
        tracker_aliases: inputs.tracker_aliases,
        free_space: match inputs.free_space {
            Some(bytes) => FreeSpaceView::Reading(bytes),
            None => FreeSpaceView::Unavailable,
        },
    };

    let mut builder = PlanBuilder::new(inputs.torrents, inputs.identity);
    let mut outcomes = Vec::with_capacity(rules.len());
    let mut already_freed: u64 = 0;

    for rule in rules {
        let groups = rule.grouping.as_ref().map(|spec| {
            GroupIndex::build(
                inputs.torrents,
                spec,
                &inputs.identity.hardlinks,
                inputs.files,
            )
        });

        let mut outcome = RuleOutcome {
            rule_id: rule.id(),
            matched: 0,
            debounced: 0,
            projection: None,
        };

        let mut candidates: Vec<&TorrentSnapshot> = Vec::new();
        for torrent in inputs.torrents {
            if builder.is_terminal(&torrent.hash) {
                continue;
            }
            if debounce.is_debounced(&torrent.hash, rule.id(), inputs.now) {
                outcome.debounced += 1;
                continue;
            }
            candidates.push(torrent);
        }

        if let (Some(target), Some(delete)) =
            (rule.free_space_target, rule.rule.actions.delete())
        {
            let assume = ctx.with_free_space(FreeSpaceView::AssumeSatisfied);
            let eligible: Vec<&TorrentSnapshot> = candidates
                .into_iter()
                .filter(|t| evaluate(&rule.condition, t, &assume))
                .collect();
            let projection = free_space::project(
                &eligible,
                &ProjectionParams {
                    free_space: inputs.free_space,
                    target,
                    mode: delete.mode,
                    // Same groups the plan resolves file deletion with.
                    groups: &inputs.identity.cross_seeds,
                    already_freed,
                },
            );
            already_freed = already_freed.saturating_add(projection.freed_bytes);
            debug!(
                rule_id = rule.id(),
                eligible = projection.eligible.len(),
                accepted = projection.accepted.len(),
                target_reached = projection.target_reached,
                "Projected free-space deletions"
            );
            for hash in &projection.accepted {
                if !builder.add_match(rule, hash, groups.as_ref()).is_empty() {
                    outcome.matched += 1;
                }
            }
            outcome.projection = Some(projection);
        } else {
            for torrent in candidates {
                // An earlier match of this rule may have claimed it.
                if builder.is_terminal(&torrent.hash) {
                    continue;
                }
                if evaluate(&rule.condition, torrent, &ctx) {
                    if !builder.add_match(rule, &torrent.hash, groups.as_ref()).is_empty() {
                        outcome.matched += 1;
                    }
                } else {
                    builder.add_non_match(rule, &torrent.hash);
                }
            }
        }

        debug!(
            rule_id = rule.id(),
            matched = outcome.matched,
            debounced = outcome.debounced,
            "Evaluated rule"
        );
        outcomes.push(outcome);
    }

    CycleEvaluation {
        plan: builder.finish(),
        outcomes,
    }
}
