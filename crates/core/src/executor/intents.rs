//! Per-cycle merge of rule outcomes into one plan per torrent.
//!
//! Rules feed the builder in sort order. A delete is first-wins and makes
//! the torrent terminal; every other action kind is last-wins. Tags
//! accumulate across rules and removals beat additions.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use super::template::Template;
use crate::identity::{GroupIndex, IdentityIndex};
use crate::rules::{CompiledRule, DeleteMode, RuleId, RunState};
use crate::torrent_client::{ShareLimits, SpeedLimits, TorrentSnapshot};

/// A value requested by a rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Intent<T> {
    pub rule_id: RuleId,
    pub value: T,
}

impl<T> Intent<T> {
    pub fn new(rule_id: RuleId, value: T) -> Self {
        Self { rule_id, value }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteIntent {
    pub rule_id: RuleId,
    pub mode: DeleteMode,
    /// Resolved when the plan is finished.
    pub delete_files: bool,
}

/// Everything the cycle wants done to one torrent.
#[derive(Debug, Clone, Default)]
pub struct TorrentPlan {
    pub delete: Option<DeleteIntent>,
    pub category: Option<Intent<String>>,
    /// Tag to the last rule that added it.
    pub add_tags: BTreeMap<String, RuleId>,
    /// Tag to the last rule that removed it.
    pub remove_tags: BTreeMap<String, RuleId>,
    pub speed_limits: Option<Intent<SpeedLimits>>,
    pub share_limits: Option<Intent<ShareLimits>>,
    pub run_state: Option<Intent<RunState>>,
    pub move_to: Option<Intent<Template>>,
    pub program: Option<Intent<String>>,
    /// Rules that contributed to this plan.
    pub rules: BTreeSet<RuleId>,
}

impl TorrentPlan {
    pub fn is_terminal(&self) -> bool {
        self.delete.is_some()
    }

    /// Tags to add after removals win, minus tags already present.
    pub fn tags_to_add(&self, current: &BTreeSet<String>) -> BTreeMap<String, RuleId> {
        self.add_tags
            .iter()
            .filter(|(tag, _)| !self.remove_tags.contains_key(*tag) && !current.contains(*tag))
            .map(|(tag, rule)| (tag.clone(), *rule))
            .collect()
    }

    /// Tags to remove that the torrent actually has.
    pub fn tags_to_remove(&self, current: &BTreeSet<String>) -> BTreeMap<String, RuleId> {
        self.remove_tags
            .iter()
            .filter(|(tag, _)| current.contains(*tag))
            .map(|(tag, rule)| (tag.clone(), *rule))
            .collect()
    }
}

/// Merged outcome of every rule evaluated in a cycle.
#[derive(Debug, Clone, Default)]
pub struct CyclePlan {
    pub torrents: BTreeMap<String, TorrentPlan>,
}

impl CyclePlan {
    pub fn get(&self, hash: &str) -> Option<&TorrentPlan> {
        self.torrents.get(hash)
    }

    pub fn is_empty(&self) -> bool {
        self.torrents.is_empty()
    }

    pub fn deletes(&self) -> impl Iterator<Item = (&String, &DeleteIntent)> {
        self.torrents
            .iter()
            .filter_map(|(hash, plan)| plan.delete.as_ref().map(|d| (hash, d)))
    }

    /// (torrent, rule) pairs that contributed to the plan.
    pub fn contributions(&self) -> impl Iterator<Item = (&str, RuleId)> {
        self.torrents
            .iter()
            .flat_map(|(hash, plan)| plan.rules.iter().map(move |rule| (hash.as_str(), *rule)))
    }
}

/// Accumulates rule outcomes for one cycle.
pub struct PlanBuilder<'a> {
    snapshots: HashMap<&'a str, &'a TorrentSnapshot>,
    identity: &'a IdentityIndex,
    plans: BTreeMap<String, TorrentPlan>,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(torrents: &'a [TorrentSnapshot], identity: &'a IdentityIndex) -> Self {
        Self {
            snapshots: torrents.iter().map(|t| (t.hash.as_str(), t)).collect(),
            identity,
            plans: BTreeMap::new(),
        }
    }

    pub fn is_terminal(&self, hash: &str) -> bool {
        self.plans.get(hash).is_some_and(TorrentPlan::is_terminal)
    }

    fn plan_mut(&mut self, hash: &str) -> &mut TorrentPlan {
        self.plans.entry(hash.to_string()).or_default()
    }

    /// Record a matched torrent for `rule`.
    ///
    /// `groups` is the rule's own grouping, used for action expansion and for
    /// deletes that take the whole group. Returns the hashes that gained an
    /// intent.
    pub fn add_match(
        &mut self,
        rule: &CompiledRule,
        hash: &str,
        groups: Option<&GroupIndex>,
    ) -> Vec<String> {
        if self.is_terminal(hash) {
            return Vec::new();
        }

        if let Some(delete) = rule.rule.actions.delete() {
            let targets: Vec<String> = match delete.mode {
                DeleteMode::DeleteWithFilesIncludeCrossSeeds => {
                    let groups = groups.unwrap_or(&self.identity.cross_seeds);
                    groups.members(hash).into_iter().map(str::to_string).collect()
                }
                _ => vec![hash.to_string()],
            };
            let mut deleted = Vec::new();
            for target in targets {
                if self.is_terminal(&target) || !self.snapshots.contains_key(target.as_str()) {
                    continue;
                }
                let plan = self.plan_mut(&target);
                *plan = TorrentPlan {
                    delete: Some(DeleteIntent {
                        rule_id: rule.id(),
                        mode: delete.mode,
                        delete_files: delete.mode.deletes_files(),
                    }),
                    ..Default::default()
                };
                plan.rules.insert(rule.id());
                deleted.push(target);
            }
            return deleted;
        }

        let expand = rule
            .rule
            .grouping
            .as_ref()
            .is_some_and(|g| g.expand_actions);
        let targets: Vec<String> = match groups {
            Some(groups) if expand => groups.members(hash).into_iter().map(str::to_string).collect(),
            _ => vec![hash.to_string()],
        };

        let mut touched = Vec::new();
        for target in targets {
            if self.is_terminal(&target) || !self.snapshots.contains_key(target.as_str()) {
                continue;
            }
            self.apply_combinable(rule, &target);
            touched.push(target);
        }

        if let Some(category) = rule.rule.actions.category() {
            if category.include_cross_seeds {
                let members: Vec<String> = self
                    .identity
                    .locations
                    .members(hash)
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                for member in members {
                    if member == hash || self.is_terminal(&member) {
                        continue;
                    }
                    let plan = self.plan_mut(&member);
                    plan.category = Some(Intent::new(rule.id(), category.category.clone()));
                    plan.rules.insert(rule.id());
                    if !touched.contains(&member) {
                        touched.push(member);
                    }
                }
            }
        }
        touched
    }

    fn apply_combinable(&mut self, rule: &CompiledRule, hash: &str) {
        let id = rule.id();
        let actions = &rule.rule.actions;
        let plan = self.plan_mut(hash);

        if let Some(tags) = actions.tags() {
            if tags.mode.adds() {
                for tag in &tags.tags {
                    plan.add_tags.insert(tag.clone(), id);
                }
            }
        }
        if let Some(category) = actions.category() {
            plan.category = Some(Intent::new(id, category.category.clone()));
        }
        if let Some(speed) = actions.speed_limits() {
            plan.speed_limits = Some(Intent::new(id, speed.limits()));
        }
        if let Some(share) = actions.share_limits() {
            plan.share_limits = Some(Intent::new(id, share.limits()));
        }
        if let Some(state) = actions.state_change() {
            plan.run_state = Some(Intent::new(id, state.to));
        }
        if let Some(template) = &rule.move_template {
            plan.move_to = Some(Intent::new(id, template.clone()));
        }
        if let Some(program) = actions.external_program() {
            plan.program = Some(Intent::new(id, program.program_id.clone()));
        }
        plan.rules.insert(id);
    }

    /// Record a torrent `rule` did not match: tag actions in `full` or
    /// `remove` mode take their tags off it.
    pub fn add_non_match(&mut self, rule: &CompiledRule, hash: &str) {
        let Some(tags) = rule.rule.actions.tags() else {
            return;
        };
        if !tags.mode.removes() || self.is_terminal(hash) {
            return;
        }
        let Some(snapshot) = self.snapshots.get(hash) else {
            return;
        };
        let present: Vec<&String> = tags.tags.iter().filter(|t| snapshot.tags.contains(*t)).collect();
        if present.is_empty() {
            return;
        }
        let id = rule.id();
        let plan = self.plan_mut(hash);
        for tag in present {
            plan.remove_tags.insert(tag.clone(), id);
        }
        plan.rules.insert(id);
    }

    /// Resolve file deletion for cross-seed preserving deletes.
    pub fn finish(self) -> CyclePlan {
        let mut plans = self.plans;
        let deleted: BTreeSet<String> = plans
            .iter()
            .filter(|(_, p)| p.is_terminal())
            .map(|(h, _)| h.clone())
            .collect();

        for (hash, plan) in plans.iter_mut() {
            if let Some(delete) = plan.delete.as_mut() {
                if delete.mode == DeleteMode::DeleteWithFilesPreserveCrossSeeds {
                    delete.delete_files = self
                        .identity
                        .cross_seeds
                        .members(hash)
                        .iter()
                        .all(|member| deleted.contains(*member));
                }
            }
        }
        CyclePlan { torrents: plans }
    }
}
