//! Rule validation and compilation.
//!
//! Everything that can make a rule misbehave is rejected here, when rules are
//! loaded or replaced, so a cycle never meets a configuration error.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use super::types::{ConditionNode, Field, Operator, Rule, RuleId, MIN_INTERVAL_SECS};
use super::value::parse_numeric;
use crate::evaluator::{CompiledCondition, ConditionError};
use crate::executor::{Template, TemplateError, MOVE_FIELDS};
use crate::free_space::FreeSpaceTarget;
use crate::identity::{builtin_key, GroupSpec, KeyField};
use crate::rules::DeleteMode;

/// Configuration errors in a rule or rule set.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule {rule_id}: invalid condition: {source}")]
    Condition {
        rule_id: RuleId,
        #[source]
        source: ConditionError,
    },

    #[error("rule {rule_id}: interval {interval_secs}s is below the {min}s minimum")]
    IntervalTooShort {
        rule_id: RuleId,
        interval_secs: u64,
        min: u64,
    },

    #[error("rule {0}: a delete action cannot be combined with other actions")]
    DeleteNotExclusive(RuleId),

    #[error("rule {0}: no enabled actions")]
    NoActions(RuleId),

    #[error("rule {0}: a free space condition requires a delete mode that removes files")]
    KeepFilesWithFreeSpace(RuleId),

    #[error("rule {rule_id}: unsupported free space condition: {reason}")]
    UnsupportedFreeSpaceCondition { rule_id: RuleId, reason: &'static str },

    #[error("rule {rule_id}: invalid group key: {reason}")]
    InvalidGroupKey { rule_id: RuleId, reason: String },

    #[error("rule {rule_id}: invalid template {template:?}: {source}")]
    InvalidTemplate {
        rule_id: RuleId,
        template: String,
        #[source]
        source: TemplateError,
    },

    #[error("rule {rule_id}: unknown program {program_id:?}")]
    UnknownProgram { rule_id: RuleId, program_id: String },

    #[error("duplicate rule id {0}")]
    DuplicateRuleId(RuleId),
}

/// A validated rule with its condition compiled.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: Rule,
    pub condition: CompiledCondition,
    /// Custom grouping, if configured.
    pub grouping: Option<GroupSpec>,
    /// Free space a free-space delete rule aims for.
    pub free_space_target: Option<FreeSpaceTarget>,
    pub move_template: Option<Template>,
}

impl CompiledRule {
    pub fn compile(rule: Rule, program_ids: &HashSet<String>) -> Result<Self, RuleError> {
        let id = rule.id;

        if rule.interval_secs < MIN_INTERVAL_SECS {
            return Err(RuleError::IntervalTooShort {
                rule_id: id,
                interval_secs: rule.interval_secs,
                min: MIN_INTERVAL_SECS,
            });
        }
        if rule.actions.is_empty() {
            return Err(RuleError::NoActions(id));
        }
        if rule.actions.delete().is_some() && rule.actions.combinable_count() > 0 {
            return Err(RuleError::DeleteNotExclusive(id));
        }

        let condition = CompiledCondition::compile(&rule.condition)
            .map_err(|source| RuleError::Condition { rule_id: id, source })?;

        let free_space_target = match rule.actions.delete() {
            Some(delete) if rule.condition.references(Field::FreeSpace) => {
                if delete.mode == DeleteMode::Delete {
                    return Err(RuleError::KeepFilesWithFreeSpace(id));
                }
                Some(free_space_target(id, &rule.condition)?)
            }
            _ => None,
        };

        let grouping = match &rule.grouping {
            Some(config) => {
                let fields = match (&config.builtin, config.fields.is_empty()) {
                    (Some(_), false) => {
                        return Err(group_error(id, "builtin and fields are mutually exclusive"))
                    }
                    (None, true) => return Err(group_error(id, "no key fields")),
                    (Some(name), true) => builtin_key(name)
                        .ok_or_else(|| group_error(id, format!("unknown builtin key {:?}", name)))?
                        .to_vec(),
                    (None, false) => config.fields.clone(),
                };
                let unique: HashSet<KeyField> = fields.iter().copied().collect();
                if unique.len() != fields.len() {
                    return Err(group_error(id, "duplicate key field"));
                }
                if !(1..=100).contains(&config.min_file_overlap_percent) {
                    return Err(group_error(
                        id,
                        format!(
                            "min_file_overlap_percent must be 1-100, got {}",
                            config.min_file_overlap_percent
                        ),
                    ));
                }
                Some(GroupSpec {
                    fields,
                    ambiguous_policy: config.ambiguous_policy,
                    min_file_overlap_percent: config.min_file_overlap_percent,
                })
            }
            None => None,
        };

        let move_template = match rule.actions.move_to() {
            Some(action) => Some(Template::parse(&action.path, MOVE_FIELDS).map_err(|source| {
                RuleError::InvalidTemplate {
                    rule_id: id,
                    template: action.path.clone(),
                    source,
                }
            })?),
            None => None,
        };

        if let Some(program) = rule.actions.external_program() {
            if !program_ids.contains(&program.program_id) {
                return Err(RuleError::UnknownProgram {
                    rule_id: id,
                    program_id: program.program_id.clone(),
                });
            }
        }

        Ok(Self {
            rule,
            condition,
            grouping,
            free_space_target,
            move_template,
        })
    }

    pub fn id(&self) -> RuleId {
        self.rule.id
    }

    /// Whether the rule reads hardlink data.
    pub fn needs_hardlinks(&self) -> bool {
        self.rule.condition.references(Field::HardlinkScope)
            || self
                .grouping
                .as_ref()
                .is_some_and(|g| g.fields.contains(&KeyField::HardlinkSignature))
    }
}

fn group_error(rule_id: RuleId, reason: impl Into<String>) -> RuleError {
    RuleError::InvalidGroupKey {
        rule_id,
        reason: reason.into(),
    }
}

/// Target of the single free-space leaf of a delete rule.
///
/// The leaf must be `lt`/`lte`, not negated, and sit at the root or directly
/// under a root AND, so that assuming it satisfied yields a superset of the
/// torrents that match with a real reading.
fn free_space_target(
    rule_id: RuleId,
    condition: &ConditionNode,
) -> Result<FreeSpaceTarget, RuleError> {
    let unsupported = |reason| RuleError::UnsupportedFreeSpaceCondition { rule_id, reason };

    let leaves: Vec<_> = condition
        .leaves()
        .into_iter()
        .filter(|leaf| leaf.field == Field::FreeSpace)
        .collect();
    if leaves.len() != 1 {
        return Err(unsupported("exactly one free_space condition is allowed"));
    }
    let leaf = leaves[0];

    let top_level = match condition {
        ConditionNode::Leaf(_) => true,
        ConditionNode::And { children } => children
            .iter()
            .any(|child| matches!(child, ConditionNode::Leaf(l) if l.field == Field::FreeSpace)),
        _ => false,
    };
    if !top_level {
        return Err(unsupported(
            "free_space must be the root condition or a direct child of a root AND",
        ));
    }
    if leaf.negate || !matches!(leaf.operator, Operator::LessThan | Operator::LessThanOrEqual) {
        return Err(unsupported("free_space must use lt or lte without negation"));
    }

    let threshold = parse_numeric(Field::FreeSpace, &leaf.value)
        .filter(|v| *v >= 0.0)
        .map(|v| v as u64)
        .ok_or_else(|| RuleError::Condition {
            rule_id,
            source: ConditionError::InvalidValue {
                field: Field::FreeSpace,
                value: leaf.value.clone(),
            },
        })?;

    Ok(if leaf.operator == Operator::LessThanOrEqual {
        FreeSpaceTarget::at_most(threshold)
    } else {
        FreeSpaceTarget::below(threshold)
    })
}

/// A versioned, validated set of rules in evaluation order.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    version: u64,
    rules: Vec<Arc<CompiledRule>>,
}

impl RuleSet {
    /// Validate and order `rules` by sort order, then id.
    pub fn compile(
        version: u64,
        rules: Vec<Rule>,
        program_ids: &HashSet<String>,
    ) -> Result<Self, RuleError> {
        let mut seen = HashSet::new();
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            if !seen.insert(rule.id) {
                return Err(RuleError::DuplicateRuleId(rule.id));
            }
            compiled.push(Arc::new(CompiledRule::compile(rule, program_ids)?));
        }
        compiled.sort_by_key(|r| (r.rule.sort_order, r.rule.id));
        Ok(Self {
            version,
            rules: compiled,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn rules(&self) -> &[Arc<CompiledRule>] {
        &self.rules
    }

    pub fn get(&self, id: RuleId) -> Option<&Arc<CompiledRule>> {
        self.rules.iter().find(|r| r.rule.id == id)
    }

    /// Rule definitions in evaluation order.
    pub fn definitions(&self) -> Vec<Rule> {
        self.rules.iter().map(|r| r.rule.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
