//! Compilation of condition trees into their evaluable form.
//!
//! Compilation is where configuration errors surface: malformed regexes,
//! unparseable numbers and operators that do not apply to a field are all
//! rejected here, so evaluation itself never fails.

use regex_lite::{Regex, RegexBuilder};
use thiserror::Error;

use crate::identity::HardlinkScope;
use crate::rules::{parse_numeric, ConditionLeaf, ConditionNode, Field, FieldKind, Operator};
use crate::torrent_client::{TorrentSnapshot, TorrentState};

/// Errors found while compiling a condition tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    #[error("invalid regex {pattern:?}: {message}")]
    InvalidRegex { pattern: String, message: String },

    #[error("invalid value {value:?} for field {field:?}")]
    InvalidValue { field: Field, value: String },

    #[error("operator {operator:?} is not supported for field {field:?}")]
    UnsupportedOperator { field: Field, operator: Operator },

    #[error("NOT must have exactly one child, found {0}")]
    NotArity(usize),

    #[error("AND/OR groups need at least one child")]
    EmptyGroup,

    #[error("between requires min_value and max_value with min <= max")]
    InvalidRange,

    #[error("{0:?} requires a target category")]
    MissingCrossCategory(Operator),
}

/// State buckets a `state` condition can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateBucket {
    Downloading,
    Seeding,
    Paused,
    Stalled,
    Checking,
    Queued,
    Errored,
    Moving,
    Completed,
    Active,
}

impl StateBucket {
    pub fn parse(value: &str) -> Option<Self> {
        let bucket = match value.trim().to_lowercase().as_str() {
            "downloading" => StateBucket::Downloading,
            "seeding" | "uploading" => StateBucket::Seeding,
            "paused" | "stopped" => StateBucket::Paused,
            "stalled" => StateBucket::Stalled,
            "checking" => StateBucket::Checking,
            "queued" => StateBucket::Queued,
            "errored" | "error" => StateBucket::Errored,
            "moving" => StateBucket::Moving,
            "completed" | "complete" => StateBucket::Completed,
            "active" => StateBucket::Active,
            _ => return None,
        };
        Some(bucket)
    }

    pub fn contains(&self, torrent: &TorrentSnapshot) -> bool {
        match self {
            StateBucket::Downloading => torrent.state == TorrentState::Downloading,
            StateBucket::Seeding => {
                torrent.state == TorrentState::Seeding
                    || (torrent.state == TorrentState::Stalled && torrent.is_complete())
            }
            StateBucket::Paused => torrent.state == TorrentState::Paused,
            StateBucket::Stalled => torrent.state == TorrentState::Stalled,
            StateBucket::Checking => torrent.state == TorrentState::Checking,
            StateBucket::Queued => torrent.state == TorrentState::Queued,
            StateBucket::Errored => torrent.state == TorrentState::Error,
            StateBucket::Moving => torrent.state == TorrentState::Moving,
            StateBucket::Completed => torrent.is_complete(),
            StateBucket::Active => torrent.download_speed > 0 || torrent.upload_speed > 0,
        }
    }
}

/// What a compiled leaf compares against.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Lowercased needle for plain string operators.
    Text(String),
    Regex(Regex),
    State(StateBucket),
    Number(f64),
    Range { min: f64, max: f64 },
    Bool(bool),
    /// Lowercased target category for `exists_in`/`contains_in`.
    CrossCategory(String),
}

#[derive(Debug, Clone)]
pub struct CompiledLeaf {
    pub field: Field,
    pub operator: Operator,
    pub negate: bool,
    pub matcher: Matcher,
}

/// Evaluable condition tree, built once per rule.
#[derive(Debug, Clone)]
pub enum CompiledCondition {
    And(Vec<CompiledCondition>),
    Or(Vec<CompiledCondition>),
    Not(Box<CompiledCondition>),
    Leaf(CompiledLeaf),
}

impl CompiledCondition {
    pub fn compile(node: &ConditionNode) -> Result<Self, ConditionError> {
        match node {
            ConditionNode::And { children } => Ok(CompiledCondition::And(compile_group(children)?)),
            ConditionNode::Or { children } => Ok(CompiledCondition::Or(compile_group(children)?)),
            ConditionNode::Not { children } => {
                if children.len() != 1 {
                    return Err(ConditionError::NotArity(children.len()));
                }
                let child = CompiledCondition::compile(&children[0])?;
                Ok(CompiledCondition::Not(Box::new(child)))
            }
            ConditionNode::Leaf(leaf) => Ok(CompiledCondition::Leaf(compile_leaf(leaf)?)),
        }
    }
}

fn compile_group(children: &[ConditionNode]) -> Result<Vec<CompiledCondition>, ConditionError> {
    if children.is_empty() {
        return Err(ConditionError::EmptyGroup);
    }
    children.iter().map(CompiledCondition::compile).collect()
}

/// Build a case-insensitive, unanchored regex.
pub fn compile_regex(pattern: &str) -> Result<Regex, ConditionError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| ConditionError::InvalidRegex {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

fn compile_leaf(leaf: &ConditionLeaf) -> Result<CompiledLeaf, ConditionError> {
    let unsupported = || ConditionError::UnsupportedOperator {
        field: leaf.field,
        operator: leaf.operator,
    };
    let invalid = |value: &str| ConditionError::InvalidValue {
        field: leaf.field,
        value: value.to_string(),
    };

    let matcher = if leaf.operator.is_cross_category() {
        if leaf.field != Field::Name {
            return Err(unsupported());
        }
        let target = leaf
            .cross_category
            .as_deref()
            .unwrap_or(leaf.value.as_str())
            .trim();
        if target.is_empty() {
            return Err(ConditionError::MissingCrossCategory(leaf.operator));
        }
        Matcher::CrossCategory(target.to_lowercase())
    } else {
        match leaf.field.kind() {
            FieldKind::Text => {
                if !leaf.operator.is_text() {
                    return Err(unsupported());
                }
                if leaf.regex || leaf.operator == Operator::Matches {
                    Matcher::Regex(compile_regex(&leaf.value)?)
                } else {
                    compile_text(leaf).ok_or_else(|| invalid(&leaf.value))?
                }
            }
            FieldKind::Numeric => {
                if !leaf.operator.is_numeric() {
                    return Err(unsupported());
                }
                if leaf.operator == Operator::Between {
                    let bound = |v: &Option<String>| {
                        v.as_deref().and_then(|v| parse_numeric(leaf.field, v))
                    };
                    match (bound(&leaf.min_value), bound(&leaf.max_value)) {
                        (Some(min), Some(max)) if min <= max => Matcher::Range { min, max },
                        _ => return Err(ConditionError::InvalidRange),
                    }
                } else {
                    let value =
                        parse_numeric(leaf.field, &leaf.value).ok_or_else(|| invalid(&leaf.value))?;
                    Matcher::Number(value)
                }
            }
            FieldKind::Boolean => {
                if !matches!(leaf.operator, Operator::Equals | Operator::NotEquals) {
                    return Err(unsupported());
                }
                let value = match leaf.value.trim().to_lowercase().as_str() {
                    "true" | "yes" | "1" => true,
                    "false" | "no" | "0" => false,
                    _ => return Err(invalid(&leaf.value)),
                };
                Matcher::Bool(value)
            }
        }
    };

    Ok(CompiledLeaf {
        field: leaf.field,
        operator: leaf.operator,
        negate: leaf.negate,
        matcher,
    })
}

/// Plain string matcher, with value checks for enumerated fields.
fn compile_text(leaf: &ConditionLeaf) -> Option<Matcher> {
    let exact = matches!(leaf.operator, Operator::Equals | Operator::NotEquals);
    match leaf.field {
        Field::State if exact => StateBucket::parse(&leaf.value).map(Matcher::State),
        Field::HardlinkScope if exact => {
            HardlinkScope::parse(&leaf.value)?;
            Some(Matcher::Text(leaf.value.trim().to_lowercase()))
        }
        _ => Some(Matcher::Text(leaf.value.to_lowercase())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(field: Field, operator: Operator, value: &str) -> ConditionNode {
        ConditionNode::leaf(ConditionLeaf::new(field, operator, value))
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let node = ConditionNode::leaf(ConditionLeaf::new(Field::Name, Operator::Equals, "(").with_regex());
        let err = CompiledCondition::compile(&node).unwrap_err();
        assert!(matches!(err, ConditionError::InvalidRegex { .. }));
    }

    #[test]
    fn test_matches_operator_always_compiles_regex() {
        let node = leaf(Field::Name, Operator::Matches, "[");
        assert!(CompiledCondition::compile(&node).is_err());
    }

    #[test]
    fn test_not_arity() {
        let node = ConditionNode::Not {
            children: vec![
                leaf(Field::Ratio, Operator::GreaterThan, "1"),
                leaf(Field::Ratio, Operator::LessThan, "3"),
            ],
        };
        assert_eq!(
            CompiledCondition::compile(&node).unwrap_err(),
            ConditionError::NotArity(2)
        );
    }

    #[test]
    fn test_empty_group_rejected() {
        let node = ConditionNode::and(vec![]);
        assert_eq!(
            CompiledCondition::compile(&node).unwrap_err(),
            ConditionError::EmptyGroup
        );
    }

    #[test]
    fn test_operator_field_mismatch() {
        let node = leaf(Field::Ratio, Operator::Contains, "1");
        assert!(matches!(
            CompiledCondition::compile(&node).unwrap_err(),
            ConditionError::UnsupportedOperator { .. }
        ));

        let node = leaf(Field::Category, Operator::ExistsIn, "movies");
        assert!(matches!(
            CompiledCondition::compile(&node).unwrap_err(),
            ConditionError::UnsupportedOperator { .. }
        ));
    }

    #[test]
    fn test_between_bounds() {
        let ok = ConditionNode::leaf(ConditionLeaf::between(Field::Ratio, "1", "2"));
        assert!(CompiledCondition::compile(&ok).is_ok());

        let reversed = ConditionNode::leaf(ConditionLeaf::between(Field::Ratio, "3", "2"));
        assert_eq!(
            CompiledCondition::compile(&reversed).unwrap_err(),
            ConditionError::InvalidRange
        );

        let missing = leaf(Field::Ratio, Operator::Between, "1");
        assert_eq!(
            CompiledCondition::compile(&missing).unwrap_err(),
            ConditionError::InvalidRange
        );
    }

    #[test]
    fn test_enumerated_values_checked() {
        assert!(CompiledCondition::compile(&leaf(Field::State, Operator::Equals, "completed")).is_ok());
        assert!(CompiledCondition::compile(&leaf(Field::State, Operator::Equals, "bogus")).is_err());
        assert!(CompiledCondition::compile(&leaf(Field::State, Operator::Contains, "bogus")).is_ok());
        assert!(CompiledCondition::compile(&leaf(
            Field::HardlinkScope,
            Operator::Equals,
            "outside_qbittorrent"
        ))
        .is_ok());
        assert!(CompiledCondition::compile(&leaf(Field::HardlinkScope, Operator::Equals, "maybe")).is_err());
        assert!(CompiledCondition::compile(&leaf(Field::Private, Operator::Equals, "perhaps")).is_err());
    }

    #[test]
    fn test_cross_category_requires_target() {
        let node = leaf(Field::Name, Operator::ExistsIn, "");
        assert_eq!(
            CompiledCondition::compile(&node).unwrap_err(),
            ConditionError::MissingCrossCategory(Operator::ExistsIn)
        );
    }
}
