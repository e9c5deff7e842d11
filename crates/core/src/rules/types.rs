//! Rule definitions as they are persisted and edited.

use serde::{Deserialize, Serialize};

use crate::identity::KeyField;
use crate::torrent_client::{ShareLimits, SpeedLimits};

/// Rule identifier.
pub type RuleId = i64;

/// Minimum allowed rule interval.
pub const MIN_INTERVAL_SECS: u64 = 60;

/// Default rule interval.
pub const DEFAULT_INTERVAL_SECS: u64 = 900;

/// Default overlap required to treat two ambiguous torrents as cross-seeds.
pub const DEFAULT_MIN_FILE_OVERLAP_PERCENT: u8 = 90;

/// Torrent attribute a condition leaf reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    // Text
    Name,
    Hash,
    Category,
    Tags,
    SavePath,
    ContentPath,
    State,
    Tracker,
    HardlinkScope,
    // Numeric
    Size,
    Downloaded,
    Uploaded,
    Ratio,
    Progress,
    DownloadSpeed,
    UploadSpeed,
    SeedingTime,
    AddedOnAge,
    CompletionAge,
    LastActivityAge,
    NumSeeds,
    NumLeechs,
    TrackersCount,
    FreeSpace,
    CrossSeedCount,
    // Boolean
    Private,
}

/// Value type of a field, which decides the operators it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Numeric,
    Boolean,
}

impl Field {
    pub fn kind(&self) -> FieldKind {
        match self {
            Field::Name
            | Field::Hash
            | Field::Category
            | Field::Tags
            | Field::SavePath
            | Field::ContentPath
            | Field::State
            | Field::Tracker
            | Field::HardlinkScope => FieldKind::Text,
            Field::Private => FieldKind::Boolean,
            _ => FieldKind::Numeric,
        }
    }

    /// Fields whose value is only known with local filesystem access.
    pub fn needs_filesystem(&self) -> bool {
        matches!(self, Field::HardlinkScope)
    }
}

/// Comparison applied by a condition leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Matches,
    #[serde(rename = "gt")]
    GreaterThan,
    #[serde(rename = "gte")]
    GreaterThanOrEqual,
    #[serde(rename = "lt")]
    LessThan,
    #[serde(rename = "lte")]
    LessThanOrEqual,
    Between,
    ExistsIn,
    ContainsIn,
}

impl Operator {
    /// Operators whose result is the inverse of a positive match.
    pub fn is_negative(&self) -> bool {
        matches!(self, Operator::NotEquals | Operator::NotContains)
    }

    pub fn is_cross_category(&self) -> bool {
        matches!(self, Operator::ExistsIn | Operator::ContainsIn)
    }

    pub fn is_text(&self) -> bool {
        matches!(
            self,
            Operator::Equals
                | Operator::NotEquals
                | Operator::Contains
                | Operator::NotContains
                | Operator::StartsWith
                | Operator::EndsWith
                | Operator::Matches
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Operator::Equals
                | Operator::NotEquals
                | Operator::GreaterThan
                | Operator::GreaterThanOrEqual
                | Operator::LessThan
                | Operator::LessThanOrEqual
                | Operator::Between
        )
    }
}

/// A node of a rule's condition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConditionNode {
    And { children: Vec<ConditionNode> },
    Or { children: Vec<ConditionNode> },
    /// Exactly one child.
    Not { children: Vec<ConditionNode> },
    Leaf(ConditionLeaf),
}

/// A single field comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionLeaf {
    pub field: Field,
    pub operator: Operator,
    /// Comparison value. Numeric fields accept size (`500GB`, `1.5GiB`) and
    /// duration (`30d`, `12h`) suffixes.
    #[serde(default)]
    pub value: String,
    /// Lower bound for `between`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<String>,
    /// Upper bound for `between`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<String>,
    /// Treat `value` as a case-insensitive, unanchored regex.
    #[serde(default)]
    pub regex: bool,
    /// Invert this leaf's result.
    #[serde(default)]
    pub negate: bool,
    /// Category whose torrent names `exists_in`/`contains_in` compare against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_category: Option<String>,
}

impl ConditionLeaf {
    pub fn new(field: Field, operator: Operator, value: impl Into<String>) -> Self {
        Self {
            field,
            operator,
            value: value.into(),
            min_value: None,
            max_value: None,
            regex: false,
            negate: false,
            cross_category: None,
        }
    }

    pub fn with_regex(mut self) -> Self {
        self.regex = true;
        self
    }

    pub fn negated(mut self) -> Self {
        self.negate = true;
        self
    }

    pub fn between(field: Field, min: impl Into<String>, max: impl Into<String>) -> Self {
        Self {
            min_value: Some(min.into()),
            max_value: Some(max.into()),
            ..Self::new(field, Operator::Between, "")
        }
    }

    pub fn in_category(mut self, category: impl Into<String>) -> Self {
        self.cross_category = Some(category.into());
        self
    }
}

impl ConditionNode {
    pub fn leaf(leaf: ConditionLeaf) -> Self {
        ConditionNode::Leaf(leaf)
    }

    pub fn and(children: Vec<ConditionNode>) -> Self {
        ConditionNode::And { children }
    }

    pub fn or(children: Vec<ConditionNode>) -> Self {
        ConditionNode::Or { children }
    }

    pub fn not(child: ConditionNode) -> Self {
        ConditionNode::Not {
            children: vec![child],
        }
    }

    /// Visit every leaf in the tree.
    pub fn leaves(&self) -> Vec<&ConditionLeaf> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a ConditionLeaf>) {
        match self {
            ConditionNode::And { children }
            | ConditionNode::Or { children }
            | ConditionNode::Not { children } => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
            ConditionNode::Leaf(leaf) => out.push(leaf),
        }
    }

    pub fn references(&self, field: Field) -> bool {
        self.leaves().iter().any(|leaf| leaf.field == field)
    }
}

/// What a delete does with the torrent's data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    /// Remove the torrent, keep files.
    #[default]
    Delete,
    DeleteWithFiles,
    /// Delete files unless another torrent still references them.
    DeleteWithFilesPreserveCrossSeeds,
    /// Delete the torrent and every cross-seed sharing its content.
    DeleteWithFilesIncludeCrossSeeds,
}

impl DeleteMode {
    pub fn deletes_files(&self) -> bool {
        !matches!(self, DeleteMode::Delete)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeleteMode::Delete => "delete",
            DeleteMode::DeleteWithFiles => "delete_with_files",
            DeleteMode::DeleteWithFilesPreserveCrossSeeds => {
                "delete_with_files_preserve_cross_seeds"
            }
            DeleteMode::DeleteWithFilesIncludeCrossSeeds => "delete_with_files_include_cross_seeds",
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteAction {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: DeleteMode,
}

/// How a tag action treats matching and non-matching torrents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagMode {
    /// Add to matches, remove from non-matches.
    #[default]
    Full,
    /// Only add to matches.
    Add,
    /// Only remove from non-matches.
    Remove,
}

impl TagMode {
    pub fn adds(&self) -> bool {
        matches!(self, TagMode::Full | TagMode::Add)
    }

    pub fn removes(&self) -> bool {
        matches!(self, TagMode::Full | TagMode::Remove)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagAction {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub tags: Vec<String>,
    #[serde(default)]
    pub mode: TagMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryAction {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub category: String,
    /// Also move cross-seeds sharing content path and save path.
    #[serde(default)]
    pub include_cross_seeds: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedLimitAction {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub upload_limit: Option<u64>,
    #[serde(default)]
    pub download_limit: Option<u64>,
}

impl SpeedLimitAction {
    pub fn limits(&self) -> SpeedLimits {
        SpeedLimits {
            upload: self.upload_limit,
            download: self.download_limit,
        }
    }
}

fn default_share_ratio() -> f64 {
    -2.0
}

fn default_share_time() -> i64 {
    -2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareLimitAction {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_share_ratio")]
    pub ratio_limit: f64,
    #[serde(default = "default_share_time")]
    pub seeding_time_limit_mins: i64,
}

impl ShareLimitAction {
    pub fn limits(&self) -> ShareLimits {
        ShareLimits {
            ratio_limit: self.ratio_limit,
            seeding_time_limit_mins: self.seeding_time_limit_mins,
        }
    }
}

/// Desired run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Paused,
    Resumed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChangeAction {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub to: RunState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveAction {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Destination template, e.g. `/data/archive/{{category}}/{{isolation_folder}}`.
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramAction {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub program_id: String,
}

/// Actions a rule applies to matching torrents.
///
/// Either one delete action or any combination of the others.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<DeleteAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<TagAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<CategoryAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_limits: Option<SpeedLimitAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_limits: Option<ShareLimitAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_change: Option<StateChangeAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub move_to: Option<MoveAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_program: Option<ProgramAction>,
}

impl ActionSet {
    pub fn delete(&self) -> Option<&DeleteAction> {
        self.delete.as_ref().filter(|a| a.enabled)
    }

    pub fn tags(&self) -> Option<&TagAction> {
        self.tags.as_ref().filter(|a| a.enabled)
    }

    pub fn category(&self) -> Option<&CategoryAction> {
        self.category.as_ref().filter(|a| a.enabled)
    }

    pub fn speed_limits(&self) -> Option<&SpeedLimitAction> {
        self.speed_limits.as_ref().filter(|a| a.enabled)
    }

    pub fn share_limits(&self) -> Option<&ShareLimitAction> {
        self.share_limits.as_ref().filter(|a| a.enabled)
    }

    pub fn state_change(&self) -> Option<&StateChangeAction> {
        self.state_change.as_ref().filter(|a| a.enabled)
    }

    pub fn move_to(&self) -> Option<&MoveAction> {
        self.move_to.as_ref().filter(|a| a.enabled)
    }

    pub fn external_program(&self) -> Option<&ProgramAction> {
        self.external_program.as_ref().filter(|a| a.enabled)
    }

    /// Number of enabled actions other than delete.
    pub fn combinable_count(&self) -> usize {
        [
            self.tags().is_some(),
            self.category().is_some(),
            self.speed_limits().is_some(),
            self.share_limits().is_some(),
            self.state_change().is_some(),
            self.move_to().is_some(),
            self.external_program().is_some(),
        ]
        .iter()
        .filter(|enabled| **enabled)
        .count()
    }

    pub fn is_empty(&self) -> bool {
        self.delete().is_none() && self.combinable_count() == 0
    }
}

/// Kind of action, used for activity records and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Delete,
    Category,
    TagsAdded,
    TagsRemoved,
    SpeedLimits,
    ShareLimits,
    Pause,
    Resume,
    Move,
    ExternalProgram,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Delete => "delete",
            ActionKind::Category => "category",
            ActionKind::TagsAdded => "tags_added",
            ActionKind::TagsRemoved => "tags_removed",
            ActionKind::SpeedLimits => "speed_limits",
            ActionKind::ShareLimits => "share_limits",
            ActionKind::Pause => "pause",
            ActionKind::Resume => "resume",
            ActionKind::Move => "move",
            ActionKind::ExternalProgram => "external_program",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let kind = match value {
            "delete" => ActionKind::Delete,
            "category" => ActionKind::Category,
            "tags_added" => ActionKind::TagsAdded,
            "tags_removed" => ActionKind::TagsRemoved,
            "speed_limits" => ActionKind::SpeedLimits,
            "share_limits" => ActionKind::ShareLimits,
            "pause" => ActionKind::Pause,
            "resume" => ActionKind::Resume,
            "move" => ActionKind::Move,
            "external_program" => ActionKind::ExternalProgram,
            _ => return None,
        };
        Some(kind)
    }
}

/// How torrents with an equal content path and save path are grouped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    /// Compare file lists and require a minimum overlap.
    #[default]
    VerifyOverlap,
    /// Leave the torrent out of any group.
    Skip,
}

fn default_overlap() -> u8 {
    DEFAULT_MIN_FILE_OVERLAP_PERCENT
}

/// Grouping configuration for a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupingConfig {
    /// Name of a built-in key such as `cross_seed_content_path`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builtin: Option<String>,
    /// Custom ordered key fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<KeyField>,
    #[serde(default)]
    pub ambiguous_policy: AmbiguityPolicy,
    #[serde(default = "default_overlap")]
    pub min_file_overlap_percent: u8,
    /// Apply the rule's actions to every member of a matching torrent's group.
    #[serde(default)]
    pub expand_actions: bool,
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

/// A user-defined automation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub condition: ConditionNode,
    #[serde(default)]
    pub actions: ActionSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping: Option<GroupingConfig>,
}

impl Rule {
    /// A minimal enabled rule, mostly for tests and fixtures.
    pub fn new(id: RuleId, condition: ConditionNode, actions: ActionSet) -> Self {
        Self {
            id,
            name: format!("rule-{}", id),
            sort_order: 0,
            interval_secs: DEFAULT_INTERVAL_SECS,
            enabled: true,
            condition,
            actions,
            grouping: None,
        }
    }

    pub fn with_sort_order(mut self, sort_order: i32) -> Self {
        self.sort_order = sort_order;
        self
    }

    pub fn with_interval(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }

    pub fn with_grouping(mut self, grouping: GroupingConfig) -> Self {
        self.grouping = Some(grouping);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_tree_toml() {
        let toml = r#"
            id = 7
            name = "old movies"
            sort_order = 2

            [condition]
            kind = "and"

            [[condition.children]]
            kind = "leaf"
            field = "completion_age"
            operator = "gt"
            value = "30d"

            [[condition.children]]
            kind = "leaf"
            field = "category"
            operator = "equals"
            value = "movies"

            [actions.delete]
            mode = "delete_with_files"
        "#;

        let rule: Rule = toml::from_str(toml).unwrap();
        assert_eq!(rule.id, 7);
        assert_eq!(rule.interval_secs, DEFAULT_INTERVAL_SECS);
        assert!(rule.enabled);
        assert_eq!(rule.condition.leaves().len(), 2);
        assert!(rule.condition.references(Field::CompletionAge));
        let delete = rule.actions.delete().unwrap();
        assert_eq!(delete.mode, DeleteMode::DeleteWithFiles);
        assert_eq!(rule.actions.combinable_count(), 0);
    }

    #[test]
    fn test_condition_leaf_json_shape() {
        let node = ConditionNode::leaf(ConditionLeaf::new(Field::Ratio, Operator::GreaterThan, "2"));
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["kind"], "leaf");
        assert_eq!(json["field"], "ratio");
        assert_eq!(json["operator"], "gt");
    }

    #[test]
    fn test_disabled_actions_are_ignored() {
        let actions = ActionSet {
            tags: Some(TagAction {
                enabled: false,
                tags: vec!["x".to_string()],
                mode: TagMode::Add,
            }),
            ..Default::default()
        };
        assert!(actions.tags().is_none());
        assert!(actions.is_empty());
    }

    #[test]
    fn test_tag_mode_semantics() {
        assert!(TagMode::Full.adds() && TagMode::Full.removes());
        assert!(TagMode::Add.adds() && !TagMode::Add.removes());
        assert!(!TagMode::Remove.adds() && TagMode::Remove.removes());
    }

    #[test]
    fn test_action_kind_round_trip_names() {
        for kind in [
            ActionKind::Delete,
            ActionKind::TagsRemoved,
            ActionKind::ExternalProgram,
        ] {
            assert_eq!(ActionKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ActionKind::parse("bogus"), None);
    }

    #[test]
    fn test_field_kinds() {
        assert_eq!(Field::Name.kind(), FieldKind::Text);
        assert_eq!(Field::FreeSpace.kind(), FieldKind::Numeric);
        assert_eq!(Field::Private.kind(), FieldKind::Boolean);
        assert!(Field::HardlinkScope.needs_filesystem());
    }
}
