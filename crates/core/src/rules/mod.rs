//! Automation rules: definitions, value parsing and validation.

mod compile;
mod types;
mod value;

pub use compile::{CompiledRule, RuleError, RuleSet};
pub use types::*;
pub use value::{parse_numeric, FieldUnit};
