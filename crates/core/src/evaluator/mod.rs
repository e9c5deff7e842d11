//! Condition evaluation.
//!
//! Rules are compiled once into a [`CompiledCondition`] and evaluated against
//! each torrent of a cycle. Evaluation is pure: it reads the snapshot and the
//! per-cycle [`EvalContext`] and never performs I/O.

mod compile;
mod context;
mod eval;

pub use compile::{
    compile_regex, CompiledCondition, CompiledLeaf, ConditionError, Matcher, StateBucket,
};
pub use context::{CategoryNameIndex, EvalContext, FreeSpaceView};
pub use eval::evaluate;
