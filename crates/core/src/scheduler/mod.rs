//! Rule scheduling for a client instance.
//!
//! Drives rules through their run cycle:
//! - Due: interval elapsed since the last evaluation, or apply-now
//! - Evaluated in sort order against one snapshot of the instance
//! - Applied, no match or failed, recorded per rule
//!
//! A (torrent, rule) pair processed successfully is left alone for the
//! debounce window.

mod cycle;
mod debounce;
mod engine;
mod types;

pub use cycle::{evaluate_rules, CycleEvaluation, CycleInputs};
pub use debounce::DebounceTracker;
pub use engine::{AutomationEngine, EngineSettings};
pub use types::{CycleReport, EngineError, EngineStatus, RuleOutcome, RuleResult, RuleRunStatus};
