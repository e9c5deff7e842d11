//! Mock external program runner.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::executor::{ProgramContext, ProgramError, ProgramRunner};
use crate::rules::RuleId;

/// A recorded program start for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedRun {
    pub rule_id: RuleId,
    pub program_id: String,
    pub torrent_hash: String,
}

/// [`ProgramRunner`] that records runs instead of starting processes.
///
/// The trait is synchronous, so state sits behind a std mutex; the async
/// helpers exist to match the other mocks.
#[derive(Debug, Default)]
pub struct MockProgramRunner {
    started: Arc<Mutex<Vec<RecordedRun>>>,
    rejected_hashes: Arc<Mutex<HashSet<String>>>,
}

impl MockProgramRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse runs for this torrent as if the program were not allowed.
    pub async fn reject_hash(&self, hash: &str) {
        lock(&self.rejected_hashes).insert(hash.to_string());
    }

    /// Runs started so far.
    pub async fn started(&self) -> Vec<RecordedRun> {
        lock(&self.started).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl ProgramRunner for MockProgramRunner {
    fn run(&self, context: ProgramContext) -> Result<(), ProgramError> {
        if lock(&self.rejected_hashes).contains(&context.torrent.hash) {
            return Err(ProgramError::NotAllowed(format!(
                "/mock/{}",
                context.program_id
            )));
        }
        lock(&self.started).push(RecordedRun {
            rule_id: context.rule_id,
            program_id: context.program_id,
            torrent_hash: context.torrent.hash,
        });
        Ok(())
    }
}
