use thiserror::Error;

use crate::core::result::TestResult;

/// Conditions that stop a tester from running at all.
///
/// Ordinary probe failures never end up here; they are dropped by the
/// dispatcher.
#[derive(Debug, Error)]
pub enum TesterError {
    #[error("invalid target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("invalid header '{0}'")]
    InvalidHeader(String),
}

/// Returned by `TesterRegistry::run_all` when a tester fails.
///
/// `completed` holds the results of every tester that finished before the
/// failing one; testers after it were never invoked.
#[derive(Debug, Error)]
#[error("tester '{tester}' failed after {} completed: {source}", .completed.len())]
pub struct RunAllError {
    pub completed: Vec<TestResult>,
    pub tester: String,
    #[source]
    pub source: TesterError,
}
