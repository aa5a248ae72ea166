//! Aggregate execution state for one engine run.
//!
//! The state is created at the start of a run, threaded explicitly through
//! every orchestrator and repair pass, and handed back to the caller at the
//! end. `fix_attempts` is the only bookkeeping that carries across passes and
//! it only ever grows.

use crate::result::{ExecutionResult, FailureKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Per-file lifecycle within one run.
///
/// ```text
/// Pending → Done | NeedsRepair | Exhausted
/// NeedsRepair → Repaired | Pending | Exhausted
/// Repaired → Pending
/// ```
/// `Done` and `Exhausted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Done,
    NeedsRepair,
    Repaired,
    Exhausted,
}

impl FileStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Exhausted)
    }

    pub fn can_transition_to(self, next: FileStatus) -> bool {
        use FileStatus::*;
        matches!(
            (self, next),
            (Pending, Done)
                | (Pending, NeedsRepair)
                | (Pending, Exhausted)
                | (NeedsRepair, Repaired)
                | (NeedsRepair, Pending)
                | (NeedsRepair, Exhausted)
                | (Repaired, Pending)
        )
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Done => write!(f, "done"),
            Self::NeedsRepair => write!(f, "needs_repair"),
            Self::Repaired => write!(f, "repaired"),
            Self::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// One execution of one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub pass: u32,
    pub path: String,
    /// Repairs applied to the file before this execution.
    pub fix_attempts: u32,
    pub started_at: DateTime<Utc>,
    pub result: ExecutionResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub results: BTreeMap<String, ExecutionResult>,
    pub errors: BTreeMap<String, Vec<String>>,
    pub fix_attempts: BTreeMap<String, u32>,
    pub max_fix_attempts: u32,
    pub statuses: BTreeMap<String, FileStatus>,
    pub history: Vec<AttemptRecord>,
    pub passes: u32,
    pub sandbox_unavailable: bool,
}

impl ExecutionState {
    pub fn new(max_fix_attempts: u32) -> Self {
        Self {
            results: BTreeMap::new(),
            errors: BTreeMap::new(),
            fix_attempts: BTreeMap::new(),
            max_fix_attempts,
            statuses: BTreeMap::new(),
            history: Vec::new(),
            passes: 0,
            sandbox_unavailable: false,
        }
    }

    /// True iff some file is failing and still has repair budget.
    pub fn needs_revision(&self) -> bool {
        self.errors
            .keys()
            .any(|path| self.attempts(path) < self.max_fix_attempts)
    }

    pub fn attempts(&self, path: &str) -> u32 {
        self.fix_attempts.get(path).copied().unwrap_or(0)
    }

    pub fn has_budget(&self, path: &str) -> bool {
        self.attempts(path) < self.max_fix_attempts
    }

    pub fn status(&self, path: &str) -> Option<FileStatus> {
        self.statuses.get(path).copied()
    }

    pub fn is_terminal(&self, path: &str) -> bool {
        self.status(path).map(FileStatus::is_terminal).unwrap_or(false)
    }

    /// Files tracked but not yet in a terminal state.
    pub fn open_files(&self) -> impl Iterator<Item = &str> {
        self.statuses
            .iter()
            .filter(|(_, status)| !status.is_terminal())
            .map(|(path, _)| path.as_str())
    }

    pub fn paths_with_status(&self, status: FileStatus) -> Vec<&str> {
        self.statuses
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(path, _)| path.as_str())
            .collect()
    }

    /// Every executed file ended `Done`.
    pub fn all_succeeded(&self) -> bool {
        !self.results.is_empty() && self.errors.is_empty()
    }

    pub(crate) fn set_status(&mut self, path: &str, next: FileStatus) {
        match self.statuses.get(path).copied() {
            Some(current) if current == next => {}
            Some(current) => {
                if !current.can_transition_to(next) {
                    log::warn!(
                        "Unexpected status transition for '{}': {} -> {}",
                        path,
                        current,
                        next
                    );
                }
                self.statuses.insert(path.to_string(), next);
            }
            None => {
                self.statuses.insert(path.to_string(), next);
            }
        }
    }

    /// Mark a file as about to be executed.
    pub(crate) fn begin_execution(&mut self, path: &str) {
        self.set_status(path, FileStatus::Pending);
    }

    /// Apply one execution result. The single place where `results` and
    /// `errors` change.
    pub(crate) fn record_result(&mut self, path: &str, result: ExecutionResult, started_at: DateTime<Utc>) {
        if result.failure_kind() == Some(FailureKind::SandboxUnavailable) {
            self.sandbox_unavailable = true;
        }

        if result.has_errors() {
            let errors = if result.errors().is_empty() {
                vec![result.error_summary()]
            } else {
                result.errors().to_vec()
            };
            self.errors.insert(path.to_string(), errors);
            let next = if self.has_budget(path) {
                FileStatus::NeedsRepair
            } else {
                log::warn!(
                    "'{}' still failing after {} repair attempts; giving up",
                    path,
                    self.attempts(path)
                );
                FileStatus::Exhausted
            };
            self.set_status(path, next);
        } else {
            if self.errors.remove(path).is_some() {
                log::info!("'{}' now runs cleanly", path);
            }
            self.set_status(path, FileStatus::Done);
        }

        self.history.push(AttemptRecord {
            pass: self.passes,
            path: path.to_string(),
            fix_attempts: self.attempts(path),
            started_at,
            result: result.clone(),
        });
        self.results.insert(path.to_string(), result);
    }

    /// Consume one unit of repair budget. Returns the new count.
    pub(crate) fn record_repair_attempt(&mut self, path: &str, repaired: bool) -> u32 {
        let attempts = self.fix_attempts.entry(path.to_string()).or_insert(0);
        *attempts += 1;
        let attempts = *attempts;
        debug_assert!(attempts <= self.max_fix_attempts);
        if repaired {
            self.set_status(path, FileStatus::Repaired);
        }
        attempts
    }

    pub(crate) fn mark_exhausted(&mut self, path: &str) {
        self.set_status(path, FileStatus::Exhausted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn failing() -> ExecutionResult {
        ExecutionResult::from_process(1, String::new(), "NameError: x".to_string(), Duration::ZERO)
    }

    fn passing() -> ExecutionResult {
        ExecutionResult::from_process(0, String::new(), String::new(), Duration::ZERO)
    }

    #[test]
    fn test_needs_revision_requires_errors_and_budget() {
        let mut state = ExecutionState::new(2);
        assert!(!state.needs_revision());

        state.begin_execution("main.py");
        state.record_result("main.py", failing(), Utc::now());
        assert!(state.needs_revision());

        state.record_repair_attempt("main.py", true);
        state.record_repair_attempt("main.py", true);
        assert_eq!(state.attempts("main.py"), 2);
        assert!(!state.needs_revision());
        assert!(state.errors.contains_key("main.py"));
    }

    #[test]
    fn test_success_clears_stale_errors() {
        let mut state = ExecutionState::new(3);
        state.begin_execution("main.py");
        state.record_result("main.py", failing(), Utc::now());
        state.record_repair_attempt("main.py", true);
        state.begin_execution("main.py");
        state.record_result("main.py", passing(), Utc::now());

        assert!(state.errors.is_empty());
        assert_eq!(state.status("main.py"), Some(FileStatus::Done));
        assert_eq!(state.history.len(), 2);
        assert_eq!(state.attempts("main.py"), 1);
        assert!(state.all_succeeded());
    }

    #[test]
    fn test_failure_without_budget_is_exhausted() {
        let mut state = ExecutionState::new(1);
        state.begin_execution("main.py");
        state.record_result("main.py", failing(), Utc::now());
        state.record_repair_attempt("main.py", true);
        state.begin_execution("main.py");
        state.record_result("main.py", failing(), Utc::now());

        assert_eq!(state.status("main.py"), Some(FileStatus::Exhausted));
        assert!(state.is_terminal("main.py"));
        assert!(!state.needs_revision());
    }

    #[test]
    fn test_bare_exit_failures_carry_a_summary() {
        let mut state = ExecutionState::new(1);
        let result = ExecutionResult::from_process(3, String::new(), String::new(), Duration::ZERO);
        state.begin_execution("main.py");
        state.record_result("main.py", result, Utc::now());

        assert_eq!(state.errors["main.py"], vec!["exit code 3".to_string()]);
    }

    #[test]
    fn test_transition_table() {
        use FileStatus::*;
        assert!(Pending.can_transition_to(Done));
        assert!(NeedsRepair.can_transition_to(Repaired));
        assert!(Repaired.can_transition_to(Pending));
        assert!(!Done.can_transition_to(Pending));
        assert!(!Exhausted.can_transition_to(Repaired));
        assert!(Done.is_terminal() && Exhausted.is_terminal());
    }

    #[test]
    fn test_unavailable_results_flag_the_state() {
        let mut state = ExecutionState::new(1);
        state.begin_execution("main.py");
        state.record_result("main.py", ExecutionResult::unavailable("down"), Utc::now());
        assert!(state.sandbox_unavailable);
    }
}
