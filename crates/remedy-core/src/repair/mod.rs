//! Self-healing repair pass.
//!
//! For every failing file with budget left, the injected
//! [`RepairCapability`] is asked for a corrected version. Any answer, good or
//! bad, consumes one attempt; the budget is checked before the capability is
//! called so the cap is never exceeded. A file leaves the error map only when
//! a later execution pass observes it succeeding.

use crate::errors::RepairError;
use crate::files::FileSet;
use crate::state::ExecutionState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub mod command;

pub use command::CommandRepair;

pub const DEFAULT_STDERR_EXCERPT_CHARS: usize = 2000;

/// Everything the repair capability gets to see about a failing file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairRequest {
    pub path: String,
    pub code: String,
    pub errors: Vec<String>,
    pub stderr_excerpt: String,
}

#[async_trait]
pub trait RepairCapability: Send + Sync {
    /// Produce a corrected version of `request.code`. Blank output is treated
    /// the same as an error.
    async fn repair(&self, request: &RepairRequest) -> Result<String, RepairError>;
}

/// Outcome of one repair pass, in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairPassReport {
    pub repaired: Vec<String>,
    pub failed: Vec<String>,
    pub exhausted: Vec<String>,
    pub cancelled: bool,
}

impl RepairPassReport {
    pub fn attempted(&self) -> usize {
        self.repaired.len() + self.failed.len()
    }
}

pub struct SelfHealingLoop {
    stderr_excerpt_chars: usize,
    cancel: CancellationToken,
}

impl SelfHealingLoop {
    pub fn new() -> Self {
        Self {
            stderr_excerpt_chars: DEFAULT_STDERR_EXCERPT_CHARS,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_stderr_excerpt_chars(mut self, chars: usize) -> Self {
        self.stderr_excerpt_chars = chars;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run one repair pass over every file in `state.errors`, in path order.
    pub async fn repair(
        &self,
        files: &mut FileSet,
        state: &mut ExecutionState,
        capability: &dyn RepairCapability,
    ) -> RepairPassReport {
        let mut report = RepairPassReport::default();
        let failing: Vec<(String, Vec<String>)> = state
            .errors
            .iter()
            .map(|(path, errors)| (path.clone(), errors.clone()))
            .collect();

        for (path, errors) in failing {
            if self.cancel.is_cancelled() {
                log::info!("Repair pass cancelled before '{}'", path);
                report.cancelled = true;
                break;
            }

            if !state.has_budget(&path) {
                log::debug!(
                    "Skipping '{}': {} of {} repair attempts used",
                    path,
                    state.attempts(&path),
                    state.max_fix_attempts
                );
                state.mark_exhausted(&path);
                report.exhausted.push(path);
                continue;
            }

            let Some(code) = files.get(&path).map(str::to_string) else {
                // results only ever name files from the set
                log::error!("Failing file '{}' is missing from the file set", path);
                continue;
            };

            let stderr_excerpt = state
                .results
                .get(&path)
                .map(|result| result.stderr_tail(self.stderr_excerpt_chars))
                .unwrap_or_default();
            let request = RepairRequest {
                path: path.clone(),
                code,
                errors,
                stderr_excerpt,
            };

            let corrected = match capability.repair(&request).await {
                Ok(raw) => {
                    let stripped = strip_code_fences(&raw);
                    if stripped.trim().is_empty() {
                        Err(RepairError::EmptyResponse)
                    } else {
                        Ok(stripped)
                    }
                }
                Err(e) => Err(e),
            };

            match corrected {
                Ok(code) => match files.replace(&path, code) {
                    Ok(()) => {
                        let attempts = state.record_repair_attempt(&path, true);
                        log::info!(
                            "Applied repair to '{}' (attempt {}/{})",
                            path,
                            attempts,
                            state.max_fix_attempts
                        );
                        report.repaired.push(path);
                    }
                    Err(e) => {
                        log::error!("Could not apply repair to '{}': {}", path, e);
                        state.record_repair_attempt(&path, false);
                        report.failed.push(path);
                    }
                },
                Err(e) => {
                    let attempts = state.record_repair_attempt(&path, false);
                    log::warn!(
                        "Repair of '{}' failed (attempt {}/{}): {}",
                        path,
                        attempts,
                        state.max_fix_attempts,
                        e
                    );
                    report.failed.push(path);
                }
            }
        }

        report
    }
}

impl Default for SelfHealingLoop {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the code from a repair reply. When the reply contains a markdown
/// code fence, only the body of the first fenced block is kept, so prose
/// before or after it is dropped. Replies without a fence are taken as code.
pub fn strip_code_fences(raw: &str) -> String {
    let mut lines = raw.lines();
    if !lines.by_ref().any(|line| line.trim_start().starts_with("```")) {
        return ensure_trailing_newline(raw.trim_matches('\n'));
    }

    // an unterminated block runs to the end of the reply
    let body: Vec<&str> = lines.take_while(|line| line.trim() != "```").collect();
    ensure_trailing_newline(&body.join("\n"))
}

fn ensure_trailing_newline(code: &str) -> String {
    if code.is_empty() || code.ends_with('\n') {
        code.to_string()
    } else {
        format!("{}\n", code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ExecutionResult;
    use crate::state::FileStatus;
    use crate::test_utils::fake_repair::{RepairReply, ScriptedRepair};
    use chrono::Utc;
    use std::time::Duration;

    fn failing_state(paths: &[&str], max: u32) -> ExecutionState {
        let mut state = ExecutionState::new(max);
        for path in paths {
            state.begin_execution(path);
            state.record_result(
                path,
                ExecutionResult::from_process(
                    1,
                    String::new(),
                    format!("Traceback (most recent call last):\nNameError: in {}", path),
                    Duration::ZERO,
                ),
                Utc::now(),
            );
        }
        state
    }

    #[tokio::test]
    async fn test_successful_repair_replaces_code_and_counts_attempt() {
        let mut files = FileSet::new([("main.py", "print(x)\n")]).unwrap();
        let mut state = failing_state(&["main.py"], 3);
        let repair = ScriptedRepair::new();
        repair.push("main.py", RepairReply::Code("```python\nx = 1\nprint(x)\n```".to_string()));

        let report = SelfHealingLoop::new().repair(&mut files, &mut state, &repair).await;

        assert_eq!(report.repaired, vec!["main.py"]);
        assert_eq!(files.get("main.py"), Some("x = 1\nprint(x)\n"));
        assert_eq!(state.attempts("main.py"), 1);
        assert_eq!(state.status("main.py"), Some(FileStatus::Repaired));
        // still failing until re-executed
        assert!(state.errors.contains_key("main.py"));
    }

    #[tokio::test]
    async fn test_request_carries_errors_and_stderr_tail() {
        let mut files = FileSet::new([("main.py", "print(x)\n")]).unwrap();
        let mut state = failing_state(&["main.py"], 3);
        let repair = ScriptedRepair::new();

        SelfHealingLoop::new()
            .with_stderr_excerpt_chars(10)
            .repair(&mut files, &mut state, &repair)
            .await;

        let requests = repair.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].code, "print(x)\n");
        assert_eq!(requests[0].errors.len(), 2);
        assert_eq!(requests[0].stderr_excerpt, "in main.py");
    }

    #[tokio::test]
    async fn test_failed_repair_still_consumes_budget() {
        let mut files = FileSet::new([("main.py", "broken\n")]).unwrap();
        let mut state = failing_state(&["main.py"], 2);
        let repair = ScriptedRepair::new();
        repair.push("main.py", RepairReply::Code("   \n".to_string()));
        repair.push("main.py", RepairReply::Error("model overloaded".to_string()));

        let healing = SelfHealingLoop::new();
        let first = healing.repair(&mut files, &mut state, &repair).await;
        let second = healing.repair(&mut files, &mut state, &repair).await;
        let third = healing.repair(&mut files, &mut state, &repair).await;

        assert_eq!(first.failed, vec!["main.py"]);
        assert_eq!(second.failed, vec!["main.py"]);
        assert_eq!(third.exhausted, vec!["main.py"]);
        assert_eq!(third.attempted(), 0);
        assert_eq!(repair.requests().len(), 2);
        assert_eq!(state.attempts("main.py"), 2);
        assert_eq!(files.get("main.py"), Some("broken\n"));
    }

    #[tokio::test]
    async fn test_cap_is_checked_before_calling_capability() {
        let mut files = FileSet::new([("main.py", "x\n")]).unwrap();
        let mut state = failing_state(&["main.py"], 1);
        state.fix_attempts.insert("main.py".to_string(), 1);
        let repair = ScriptedRepair::new();

        let report = SelfHealingLoop::new().repair(&mut files, &mut state, &repair).await;

        assert!(repair.requests().is_empty());
        assert_eq!(report.exhausted, vec!["main.py"]);
        assert_eq!(state.attempts("main.py"), 1);
        assert_eq!(state.status("main.py"), Some(FileStatus::Exhausted));
    }

    #[tokio::test]
    async fn test_files_are_repaired_in_path_order() {
        let mut files = FileSet::new([("zeta.py", "z"), ("alpha.py", "a"), ("mid/app.py", "m")]).unwrap();
        let mut state = failing_state(&["zeta.py", "mid/app.py", "alpha.py"], 3);
        let repair = ScriptedRepair::new();

        SelfHealingLoop::new().repair(&mut files, &mut state, &repair).await;

        let order: Vec<String> = repair.requests().into_iter().map(|r| r.path).collect();
        assert_eq!(order, vec!["alpha.py", "mid/app.py", "zeta.py"]);
    }

    #[tokio::test]
    async fn test_cancellation_stops_between_files() {
        let mut files = FileSet::new([("a.py", "a"), ("b.py", "b")]).unwrap();
        let mut state = failing_state(&["a.py", "b.py"], 3);
        let token = CancellationToken::new();
        token.cancel();
        let repair = ScriptedRepair::new();

        let report = SelfHealingLoop::new()
            .with_cancellation(token)
            .repair(&mut files, &mut state, &repair)
            .await;

        assert!(report.cancelled);
        assert!(repair.requests().is_empty());
        assert_eq!(state.attempts("a.py"), 0);
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```python\nprint(1)\n```\n"), "print(1)\n");
        assert_eq!(strip_code_fences("```\nprint(1)\n```"), "print(1)\n");
        assert_eq!(strip_code_fences("print(1)"), "print(1)\n");
        assert_eq!(strip_code_fences("```js\nconsole.log(1)"), "console.log(1)\n");
        assert_eq!(strip_code_fences("```\n```"), "");
    }

    #[test]
    fn test_prose_around_the_fence_is_dropped() {
        assert_eq!(
            strip_code_fences("```python\nprint(1)\n```\n\nThis fixes the NameError."),
            "print(1)\n"
        );
        assert_eq!(
            strip_code_fences("Here is the fix:\n```python\nprint(1)\n```"),
            "print(1)\n"
        );
        assert_eq!(
            strip_code_fences("Sure.\n\n```py\nx = 1\n\nprint(x)\n```\nFirst block wins:\n```\nother\n```\n"),
            "x = 1\n\nprint(x)\n"
        );
    }
}
