//! Execution results: one immutable value per sandboxed run.

use crate::classifier;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const SUMMARY_STDERR_CHARS: usize = 500;
const SUMMARY_MAX_ERRORS: usize = 3;

/// Why a run failed, derived from its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The sandbox backend could not be reached; fatal for the run.
    SandboxUnavailable,
    Timeout,
    /// Non-zero exit without a recognized failure signature.
    NonZeroExit,
    ClassifiedRuntimeError,
    /// The sandbox itself broke while provisioning or collecting output.
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SandboxUnavailable => write!(f, "sandbox unavailable"),
            Self::Timeout => write!(f, "timeout"),
            Self::NonZeroExit => write!(f, "non-zero exit"),
            Self::ClassifiedRuntimeError => write!(f, "runtime error"),
            Self::Internal => write!(f, "internal sandbox failure"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    success: bool,
    exit_code: i32,
    stdout: String,
    stderr: String,
    duration: Duration,
    errors: Vec<String>,
    warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<FailureKind>,
}

impl ExecutionResult {
    /// Build a result from a completed process, classifying its stderr.
    pub fn from_process(exit_code: i32, stdout: String, stderr: String, duration: Duration) -> Self {
        let classification = classifier::classify(&stderr);
        let success = exit_code == 0 && classification.errors.is_empty();
        let failure = if success {
            None
        } else if classification.errors.is_empty() {
            Some(FailureKind::NonZeroExit)
        } else {
            Some(FailureKind::ClassifiedRuntimeError)
        };

        Self {
            success,
            exit_code,
            stdout,
            stderr,
            duration,
            errors: classification.errors,
            warnings: classification.warnings,
            failure,
        }
    }

    pub fn timed_out(timeout: Duration, stdout: String, stderr: String) -> Self {
        Self::synthetic(
            FailureKind::Timeout,
            format!("TimeoutError: execution exceeded {}s and was terminated", timeout.as_secs_f64()),
            stdout,
            stderr,
            timeout,
        )
    }

    pub fn unavailable(reason: &str) -> Self {
        Self::synthetic(
            FailureKind::SandboxUnavailable,
            format!("SandboxUnavailable: {}", reason),
            String::new(),
            String::new(),
            Duration::ZERO,
        )
    }

    pub fn internal_failure(message: &str, duration: Duration) -> Self {
        Self::synthetic(
            FailureKind::Internal,
            format!("SandboxError: {}", message),
            String::new(),
            String::new(),
            duration,
        )
    }

    fn synthetic(
        kind: FailureKind,
        error: String,
        stdout: String,
        stderr: String,
        duration: Duration,
    ) -> Self {
        Self {
            success: false,
            exit_code: -1,
            stdout,
            stderr,
            duration,
            errors: vec![error],
            warnings: Vec::new(),
            failure: Some(kind),
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure
    }

    pub fn has_errors(&self) -> bool {
        !self.success || self.exit_code != 0 || !self.errors.is_empty()
    }

    /// Compact one-line description: exit code, truncated stderr and up to
    /// three classified errors.
    pub fn error_summary(&self) -> String {
        let mut parts = vec![format!("exit code {}", self.exit_code)];

        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            let truncated: String = stderr.chars().take(SUMMARY_STDERR_CHARS).collect();
            if truncated.len() < stderr.len() {
                parts.push(format!("stderr: {}...", truncated));
            } else {
                parts.push(format!("stderr: {}", truncated));
            }
        }

        if !self.errors.is_empty() {
            let shown: Vec<&str> = self
                .errors
                .iter()
                .take(SUMMARY_MAX_ERRORS)
                .map(String::as_str)
                .collect();
            parts.push(format!("errors: {}", shown.join(" | ")));
        }

        parts.join("; ")
    }

    /// Last `max_chars` characters of stderr, the part most likely to hold
    /// the failing frame.
    pub fn stderr_tail(&self, max_chars: usize) -> String {
        let count = self.stderr.chars().count();
        if count <= max_chars {
            return self.stderr.clone();
        }
        self.stderr.chars().skip(count - max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(exit_code: i32, stderr: &str) -> ExecutionResult {
        ExecutionResult::from_process(
            exit_code,
            String::new(),
            stderr.to_string(),
            Duration::from_millis(12),
        )
    }

    #[test]
    fn test_clean_exit_is_success() {
        let result = run(0, "");
        assert!(result.success());
        assert!(!result.has_errors());
        assert_eq!(result.failure_kind(), None);
    }

    #[test]
    fn test_zero_exit_with_classified_error_is_failure() {
        // Some frameworks log a traceback and still exit 0
        let result = run(0, "Traceback (most recent call last):\nValueError: boom");
        assert!(!result.success());
        assert!(result.has_errors());
        assert_eq!(result.failure_kind(), Some(FailureKind::ClassifiedRuntimeError));
    }

    #[test]
    fn test_bare_non_zero_exit_has_no_classified_errors() {
        let result = run(2, "something odd happened");
        assert!(!result.success());
        assert!(result.errors().is_empty());
        assert!(result.has_errors());
        assert_eq!(result.failure_kind(), Some(FailureKind::NonZeroExit));
    }

    #[test]
    fn test_warnings_alone_do_not_fail_a_run() {
        let result = run(0, "UserWarning: pool size is small");
        assert!(result.success());
        assert_eq!(result.warnings().len(), 1);
    }

    #[test]
    fn test_synthetic_results() {
        let timeout = ExecutionResult::timed_out(Duration::from_secs(5), String::new(), String::new());
        assert!(!timeout.success());
        assert_eq!(timeout.exit_code(), -1);
        assert_eq!(timeout.duration(), Duration::from_secs(5));
        assert!(timeout.errors()[0].contains("Timeout"));
        assert_eq!(timeout.failure_kind(), Some(FailureKind::Timeout));

        let unavailable = ExecutionResult::unavailable("docker daemon not reachable");
        assert_eq!(unavailable.errors().len(), 1);
        assert!(unavailable.errors()[0].contains("docker daemon not reachable"));
        assert_eq!(unavailable.failure_kind(), Some(FailureKind::SandboxUnavailable));
    }

    #[test]
    fn test_error_summary_truncates_and_limits_errors() {
        let stderr = format!(
            "{}\nNameError: a\nTypeError: b\nValueError: c\nKeyError: d",
            "x".repeat(600)
        );
        let summary = run(1, &stderr).error_summary();

        assert!(summary.starts_with("exit code 1"));
        assert!(summary.contains("..."));
        assert!(summary.contains("errors: NameError: a | TypeError: b | ValueError: c"));
        assert!(summary.ends_with("ValueError: c"));
    }

    #[test]
    fn test_stderr_tail() {
        let result = run(1, "abcdef");
        assert_eq!(result.stderr_tail(3), "def");
        assert_eq!(result.stderr_tail(10), "abcdef");
    }
}
