//! Failure and warning signature matching over captured stderr.
//!
//! Classification is line based: each line is tested against the error
//! signatures first and the warning signatures second, so a line lands in at
//! most one list. Lines headed by a warning category (`DeprecationWarning:`,
//! `file.py:3: UserWarning:`, `(node:42) Warning:`) are warnings even when
//! they mention an error name. Unmatched lines are dropped. Output order
//! follows input order.

use once_cell::sync::Lazy;
use regex::Regex;

static ERROR_SIGNATURES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // unresolved imports
        r"ModuleNotFoundError",
        r"ImportError",
        r"No module named",
        r"Cannot find module",
        // syntax
        r"SyntaxError",
        r"IndentationError",
        r"TabError",
        // name / type / value class runtime errors
        r"NameError",
        r"TypeError",
        r"ValueError",
        r"AttributeError",
        r"KeyError",
        r"IndexError",
        r"ZeroDivisionError",
        r"ReferenceError",
        r"RuntimeError",
        // unhandled exception markers
        r"Traceback \(most recent call last\)",
        r"\bUncaught\b",
        r"\bUnhandled (?:exception|promise rejection)",
        r"^\s*[A-Za-z_][\w.]*(?:Error|Exception):",
        // installer failures
        r"^ERROR:",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("error signature must compile"))
    .collect()
});

static WARNING_SIGNATURES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"[A-Za-z]+Warning\b",
        r"\bWARNING\b",
        r"\bWarning:",
        r"\bwarn:",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("warning signature must compile"))
    .collect()
});

static WARNING_HEAD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:[^\s:]+:\d+:\s*|\(node:\d+\)\s+(?:\[\w+\]\s+)?)?[A-Za-z_][\w.]*Warning:")
        .expect("warning head must compile")
});

/// Classified stderr lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Scan `stderr` line by line and split out error and warning lines.
pub fn classify(stderr: &str) -> Classification {
    let mut classification = Classification::default();

    for line in stderr.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            continue;
        }

        if WARNING_HEAD.is_match(line) {
            classification.warnings.push(line.to_string());
        } else if is_error_line(line) {
            classification.errors.push(line.to_string());
        } else if is_warning_line(line) {
            classification.warnings.push(line.to_string());
        }
    }

    classification
}

pub fn is_error_line(line: &str) -> bool {
    ERROR_SIGNATURES.iter().any(|re| re.is_match(line))
}

pub fn is_warning_line(line: &str) -> bool {
    WARNING_SIGNATURES.iter().any(|re| re.is_match(line))
}
