//! Entry-point resolution.
//!
//! A file is an entry point when any configured predicate accepts it. The
//! default predicates are the conventional-name check and the structural
//! guard check; [`SubstringGuard`] reproduces the looser "mentions
//! `__main__` anywhere" heuristic for callers that want it.

use crate::files::FileSet;
use crate::sandbox::Language;
use once_cell::sync::Lazy;
use regex::Regex;

// Guard must open a line at column zero, so commented-out or string-embedded
// mentions never match.
static PYTHON_MAIN_GUARD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^if\s+__name__\s*==\s*(?:"__main__"|'__main__')\s*:"#)
        .expect("python guard pattern must compile")
});

static NODE_MAIN_GUARD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*if\s*\(\s*require\.main\s*===?\s*module\s*\)")
        .expect("node guard pattern must compile")
});

pub trait EntryPointPredicate: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_entry_point(&self, path: &str, content: &str, language: Language) -> bool;
}

/// Matches conventional "main" file names at any directory depth.
pub struct ConventionalName;

impl EntryPointPredicate for ConventionalName {
    fn name(&self) -> &'static str {
        "conventional-name"
    }

    fn is_entry_point(&self, path: &str, _content: &str, language: Language) -> bool {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        language.conventional_entry_names().contains(&file_name)
    }
}

/// Detects a direct-invocation guard starting a line of code.
pub struct MainGuard;

impl EntryPointPredicate for MainGuard {
    fn name(&self) -> &'static str {
        "main-guard"
    }

    fn is_entry_point(&self, path: &str, content: &str, language: Language) -> bool {
        if !has_extension(path, language) {
            return false;
        }
        match language {
            Language::Python => PYTHON_MAIN_GUARD.is_match(content),
            Language::Node => NODE_MAIN_GUARD.is_match(content),
            Language::Shell => false,
        }
    }
}

/// Any mention of the guard token counts, comments and strings included.
pub struct SubstringGuard;

impl EntryPointPredicate for SubstringGuard {
    fn name(&self) -> &'static str {
        "substring-guard"
    }

    fn is_entry_point(&self, path: &str, content: &str, language: Language) -> bool {
        if !has_extension(path, language) {
            return false;
        }
        match language {
            Language::Python => content.contains("__main__"),
            Language::Node => content.contains("require.main"),
            Language::Shell => false,
        }
    }
}

pub struct EntryPointResolver {
    language: Language,
    predicates: Vec<Box<dyn EntryPointPredicate>>,
}

impl EntryPointResolver {
    pub fn new(language: Language) -> Self {
        Self {
            language,
            predicates: vec![Box::new(ConventionalName), Box::new(MainGuard)],
        }
    }

    pub fn with_predicates(language: Language, predicates: Vec<Box<dyn EntryPointPredicate>>) -> Self {
        Self { language, predicates }
    }

    pub fn add_predicate(mut self, predicate: Box<dyn EntryPointPredicate>) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Entry points in lexical path order. Empty only for an empty file set.
    pub fn resolve(&self, files: &FileSet) -> Vec<String> {
        let matched: Vec<String> = files
            .iter()
            .filter(|(path, content)| {
                self.predicates.iter().any(|predicate| {
                    let hit = predicate.is_entry_point(path, content, self.language);
                    if hit {
                        log::debug!("'{}' is an entry point ({})", path, predicate.name());
                    }
                    hit
                })
            })
            .map(|(path, _)| path.to_string())
            .collect();

        if !matched.is_empty() {
            return matched;
        }

        self.fallback(files).into_iter().collect()
    }

    fn fallback(&self, files: &FileSet) -> Option<String> {
        let root_source = files
            .paths()
            .find(|path| !path.contains('/') && has_extension(path, self.language));
        let any_source = || files.paths().find(|path| has_extension(path, self.language));
        let any_file = || files.paths().next();

        let chosen = root_source.or_else(any_source).or_else(any_file)?;
        log::debug!("No entry point matched; falling back to '{}'", chosen);
        Some(chosen.to_string())
    }
}

fn has_extension(path: &str, language: Language) -> bool {
    path.rsplit_once('.')
        .map(|(_, ext)| ext.eq_ignore_ascii_case(language.extension()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn python() -> EntryPointResolver {
        EntryPointResolver::new(Language::Python)
    }

    #[test]
    fn test_conventional_names_at_any_depth() {
        let files = FileSet::new([
            ("backend/app.py", "x = 1"),
            ("backend/models.py", "y = 2"),
            ("main.py", "import backend"),
        ])
        .unwrap();

        assert_eq!(python().resolve(&files), vec!["backend/app.py", "main.py"]);
    }

    #[test]
    fn test_main_guard_detection() {
        let files = FileSet::new([
            ("cli.py", "def go():\n    pass\n\nif __name__ == '__main__':\n    go()\n"),
            ("helpers.py", "def helper():\n    return 1\n"),
        ])
        .unwrap();

        assert_eq!(python().resolve(&files), vec!["cli.py"]);
    }

    #[test]
    fn test_commented_guard_is_not_an_entry_point() {
        let files = FileSet::new([
            ("a_lib.py", "# usage: if __name__ == \"__main__\": run()\nVALUE = 1\n"),
            ("tool.py", "if __name__ == \"__main__\":\n    print('hi')\n"),
        ])
        .unwrap();

        assert_eq!(python().resolve(&files), vec!["tool.py"]);
    }

    #[test]
    fn test_substring_predicate_is_opt_in() {
        let files = FileSet::new([
            ("a_lib.py", "# mentions __main__ in a comment\n"),
            ("b_lib.py", "X = 1\n"),
        ])
        .unwrap();

        let strict = python().resolve(&files);
        // falls back to the first root source file either way
        assert_eq!(strict, vec!["a_lib.py"]);

        let loose = EntryPointResolver::with_predicates(Language::Python, vec![Box::new(SubstringGuard)]);
        let files = FileSet::new([("a_lib.txt", ""), ("z_lib.py", "# __main__\n")]).unwrap();
        assert_eq!(loose.resolve(&files), vec!["z_lib.py"]);
        assert_eq!(python().resolve(&files), vec!["z_lib.py"]);
    }

    #[test]
    fn test_fallback_prefers_root_level_source() {
        let files = FileSet::new([
            ("README.md", "docs"),
            ("pkg/a.py", "A = 1"),
            ("zeta.py", "Z = 1"),
            ("beta.py", "B = 1"),
        ])
        .unwrap();

        assert_eq!(python().resolve(&files), vec!["beta.py"]);
    }

    #[test]
    fn test_resolution_is_total() {
        let nested = FileSet::new([("pkg/b.py", ""), ("pkg/a.py", "")]).unwrap();
        assert_eq!(python().resolve(&nested), vec!["pkg/a.py"]);

        let no_source = FileSet::new([("notes.txt", ""), ("data.csv", "")]).unwrap();
        assert_eq!(python().resolve(&no_source), vec!["data.csv"]);

        assert!(python().resolve(&FileSet::default()).is_empty());
    }

    #[test]
    fn test_node_guard() {
        let resolver = EntryPointResolver::new(Language::Node);
        let files = FileSet::new([
            ("lib.js", "module.exports = {};"),
            ("worker.js", "function run() {}\nif (require.main === module) {\n  run();\n}\n"),
        ])
        .unwrap();

        assert_eq!(resolver.resolve(&files), vec!["worker.js"]);
    }
}
