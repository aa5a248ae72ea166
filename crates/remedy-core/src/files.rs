//! The file set under repair: relative path to source text.

use crate::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path};

const SKIPPED_DIRS: &[&str] = &["__pycache__", "node_modules", "target", "venv"];

/// Ordered map of relative path to code. Iteration is lexical path order.
///
/// Paths are fixed at construction: [`FileSet::replace`] rewrites content but
/// refuses paths that are not already present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileSet {
    files: BTreeMap<String, String>,
}

impl FileSet {
    pub fn new<I, P, C>(files: I) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        let mut map = BTreeMap::new();
        for (path, content) in files {
            let path = normalize_path(&path.into())?;
            if map.insert(path.clone(), content.into()).is_some() {
                return Err(EngineError::InvalidFileSet(format!(
                    "duplicate path '{}'",
                    path
                )));
            }
        }
        Ok(Self { files: map })
    }

    /// Load every regular file under `root`, skipping hidden entries and
    /// dependency/cache directories.
    pub fn load_dir<P: AsRef<Path>>(root: P) -> Result<Self, EngineError> {
        let root = root.as_ref();
        let mut collected = Vec::new();
        collect_dir(root, root, &mut collected)?;
        Self::new(collected)
    }

    /// Write every file under `root`, creating parent directories as needed.
    pub fn write_to<P: AsRef<Path>>(&self, root: P) -> Result<(), EngineError> {
        let root = root.as_ref();
        for (path, content) in &self.files {
            let target = root.join(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, content)?;
        }
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn replace(&mut self, path: &str, content: String) -> Result<(), EngineError> {
        match self.files.get_mut(path) {
            Some(slot) => {
                *slot = content;
                Ok(())
            }
            None => Err(EngineError::UnknownFile(path.to_string())),
        }
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Reject absolute paths and parent traversal; normalize separators.
fn normalize_path(raw: &str) -> Result<String, EngineError> {
    let unified = raw.replace('\\', "/");
    let trimmed = unified.trim_start_matches("./");
    if trimmed.is_empty() {
        return Err(EngineError::InvalidFileSet("empty path".to_string()));
    }

    let path = Path::new(trimmed);
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(EngineError::InvalidFileSet(format!(
                    "path '{}' escapes the file set root",
                    raw
                )))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(EngineError::InvalidFileSet(format!(
                    "path '{}' must be relative",
                    raw
                )))
            }
        }
    }

    if parts.is_empty() {
        return Err(EngineError::InvalidFileSet(format!("path '{}' names no file", raw)));
    }
    Ok(parts.join("/"))
}

fn collect_dir(
    root: &Path,
    dir: &Path,
    out: &mut Vec<(String, String)>,
) -> Result<(), EngineError> {
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }

        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if SKIPPED_DIRS.contains(&name.as_str()) {
                continue;
            }
            collect_dir(root, &path, out)?;
        } else if file_type.is_file() {
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    log::debug!("Skipping non-UTF-8 file {}", path.display());
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let relative = path
                .strip_prefix(root)
                .map_err(|e| EngineError::InternalError(e.to_string()))?;
            out.push((relative.to_string_lossy().into_owned(), content));
        }
    }
    Ok(())
}
