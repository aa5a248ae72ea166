// Materializes a job's files into a fresh single-use directory.

use super::SandboxJob;
use crate::errors::SandboxError;
use std::fs;
use tempfile::{Builder, TempDir};

/// Write the job's file set (and manifest, when dependencies are declared)
/// into a new temp dir. The directory is removed when the returned guard drops.
pub fn materialize(job: &SandboxJob<'_>) -> Result<TempDir, SandboxError> {
    let dir = Builder::new().prefix("remedy-exec-").tempdir()?;

    for (path, content) in job.files.iter() {
        let target = dir.path().join(path);
        if !target.starts_with(dir.path()) {
            return Err(SandboxError::WorkspaceError(format!(
                "refusing to write '{}' outside the sandbox workspace",
                path
            )));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, content)?;
    }

    if let (Some(name), Some(manifest)) = (
        job.language.manifest_name(),
        job.language.render_manifest(job.dependencies),
    ) {
        // A manifest shipped with the file set wins over the generated one
        if !job.files.contains(name) {
            fs::write(dir.path().join(name), manifest)?;
        }
    }

    Ok(dir)
}

/// Remove a workspace, logging what could not be deleted instead of
/// silently leaking it.
pub fn release(dir: TempDir) {
    let path = dir.path().to_path_buf();
    if let Err(e) = dir.close() {
        log::warn!("Failed to remove sandbox workspace {}: {}", path.display(), e);
    }
}

/// Whether the workspace carries a manifest the install step should process.
pub fn has_manifest(job: &SandboxJob<'_>) -> bool {
    match job.language.manifest_name() {
        Some(name) => !job.dependencies.is_empty() || job.files.contains(name),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::FileSet;
    use crate::sandbox::Language;
    use std::collections::BTreeMap;

    #[test]
    fn test_materialize_writes_files_and_manifest() {
        let files = FileSet::new([("main.py", "import fastapi"), ("pkg/util.py", "X = 1")]).unwrap();
        let deps = vec!["fastapi".to_string()];
        let env = BTreeMap::new();
        let job = SandboxJob {
            entry_point: "main.py",
            files: &files,
            dependencies: &deps,
            env: &env,
            language: Language::Python,
        };

        let dir = materialize(&job).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("pkg/util.py")).unwrap(), "X = 1");
        assert_eq!(
            fs::read_to_string(dir.path().join("requirements.txt")).unwrap(),
            "fastapi\n"
        );
        assert!(has_manifest(&job));
    }

    #[test]
    fn test_shipped_manifest_is_kept() {
        let files = FileSet::new([("main.py", ""), ("requirements.txt", "flask==3.0\n")]).unwrap();
        let deps = vec!["fastapi".to_string()];
        let env = BTreeMap::new();
        let job = SandboxJob {
            entry_point: "main.py",
            files: &files,
            dependencies: &deps,
            env: &env,
            language: Language::Python,
        };

        let dir = materialize(&job).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("requirements.txt")).unwrap(),
            "flask==3.0\n"
        );
    }

    #[test]
    fn test_released_workspace_is_removed() {
        let files = FileSet::new([("main.sh", "echo hi")]).unwrap();
        let env = BTreeMap::new();
        let job = SandboxJob {
            entry_point: "main.sh",
            files: &files,
            dependencies: &[],
            env: &env,
            language: Language::Shell,
        };

        let dir = materialize(&job).unwrap();
        let path = dir.path().to_path_buf();
        fs::create_dir_all(path.join(".deps/pkg")).unwrap();
        fs::write(path.join(".deps/pkg/__init__.py"), "").unwrap();
        release(dir);
        assert!(!path.exists());
    }
}
