//! Per-language runtime profiles: interpreter, image, manifest and install step.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Directory (relative to the workspace) that python dependencies install into.
pub const PYTHON_DEPS_DIR: &str = ".deps";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Python,
    Node,
    Shell,
}

impl Language {
    pub fn extension(&self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::Node => "js",
            Language::Shell => "sh",
        }
    }

    pub fn interpreter(&self) -> &'static str {
        match self {
            Language::Python => "python3",
            Language::Node => "node",
            Language::Shell => "sh",
        }
    }

    pub fn docker_image(&self) -> &'static str {
        match self {
            Language::Python => "python:3.11-slim",
            Language::Node => "node:20-slim",
            Language::Shell => "alpine:3.20",
        }
    }

    /// File names conventionally used for a program's entry point.
    pub fn conventional_entry_names(&self) -> &'static [&'static str] {
        match self {
            Language::Python => &["main.py", "app.py", "run.py", "server.py", "__main__.py"],
            Language::Node => &["index.js", "main.js", "app.js", "server.js"],
            Language::Shell => &["main.sh", "run.sh"],
        }
    }

    pub fn manifest_name(&self) -> Option<&'static str> {
        match self {
            Language::Python => Some("requirements.txt"),
            Language::Node => Some("package.json"),
            Language::Shell => None,
        }
    }

    /// Render the dependency manifest, or `None` when there is nothing to install.
    pub fn render_manifest(&self, dependencies: &[String]) -> Option<String> {
        if dependencies.is_empty() {
            return None;
        }
        match self {
            Language::Python => {
                let mut manifest = dependencies.join("\n");
                manifest.push('\n');
                Some(manifest)
            }
            Language::Node => {
                let deps: serde_json::Map<String, serde_json::Value> = dependencies
                    .iter()
                    .map(|name| (name.clone(), serde_json::Value::String("*".to_string())))
                    .collect();
                let manifest = serde_json::json!({
                    "name": "remedy-sandbox",
                    "private": true,
                    "dependencies": deps,
                });
                serde_json::to_string_pretty(&manifest).ok()
            }
            Language::Shell => None,
        }
    }

    /// Command that installs the rendered manifest inside the workspace.
    pub fn install_command(&self) -> Option<Vec<String>> {
        let args: &[&str] = match self {
            Language::Python => &[
                "python3",
                "-m",
                "pip",
                "install",
                "--quiet",
                "--disable-pip-version-check",
                "--no-cache-dir",
                "--target",
                PYTHON_DEPS_DIR,
                "-r",
                "requirements.txt",
            ],
            Language::Node => &["npm", "install", "--silent", "--no-audit", "--no-fund"],
            Language::Shell => return None,
        };
        Some(args.iter().map(|arg| arg.to_string()).collect())
    }

    /// Environment needed by the run step, given the workspace path as seen
    /// by the process.
    pub fn runtime_env(&self, workspace: &str) -> Vec<(String, String)> {
        match self {
            Language::Python => vec![
                ("PYTHONPATH".to_string(), format!("{}/{}", workspace, PYTHON_DEPS_DIR)),
                ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
                ("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string()),
            ],
            Language::Node => vec![(
                "NODE_PATH".to_string(),
                format!("{}/node_modules", workspace),
            )],
            Language::Shell => Vec::new(),
        }
    }

    pub fn run_command(&self, entry_point: &str) -> Vec<String> {
        vec![self.interpreter().to_string(), entry_point.to_string()]
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Python => write!(f, "python"),
            Language::Node => write!(f, "node"),
            Language::Shell => write!(f, "shell"),
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(Language::Python),
            "node" | "nodejs" | "javascript" | "js" => Ok(Language::Node),
            "shell" | "sh" => Ok(Language::Shell),
            other => Err(format!("Unsupported language: {}", other)),
        }
    }
}
