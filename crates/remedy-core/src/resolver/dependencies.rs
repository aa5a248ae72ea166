//! Maps a declared technology stack to the packages the sandbox must install.

use crate::sandbox::Language;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Framework names per role, e.g. `backend: [FastAPI, SQLAlchemy]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TechStack {
    roles: BTreeMap<String, Vec<String>>,
}

impl TechStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role<I, S>(mut self, role: &str, frameworks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles
            .entry(role.to_string())
            .or_default()
            .extend(frameworks.into_iter().map(Into::into));
        self
    }

    pub fn frameworks(&self, role: &str) -> &[String] {
        self.roles.get(role).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.roles.values().all(Vec::is_empty)
    }
}

const PYTHON_PACKAGES: &[(&str, &[&str])] = &[
    ("fastapi", &["fastapi", "uvicorn", "pydantic"]),
    ("flask", &["flask"]),
    ("django", &["django"]),
    ("sqlalchemy", &["sqlalchemy"]),
    ("pydantic", &["pydantic"]),
    ("requests", &["requests"]),
    ("httpx", &["httpx"]),
    ("pandas", &["pandas"]),
    ("numpy", &["numpy"]),
    ("streamlit", &["streamlit"]),
    ("celery", &["celery"]),
    ("redis", &["redis"]),
    ("postgresql", &["psycopg2-binary"]),
    ("postgres", &["psycopg2-binary"]),
    ("mongodb", &["pymongo"]),
    ("pytest", &["pytest"]),
    ("jwt", &["pyjwt"]),
];

const NODE_PACKAGES: &[(&str, &[&str])] = &[
    ("express", &["express"]),
    ("koa", &["koa"]),
    ("fastify", &["fastify"]),
    ("mongoose", &["mongoose"]),
    ("mongodb", &["mongodb"]),
    ("postgresql", &["pg"]),
    ("postgres", &["pg"]),
    ("redis", &["redis"]),
    ("axios", &["axios"]),
    ("jest", &["jest"]),
];

pub struct DependencyResolver {
    table: HashMap<String, Vec<String>>,
}

impl DependencyResolver {
    pub fn new(language: Language) -> Self {
        let entries: &[(&str, &[&str])] = match language {
            Language::Python => PYTHON_PACKAGES,
            Language::Node => NODE_PACKAGES,
            Language::Shell => &[],
        };
        let table = entries
            .iter()
            .map(|(framework, packages)| {
                (
                    framework.to_string(),
                    packages.iter().map(|p| p.to_string()).collect(),
                )
            })
            .collect();
        Self { table }
    }

    /// Add or replace the packages for a framework name.
    pub fn with_mapping<I, S>(mut self, framework: &str, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.table.insert(
            framework.to_lowercase(),
            packages.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Packages required by the frameworks declared for `role`. Unknown
    /// framework names contribute nothing.
    pub fn resolve(&self, stack: &TechStack, role: &str) -> BTreeSet<String> {
        let mut packages = BTreeSet::new();
        for framework in stack.frameworks(role) {
            match self.table.get(&framework.trim().to_lowercase()) {
                Some(required) => packages.extend(required.iter().cloned()),
                None => log::debug!("No packages known for framework '{}'", framework),
            }
        }
        packages
    }
}
