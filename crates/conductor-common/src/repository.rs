use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::ParseEnumError;

/// Role a repository plays in the product being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryKind {
    Frontend,
    Backend,
    Mobile,
    Fullstack,
    Library,
    Other,
}

impl RepositoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepositoryKind::Frontend => "frontend",
            RepositoryKind::Backend => "backend",
            RepositoryKind::Mobile => "mobile",
            RepositoryKind::Fullstack => "fullstack",
            RepositoryKind::Library => "library",
            RepositoryKind::Other => "other",
        }
    }
}

impl std::fmt::Display for RepositoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RepositoryKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "frontend" => Ok(RepositoryKind::Frontend),
            "backend" => Ok(RepositoryKind::Backend),
            "mobile" => Ok(RepositoryKind::Mobile),
            "fullstack" => Ok(RepositoryKind::Fullstack),
            "library" => Ok(RepositoryKind::Library),
            "other" => Ok(RepositoryKind::Other),
            _ => Err(ParseEnumError {
                kind: "repository kind",
                value: s.to_string(),
                expected: "frontend, backend, mobile, fullstack, library, other",
            }),
        }
    }
}

/// A repository cloned into the run's workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub name: String,
    pub kind: RepositoryKind,
    /// Location relative to the run's workspace root.
    pub path: PathBuf,
}

impl RepositoryInfo {
    pub fn new(name: &str, kind: RepositoryKind, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            path: path.into(),
        }
    }
}
