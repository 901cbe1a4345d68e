use serde::{Deserialize, Serialize};

/// Kind of branch created by the pipeline.
///
/// `Feature` and `Hotfix` are accepted so that snapshots written by hosts
/// that create those branches restore without loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchKind {
    Epic,
    Story,
    Feature,
    Hotfix,
}

impl BranchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchKind::Epic => "epic",
            BranchKind::Story => "story",
            BranchKind::Feature => "feature",
            BranchKind::Hotfix => "hotfix",
        }
    }
}

impl std::fmt::Display for BranchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A branch the pipeline created in one of the run's repositories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub name: String,
    pub kind: BranchKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_id: Option<String>,
    pub repository: String,
    pub base_branch: String,
    #[serde(default)]
    pub created: bool,
    #[serde(default)]
    pub pushed: bool,
    #[serde(default)]
    pub merged: bool,
}

impl BranchInfo {
    /// Epic branch for `repository`, freshly created from `base_branch`.
    pub fn epic(name: &str, epic_id: &str, repository: &str, base_branch: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: BranchKind::Epic,
            epic_id: Some(epic_id.to_string()),
            story_id: None,
            repository: repository.to_string(),
            base_branch: base_branch.to_string(),
            created: true,
            pushed: false,
            merged: false,
        }
    }

    /// Story branch that will merge back into its epic branch.
    pub fn story(
        name: &str,
        epic_id: &str,
        story_id: &str,
        repository: &str,
        epic_branch: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind: BranchKind::Story,
            epic_id: Some(epic_id.to_string()),
            story_id: Some(story_id.to_string()),
            repository: repository.to_string(),
            base_branch: epic_branch.to_string(),
            created: true,
            pushed: false,
            merged: false,
        }
    }
}
