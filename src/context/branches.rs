//! Branch lineage tracked across a pipeline run.

use conductor_common::{BranchInfo, BranchKind};

use crate::errors::PipelineError;

/// Every branch the pipeline created, in creation order.
///
/// Keyed by branch name: registering an existing name replaces the entry in
/// place. A repository holds at most one epic branch.
#[derive(Debug, Clone, Default)]
pub struct BranchRegistry {
    branches: Vec<BranchInfo>,
}

impl BranchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a persisted snapshot. Later duplicates of a name win.
    pub fn restore(snapshot: &[BranchInfo]) -> Self {
        let mut registry = Self::new();
        for info in snapshot {
            registry.upsert(info.clone());
        }
        registry
    }

    pub fn snapshot(&self) -> Vec<BranchInfo> {
        self.branches.clone()
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BranchInfo> {
        self.branches.iter()
    }

    pub fn register(&mut self, info: BranchInfo) -> Result<(), PipelineError> {
        if info.kind == BranchKind::Epic
            && let Some(existing) = self.get_epic_branch(&info.repository)
            && existing.name != info.name
        {
            return Err(PipelineError::DuplicateEpicBranch {
                repository: info.repository.clone(),
                existing: existing.name.clone(),
            });
        }
        self.upsert(info);
        Ok(())
    }

    fn upsert(&mut self, info: BranchInfo) {
        match self.branches.iter_mut().find(|b| b.name == info.name) {
            Some(slot) => *slot = info,
            None => self.branches.push(info),
        }
    }

    pub fn get(&self, name: &str) -> Option<&BranchInfo> {
        self.branches.iter().find(|b| b.name == name)
    }

    pub fn get_epic_branch(&self, repository: &str) -> Option<&BranchInfo> {
        self.branches
            .iter()
            .find(|b| b.kind == BranchKind::Epic && b.repository == repository)
    }

    pub fn get_story_branches(&self, epic_id: &str, repository: Option<&str>) -> Vec<&BranchInfo> {
        self.branches
            .iter()
            .filter(|b| b.kind == BranchKind::Story)
            .filter(|b| b.epic_id.as_deref() == Some(epic_id))
            .filter(|b| repository.is_none_or(|repo| b.repository == repo))
            .collect()
    }

    /// No-op for unknown branches.
    pub fn mark_pushed(&mut self, name: &str) {
        if let Some(branch) = self.branches.iter_mut().find(|b| b.name == name) {
            branch.pushed = true;
        }
    }

    /// No-op for unknown branches.
    pub fn mark_merged(&mut self, name: &str) {
        if let Some(branch) = self.branches.iter_mut().find(|b| b.name == name) {
            branch.merged = true;
        }
    }
}
