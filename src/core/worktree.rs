//! Worktree management for isolated task execution.
//!
//! Worktrees provide isolated git working directories for parallel task
//! execution without branch conflicts. Each is a fresh checkout of the
//! run's base branch on a private `dagrun/agent-*` branch.

use crate::cli::output;
use crate::core::prd::slugify;
use crate::git;
use std::path::{Path, PathBuf};

/// Branch namespace for agent worktrees.
pub const BRANCH_PREFIX: &str = "dagrun";

/// A worktree leased to one supervisor for one task attempt.
#[derive(Debug, Clone)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub branch: String,
    pub agent_num: u32,
    pub task_id: String,
}

/// Errors that can occur during worktree operations.
#[derive(Debug, thiserror::Error)]
pub enum WorktreeError {
    #[error("failed to create branch {branch} from {base}: {detail}")]
    BranchCreate {
        branch: String,
        base: String,
        detail: String,
    },
    #[error("failed to create worktree at {0}")]
    Add(PathBuf),
    #[error("invalid repository: {0}")]
    InvalidRepo(PathBuf),
}

/// Result type for worktree operations.
pub type Result<T> = std::result::Result<T, WorktreeError>;

/// Manager for agent worktrees.
pub struct WorktreeManager {
    /// Repository root (the integration checkout).
    repo_root: PathBuf,
    /// Directory under which worktrees are materialized.
    base_dir: PathBuf,
}

impl WorktreeManager {
    /// Creates a manager rooted at a git repository.
    pub fn new(repo_root: impl Into<PathBuf>, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let repo_root = repo_root.into();
        if !git::is_repo(&repo_root) {
            return Err(WorktreeError::InvalidRepo(repo_root));
        }
        Ok(Self {
            repo_root,
            base_dir: base_dir.into(),
        })
    }

    /// Branch name for an agent/task pair: `dagrun/agent-<N>-<slug(title)>`.
    #[must_use]
    pub fn branch_name(agent_num: u32, task_title: &str) -> String {
        format!("{BRANCH_PREFIX}/agent-{agent_num}-{}", slugify(task_title))
    }

    /// Creates a fresh worktree for a task, checked out on a new branch
    /// from `base_branch`.
    ///
    /// Any prior worktree or branch with the same name is force-removed
    /// first, so resumed runs tolerate crashed predecessors.
    pub fn create(
        &self,
        task_id: &str,
        task_title: &str,
        agent_num: u32,
        base_branch: &str,
    ) -> Result<WorktreeInfo> {
        let branch = Self::branch_name(agent_num, task_title);
        let path = self.base_dir.join(format!("agent-{agent_num}"));

        git::worktree_prune(&self.repo_root);
        git::delete_branch(&branch, true, &self.repo_root);

        if path.exists() {
            let _ = std::fs::remove_dir_all(&path);
        }

        git::branch_from(&branch, base_branch, &self.repo_root).map_err(|e| {
            WorktreeError::BranchCreate {
                branch: branch.clone(),
                base: base_branch.to_string(),
                detail: e.to_string(),
            }
        })?;

        if !git::worktree_add(&path, &branch, &self.repo_root) {
            git::delete_branch(&branch, true, &self.repo_root);
            return Err(WorktreeError::Add(path));
        }

        Ok(WorktreeInfo {
            path,
            branch,
            agent_num,
            task_id: task_id.to_string(),
        })
    }

    /// Tears down a worktree after supervision.
    ///
    /// A clean tree is removed and its branch deleted. A dirty tree is
    /// preserved for forensic inspection; uncommitted work is never
    /// destroyed.
    pub fn cleanup(&self, info: &WorktreeInfo, delete_branch: bool) {
        if info.path.exists() && git::has_dirty_worktree(&info.path) {
            output::warn(&format!(
                "worktree dirty, preserving for inspection: {}",
                info.path.display()
            ));
            return;
        }

        if info.path.exists() {
            let _ = std::fs::remove_dir_all(&info.path);
        }
        let _ = git::worktree_remove(&info.path, &self.repo_root);
        git::worktree_prune(&self.repo_root);
        if delete_branch {
            git::delete_branch(&info.branch, true, &self.repo_root);
        }
    }

    #[must_use]
    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }
}

/// Startup garbage collector: prunes stale worktrees and force-deletes
/// orphan `dagrun/agent-*` branches left by crashed runs.
pub fn gc(repo_root: &Path) {
    git::worktree_prune(repo_root);

    let pattern = format!("{BRANCH_PREFIX}/agent-*");
    for branch in git::list_branches(&pattern, repo_root) {
        let listing = git::worktree_list(repo_root);
        let tag = format!("[{branch}]");
        if listing.contains(&tag) {
            for line in listing.lines() {
                if line.contains(&tag) {
                    if let Some(wt_path) = line.split_whitespace().next() {
                        output::debug(&format!(
                            "removing stale worktree for {branch} at {wt_path}"
                        ));
                        let _ = git::worktree_remove(Path::new(wt_path), repo_root);
                    }
                    break;
                }
            }
        }
        output::debug(&format!("cleaning up stale branch: {branch}"));
        git::delete_branch(&branch, true, repo_root);
    }
}
