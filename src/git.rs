//! Git operations: branches, worktrees, merges.
//!
//! Thin wrappers over the `git` binary, one function per operation the
//! runner consumes. Every function takes an explicit working directory;
//! nothing here touches global state.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Errors from git operations that callers cannot tolerate.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("git {op} failed: {detail}")]
    Command { op: String, detail: String },
}

/// Result type for git operations.
pub type Result<T> = std::result::Result<T, GitError>;

/// Outcome of a git command whose failure the caller inspects.
#[derive(Debug, Clone)]
pub struct CmdResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl From<Output> for CmdResult {
    fn from(out: Output) -> Self {
        Self {
            success: out.status.success(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        }
    }
}

impl CmdResult {
    /// First non-empty line of stderr, falling back to stdout, whitespace
    /// collapsed. Used for one-line diagnostics.
    #[must_use]
    pub fn summary(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

fn git(args: &[&str], cwd: &Path) -> std::io::Result<Output> {
    Command::new("git").args(args).current_dir(cwd).output()
}

fn git_ok(args: &[&str], cwd: &Path) -> bool {
    git(args, cwd).map(|o| o.status.success()).unwrap_or(false)
}

fn git_stdout(args: &[&str], cwd: &Path) -> Option<String> {
    let out = git(args, cwd).ok()?;
    if out.status.success() {
        Some(String::from_utf8_lossy(&out.stdout).trim().to_string())
    } else {
        None
    }
}

/// True when `cwd` is inside a git repository.
#[must_use]
pub fn is_repo(cwd: &Path) -> bool {
    git_ok(&["rev-parse", "--git-dir"], cwd)
}

/// Repository root for `cwd`.
#[must_use]
pub fn repo_root(cwd: &Path) -> Option<PathBuf> {
    git_stdout(&["rev-parse", "--show-toplevel"], cwd).map(PathBuf::from)
}

/// Current branch name, falling back to `main`.
#[must_use]
pub fn current_branch(cwd: &Path) -> String {
    git_stdout(&["rev-parse", "--abbrev-ref", "HEAD"], cwd)
        .unwrap_or_else(|| "main".to_string())
}

#[must_use]
pub fn branch_exists(name: &str, cwd: &Path) -> bool {
    git_ok(
        &["show-ref", "--verify", "--quiet", &format!("refs/heads/{name}")],
        cwd,
    )
}

#[must_use]
pub fn checkout(branch: &str, cwd: &Path) -> bool {
    git_ok(&["checkout", branch], cwd)
}

#[must_use]
pub fn create_branch(name: &str, base: &str, cwd: &Path) -> bool {
    git_ok(&["checkout", "-b", name, base], cwd)
}

/// Creates a branch without checking it out (`git branch <name> <base>`).
pub fn branch_from(name: &str, base: &str, cwd: &Path) -> Result<()> {
    let out = git(&["branch", name, base], cwd)?;
    if out.status.success() {
        Ok(())
    } else {
        Err(GitError::Command {
            op: format!("branch {name}"),
            detail: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        })
    }
}

pub fn delete_branch(name: &str, force: bool, cwd: &Path) {
    let flag = if force { "-D" } else { "-d" };
    let _ = git(&["branch", flag, name], cwd);
}

#[must_use]
pub fn pull(branch: &str, cwd: &Path) -> bool {
    git_ok(&["pull", "origin", branch], cwd)
}

/// Merges `branch` into the current branch without opening an editor.
/// The raw result is returned so callers can inspect conflicts.
#[must_use]
pub fn merge_no_edit(branch: &str, cwd: &Path) -> CmdResult {
    git(&["merge", "--no-edit", branch], cwd)
        .map(CmdResult::from)
        .unwrap_or(CmdResult {
            success: false,
            stdout: String::new(),
            stderr: "failed to spawn git".to_string(),
        })
}

pub fn merge_abort(cwd: &Path) {
    let _ = git(&["merge", "--abort"], cwd);
}

/// Files with unresolved conflict markers in the index.
#[must_use]
pub fn conflicted_files(cwd: &Path) -> Vec<String> {
    git_stdout(&["diff", "--name-only", "--diff-filter=U"], cwd)
        .map(|s| {
            s.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// True while a merge is open (MERGE_HEAD present).
#[must_use]
pub fn merge_in_progress(cwd: &Path) -> bool {
    git_dir(cwd).is_some_and(|d| d.join("MERGE_HEAD").exists())
}

/// Finalizes an open merge with the default message.
#[must_use]
pub fn commit_no_edit(cwd: &Path) -> bool {
    git_ok(&["commit", "--no-edit"], cwd)
}

/// Number of commits on HEAD that are not on `base`.
#[must_use]
pub fn commit_count(base: &str, cwd: &Path) -> u32 {
    git_stdout(&["rev-list", "--count", &format!("{base}..HEAD")], cwd)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Files changed between `base` and HEAD.
#[must_use]
pub fn changed_files(base: &str, cwd: &Path) -> Vec<String> {
    git_stdout(&["diff", "--name-only", &format!("{base}..HEAD")], cwd)
        .map(|s| {
            s.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

#[must_use]
pub fn has_dirty_worktree(cwd: &Path) -> bool {
    git_stdout(&["status", "--porcelain"], cwd)
        .map(|s| !s.trim().is_empty())
        .unwrap_or(false)
}

/// Concise dirty entries from `git status --porcelain`.
#[must_use]
pub fn dirty_entries(cwd: &Path) -> Vec<String> {
    git_stdout(&["status", "--porcelain"], cwd)
        .map(|s| {
            s.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Stages everything and commits. Returns false when there was nothing to
/// commit or the commit failed.
#[must_use]
pub fn add_and_commit(message: &str, cwd: &Path) -> bool {
    let _ = git(&["add", "."], cwd);
    git_ok(&["commit", "-m", message], cwd)
}

/// True when `path` exists on `base` (`git show base:path`).
#[must_use]
pub fn exists_on(base: &str, path: &str, cwd: &Path) -> bool {
    git_ok(&["show", &format!("{base}:{path}")], cwd)
}

/// Restores `path` to its `base` version.
#[must_use]
pub fn restore_from(base: &str, path: &str, cwd: &Path) -> bool {
    git_ok(&["checkout", base, "--", path], cwd)
}

/// Removes `path` from the index and the working tree if tracked.
pub fn remove_tracked(path: &str, cwd: &Path) {
    let _ = git(&["rm", "-f", "--ignore-unmatch", path], cwd);
}

// ── Worktrees ────────────────────────────────────────────────────────

pub fn worktree_prune(cwd: &Path) {
    let _ = git(&["worktree", "prune"], cwd);
}

#[must_use]
pub fn worktree_add(dir: &Path, branch: &str, cwd: &Path) -> bool {
    let Some(dir_str) = dir.to_str() else {
        return false;
    };
    git_ok(&["worktree", "add", "--force", dir_str, branch], cwd)
}

#[must_use]
pub fn worktree_remove(dir: &Path, cwd: &Path) -> bool {
    let Some(dir_str) = dir.to_str() else {
        return false;
    };
    git_ok(&["worktree", "remove", "--force", dir_str], cwd)
}

/// Raw `git worktree list` output.
#[must_use]
pub fn worktree_list(cwd: &Path) -> String {
    git_stdout(&["worktree", "list"], cwd).unwrap_or_default()
}

/// Local branches matching a glob pattern.
#[must_use]
pub fn list_branches(pattern: &str, cwd: &Path) -> Vec<String> {
    git_stdout(&["branch", "--list", pattern], cwd)
        .map(|s| {
            s.lines()
                .map(|l| l.trim_start_matches(['*', '+', ' ']).trim().to_string())
                .filter(|l| !l.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

// ── Repository hygiene ───────────────────────────────────────────────

fn git_dir(cwd: &Path) -> Option<PathBuf> {
    let raw = git_stdout(&["rev-parse", "--git-dir"], cwd)?;
    let dir = PathBuf::from(raw);
    if dir.is_absolute() {
        Some(dir)
    } else {
        Some(cwd.join(dir))
    }
}

/// Aborts any interrupted merge, rebase, or cherry-pick left behind by a
/// crashed predecessor.
pub fn ensure_clean_state(cwd: &Path) {
    let Some(dir) = git_dir(cwd) else {
        return;
    };
    if dir.join("MERGE_HEAD").exists() {
        merge_abort(cwd);
    }
    if dir.join("REBASE_HEAD").exists() {
        let _ = git(&["rebase", "--abort"], cwd);
    }
    if dir.join("CHERRY_PICK_HEAD").exists() {
        let _ = git(&["cherry-pick", "--abort"], cwd);
    }
}

/// Switches to (or creates) the run branch. Returns the effective base.
pub fn ensure_run_branch(branch_name: &str, base_branch: &str, cwd: &Path) -> Result<String> {
    if branch_name.is_empty() {
        return Ok(base_branch.to_string());
    }

    let base = if base_branch.is_empty() {
        current_branch(cwd)
    } else {
        base_branch.to_string()
    };

    if branch_exists(branch_name, cwd) {
        if !checkout(branch_name, cwd) {
            return Err(GitError::Command {
                op: format!("checkout {branch_name}"),
                detail: "failed to switch to run branch".to_string(),
            });
        }
    } else {
        let _ = checkout(&base, cwd);
        let _ = pull(&base, cwd);
        if !create_branch(branch_name, &base, cwd) {
            return Err(GitError::Command {
                op: format!("checkout -b {branch_name}"),
                detail: format!("failed to create run branch from {base}"),
            });
        }
    }

    Ok(branch_name.to_string())
}

#[cfg(test)]
pub mod testutil {
    use super::*;

    /// Initializes a git repository with one commit, for tests.
    pub fn init_repo(dir: &Path) {
        std::fs::create_dir_all(dir).expect("create repo dir");
        for args in [
            vec!["init", "-b", "main"],
            vec!["config", "user.name", "dagrun"],
            vec!["config", "user.email", "dagrun@example.com"],
        ] {
            let out = git(&args, dir).expect("git");
            assert!(out.status.success(), "git {args:?} failed");
        }
        std::fs::write(dir.join("README.md"), "test\n").expect("write file");
        assert!(add_and_commit("init", dir));
    }
}
