//! Serialized merge-back into the integration branch.
//!
//! Exactly one merge happens at a time regardless of parallelism: every
//! merge runs on the coordinator thread, from the integration checkout.
//! The central ordering property lives here: the task store records
//! `completed` only after the task's commits are in the integration
//! branch, and the scheduler hears about completion only after that.

use crate::adapters::Engine;
use crate::cli::output;
use crate::core::tasks::{mark_task_complete, Task};
use crate::git;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Outcome of one merge attempt.
#[derive(Debug)]
pub enum MergeOutcome {
    /// Branch merged; task marked completed on disk.
    Merged,
    /// Merge failed. The message is the one-line cause for the report.
    Failed(String),
}

/// Merges completed task branches, falling back to agent conflict
/// resolution.
pub struct Integrator<'a> {
    repo_root: &'a Path,
    base_branch: &'a str,
    tasks_path: &'a PathBuf,
    engine: &'a dyn Engine,
}

impl<'a> Integrator<'a> {
    pub fn new(
        repo_root: &'a Path,
        base_branch: &'a str,
        tasks_path: &'a PathBuf,
        engine: &'a dyn Engine,
    ) -> Self {
        Self {
            repo_root,
            base_branch,
            tasks_path,
            engine,
        }
    }

    /// Merges a task branch into the integration branch.
    ///
    /// On success the branch is deleted and the task is marked completed
    /// in the task store; the caller then transitions the scheduler.
    pub fn merge_task(&self, branch: &str, task: &Task) -> MergeOutcome {
        if !git::checkout(self.base_branch, self.repo_root) {
            return MergeOutcome::Failed(format!(
                "failed to check out integration branch {}",
                self.base_branch
            ));
        }

        output::info(&format!("Merging {branch} into {}…", self.base_branch));
        let result = git::merge_no_edit(branch, self.repo_root);

        if !result.success && !self.resolve_conflicts(branch, task) {
            git::merge_abort(self.repo_root);
            let mut detail = result.summary();
            if detail.is_empty() {
                // Local uncommitted changes block merges without a message;
                // surface them to make the failure diagnosable.
                let dirty = git::dirty_entries(self.repo_root);
                if !dirty.is_empty() {
                    detail = format!(
                        "run branch has local uncommitted changes that block merge: {}",
                        dirty[..dirty.len().min(8)].join(", ")
                    );
                }
            }
            if detail.is_empty() {
                detail = "git merge failed".to_string();
            }
            return MergeOutcome::Failed(detail);
        }

        git::delete_branch(branch, false, self.repo_root);

        if let Err(e) = mark_task_complete(self.tasks_path, &task.id) {
            // The commits are merged; failing the task now would violate
            // monotonicity. Surface loudly and continue.
            output::error(&format!(
                "merged {branch} but could not mark {} completed: {e}",
                task.id
            ));
        }

        MergeOutcome::Merged
    }

    /// Asks the agent to resolve an open merge conflict in the integration
    /// checkout. Returns true when the merge ended up committed.
    fn resolve_conflicts(&self, branch: &str, task: &Task) -> bool {
        let files = git::conflicted_files(self.repo_root);
        if files.is_empty() {
            // Merge failed for a non-conflict reason; nothing to resolve.
            return false;
        }

        output::warn(&format!(
            "Conflict merging {branch}, attempting agent resolution…"
        ));

        let prompt = build_conflict_prompt(&files, &task.merge_notes);
        let _ = self.engine.run_sync(&prompt, self.repo_root, None);

        if !git::conflicted_files(self.repo_root).is_empty() {
            output::error(&format!("agent failed to resolve conflicts in {branch}"));
            return false;
        }

        // The agent is told to commit; finalize ourselves if it did not.
        if git::merge_in_progress(self.repo_root) && !git::commit_no_edit(self.repo_root) {
            return false;
        }
        if git::merge_in_progress(self.repo_root) {
            return false;
        }

        output::success(&format!("agent resolved conflicts in {branch}"));
        true
    }
}

/// Conflict-resolution prompt: conflicted files plus the task's merge notes.
#[must_use]
pub fn build_conflict_prompt(files: &[String], merge_notes: &str) -> String {
    let mut prompt = String::from("Resolve git merge conflicts in these files:\n\n");
    for file in files {
        let _ = writeln!(prompt, "{file}");
    }
    let _ = write!(
        prompt,
        "\nMerge notes from task: {merge_notes}\n\n\
         For each file:\n\
         1. Read the conflict markers (<<<<<<< HEAD, =======, >>>>>>>)\n\
         2. Combine BOTH changes intelligently\n\
         3. Remove all conflict markers\n\
         4. Ensure valid syntax\n\n\
         Then run:\n\
         git add <files>\n\
         git commit --no-edit"
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::EngineResult;
    use crate::core::tasks::{load_task_set, save_task_set, TaskSet};
    use crate::git::testutil::init_repo;
    use std::time::Duration;

    /// Engine double that resolves conflicts by taking the HEAD side.
    struct ResolveEngine;

    impl Engine for ResolveEngine {
        fn name(&self) -> &'static str {
            "resolve"
        }
        fn build_cmd(&self, _prompt: &str) -> Vec<String> {
            vec!["true".to_string()]
        }
        fn parse_output(&self, _raw: &str) -> EngineResult {
            EngineResult::default()
        }
        fn run_sync(&self, _prompt: &str, cwd: &Path, _timeout: Option<Duration>) -> EngineResult {
            // Stand-in for the agent: keep our side, stage, commit.
            std::fs::write(cwd.join("shared.txt"), "resolved\n").unwrap();
            assert!(git::add_and_commit("resolve conflicts", cwd));
            EngineResult::default()
        }
    }

    /// Engine double that does nothing, leaving conflicts in place.
    struct InertEngine;

    impl Engine for InertEngine {
        fn name(&self) -> &'static str {
            "inert"
        }
        fn build_cmd(&self, _prompt: &str) -> Vec<String> {
            vec!["true".to_string()]
        }
        fn parse_output(&self, _raw: &str) -> EngineResult {
            EngineResult::default()
        }
        fn run_sync(&self, _p: &str, _cwd: &Path, _t: Option<Duration>) -> EngineResult {
            EngineResult::default()
        }
    }

    fn setup(tmp: &Path) -> (PathBuf, String, PathBuf) {
        let repo = tmp.join("repo");
        init_repo(&repo);
        let base = git::current_branch(&repo);

        let tasks_path = repo.join("tasks.yaml");
        let mut set = TaskSet::new(&base);
        set.tasks.push(Task::new("T1", "task one"));
        save_task_set(&tasks_path, &set).unwrap();
        // Keep the run branch clean: the tasks file is part of the checkout.
        assert!(git::add_and_commit("add tasks", &repo));

        (repo, base, tasks_path)
    }

    #[test]
    fn clean_merge_marks_completed_and_deletes_branch() {
        let tmp = tempfile::tempdir().unwrap();
        let (repo, base, tasks_path) = setup(tmp.path());

        assert!(git::create_branch("work", &base, &repo));
        std::fs::write(repo.join("new.txt"), "x\n").unwrap();
        assert!(git::add_and_commit("task work", &repo));
        assert!(git::checkout(&base, &repo));

        let engine = InertEngine;
        let integrator = Integrator::new(&repo, &base, &tasks_path, &engine);
        let task = Task::new("T1", "task one");

        assert!(matches!(
            integrator.merge_task("work", &task),
            MergeOutcome::Merged
        ));
        assert!(repo.join("new.txt").is_file());
        assert!(!git::branch_exists("work", &repo));
        assert!(load_task_set(&tasks_path).unwrap().get("T1").unwrap().completed);
    }

    #[test]
    fn conflict_resolved_by_agent() {
        let tmp = tempfile::tempdir().unwrap();
        let (repo, base, tasks_path) = setup(tmp.path());

        std::fs::write(repo.join("shared.txt"), "base\n").unwrap();
        assert!(git::add_and_commit("base shared", &repo));

        assert!(git::create_branch("work", &base, &repo));
        std::fs::write(repo.join("shared.txt"), "branch\n").unwrap();
        assert!(git::add_and_commit("branch shared", &repo));

        assert!(git::checkout(&base, &repo));
        std::fs::write(repo.join("shared.txt"), "diverged\n").unwrap();
        assert!(git::add_and_commit("diverge shared", &repo));

        let engine = ResolveEngine;
        let integrator = Integrator::new(&repo, &base, &tasks_path, &engine);
        let task = Task::new("T1", "task one");

        assert!(matches!(
            integrator.merge_task("work", &task),
            MergeOutcome::Merged
        ));
        assert_eq!(
            std::fs::read_to_string(repo.join("shared.txt")).unwrap(),
            "resolved\n"
        );
        assert!(!git::merge_in_progress(&repo));
    }

    #[test]
    fn unresolved_conflict_aborts_and_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let (repo, base, tasks_path) = setup(tmp.path());

        std::fs::write(repo.join("shared.txt"), "base\n").unwrap();
        assert!(git::add_and_commit("base shared", &repo));

        assert!(git::create_branch("work", &base, &repo));
        std::fs::write(repo.join("shared.txt"), "branch\n").unwrap();
        assert!(git::add_and_commit("branch shared", &repo));

        assert!(git::checkout(&base, &repo));
        std::fs::write(repo.join("shared.txt"), "diverged\n").unwrap();
        assert!(git::add_and_commit("diverge shared", &repo));

        let engine = InertEngine;
        let integrator = Integrator::new(&repo, &base, &tasks_path, &engine);
        let task = Task::new("T1", "task one");

        let outcome = integrator.merge_task("work", &task);
        assert!(matches!(outcome, MergeOutcome::Failed(_)));
        // Merge aborted: no open merge, task not completed on disk.
        assert!(!git::merge_in_progress(&repo));
        assert!(!load_task_set(&tasks_path).unwrap().get("T1").unwrap().completed);
    }

    #[test]
    fn conflict_prompt_lists_files_and_notes() {
        let prompt = build_conflict_prompt(
            &["a.rs".to_string(), "b.rs".to_string()],
            "schema changes win",
        );
        assert!(prompt.contains("a.rs"));
        assert!(prompt.contains("b.rs"));
        assert!(prompt.contains("schema changes win"));
        assert!(prompt.contains("git commit --no-edit"));
    }
}
