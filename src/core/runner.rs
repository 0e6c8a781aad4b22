//! Run coordinator and per-task supervision.
//!
//! One coordinator thread drives the whole run: it dispatches ready tasks
//! into agent slots (bounded by `max_parallel`), polls the slot processes,
//! watches for stalls, reaps finished agents, merges their branches, and
//! enforces the graceful-stop policy on external failures.

use crate::adapters::engine::terminate_child;
use crate::adapters::stage::{stage_from_chunk, Stage};
use crate::adapters::Engine;
use crate::cli::output;
use crate::core::artifacts::{notes_tail, ArtifactWriter, TaskReport};
use crate::core::config::Config;
use crate::core::error::{Result, RunError};
use crate::core::failure::{classify, extract_error_from_logs, FailureKind};
use crate::core::integrator::{Integrator, MergeOutcome};
use crate::core::scheduler::Scheduler;
use crate::core::tasks::TaskSet;
use crate::core::worktree::{WorktreeInfo, WorktreeManager};
use crate::git;
use colored::Colorize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const AUTO_COMMIT_MESSAGE: &str = "Auto-commit remaining changes";

/// Runtime bookkeeping files copied into each worktree. The agent must not
/// commit them; committed copies are reverted before merge and the
/// run-root copy stays authoritative.
const FORBIDDEN_TASK_FILES: [&str; 2] = ["tasks.yaml", "progress.txt"];

/// Device names reserved by Windows filesystems, with or without an
/// extension. Committing one breaks every checkout on such a platform.
const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Tracks a running agent subprocess.
struct AgentSlot {
    task_id: String,
    agent_num: u32,
    child: Child,
    worktree: WorktreeInfo,
    stream_file: PathBuf,
    log_file: PathBuf,
    stage: Stage,
    stream_len: u64,
    log_len: u64,
    last_activity: Instant,
    stalled: bool,
}

impl AgentSlot {
    fn file_len(path: &Path) -> u64 {
        std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
    }

    /// Refreshes activity tracking and the stage label from stream growth.
    fn observe(&mut self) {
        let stream_len = Self::file_len(&self.stream_file);
        let log_len = Self::file_len(&self.log_file);

        if stream_len > self.stream_len {
            if let Ok(content) = std::fs::read_to_string(&self.stream_file) {
                let start = content.len().min(self.stream_len as usize);
                let new = content.get(start..).unwrap_or("");
                if let Some(stage) = stage_from_chunk(new) {
                    if stage != self.stage {
                        output::debug(&format!(
                            "agent {} ({}): {stage}",
                            self.agent_num, self.task_id
                        ));
                    }
                    self.stage = stage;
                }
            }
        }

        if stream_len > self.stream_len || log_len > self.log_len {
            self.stream_len = stream_len;
            self.log_len = log_len;
            self.last_activity = Instant::now();
        }
    }
}

/// Orchestrates DAG-aware parallel task execution.
pub struct Runner<'a> {
    cfg: &'a Config,
    tasks: &'a TaskSet,
    engine: &'a dyn Engine,
    sched: Scheduler,
    worktrees: WorktreeManager,
    artifacts: ArtifactWriter,
    /// Authoritative tasks file in the run directory.
    tasks_path: PathBuf,
    /// Temp directory holding worktrees and per-slot stream files.
    scratch_dir: PathBuf,
    stop_flag: Arc<AtomicBool>,
    active: Vec<AgentSlot>,
    agent_num: u32,
    pub iteration: usize,
    retry_counts: HashMap<String, u32>,
    retry_after: HashMap<String, Instant>,
    /// Deadline for awaiting running agents after an external failure.
    external_stop: Option<Instant>,
    pub completed_task_ids: Vec<String>,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
}

impl<'a> Runner<'a> {
    pub fn new(
        cfg: &'a Config,
        tasks: &'a TaskSet,
        engine: &'a dyn Engine,
        repo_root: &Path,
        stop_flag: Arc<AtomicBool>,
    ) -> Result<Self> {
        let scratch_dir =
            std::env::temp_dir().join(format!("dagrun-{}-{}", cfg.prd_id, std::process::id()));
        std::fs::create_dir_all(&scratch_dir)?;

        let worktrees = WorktreeManager::new(repo_root, scratch_dir.join("worktrees"))
            .map_err(|e| RunError::git("worktree_manager", e.to_string()))?;
        let artifacts = ArtifactWriter::new(&cfg.run_dir)?;
        let tasks_path = cfg.run_dir.join("tasks.yaml");

        Ok(Self {
            cfg,
            tasks,
            engine,
            sched: Scheduler::new(tasks),
            worktrees,
            artifacts,
            tasks_path,
            scratch_dir,
            stop_flag,
            active: Vec::new(),
            agent_num: 0,
            iteration: 0,
            retry_counts: HashMap::new(),
            retry_after: HashMap::new(),
            external_stop: None,
            completed_task_ids: Vec::new(),
            total_input_tokens: 0,
            total_output_tokens: 0,
        })
    }

    /// Executes all tasks. Returns true when every task completed.
    pub fn run(&mut self) -> bool {
        output::info(&format!(
            "Running DAG-aware parallel execution (max {} agents)…",
            self.cfg.max_parallel
        ));
        output::info(&format!("Tasks: {} pending", self.sched.count_pending()));

        let ok = self.main_loop();
        let _ = std::fs::remove_dir_all(&self.scratch_dir);
        ok
    }

    fn main_loop(&mut self) -> bool {
        loop {
            if self.stop_flag.load(Ordering::Relaxed) {
                self.abort_all_active("Interrupted by user (Ctrl-C)");
                return false;
            }

            self.reap_finished();

            if self.stop_flag.load(Ordering::Relaxed) {
                self.abort_all_active("Interrupted by user (Ctrl-C)");
                return false;
            }

            // Graceful stop: no new dispatch; await the running set up to
            // the deadline, then cancel whatever is left.
            if let Some(deadline) = self.external_stop {
                if self.active.is_empty() {
                    output::error("Stopping: external failure detected.");
                    return false;
                }
                if Instant::now() >= deadline {
                    self.abort_all_active("cancelled after external failure stop");
                    output::error("Stopping: external failure detected.");
                    return false;
                }
                std::thread::sleep(POLL_INTERVAL);
                continue;
            }

            let pending = self.sched.count_pending();
            let running = self.sched.count_running();

            if pending == 0 && running == 0 {
                let failed = self.sched.count_failed();
                if failed > 0 {
                    output::error(&format!(
                        "Workflow finished with failed tasks. {failed} task(s) failed."
                    ));
                    return false;
                }
                return true;
            }

            if self.sched.check_deadlock() {
                self.report_deadlock();
                return false;
            }

            let max_reached =
                self.cfg.max_iterations > 0 && self.iteration >= self.cfg.max_iterations;
            if max_reached && pending > 0 && running == 0 {
                output::warn(&format!(
                    "Reached max iterations ({}) with {pending} pending task(s). Stopping run.",
                    self.cfg.max_iterations
                ));
                return false;
            }

            let slots = self.cfg.max_parallel.saturating_sub(running);
            if slots > 0 && !max_reached {
                let ready = self.ready_tasks();
                for task_id in ready.into_iter().take(slots) {
                    self.launch_agent(&task_id);
                }
            }

            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Ready tasks, honoring retry delays.
    fn ready_tasks(&mut self) -> Vec<String> {
        let now = Instant::now();
        let retry_after = &mut self.retry_after;
        self.sched
            .ready()
            .into_iter()
            .filter(|id| match retry_after.get(id) {
                Some(at) if *at > now => false,
                Some(_) => {
                    retry_after.remove(id);
                    true
                }
                None => true,
            })
            .collect()
    }

    fn launch_agent(&mut self, task_id: &str) {
        self.agent_num += 1;
        self.iteration += 1;
        self.sched.start(task_id);

        let task = self.tasks.get(task_id);
        let title = task.map_or_else(|| task_id.to_string(), |t| t.title.clone());
        let touches = task.map_or_else(String::new, |t| t.touches.join(", "));

        output::plain(&format!(
            "  {} Agent {}: {} ({task_id})",
            "*".cyan(),
            self.agent_num,
            truncate(&title, 40)
        ));

        let info = match self
            .worktrees
            .create(task_id, &title, self.agent_num, &self.cfg.base_branch)
        {
            Ok(info) => info,
            Err(e) => {
                output::error(&format!("Failed to create worktree for {task_id}: {e}"));
                self.sched.fail(task_id);
                self.write_failure_report(task_id, &title, "", 0, &e.to_string(), FailureKind::Internal, "failed");
                return;
            }
        };

        // The agent reads the tasks file for context; the run-root copy
        // stays authoritative.
        let _ = std::fs::copy(&self.tasks_path, info.path.join("tasks.yaml"));
        let progress = info.path.join("progress.txt");
        if !progress.exists() {
            let _ = std::fs::write(&progress, "");
        }

        let stream_file = self
            .scratch_dir
            .join(format!("agent-{}.stream", self.agent_num));
        let log_file = self
            .scratch_dir
            .join(format!("agent-{}.stderr", self.agent_num));

        let prompt = build_task_prompt(
            task_id,
            &title,
            &touches,
            self.cfg.skip_tests,
            self.cfg.skip_lint,
        );

        match self
            .engine
            .run_async(&prompt, &info.path, &stream_file, &log_file)
        {
            Ok(child) => {
                self.active.push(AgentSlot {
                    task_id: task_id.to_string(),
                    agent_num: self.agent_num,
                    child,
                    worktree: info,
                    stream_file,
                    log_file,
                    stage: Stage::Setup,
                    stream_len: 0,
                    log_len: 0,
                    last_activity: Instant::now(),
                    stalled: false,
                });
            }
            Err(e) => {
                output::error(&format!(
                    "Failed to start engine '{}' for {task_id}: {e}",
                    self.engine.name()
                ));
                self.sched.fail(task_id);
                self.write_failure_report(
                    task_id,
                    &title,
                    &info.branch,
                    0,
                    &format!("failed to spawn engine: {e}"),
                    FailureKind::Internal,
                    "failed",
                );
                self.worktrees.cleanup(&info, true);
            }
        }
    }

    /// Checks active agents; processes any that have finished or stalled.
    fn reap_finished(&mut self) {
        let mut still_active = Vec::new();
        let mut finished = Vec::new();

        for mut slot in std::mem::take(&mut self.active) {
            match slot.child.try_wait() {
                Ok(Some(status)) => {
                    finished.push((slot, status.code().unwrap_or(-1)));
                }
                Ok(None) => {
                    slot.observe();
                    let idle = slot.last_activity.elapsed();
                    if idle.as_secs() > self.cfg.stalled_timeout {
                        output::warn(&format!(
                            "Agent {} stalled for {}s. Killing…",
                            slot.agent_num,
                            idle.as_secs()
                        ));
                        terminate_child(&mut slot.child);
                        slot.stalled = true;
                        finished.push((slot, -1));
                    } else {
                        still_active.push(slot);
                    }
                }
                Err(e) => {
                    output::error(&format!(
                        "Failed to poll agent {}: {e}",
                        slot.agent_num
                    ));
                    terminate_child(&mut slot.child);
                    finished.push((slot, -1));
                }
            }
        }

        self.active = still_active;
        for (slot, code) in finished {
            self.handle_finished(slot, code);
        }
    }

    fn handle_finished(&mut self, slot: AgentSlot, exit_code: i32) {
        let title = self
            .tasks
            .get(&slot.task_id)
            .map_or_else(|| slot.task_id.clone(), |t| t.title.clone());

        self.accumulate_tokens(&slot.stream_file);
        self.artifacts
            .persist_log(&slot.task_id, &slot.stream_file, &slot.log_file);

        let commits = git::commit_count(&self.cfg.base_branch, &slot.worktree.path);

        if slot.stalled {
            // Inactivity timeout; internal by construction, not classified.
            let message = format!(
                "stalled: no output for {}s before cancellation",
                self.cfg.stalled_timeout
            );
            self.handle_failure(slot, &title, &message, FailureKind::Internal, commits, false);
            return;
        }

        if exit_code != 0 {
            let mut message = extract_error_from_logs(&slot.log_file, &slot.stream_file);
            if message.is_empty() {
                message = format!("exit code {exit_code}");
            }
            let kind = classify(&message);
            self.handle_failure(slot, &title, &message, kind, commits, false);
            return;
        }

        // Exit 0 with a well-formed error record in the stream still
        // counts as a failed attempt.
        let stream = std::fs::read_to_string(&slot.stream_file).unwrap_or_default();
        if let Some(message) = crate::adapters::engine::check_stream_errors(&stream) {
            let kind = classify(&message);
            self.handle_failure(slot, &title, &message, kind, commits, false);
            return;
        }

        self.handle_success(slot, &title);
    }

    fn handle_success(&mut self, slot: AgentSlot, title: &str) {
        let worktree = &slot.worktree.path;

        // Auto-commit precondition: the agent exited 0 but left the tree
        // dirty. Reserved device names are deleted first so the commit
        // cannot fail on hostile platforms. Runs before the commit-count
        // gate, so uncommitted-but-complete work is not thrown away.
        if git::has_dirty_worktree(worktree) {
            remove_reserved_name_files(worktree);
            let _ = git::add_and_commit(AUTO_COMMIT_MESSAGE, worktree);
        }

        let sanitized = sanitize_forbidden_files(&self.cfg.base_branch, worktree);
        if !sanitized.is_empty() {
            output::warn(&format!(
                "Reverted runtime files committed by the agent: {}",
                sanitized.join(", ")
            ));
        }

        let commits = git::commit_count(&self.cfg.base_branch, worktree);
        if commits == 0 {
            self.handle_failure(
                slot,
                title,
                "agent exited without creating any commits",
                FailureKind::Internal,
                0,
                false,
            );
            return;
        }

        if !has_meaningful_changes(&self.cfg.base_branch, worktree) {
            self.handle_failure(
                slot,
                title,
                "no meaningful changes (only tasks.yaml/progress.txt)",
                FailureKind::Internal,
                commits,
                false,
            );
            return;
        }

        // Captured now: the worktree is gone once the merge starts.
        let changed = git::changed_files(&self.cfg.base_branch, worktree);
        let tail = notes_tail(&worktree.join("progress.txt"));

        // Tear the worktree down before merging so the integrator can
        // delete the branch (a branch checked out in a worktree cannot be
        // deleted). The commits live on the branch, not the worktree.
        self.worktrees.cleanup(&slot.worktree, false);

        let task = self
            .tasks
            .get(&slot.task_id)
            .cloned()
            .unwrap_or_else(|| crate::core::tasks::Task::new(slot.task_id.clone(), title));

        let integrator = Integrator::new(
            self.worktrees.repo_root(),
            &self.cfg.base_branch,
            &self.tasks_path,
            self.engine,
        );

        match integrator.merge_task(&slot.worktree.branch, &task) {
            MergeOutcome::Merged => {
                self.sched.complete(&slot.task_id);
                self.completed_task_ids.push(slot.task_id.clone());
                output::plain(&format!(
                    "  {} {} ({})",
                    "OK".green(),
                    truncate(title, 45),
                    slot.task_id
                ));

                let retries = self.retry_counts.get(&slot.task_id).copied().unwrap_or(0);
                let report = TaskReport::new(
                    &slot.task_id,
                    title,
                    &slot.worktree.branch,
                    "done",
                    commits,
                    retries + 1,
                    retries,
                    self.cfg.max_retries,
                )
                .with_changed_files(&changed)
                .with_notes_tail(tail);
                if let Err(e) = self.artifacts.write_report(&report) {
                    output::warn(&format!("failed to write report for {}: {e}", slot.task_id));
                }
            }
            MergeOutcome::Failed(message) => {
                let kind = classify(&message);
                output::error(&format!(
                    "Merge failed for {}: {message}",
                    slot.worktree.branch
                ));
                self.handle_failure(slot, title, &message, kind, commits, true);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_failure(
        &mut self,
        slot: AgentSlot,
        title: &str,
        message: &str,
        kind: FailureKind,
        commits: u32,
        worktree_cleaned: bool,
    ) {
        let retries_used = self.retry_counts.get(&slot.task_id).copied().unwrap_or(0);
        let attempt = retries_used + 1;
        let max_attempts = self.cfg.max_retries + 1;

        // External failures are never retried: the first one stops
        // dispatch for the whole run. Internal (and unclassifiable)
        // failures retry with a fixed delay.
        let should_retry = kind != FailureKind::External
            && retries_used < self.cfg.max_retries
            && self.external_stop.is_none();

        self.sched.fail(&slot.task_id);

        if should_retry {
            self.retry_counts.insert(slot.task_id.clone(), attempt);
            self.sched.retry(&slot.task_id);
            if self.cfg.retry_delay > 0 {
                self.retry_after.insert(
                    slot.task_id.clone(),
                    Instant::now() + Duration::from_secs(self.cfg.retry_delay),
                );
            }
            output::plain(&format!(
                "  {} {} ({}) in {}s (attempt {}/{max_attempts})",
                "RETRY".yellow(),
                truncate(title, 45),
                slot.task_id,
                self.cfg.retry_delay,
                attempt + 1,
            ));
        } else {
            output::plain(&format!(
                "  {} {} ({})",
                "x".red(),
                truncate(title, 45),
                slot.task_id
            ));
        }

        if !message.is_empty() {
            output::plain(&format!("{}", format!("    Error: {message}").dimmed()));
        }

        let status = if should_retry { "retrying" } else { "failed" };
        let changed = if worktree_cleaned {
            Vec::new()
        } else {
            git::changed_files(&self.cfg.base_branch, &slot.worktree.path)
        };
        let tail = if worktree_cleaned {
            String::new()
        } else {
            notes_tail(&slot.worktree.path.join("progress.txt"))
        };
        let report = TaskReport::new(
            &slot.task_id,
            title,
            &slot.worktree.branch,
            status,
            commits,
            attempt,
            retries_used,
            self.cfg.max_retries,
        )
        .with_changed_files(&changed)
        .with_notes_tail(tail)
        .with_error(message, kind);
        if let Err(e) = self.artifacts.write_report(&report) {
            output::warn(&format!("failed to write report for {}: {e}", slot.task_id));
        }

        if !worktree_cleaned {
            self.worktrees.cleanup(&slot.worktree, true);
        }

        if kind == FailureKind::External && self.external_stop.is_none() {
            self.enter_graceful_stop();
        }
    }

    fn enter_graceful_stop(&mut self) {
        output::warn(&format!(
            "External failure detected. No new tasks will be dispatched; awaiting {} running agent(s) for up to {}s.",
            self.active.len(),
            self.cfg.external_fail_timeout
        ));
        self.external_stop =
            Some(Instant::now() + Duration::from_secs(self.cfg.external_fail_timeout));
    }

    /// Kills active agents, writes failure reports, and tears down their
    /// worktrees (dirty ones are preserved by the manager).
    fn abort_all_active(&mut self, reason: &str) {
        if self.active.is_empty() {
            return;
        }
        output::warn(&format!("Stopping {} active agent(s)...", self.active.len()));

        for mut slot in std::mem::take(&mut self.active) {
            terminate_child(&mut slot.child);
            self.sched.fail(&slot.task_id);
            self.artifacts
                .persist_log(&slot.task_id, &slot.stream_file, &slot.log_file);

            let title = self
                .tasks
                .get(&slot.task_id)
                .map_or_else(|| slot.task_id.clone(), |t| t.title.clone());
            self.write_failure_report(
                &slot.task_id,
                &title,
                &slot.worktree.branch,
                git::commit_count(&self.cfg.base_branch, &slot.worktree.path),
                reason,
                classify(reason),
                "failed",
            );
            self.worktrees.cleanup(&slot.worktree, true);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write_failure_report(
        &self,
        task_id: &str,
        title: &str,
        branch: &str,
        commits: u32,
        message: &str,
        kind: FailureKind,
        status: &str,
    ) {
        let retries = self.retry_counts.get(task_id).copied().unwrap_or(0);
        let report = TaskReport::new(
            task_id,
            title,
            branch,
            status,
            commits,
            retries + 1,
            retries,
            self.cfg.max_retries,
        )
        .with_error(message, kind);
        if let Err(e) = self.artifacts.write_report(&report) {
            output::warn(&format!("failed to write report for {task_id}: {e}"));
        }
    }

    fn report_deadlock(&self) {
        let pending = self.sched.pending_ids();
        let halted_by_failures = pending.iter().any(|id| self.sched.has_failed_deps(id));

        if halted_by_failures {
            output::error("Workflow halted: dependencies failed, preventing further progress.");
        } else {
            output::error("DEADLOCK: no progress possible (cycle or mutex contention)");
        }

        let mut table = output::create_table(&["Blocked task", "Reason"]);
        for id in &pending {
            table.add_row(vec![id.clone(), self.sched.explain_block(id)]);
        }
        output::plain(&table.to_string());
    }

    fn accumulate_tokens(&mut self, stream_file: &Path) {
        let Ok(raw) = std::fs::read_to_string(stream_file) else {
            return;
        };
        if raw.is_empty() {
            return;
        }
        let result = self.engine.parse_output(&raw);
        self.total_input_tokens += result.input_tokens;
        self.total_output_tokens += result.output_tokens;
    }
}

/// Shell usage guardrails for the current platform.
fn task_shell_rules() -> &'static str {
    if cfg!(target_os = "windows") {
        "SHELL COMPATIBILITY (Windows PowerShell):\n\
         - Do NOT use '&&' between commands; PowerShell 5 treats it as a syntax error.\n\
         - Use ';' between commands, or run commands separately.\n\
         - Prefer setting tool workingDirectory/cwd instead of chaining 'cd'.\n"
    } else {
        "SHELL COMPATIBILITY:\n\
         - Use shell syntax compatible with the current platform.\n\
         - Prefer tool workingDirectory/cwd instead of chaining 'cd'.\n"
    }
}

/// Prompt instructing the agent to implement exactly one task.
#[must_use]
pub fn build_task_prompt(
    task_id: &str,
    title: &str,
    touches: &str,
    skip_tests: bool,
    skip_lint: bool,
) -> String {
    let mut quality = String::new();
    if skip_tests {
        quality.push_str("- Skip full test suite execution unless strictly needed for this task.\n");
    }
    if skip_lint {
        quality.push_str("- Skip full lint execution unless strictly needed for this task.\n");
    }

    let mut prompt = String::new();
    let _ = write!(
        prompt,
        "You are working on a specific task. Focus ONLY on this task:\n\n\
         TASK ID: {task_id}\n\
         TASK: {title}\n\
         EXPECTED FILES TO CREATE/MODIFY: {touches}\n\n\
         Instructions:\n\
         1. Implement this specific task completely by creating/editing the necessary code files.\n\
         2. Write tests if appropriate.\n\
         3. Update progress.txt with what you did.\n\
         4. Commit your changes with a descriptive message.\n\n\
         {}\n\
         CRITICAL RULES:\n\
         - Do NOT modify tasks.yaml.\n\
         - Do NOT mark the task as complete in tasks.yaml.\n\
         - Do NOT just update progress.txt. You MUST write the actual code.\n\
         - Do NOT commit tasks.yaml or progress.txt.\n\
         - If the file does not exist, CREATE IT.\n\
         {quality}\n\
         Focus only on implementing: {title}",
        task_shell_rules()
    );
    prompt
}

/// True when the branch changes anything beyond the bookkeeping files.
#[must_use]
pub fn has_meaningful_changes(base: &str, worktree: &Path) -> bool {
    git::changed_files(base, worktree)
        .iter()
        .any(|f| FORBIDDEN_TASK_FILES.iter().all(|forbidden| !f.ends_with(forbidden)))
}

/// Reverts runtime bookkeeping files committed into a task branch.
///
/// Files present on `base` are restored to that exact version; files the
/// branch introduced are removed. Returns the offending paths.
#[must_use]
pub fn sanitize_forbidden_files(base: &str, worktree: &Path) -> Vec<String> {
    let offenders: Vec<String> = git::changed_files(base, worktree)
        .into_iter()
        .filter(|f| FORBIDDEN_TASK_FILES.contains(&f.as_str()))
        .collect();
    if offenders.is_empty() {
        return offenders;
    }

    for rel in &offenders {
        if git::exists_on(base, rel, worktree) {
            let _ = git::restore_from(base, rel, worktree);
        } else {
            let _ = std::fs::remove_file(worktree.join(rel));
            git::remove_tracked(rel, worktree);
        }
    }

    if git::has_dirty_worktree(worktree) {
        let _ = git::add_and_commit("chore: revert runtime task files", worktree);
    }

    offenders
}

/// Deletes files whose names are reserved by the host filesystem so a
/// subsequent `git add` cannot fail. Skips `.git`.
pub fn remove_reserved_name_files(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.filter_map(std::result::Result::ok) {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if path.is_dir() {
            if name != ".git" {
                remove_reserved_name_files(&path);
            }
            continue;
        }
        let stem = name.split('.').next().unwrap_or("");
        if RESERVED_NAMES
            .iter()
            .any(|r| r.eq_ignore_ascii_case(stem))
        {
            let _ = std::fs::remove_file(&path);
        }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
