//! The run pipeline: preflight, translation, validation, execution, summary.

use crate::adapters::{get_engine, Engine};
use crate::cli::output;
use crate::core::config::Config;
use crate::core::error::ExitCode;
use crate::core::prd::{copy_prd_to_run_dir, extract_prd_id, find_prd_file, setup_run_dir, RUN_ROOT};
use crate::core::runner::Runner;
use crate::core::skills::{ensure_skills, SkillsMode};
use crate::core::tasks::{load_task_set, TaskSet};
use crate::core::translate::generate_tasks;
use crate::core::validate::validate;
use crate::core::worktree;
use crate::core::artifacts::ArtifactWriter;
use crate::git;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Full pipeline: PRD → tasks → schedule → execute → report.
pub fn run_pipeline(mut cfg: Config) -> ExitCode {
    let engine = get_engine(cfg.engine);
    if let Some(message) = engine.check_available() {
        output::error(&message);
        return ExitCode::Usage;
    }

    let Ok(repo_root) = std::env::current_dir() else {
        output::error("cannot determine current directory");
        return ExitCode::Usage;
    };
    if !git::is_repo(&repo_root) {
        output::error("not a git repository; run dagrun from the repository root");
        return ExitCode::Usage;
    }

    // ── PRD / resume handling ────────────────────────────────────
    let tasks_path = if cfg.resume_prd_id.is_empty() {
        match prepare_fresh_run(&mut cfg, engine.as_ref(), &repo_root) {
            Ok(path) => path,
            Err(code) => return code,
        }
    } else {
        cfg.prd_id = cfg.resume_prd_id.clone();
        cfg.run_dir = Path::new(RUN_ROOT).join(&cfg.prd_id);
        if !cfg.run_dir.is_dir() {
            output::error(&format!("No run found for prd-id: {}", cfg.prd_id));
            return ExitCode::Usage;
        }
        let tasks_path = cfg.run_dir.join("tasks.yaml");
        if !tasks_path.is_file() {
            output::error(&format!("No tasks.yaml found in {}", cfg.run_dir.display()));
            return ExitCode::Usage;
        }
        output::info(&format!("Resuming PRD: {}", cfg.prd_id));
        tasks_path
    };

    // ── Load and validate tasks ──────────────────────────────────
    let set = match load_task_set(&tasks_path) {
        Ok(set) => set,
        Err(e) => {
            output::error(&e.to_string());
            return ExitCode::Usage;
        }
    };
    let errors = validate(&set);
    if !errors.is_empty() {
        output::error(&format!("tasks.yaml failed validation ({} error(s)):", errors.len()));
        for error in &errors {
            output::plain(&format!("  - {error}"));
        }
        return ExitCode::Usage;
    }

    // ── Skills check (warn only) ─────────────────────────────────
    let _ = ensure_skills(&cfg, &repo_root, SkillsMode::Warn);

    // ── Git hygiene ──────────────────────────────────────────────
    git::ensure_clean_state(&repo_root);
    worktree::gc(&repo_root);

    // ── Dry run ──────────────────────────────────────────────────
    if cfg.dry_run {
        show_dry_run(&set);
        return ExitCode::Success;
    }

    // ── Run branch ───────────────────────────────────────────────
    let base = if cfg.base_branch.is_empty() {
        git::current_branch(&repo_root)
    } else {
        cfg.base_branch.clone()
    };
    match git::ensure_run_branch(&set.branch_name, &base, &repo_root) {
        Ok(effective) => cfg.base_branch = effective,
        Err(e) => {
            output::error(&e.to_string());
            return ExitCode::Usage;
        }
    }

    // Untracked files (artifacts, editor droppings) don't block merges;
    // staged or modified tracked files do.
    let dirty: Vec<String> = git::dirty_entries(&repo_root)
        .into_iter()
        .filter(|entry| !entry.starts_with("?? "))
        .collect();
    if !dirty.is_empty() {
        output::error(
            "Working tree is dirty on the run branch. Commit/stash changes before running dagrun.",
        );
        output::plain(&format!(
            "  Dirty entries: {}",
            dirty[..dirty.len().min(8)].join(", ")
        ));
        return ExitCode::Usage;
    }

    show_banner(&cfg);

    // ── Artifacts ────────────────────────────────────────────────
    match ArtifactWriter::new(&cfg.run_dir) {
        Ok(writer) => {
            if let Err(e) = writer.ensure_progress_file() {
                output::error(&e.to_string());
                return ExitCode::Usage;
            }
        }
        Err(e) => {
            output::error(&e.to_string());
            return ExitCode::Usage;
        }
    }

    // ── Execute ──────────────────────────────────────────────────
    let stop_flag = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&stop_flag);
        let _ = ctrlc::set_handler(move || {
            flag.store(true, Ordering::Relaxed);
        });
    }

    let mut runner = match Runner::new(&cfg, &set, engine.as_ref(), &repo_root, stop_flag) {
        Ok(runner) => runner,
        Err(e) => {
            output::error(&e.to_string());
            return e.exit_code();
        }
    };

    let ok = runner.run();
    if !ok {
        return ExitCode::Failure;
    }

    show_summary(&cfg, &runner);
    ExitCode::Success
}

/// Locates the PRD, prepares the run directory, and generates the tasks
/// file when this is the first run for the prd-id.
fn prepare_fresh_run(
    cfg: &mut Config,
    engine: &dyn Engine,
    repo_root: &Path,
) -> Result<PathBuf, ExitCode> {
    let mut prd_path = cfg.prd_file.clone();
    if !prd_path.is_file() {
        match find_prd_file() {
            Some(found) => prd_path = found,
            None => {
                output::error(&format!("{} not found", cfg.prd_file.display()));
                return Err(ExitCode::Usage);
            }
        }
    }

    cfg.prd_id = extract_prd_id(&prd_path);
    if cfg.prd_id.is_empty() {
        output::error("PRD missing prd-id. Add 'prd-id: your-id' after the title.");
        return Err(ExitCode::Usage);
    }

    let run_dir = match setup_run_dir(&cfg.prd_id) {
        Ok(dir) => dir,
        Err(e) => {
            output::error(&e.to_string());
            return Err(e.exit_code());
        }
    };
    cfg.run_dir = run_dir.clone();

    if let Err(e) = copy_prd_to_run_dir(&prd_path, &run_dir) {
        output::error(&e.to_string());
        return Err(e.exit_code());
    }

    let tasks_path = run_dir.join("tasks.yaml");
    if tasks_path.is_file() {
        output::info(&format!("Resuming existing run for {}", cfg.prd_id));
    } else {
        output::info(&format!("Generating tasks.yaml for {}…", cfg.prd_id));
        if let Err(e) = generate_tasks(engine, &prd_path, &tasks_path, repo_root) {
            output::error(&e.to_string());
            return Err(ExitCode::Failure);
        }
    }

    Ok(tasks_path)
}

fn show_dry_run(set: &TaskSet) {
    output::plain("============================================");
    output::plain("dagrun — Dry run (no execution)");
    if !set.branch_name.is_empty() {
        output::plain(&format!("Run branch: {}", set.branch_name));
    }

    let pending = set.pending_ids();
    if pending.is_empty() {
        output::success("No pending tasks.");
        output::plain("============================================");
        return;
    }

    output::info(&format!("Pending tasks: {}", pending.len()));
    let mut table = output::create_table(&["Task", "Title", "Depends on", "Mutex"]);
    for id in &pending {
        if let Some(task) = set.get(id) {
            table.add_row(vec![
                task.id.clone(),
                task.title.clone(),
                task.depends_on.join(", "),
                task.mutex.join(", "),
            ]);
        }
    }
    output::plain(&table.to_string());
    output::plain("============================================");
}

fn show_banner(cfg: &Config) {
    output::plain("============================================");
    output::plain("dagrun — Running until the PRD is complete");
    output::plain(&format!("Engine: {}", cfg.engine));
    output::plain(&format!("PRD: {} ({})", cfg.prd_id, cfg.run_dir.display()));

    let mut parts = Vec::new();
    if cfg.skip_tests {
        parts.push("no-tests".to_string());
    }
    if cfg.skip_lint {
        parts.push("no-lint".to_string());
    }
    if cfg.max_parallel == 1 {
        parts.push("sequential".to_string());
    } else {
        parts.push(format!("parallel:{}", cfg.max_parallel));
    }
    if cfg.max_iterations > 0 {
        parts.push(format!("max:{}", cfg.max_iterations));
    }
    output::plain(&format!("Mode: {}", parts.join(" ")));
    output::plain("============================================");
}

fn show_summary(cfg: &Config, runner: &Runner) {
    output::plain("");
    output::plain("============================================");
    output::success(&format!(
        "PRD complete! Finished {} task(s).",
        runner.iteration
    ));
    output::plain("============================================");
    output::plain(">>> Cost Summary");

    let input = runner.total_input_tokens;
    let output_tokens = runner.total_output_tokens;
    if input == 0 && output_tokens == 0 {
        output::plain(&format!(
            "Token usage not reported by the {} engine",
            cfg.engine
        ));
    } else {
        output::plain(&format!("Input tokens:  {input}"));
        output::plain(&format!("Output tokens: {output_tokens}"));
        output::plain(&format!("Total tokens:  {}", input + output_tokens));
        // Opaque passthrough plus a rough estimate line; no cost model.
        let estimate = (input as f64) * 0.000_003 + (output_tokens as f64) * 0.000_015;
        output::plain(&format!("Est. cost:     ${estimate:.4}"));
    }
    output::plain("============================================");
}

/// Reinstalls dagrun from the registry. The real installer is external;
/// this is a convenience wrapper around `cargo install`.
pub fn self_update() -> ExitCode {
    if !crate::adapters::engine::binary_on_path("cargo") {
        output::error("cargo not found; install dagrun manually with your package manager");
        return ExitCode::Usage;
    }
    output::info("Updating dagrun via cargo install…");
    let status = std::process::Command::new("cargo")
        .args(["install", "dagrun", "--locked", "--force"])
        .status();
    match status {
        Ok(status) if status.success() => {
            output::success("dagrun updated");
            ExitCode::Success
        }
        Ok(_) => {
            output::error("cargo install failed");
            ExitCode::Failure
        }
        Err(e) => {
            output::error(&format!("failed to run cargo: {e}"));
            ExitCode::Failure
        }
    }
}
