//! Skill bundle installation and checking.
//!
//! Engines consume prompt bundles ("skills") from engine-specific project
//! directories. `--init` downloads any that are missing; a normal run only
//! warns about gaps.

use crate::adapters::EngineKind;
use crate::cli::output;
use crate::core::config::Config;
use crate::core::error::{Result, RunError};
use std::fs;
use std::path::PathBuf;

/// Skills every run expects to find installed.
pub const REQUIRED_SKILLS: [&str; 7] = [
    "prd",
    "ralph",
    "task-metadata",
    "dag-planner",
    "parallel-safe-implementation",
    "merge-integrator",
    "semantic-reviewer",
];

/// How strictly to enforce skill presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkillsMode {
    /// Download and install anything missing.
    Install,
    /// Log a warning for anything missing.
    Warn,
}

/// Project-relative install path for a skill under the given engine.
#[must_use]
pub fn skill_path(engine: EngineKind, skill: &str) -> PathBuf {
    match engine {
        EngineKind::Claude => PathBuf::from(format!(".claude/skills/{skill}/SKILL.md")),
        EngineKind::Codex => PathBuf::from(format!(".codex/skills/{skill}/SKILL.md")),
        EngineKind::Opencode => PathBuf::from(format!(".opencode/skill/{skill}/SKILL.md")),
        EngineKind::Cursor => PathBuf::from(format!(".cursor/rules/{skill}.mdc")),
        EngineKind::Gemini => PathBuf::from(format!(".gemini/skills/{skill}/SKILL.md")),
    }
}

fn missing_skills(repo_root: &PathBuf, engine: EngineKind) -> Vec<&'static str> {
    REQUIRED_SKILLS
        .iter()
        .copied()
        .filter(|skill| !repo_root.join(skill_path(engine, skill)).is_file())
        .collect()
}

// Blocking client so installs can run straight from the CLI thread
// without an async runtime.
fn download_skill(skill: &str, base_url: &str) -> std::result::Result<String, String> {
    let url = format!("{}/{skill}/SKILL.md", base_url.trim_end_matches('/'));
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(15))
        .build()
        .unwrap_or_else(|_| reqwest::blocking::Client::new());
    let response = client.get(&url).send().map_err(|e| format!("{url}: {e}"))?;
    if !response.status().is_success() {
        return Err(format!("{url}: HTTP {}", response.status()));
    }
    response.text().map_err(|e| format!("{url}: {e}"))
}

fn install_skill(
    repo_root: &PathBuf,
    engine: EngineKind,
    skill: &str,
    base_url: &str,
) -> bool {
    let target = repo_root.join(skill_path(engine, skill));
    let content = match download_skill(skill, base_url) {
        Ok(content) => content,
        Err(e) => {
            output::error(&format!("Failed to download skill '{skill}': {e}"));
            return false;
        }
    };

    if let Some(parent) = target.parent() {
        if fs::create_dir_all(parent).is_err() {
            output::warn(&format!("No writable install path for skill '{skill}'"));
            return false;
        }
    }
    match fs::write(&target, content) {
        Ok(()) => {
            output::success(&format!(
                "Installed '{skill}' for {engine} at {}",
                target.display()
            ));
            true
        }
        Err(e) => {
            output::error(&format!("Failed to install '{skill}': {e}"));
            false
        }
    }
}

/// Checks (or installs) all required skills for the configured engine.
pub fn ensure_skills(cfg: &Config, repo_root: &PathBuf, mode: SkillsMode) -> Result<()> {
    let missing = missing_skills(repo_root, cfg.engine);

    match mode {
        SkillsMode::Install => {
            if missing.is_empty() {
                output::success(&format!("All skills already present for {}", cfg.engine));
                return Ok(());
            }
            let failures: Vec<&str> = missing
                .into_iter()
                .filter(|skill| {
                    !install_skill(repo_root, cfg.engine, skill, &cfg.skills_base_url)
                })
                .collect();
            if failures.is_empty() {
                Ok(())
            } else {
                Err(RunError::precondition(
                    "skills_install_failed",
                    format!(
                        "failed to install required skills for {}: {}",
                        cfg.engine,
                        failures.join(", ")
                    ),
                ))
            }
        }
        SkillsMode::Warn => {
            if !missing.is_empty() {
                output::warn(&format!(
                    "Missing skills for {}: {}. Run 'dagrun --init' to install.",
                    cfg.engine,
                    missing.join(", ")
                ));
            }
            Ok(())
        }
    }
}
