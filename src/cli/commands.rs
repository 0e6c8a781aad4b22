//! CLI argument definitions.

use crate::adapters::EngineKind;
use crate::core::config::{Config, DEFAULT_SKILLS_URL};
use clap::Parser;
use std::path::PathBuf;

/// dagrun - DAG-aware parallel task runner for coding agents.
///
/// Reads a requirements document (PRD), generates tasks.yaml, and runs
/// coding agents in parallel using a DAG scheduler with mutex support.
#[derive(Debug, Parser)]
#[command(name = "dagrun", version, about)]
pub struct Cli {
    /// Engine used to execute tasks
    #[arg(long, value_enum, default_value_t = EngineKind::Claude)]
    pub engine: EngineKind,

    /// Run tasks one at a time
    #[arg(long)]
    pub sequential: bool,

    /// Max concurrent tasks
    #[arg(long, default_value_t = 3)]
    pub max_parallel: usize,

    /// Stop after N task launches (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    pub max_iterations: usize,

    /// Max retries per task
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Seconds between retries
    #[arg(long, default_value_t = 5)]
    pub retry_delay: u64,

    /// Seconds to await running tasks after an external failure
    #[arg(long, default_value_t = 300)]
    pub external_fail_timeout: u64,

    /// Seconds of silence before killing a stalled agent
    #[arg(long, default_value_t = 600)]
    pub stalled_timeout: u64,

    /// Show the plan without executing
    #[arg(long)]
    pub dry_run: bool,

    /// Base branch for task branches (defaults to the current branch)
    #[arg(long, default_value = "")]
    pub base_branch: String,

    /// Requirements document path
    #[arg(long = "prd", default_value = "PRD.md")]
    pub prd_file: PathBuf,

    /// Resume a previous run by prd-id
    #[arg(long = "resume", default_value = "")]
    pub resume: String,

    /// Install missing skills and exit
    #[arg(long = "init")]
    pub init_skills: bool,

    /// Override the skills base URL
    #[arg(long, default_value = "")]
    pub skills_url: String,

    /// Reinstall the latest dagrun and exit
    #[arg(long)]
    pub update: bool,

    /// Skip tests in task prompts
    #[arg(long)]
    pub no_tests: bool,

    /// Skip linting in task prompts
    #[arg(long)]
    pub no_lint: bool,

    /// Skip both tests and linting
    #[arg(long)]
    pub fast: bool,

    /// Show debug output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Builds the run configuration. Happens once; everything downstream
    /// receives the config explicitly.
    #[must_use]
    pub fn into_config(self) -> Config {
        let skills_base_url = if self.skills_url.is_empty() {
            std::env::var("DAGRUN_SKILLS_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_SKILLS_URL.to_string())
        } else {
            self.skills_url
        };

        let cfg = Config {
            engine: self.engine,
            skip_tests: self.no_tests || self.fast,
            skip_lint: self.no_lint || self.fast,
            max_parallel: self.max_parallel,
            max_iterations: self.max_iterations,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            external_fail_timeout: self.external_fail_timeout,
            stalled_timeout: self.stalled_timeout,
            dry_run: self.dry_run,
            base_branch: self.base_branch,
            prd_file: self.prd_file,
            prd_id: String::new(),
            run_dir: PathBuf::new(),
            resume_prd_id: self.resume,
            skills_base_url,
            verbose: self.verbose,
        };

        if self.sequential {
            cfg.sequential()
        } else {
            cfg
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let cli = Cli::parse_from(["dagrun"]);
        let cfg = cli.into_config();
        assert_eq!(cfg.engine, EngineKind::Claude);
        assert_eq!(cfg.max_parallel, 3);
        assert!(!cfg.dry_run);
    }

    #[test]
    fn sequential_forces_single_slot() {
        let cli = Cli::parse_from(["dagrun", "--sequential", "--max-parallel", "8"]);
        let cfg = cli.into_config();
        assert_eq!(cfg.max_parallel, 1);
    }

    #[test]
    fn fast_implies_both_skips() {
        let cli = Cli::parse_from(["dagrun", "--fast"]);
        let cfg = cli.into_config();
        assert!(cfg.skip_tests);
        assert!(cfg.skip_lint);
    }

    #[test]
    fn engine_flag_parses() {
        let cli = Cli::parse_from(["dagrun", "--engine", "codex"]);
        assert_eq!(cli.engine, EngineKind::Codex);
    }

    #[test]
    fn unknown_engine_is_a_usage_error() {
        assert!(Cli::try_parse_from(["dagrun", "--engine", "weird"]).is_err());
    }
}
