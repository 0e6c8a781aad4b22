//! Run configuration.
//!
//! Built once in `main` from CLI flags and passed explicitly; nothing here
//! is re-exposed as ambient process state.

use crate::adapters::EngineKind;
use std::path::PathBuf;

/// Default base URL for downloadable skill bundles.
pub const DEFAULT_SKILLS_URL: &str =
    "https://raw.githubusercontent.com/dagrun/skills/main/skills";

/// Runtime configuration for one run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Engine used for task execution, translation, and conflict resolution.
    pub engine: EngineKind,

    /// Skip full test suite execution in task prompts.
    pub skip_tests: bool,
    /// Skip full lint execution in task prompts.
    pub skip_lint: bool,

    /// Maximum concurrent agents. Sequential mode is 1.
    pub max_parallel: usize,
    /// Stop after this many task launches (0 = unbounded).
    pub max_iterations: usize,
    /// Retries per task for internal failures.
    pub max_retries: u32,
    /// Fixed delay between retries, seconds.
    pub retry_delay: u64,
    /// How long to await running agents after an external failure, seconds.
    pub external_fail_timeout: u64,
    /// Inactivity window before an agent is considered stalled, seconds.
    pub stalled_timeout: u64,
    /// Show the plan without executing.
    pub dry_run: bool,

    /// Base/integration branch. Resolved at startup when empty.
    pub base_branch: String,

    /// Requirements document path.
    pub prd_file: PathBuf,
    /// prd-id extracted from the requirements document.
    pub prd_id: String,
    /// Run directory (`artifacts/prd/<prd-id>`), set during startup.
    pub run_dir: PathBuf,
    /// Resume a previous run by prd-id.
    pub resume_prd_id: String,

    /// Base URL for skill downloads.
    pub skills_base_url: String,

    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineKind::Claude,
            skip_tests: false,
            skip_lint: false,
            max_parallel: 3,
            max_iterations: 0,
            max_retries: 3,
            retry_delay: 5,
            external_fail_timeout: 300,
            stalled_timeout: 600,
            dry_run: false,
            base_branch: String::new(),
            prd_file: PathBuf::from("PRD.md"),
            prd_id: String::new(),
            run_dir: PathBuf::new(),
            resume_prd_id: String::new(),
            skills_base_url: DEFAULT_SKILLS_URL.to_string(),
            verbose: false,
        }
    }
}

impl Config {
    /// Forces sequential execution.
    #[must_use]
    pub fn sequential(mut self) -> Self {
        self.max_parallel = 1;
        self
    }
}
