//! dagrun CLI entrypoint.

use clap::Parser;
use dagrun::cli::commands::Cli;
use dagrun::cli::{output, run};
use dagrun::core::error::ExitCode;
use dagrun::core::skills::{ensure_skills, SkillsMode};
use std::process;

fn main() {
    let cli = Cli::parse();
    output::set_verbose(cli.verbose);
    let exit_code = dispatch(cli);
    process::exit(i32::from(exit_code));
}

fn dispatch(cli: Cli) -> ExitCode {
    if cli.update {
        return run::self_update();
    }

    let init_skills = cli.init_skills;
    let cfg = cli.into_config();

    if init_skills {
        let Ok(repo_root) = std::env::current_dir() else {
            output::error("cannot determine current directory");
            return ExitCode::Usage;
        };
        return match ensure_skills(&cfg, &repo_root, SkillsMode::Install) {
            Ok(()) => ExitCode::Success,
            Err(e) => {
                output::error(&e.to_string());
                e.exit_code()
            }
        };
    }

    run::run_pipeline(cfg)
}
