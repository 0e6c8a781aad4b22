//! Requirements-to-tasks translation.
//!
//! A single one-shot agent call turns the requirements document into the
//! tasks file. The call is treated as a pure function: prompt in, tasks
//! file out, validated separately by the load gate.

use crate::adapters::Engine;
use crate::cli::output;
use crate::core::error::{Result, RunError};
use crate::core::validate::MUTEX_CATALOG;
use std::fs;
use std::path::Path;

/// Generates the tasks file from a requirements document.
pub fn generate_tasks(
    engine: &dyn Engine,
    prd_path: &Path,
    output_path: &Path,
    cwd: &Path,
) -> Result<()> {
    // Inline the document so every engine receives it (some don't support
    // @path references).
    let prd_content = fs::read_to_string(prd_path).map_err(|e| {
        RunError::system("prd_read_failed", format!("{}: {e}", prd_path.display()))
    })?;

    let prompt = build_translation_prompt(&prd_content, output_path);
    let result = engine.run_sync(&prompt, cwd, None);

    if !output_path.is_file() {
        // Some engines answer with the YAML instead of writing the file.
        if let Some(yaml) = extract_tasks_yaml(&result.text) {
            if let Some(parent) = output_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(output_path, yaml)?;
        }
    }

    if !output_path.is_file() {
        let mut message = format!("agent failed to create {}", output_path.display());
        if !result.error.is_empty() {
            message.push_str(&format!(": {}", result.error));
        }
        return Err(RunError::engine("tasks_generation_failed", message));
    }

    output::success(&format!("Generated {}", output_path.display()));
    Ok(())
}

fn build_translation_prompt(prd_content: &str, output_path: &Path) -> String {
    format!(
        "Convert this PRD to tasks.yaml format.\n\n\
         PRD content:\n\
         ---\n\
         {prd_content}\n\
         ---\n\n\
         Create a tasks.yaml file with this EXACT format:\n\n\
         branchName: dagrun/your-feature-name\n\
         tasks:\n\
           - id: TASK-001\n\
             title: \"First task description\"\n\
             completed: false\n\
             dependsOn: []\n\
             mutex: []\n\
           - id: TASK-002\n\
             title: \"Second task description\"\n\
             completed: false\n\
             dependsOn: [\"TASK-001\"]\n\
             mutex: []\n\n\
         Rules:\n\
         1. Each task gets a unique ID (TASK-001, TASK-002, etc.)\n\
         2. Order tasks by dependency (database first, then backend, then frontend)\n\
         3. Use dependsOn to link tasks that must run after others\n\
         4. Use mutex for shared resources: {}\n\
         5. Set branchName to a short kebab-case feature name prefixed with \"dagrun/\" (based on the PRD)\n\
         6. Keep tasks small and focused (completable in one session)\n\n\
         Save the file as {}.\n\
         Do NOT implement anything - only create the tasks.yaml file.",
        MUTEX_CATALOG.join(", "),
        output_path.display()
    )
}

/// Extracts a tasks.yaml document embedded in engine response text.
/// Returns the YAML starting at the `branchName:` line.
#[must_use]
pub fn extract_tasks_yaml(text: &str) -> Option<String> {
    if !text.contains("branchName:") || !text.contains("tasks:") {
        return None;
    }
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.iter().position(|l| l.contains("branchName:"))?;
    let yaml = lines[start..].join("\n").trim().to_string();
    if yaml.contains("tasks:") {
        Some(yaml)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::EngineResult;
    use std::time::Duration;

    struct TextEngine(&'static str);

    impl Engine for TextEngine {
        fn name(&self) -> &'static str {
            "text"
        }
        fn build_cmd(&self, _prompt: &str) -> Vec<String> {
            vec!["true".to_string()]
        }
        fn parse_output(&self, _raw: &str) -> EngineResult {
            EngineResult::default()
        }
        fn run_sync(&self, _p: &str, _cwd: &Path, _t: Option<Duration>) -> EngineResult {
            EngineResult {
                text: self.0.to_string(),
                ..EngineResult::default()
            }
        }
    }

    #[test]
    fn extracts_yaml_from_chatty_response() {
        let text = "Sure! Here is the file:\n\nbranchName: dagrun/auth\ntasks:\n  - id: TASK-001\n    title: \"x\"\n";
        let yaml = extract_tasks_yaml(text).unwrap();
        assert!(yaml.starts_with("branchName:"));
        assert!(yaml.contains("TASK-001"));
    }

    #[test]
    fn rejects_text_without_structure() {
        assert!(extract_tasks_yaml("no yaml here").is_none());
        assert!(extract_tasks_yaml("branchName: x but no task list").is_none());
    }

    #[test]
    fn falls_back_to_response_text_when_file_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let prd = tmp.path().join("PRD.md");
        fs::write(&prd, "# PRD: x\nprd-id: x\n").unwrap();
        let out = tmp.path().join("tasks.yaml");

        let engine = TextEngine(
            "branchName: dagrun/x\ntasks:\n  - id: TASK-001\n    title: \"only task\"\n    completed: false\n",
        );
        generate_tasks(&engine, &prd, &out, tmp.path()).unwrap();

        let set = crate::core::tasks::load_task_set(&out).unwrap();
        assert_eq!(set.tasks.len(), 1);
        assert_eq!(set.branch_name, "dagrun/x");
    }

    #[test]
    fn errors_when_nothing_produced() {
        let tmp = tempfile::tempdir().unwrap();
        let prd = tmp.path().join("PRD.md");
        fs::write(&prd, "# PRD: x\nprd-id: x\n").unwrap();
        let out = tmp.path().join("tasks.yaml");

        let engine = TextEngine("I could not do that.");
        assert!(generate_tasks(&engine, &prd, &out, tmp.path()).is_err());
    }
}
