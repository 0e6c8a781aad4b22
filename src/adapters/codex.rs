//! Codex CLI engine adapter.

use super::engine::{binary_on_path, Engine, EngineResult};

pub struct CodexEngine;

impl Engine for CodexEngine {
    fn name(&self) -> &'static str {
        "codex"
    }

    fn build_cmd(&self, prompt: &str) -> Vec<String> {
        vec![
            "codex".to_string(),
            "exec".to_string(),
            "--full-auto".to_string(),
            "--json".to_string(),
            prompt.to_string(),
        ]
    }

    fn parse_output(&self, raw: &str) -> EngineResult {
        // Codex output is simpler; success is judged by commit detection.
        let mut result = EngineResult::default();
        let cleaned: Vec<&str> = raw
            .lines()
            .filter(|l| l.trim() != "Task completed successfully.")
            .collect();
        result.text = if cleaned.iter().all(|l| l.trim().is_empty()) {
            "Task completed".to_string()
        } else {
            cleaned.join("\n")
        };
        result
    }

    fn check_available(&self) -> Option<String> {
        if binary_on_path("codex") {
            None
        } else {
            Some("Codex CLI not found. Make sure 'codex' is in your PATH.".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_shape() {
        let cmd = CodexEngine.build_cmd("p");
        assert_eq!(cmd, vec!["codex", "exec", "--full-auto", "--json", "p"]);
    }

    #[test]
    fn strips_generic_completion_line() {
        let result = CodexEngine.parse_output("real output\nTask completed successfully.\n");
        assert_eq!(result.text, "real output");
    }

    #[test]
    fn empty_output_falls_back() {
        let result = CodexEngine.parse_output("");
        assert_eq!(result.text, "Task completed");
    }
}
