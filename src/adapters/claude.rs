//! Claude Code engine adapter.

use super::engine::{binary_on_path, Engine, EngineResult};
use serde_json::Value;

pub struct ClaudeEngine;

impl Engine for ClaudeEngine {
    fn name(&self) -> &'static str {
        "claude"
    }

    fn build_cmd(&self, prompt: &str) -> Vec<String> {
        vec![
            "claude".to_string(),
            "--dangerously-skip-permissions".to_string(),
            "--verbose".to_string(),
            "-p".to_string(),
            prompt.to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
        ]
    }

    fn parse_output(&self, raw: &str) -> EngineResult {
        let mut result = EngineResult::default();
        for line in raw.lines() {
            if !line.contains("\"type\":\"result\"") {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(obj) => {
                    if let Some(text) = obj.get("result").and_then(Value::as_str) {
                        result.text = text.to_string();
                    }
                    if let Some(usage) = obj.get("usage") {
                        result.input_tokens =
                            usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
                        result.output_tokens = usage
                            .get("output_tokens")
                            .and_then(Value::as_u64)
                            .unwrap_or(0);
                    }
                }
                Err(_) => result.text = "Could not parse result".to_string(),
            }
        }
        if result.text.is_empty() {
            result.text = "Task completed".to_string();
        }
        result
    }

    fn check_available(&self) -> Option<String> {
        if binary_on_path("claude") {
            None
        } else {
            Some(
                "Claude Code CLI not found. Install from https://github.com/anthropics/claude-code"
                    .to_string(),
            )
        }
    }
}
