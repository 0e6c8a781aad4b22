//! OpenCode engine adapter.

use super::engine::{binary_on_path, Engine, EngineResult};
use serde_json::Value;

const DEFAULT_MODEL: &str = "opencode/minimax-m2.1-free";

pub struct OpencodeEngine {
    model: String,
}

impl Default for OpencodeEngine {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

impl OpencodeEngine {
    #[must_use]
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl Engine for OpencodeEngine {
    fn name(&self) -> &'static str {
        "opencode"
    }

    fn build_cmd(&self, prompt: &str) -> Vec<String> {
        let mut cmd = vec![
            "opencode".to_string(),
            "run".to_string(),
            "--format".to_string(),
            "json".to_string(),
        ];
        if !self.model.is_empty() {
            cmd.push("--model".to_string());
            cmd.push(self.model.clone());
        }
        cmd.push(prompt.to_string());
        cmd
    }

    fn extra_env(&self) -> Vec<(String, String)> {
        vec![(
            "OPENCODE_PERMISSION".to_string(),
            "{\"*\":\"allow\"}".to_string(),
        )]
    }

    fn parse_output(&self, raw: &str) -> EngineResult {
        let mut result = EngineResult::default();

        for line in raw.lines() {
            if line.contains("\"type\":\"step_finish\"") {
                if let Ok(obj) = serde_json::from_str::<Value>(line) {
                    if let Some(tokens) = obj.get("part").and_then(|p| p.get("tokens")) {
                        result.input_tokens =
                            tokens.get("input").and_then(Value::as_u64).unwrap_or(0);
                        result.output_tokens =
                            tokens.get("output").and_then(Value::as_u64).unwrap_or(0);
                    }
                }
            }
        }

        let mut parts = Vec::new();
        for line in raw.lines() {
            if line.contains("\"type\":\"text\"") {
                if let Ok(obj) = serde_json::from_str::<Value>(line) {
                    if let Some(text) = obj
                        .get("part")
                        .and_then(|p| p.get("text"))
                        .and_then(Value::as_str)
                    {
                        if !text.is_empty() {
                            parts.push(text.to_string());
                        }
                    }
                }
            }
        }

        result.text = if parts.is_empty() {
            "Task completed".to_string()
        } else {
            parts.concat()
        };
        result
    }

    fn check_available(&self) -> Option<String> {
        if binary_on_path("opencode") {
            None
        } else {
            Some("OpenCode CLI not found. Install from https://opencode.ai/docs/".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_includes_model_and_permission_env() {
        let engine = OpencodeEngine::default();
        let cmd = engine.build_cmd("p");
        assert_eq!(cmd[0], "opencode");
        assert!(cmd.contains(&"--model".to_string()));
        assert_eq!(cmd.last().unwrap(), "p");

        let env = engine.extra_env();
        assert_eq!(env[0].0, "OPENCODE_PERMISSION");
    }

    #[test]
    fn parses_tokens_and_text_events() {
        let raw = concat!(
            "{\"type\":\"text\",\"part\":{\"text\":\"hello \"}}\n",
            "{\"type\":\"text\",\"part\":{\"text\":\"world\"}}\n",
            "{\"type\":\"step_finish\",\"part\":{\"tokens\":{\"input\":10,\"output\":20},\"cost\":0.1}}\n",
        );
        let result = OpencodeEngine::default().parse_output(raw);
        assert_eq!(result.text, "hello world");
        assert_eq!(result.input_tokens, 10);
        assert_eq!(result.output_tokens, 20);
    }
}
