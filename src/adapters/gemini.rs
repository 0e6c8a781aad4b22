//! Google Gemini CLI engine adapter.

use super::engine::{binary_on_path, Engine, EngineResult};
use serde_json::Value;
use std::path::Path;
use std::process::Child;
use std::time::Duration;

/// Windows and long prompts: route the prompt through stdin to avoid
/// command-line length limits (~32KB).
const STDIN_THRESHOLD: usize = 8000;

fn use_stdin(prompt: &str) -> bool {
    prompt.len() > STDIN_THRESHOLD || cfg!(target_os = "windows")
}

fn stdin_cmd() -> Vec<String> {
    vec![
        "gemini".to_string(),
        "--output-format".to_string(),
        "json".to_string(),
        "-".to_string(),
    ]
}

pub struct GeminiEngine;

impl Engine for GeminiEngine {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn build_cmd(&self, prompt: &str) -> Vec<String> {
        vec![
            "gemini".to_string(),
            "--output-format".to_string(),
            "json".to_string(),
            "-p".to_string(),
            prompt.to_string(),
        ]
    }

    fn run_sync(&self, prompt: &str, cwd: &Path, timeout: Option<Duration>) -> EngineResult {
        if use_stdin(prompt) {
            self.run_sync_cmd(&stdin_cmd(), Some(prompt), cwd, timeout)
        } else {
            self.run_sync_cmd(&self.build_cmd(prompt), None, cwd, timeout)
        }
    }

    fn run_async(
        &self,
        prompt: &str,
        cwd: &Path,
        stream_file: &Path,
        log_file: &Path,
    ) -> std::io::Result<Child> {
        if use_stdin(prompt) {
            self.launch_async_cmd(&stdin_cmd(), Some(prompt), cwd, stream_file, log_file)
        } else {
            self.launch_async_cmd(&self.build_cmd(prompt), None, cwd, stream_file, log_file)
        }
    }

    fn parse_output(&self, raw: &str) -> EngineResult {
        let mut result = EngineResult::default();

        for line in raw.lines() {
            let stripped = line.trim();
            if stripped.is_empty() {
                continue;
            }
            let Ok(obj) = serde_json::from_str::<Value>(stripped) else {
                continue;
            };

            if result.text.is_empty() {
                for key in ["response", "result", "text"] {
                    if let Some(text) = obj.get(key).and_then(Value::as_str) {
                        if !text.is_empty() {
                            result.text = text.to_string();
                            break;
                        }
                    }
                }
            }

            let usage = obj.get("usage").or_else(|| obj.get("usageMetadata"));
            if let Some(usage) = usage {
                result.input_tokens = usage
                    .get("input_tokens")
                    .or_else(|| usage.get("promptTokenCount"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                result.output_tokens = usage
                    .get("output_tokens")
                    .or_else(|| usage.get("candidatesTokenCount"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
            }
        }

        if result.text.is_empty() {
            let stripped = raw.trim();
            result.text = if stripped.is_empty() {
                "Task completed".to_string()
            } else {
                stripped.to_string()
            };
        }
        result
    }

    fn check_available(&self) -> Option<String> {
        if binary_on_path("gemini") {
            None
        } else {
            Some(
                "Gemini CLI not found. Install from https://github.com/google-gemini/gemini-cli"
                    .to_string(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_response_with_camel_case_usage() {
        let raw = "{\"response\":\"hi\",\"usageMetadata\":{\"promptTokenCount\":7,\"candidatesTokenCount\":3}}\n";
        let result = GeminiEngine.parse_output(raw);
        assert_eq!(result.text, "hi");
        assert_eq!(result.input_tokens, 7);
        assert_eq!(result.output_tokens, 3);
    }

    #[test]
    fn falls_back_to_raw_text() {
        let result = GeminiEngine.parse_output("plain answer\n");
        assert_eq!(result.text, "plain answer");
    }

    #[test]
    fn short_prompts_go_on_the_command_line() {
        assert!(!use_stdin("short prompt") || cfg!(target_os = "windows"));
        let cmd = GeminiEngine.build_cmd("short prompt");
        assert_eq!(cmd[3], "-p");
        assert_eq!(cmd[4], "short prompt");
    }

    #[test]
    fn long_prompts_switch_to_stdin() {
        let long = "x".repeat(STDIN_THRESHOLD + 1);
        assert!(use_stdin(&long));
        let cmd = stdin_cmd();
        assert_eq!(cmd.last().unwrap(), "-");
        assert!(!cmd.iter().any(|a| a == "-p"));
    }
}
