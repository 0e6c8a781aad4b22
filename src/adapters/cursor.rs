//! Cursor agent engine adapter.

use super::engine::{binary_on_path, Engine, EngineResult};
use serde_json::Value;

pub struct CursorEngine;

impl Engine for CursorEngine {
    fn name(&self) -> &'static str {
        "cursor"
    }

    fn build_cmd(&self, prompt: &str) -> Vec<String> {
        vec![
            "agent".to_string(),
            "--print".to_string(),
            "--force".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            prompt.to_string(),
        ]
    }

    fn parse_output(&self, raw: &str) -> EngineResult {
        let mut result = EngineResult::default();

        for line in raw.lines() {
            if !line.contains("\"type\":\"result\"") {
                continue;
            }
            if let Ok(obj) = serde_json::from_str::<Value>(line) {
                if let Some(text) = obj.get("result").and_then(Value::as_str) {
                    result.text = text.to_string();
                }
                if let Some(duration) = obj.get("duration_ms").and_then(Value::as_u64) {
                    result.duration_ms = duration;
                }
            }
        }

        // Cursor often omits the result record, or fills it with the
        // generic placeholder; assistant messages carry the real text.
        if result.text.is_empty() || result.text == "Task completed" {
            for line in raw.lines() {
                if !line.contains("\"type\":\"assistant\"") {
                    continue;
                }
                if let Ok(obj) = serde_json::from_str::<Value>(line) {
                    let text = obj
                        .get("message")
                        .and_then(|m| m.get("content"))
                        .and_then(Value::as_array)
                        .and_then(|content| content.first())
                        .and_then(|part| part.get("text"))
                        .and_then(Value::as_str);
                    if let Some(text) = text {
                        if !text.is_empty() {
                            result.text = text.to_string();
                        }
                    }
                }
            }
        }

        // Cursor doesn't provide token counts.
        if result.text.is_empty() {
            result.text = "Task completed".to_string();
        }
        result
    }

    fn check_available(&self) -> Option<String> {
        if binary_on_path("agent") {
            None
        } else {
            Some(
                "Cursor agent CLI not found. Make sure Cursor is installed and 'agent' is in your PATH."
                    .to_string(),
            )
        }
    }
}
