//! Failure classification.
//!
//! Classification is syntactic: substring matching on the last non-debug
//! line of the task log (falling back to structured errors in the stream
//! file). The pattern lists below are part of the contract.

use serde_json::Value;
use std::fs;
use std::path::Path;

/// Where the blame for a task failure lies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Cause outside the agent's control: network, permissions,
    /// certificates, package installation, lockfile contention, DNS,
    /// timeouts. Triggers graceful stop.
    External,
    /// The agent failed logically. Retried, then the task fails alone.
    Internal,
    /// No message to classify.
    Unknown,
}

impl FailureKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::External => "external",
            Self::Internal => "internal",
            Self::Unknown => "unknown",
        }
    }
}

/// Infrastructure and toolchain signatures.
const EXTERNAL_PATTERNS: &[&str] = &[
    "buninstallfailederror",
    "command not found",
    "commandnotfoundexception",
    "objectnotfound:",
    "enoent",
    "eacces",
    "permission denied",
    "network",
    "timeout",
    "tls",
    "econnreset",
    "etimedout",
    "dns",
    "lockfile",
    "install",
    "certificate",
    "ssl",
];

const RATE_LIMIT_PATTERNS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "usage limit",
    "you've hit your limit",
    "quota",
    "429",
    "too many requests",
];

const POLICY_BLOCK_PATTERNS: &[&str] = &[
    "blocked by policy",
    "read-only sandbox",
    "approval_policy",
];

const MERGE_CONFLICT_PATTERNS: &[&str] = &[
    "automatic merge failed",
    "conflict (content)",
    "conflict in ",
    "merge conflict",
];

fn contains_any(text: &str, patterns: &[&str]) -> bool {
    let lower = text.to_lowercase();
    patterns.iter().any(|p| lower.contains(p))
}

/// True when text matches a rate/usage/quota limit.
#[must_use]
pub fn looks_like_rate_limit(text: &str) -> bool {
    !text.is_empty() && contains_any(text, RATE_LIMIT_PATTERNS)
}

/// True when text indicates policy/sandbox blocking.
#[must_use]
pub fn looks_like_policy_block(text: &str) -> bool {
    !text.is_empty() && contains_any(text, POLICY_BLOCK_PATTERNS)
}

/// True for textual git merge conflict failures.
#[must_use]
pub fn looks_like_merge_conflict(text: &str) -> bool {
    !text.is_empty() && contains_any(text, MERGE_CONFLICT_PATTERNS)
}

/// True when the failure looks infrastructural/external.
#[must_use]
pub fn looks_like_external_failure(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    looks_like_rate_limit(text)
        || looks_like_policy_block(text)
        || contains_any(text, EXTERNAL_PATTERNS)
}

/// Classifies a failure message. An empty message is `Unknown`; merge
/// conflicts classify as internal (they are resolved or failed in-run,
/// never a reason to stop dispatching).
#[must_use]
pub fn classify(message: &str) -> FailureKind {
    if message.is_empty() {
        FailureKind::Unknown
    } else if looks_like_merge_conflict(message) {
        FailureKind::Internal
    } else if looks_like_external_failure(message) {
        FailureKind::External
    } else {
        FailureKind::Internal
    }
}

/// Extracts an error message from one stream line.
///
/// Returns `(message, was_structured_json)`. Engines interleave JSON
/// records with free text, so non-JSON lines are passed through untouched.
fn extract_structured_error_line(line: &str) -> (String, bool) {
    let Ok(obj) = serde_json::from_str::<Value>(line) else {
        return (String::new(), false);
    };
    let Some(obj) = obj.as_object() else {
        return (String::new(), true);
    };

    let event_type = obj
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_lowercase();

    if event_type == "result" {
        match obj.get("is_error") {
            Some(Value::Bool(false)) => return (String::new(), true),
            Some(Value::Bool(true)) => {
                if let Some(text) = obj.get("result").and_then(Value::as_str) {
                    if !text.trim().is_empty() {
                        return (text.trim().to_string(), true);
                    }
                }
            }
            _ => {}
        }
    }

    match obj.get("error") {
        Some(Value::Object(err)) => {
            if let Some(msg) = err.get("message").and_then(Value::as_str) {
                if !msg.trim().is_empty() {
                    return (msg.trim().to_string(), true);
                }
            }
        }
        Some(Value::String(err)) => {
            if !err.trim().is_empty() {
                return (err.trim().to_string(), true);
            }
        }
        _ => {}
    }

    if event_type == "error" {
        for key in ["message", "text"] {
            if let Some(msg) = obj.get(key).and_then(Value::as_str) {
                if !msg.trim().is_empty() {
                    return (msg.trim().to_string(), true);
                }
            }
        }
        return ("Unknown error".to_string(), true);
    }

    (String::new(), true)
}

/// Gets the most relevant error line from the task's stderr log, falling
/// back to the structured stream.
///
/// The log wins: its last non-empty line that is not a `[DEBUG]` line.
/// In the stream, structured error records beat plain-text heuristics, and
/// non-error JSON events are never misread as errors.
#[must_use]
pub fn extract_error_from_logs(log_file: &Path, stream_file: &Path) -> String {
    if let Ok(content) = fs::read_to_string(log_file) {
        let last = content
            .lines()
            .filter(|l| !l.starts_with("[DEBUG]") && !l.trim().is_empty())
            .next_back();
        if let Some(line) = last {
            return line.to_string();
        }
    }

    let Ok(stream) = fs::read_to_string(stream_file) else {
        return String::new();
    };

    if let Some(err) = crate::adapters::engine::check_stream_errors(&stream) {
        return err;
    }

    for line in stream.lines().rev() {
        let stripped = line.trim();
        if stripped.is_empty() {
            continue;
        }
        let lower = stripped.to_lowercase();
        if lower.contains("blocked by policy") {
            return "Blocked by policy".to_string();
        }

        let (structured, is_json) = extract_structured_error_line(stripped);
        if !structured.is_empty() {
            return structured;
        }
        if lower.contains("exception") || lower.contains("traceback") {
            return stripped.to_string();
        }
        // Non-error JSON events can carry snippets like {"error": "..."}
        // inside tool payload text; never pattern-match those.
        if is_json {
            continue;
        }
        if lower.starts_with("error") || lower.contains(" error:") {
            return stripped.to_string();
        }
    }

    String::new()
}
