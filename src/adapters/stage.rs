//! Coarse stage labels derived from the agent stream.
//!
//! Engines report tool invocations as records in their stream output. A
//! small scanner maps tool names (and shell commands) to a stage label for
//! live status display. Labels are advisory only; nothing downstream
//! depends on them.

/// What the agent currently appears to be doing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Stage {
    /// Worktree created, agent not launched yet.
    #[default]
    Setup,
    Reading,
    Implementing,
    Testing,
    Linting,
    Committing,
    /// Agent active but no recognizable tool name seen.
    Working,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Setup => write!(f, "setting up"),
            Self::Reading => write!(f, "reading"),
            Self::Implementing => write!(f, "implementing"),
            Self::Testing => write!(f, "testing"),
            Self::Linting => write!(f, "linting"),
            Self::Committing => write!(f, "committing"),
            Self::Working => write!(f, "working"),
        }
    }
}

const READ_TOOLS: &[&str] = &["Read", "Grep", "Glob", "LS", "NotebookRead", "WebFetch"];
const EDIT_TOOLS: &[&str] = &["Edit", "Write", "MultiEdit", "NotebookEdit"];
const SHELL_TOOLS: &[&str] = &["Bash", "Shell", "shell", "bash", "command_execution"];

/// Extracts the quoted value following `"<key>":"` in a raw stream line.
/// Deliberately not a JSON parse: records may be truncated mid-line while
/// the agent is still writing.
fn field_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let marker = format!("\"{key}\":\"");
    let start = line.find(&marker)? + marker.len();
    let rest = &line[start..];
    let mut end = 0;
    let bytes = rest.as_bytes();
    while end < bytes.len() {
        if bytes[end] == b'"' && (end == 0 || bytes[end - 1] != b'\\') {
            break;
        }
        end += 1;
    }
    Some(&rest[..end])
}

fn stage_for_shell(command: &str) -> Stage {
    let lower = command.to_lowercase();
    if lower.contains("git commit") || lower.contains("git add") {
        Stage::Committing
    } else if lower.contains("test") || lower.contains("pytest") {
        Stage::Testing
    } else if lower.contains("lint")
        || lower.contains("clippy")
        || lower.contains("fmt")
        || lower.contains("ruff")
        || lower.contains("eslint")
    {
        Stage::Linting
    } else {
        Stage::Working
    }
}

fn stage_for_line(line: &str) -> Option<Stage> {
    let name = field_value(line, "name").or_else(|| field_value(line, "tool"))?;

    if READ_TOOLS.contains(&name) {
        return Some(Stage::Reading);
    }
    if EDIT_TOOLS.contains(&name) {
        return Some(Stage::Implementing);
    }
    if SHELL_TOOLS.contains(&name) {
        let command = field_value(line, "command").unwrap_or("");
        return Some(stage_for_shell(command));
    }
    Some(Stage::Working)
}

/// Derives the current stage from newly observed stream output. The last
/// recognizable tool record wins. `None` when the chunk carries no tool
/// records at all.
#[must_use]
pub fn stage_from_chunk(chunk: &str) -> Option<Stage> {
    chunk.lines().rev().find_map(stage_for_line)
}
