//! Engine adapters for agent execution.
//!
//! This module provides the adapter interface and implementations for the
//! supported AI coding-agent CLIs. Adapters are the bridge between the
//! orchestration layer and actual agent execution; they own the invocation
//! shape and the stream format of their engine and nothing else.
//!
//! # Supported Engines
//!
//! | Adapter | Binary | Stream format |
//! |---------|--------|---------------|
//! | `claude` | `claude` | stream-json |
//! | `codex` | `codex` | json lines |
//! | `opencode` | `opencode` | json events |
//! | `gemini` | `gemini` | json |
//! | `cursor` | `agent` | stream-json |

pub mod claude;
pub mod codex;
pub mod cursor;
pub mod engine;
pub mod gemini;
pub mod opencode;
pub mod stage;

pub use engine::{Engine, EngineResult};

use clap::ValueEnum;

/// Supported engine names, in default preference order.
pub const SUPPORTED_ENGINES: [&str; 5] = ["claude", "codex", "opencode", "gemini", "cursor"];

/// Engine selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum EngineKind {
    #[default]
    Claude,
    Codex,
    Opencode,
    Gemini,
    Cursor,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Claude => write!(f, "claude"),
            Self::Codex => write!(f, "codex"),
            Self::Opencode => write!(f, "opencode"),
            Self::Gemini => write!(f, "gemini"),
            Self::Cursor => write!(f, "cursor"),
        }
    }
}

/// Returns the adapter for an engine kind.
#[must_use]
pub fn get_engine(kind: EngineKind) -> Box<dyn Engine> {
    match kind {
        EngineKind::Claude => Box::new(claude::ClaudeEngine),
        EngineKind::Codex => Box::new(codex::CodexEngine),
        EngineKind::Opencode => Box::new(opencode::OpencodeEngine::default()),
        EngineKind::Gemini => Box::new(gemini::GeminiEngine),
        EngineKind::Cursor => Box::new(cursor::CursorEngine),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_resolves_to_an_adapter() {
        for kind in [
            EngineKind::Claude,
            EngineKind::Codex,
            EngineKind::Opencode,
            EngineKind::Gemini,
            EngineKind::Cursor,
        ] {
            let engine = get_engine(kind);
            assert_eq!(engine.name(), kind.to_string());
        }
    }
}
