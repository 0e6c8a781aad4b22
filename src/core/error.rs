//! Structured error types.
//!
//! Errors must be classifiable, attributable, and actionable.
//! Every error answers: What failed? Why? What can be done next?

use serde::{Deserialize, Serialize};

/// Error category for classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed tasks file, missing prd-id, bad references.
    Validation,
    /// Missing engine binary, unwritable run directory, dirty run branch.
    Precondition,
    /// Git operation errors.
    Git,
    /// Engine invocation errors.
    Engine,
    /// Task execution errors.
    Task,
    /// System-level errors (IO, etc.)
    System,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Precondition => write!(f, "precondition"),
            Self::Git => write!(f, "git"),
            Self::Engine => write!(f, "engine"),
            Self::Task => write!(f, "task"),
            Self::System => write!(f, "system"),
        }
    }
}

/// Structured error with full context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    /// Error category for classification.
    pub category: ErrorCategory,
    /// Unique error code within category.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Hint for recovery action.
    pub hint: Option<String>,
}

impl RunError {
    /// Creates a new error with the given parameters.
    #[must_use]
    pub fn new(
        category: ErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            hint: None,
        }
    }

    /// Sets the recovery hint.
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Validation, code, message)
    }

    /// Creates a precondition error.
    #[must_use]
    pub fn precondition(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Precondition, code, message)
    }

    /// Creates a git error.
    #[must_use]
    pub fn git(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Git, code, message)
    }

    /// Creates an engine error.
    #[must_use]
    pub fn engine(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Engine, code, message)
    }

    /// Creates a system error.
    #[must_use]
    pub fn system(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::System, code, message)
    }

    /// Exit code this error maps to: validation and precondition failures
    /// are usage errors, everything else is a run failure.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self.category {
            ErrorCategory::Validation | ErrorCategory::Precondition => ExitCode::Usage,
            _ => ExitCode::Failure,
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}:{}] {}", self.category, self.code, self.message)
    }
}

impl std::error::Error for RunError {}

impl From<std::io::Error> for RunError {
    fn from(e: std::io::Error) -> Self {
        Self::system("io_error", e.to_string())
    }
}

/// Result type using `RunError`.
pub type Result<T> = std::result::Result<T, RunError>;

/// Exit codes for the CLI.
///
/// 0: all tasks done. 1: any task failure, deadlock, or external-failure
/// stop. 2: invalid arguments, validation errors, or failed preconditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    Failure = 1,
    Usage = 2,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as Self
    }
}
