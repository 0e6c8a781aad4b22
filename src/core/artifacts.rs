//! Per-run artifacts: task reports and raw agent logs.
//!
//! Everything lives under `artifacts/prd/<prd-id>/`. The writer is
//! append-only within a run; resuming never truncates prior reports.

use crate::core::error::{Result, RunError};
use crate::core::failure::FailureKind;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Maximum progress-notes lines carried into a report.
const NOTES_TAIL_LINES: usize = 50;

/// Per-task record persisted on completion or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReport {
    pub task_id: String,
    pub title: String,
    pub branch: String,
    /// `done`, `retrying`, or `failed`.
    pub status: String,
    /// Commits on the task branch relative to the base branch.
    pub commits: u32,
    /// Comma-joined changed-file list.
    pub changed_files: String,
    /// Tail of the worktree progress notes.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub notes_tail: String,
    pub attempt: u32,
    pub retries: u32,
    pub max_retries: u32,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub failure_type: Option<String>,
    /// ISO-8601 UTC.
    pub timestamp: String,
}

impl TaskReport {
    /// Creates a report stamped with the current time.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: impl Into<String>,
        title: impl Into<String>,
        branch: impl Into<String>,
        status: impl Into<String>,
        commits: u32,
        attempt: u32,
        retries: u32,
        max_retries: u32,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            title: title.into(),
            branch: branch.into(),
            status: status.into(),
            commits,
            changed_files: String::new(),
            notes_tail: String::new(),
            attempt,
            retries,
            max_retries,
            error_message: String::new(),
            failure_type: None,
            timestamp: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        }
    }

    #[must_use]
    pub fn with_changed_files(mut self, files: &[String]) -> Self {
        self.changed_files = files.join(",");
        self
    }

    #[must_use]
    pub fn with_notes_tail(mut self, tail: impl Into<String>) -> Self {
        self.notes_tail = tail.into();
        self
    }

    /// Records the failure message and its classification.
    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>, kind: FailureKind) -> Self {
        self.error_message = message.into();
        if !self.error_message.is_empty() {
            self.failure_type = Some(kind.as_str().to_string());
        }
        self
    }
}

/// Writes reports and logs under one run directory.
pub struct ArtifactWriter {
    run_dir: PathBuf,
}

impl ArtifactWriter {
    /// Opens the writer, creating `reports/` when missing.
    pub fn new(run_dir: impl Into<PathBuf>) -> Result<Self> {
        let run_dir = run_dir.into();
        fs::create_dir_all(run_dir.join("reports")).map_err(|e| {
            RunError::precondition(
                "run_dir_unwritable",
                format!("cannot create {}: {e}", run_dir.display()),
            )
        })?;
        Ok(Self { run_dir })
    }

    #[must_use]
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    #[must_use]
    pub fn reports_dir(&self) -> PathBuf {
        self.run_dir.join("reports")
    }

    /// Ensures the run-level progress notes file exists. Never truncates.
    pub fn ensure_progress_file(&self) -> Result<PathBuf> {
        let path = self.run_dir.join("progress.txt");
        if !path.is_file() {
            fs::write(&path, "")?;
        }
        Ok(path)
    }

    /// Writes `<task-id>.json` atomically (temp sibling, then rename).
    pub fn write_report(&self, report: &TaskReport) -> Result<()> {
        let path = self.reports_dir().join(format!("{}.json", report.task_id));
        let json = serde_json::to_string_pretty(report)
            .map_err(|e| RunError::system("report_serialize_failed", e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Persists the raw agent stream and stderr as `<task-id>.log`.
    /// Best effort: a missing stream must not mask the task outcome.
    pub fn persist_log(&self, task_id: &str, stream_file: &Path, log_file: &Path) {
        let mut content = fs::read_to_string(stream_file).unwrap_or_default();
        if let Ok(stderr) = fs::read_to_string(log_file) {
            if !stderr.trim().is_empty() {
                content.push_str("\n--- stderr ---\n");
                content.push_str(&stderr);
            }
        }
        let _ = fs::write(self.reports_dir().join(format!("{task_id}.log")), content);
    }
}

/// Last `NOTES_TAIL_LINES` lines of a progress-notes file.
#[must_use]
pub fn notes_tail(path: &Path) -> String {
    let Ok(content) = fs::read_to_string(path) else {
        return String::new();
    };
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(NOTES_TAIL_LINES);
    lines[start..].join("\n")
}
