//! Task and task-set models plus the on-disk store.
//!
//! The tasks file on disk is the sole source of truth for `completed`.
//! Completion writes are idempotent and atomic (write-then-rename) and
//! serialized through an exclusive file lock.

use crate::core::error::{Result, RunError};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::Path;

fn default_version() -> u32 {
    1
}

/// One task in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// The only field mutated after load, and only by the integrator.
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub mutex: Vec<String>,
    /// Advisory list of files the task is expected to touch. Not enforced.
    #[serde(default)]
    pub touches: Vec<String>,
    /// Free-text hint used only by merge conflict resolution.
    #[serde(default)]
    pub merge_notes: String,
}

impl Task {
    /// Creates a task with the given id and title.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            completed: false,
            depends_on: Vec::new(),
            mutex: Vec::new(),
            touches: Vec::new(),
            merge_notes: String::new(),
        }
    }

    #[must_use]
    pub fn with_deps(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| (*d).to_string()).collect();
        self
    }

    #[must_use]
    pub fn with_mutex(mut self, mutex: &[&str]) -> Self {
        self.mutex = mutex.iter().map(|m| (*m).to_string()).collect();
        self
    }
}

/// The ordered task graph plus run metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSet {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Base and integration branch for the run.
    #[serde(default)]
    pub branch_name: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl TaskSet {
    /// Creates an empty task set on the given branch.
    #[must_use]
    pub fn new(branch_name: impl Into<String>) -> Self {
        Self {
            version: 1,
            branch_name: branch_name.into(),
            tasks: Vec::new(),
        }
    }

    /// Looks up a task by id.
    #[must_use]
    pub fn get(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    /// Ids of tasks not yet completed, in file order.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| !t.completed)
            .map(|t| t.id.clone())
            .collect()
    }
}

/// Loads a task set from a YAML file.
pub fn load_task_set(path: &Path) -> Result<TaskSet> {
    let raw = fs::read_to_string(path).map_err(|e| {
        RunError::system("tasks_read_failed", format!("{}: {e}", path.display()))
    })?;
    serde_yaml::from_str(&raw).map_err(|e| {
        RunError::validation(
            "tasks_parse_failed",
            format!("{}: {e}", path.display()),
        )
    })
}

/// Saves a task set atomically (write temp sibling, then rename).
pub fn save_task_set(path: &Path, set: &TaskSet) -> Result<()> {
    let yaml = serde_yaml::to_string(set).map_err(|e| {
        RunError::system("tasks_serialize_failed", e.to_string())
    })?;
    write_atomic(path, &yaml)
}

/// Marks a task completed in the on-disk file.
///
/// Re-reads the file under an exclusive lock so concurrent readers always
/// observe a consistent document. Idempotent: marking an already-completed
/// task is a no-op.
pub fn mark_task_complete(path: &Path, task_id: &str) -> Result<()> {
    let lock = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| RunError::system("tasks_open_failed", format!("{}: {e}", path.display())))?;
    lock.lock_exclusive()
        .map_err(|e| RunError::system("tasks_lock_failed", e.to_string()))?;

    let result = (|| {
        let mut set = load_task_set(path)?;
        let Some(task) = set.tasks.iter_mut().find(|t| t.id == task_id) else {
            return Err(RunError::validation(
                "unknown_task",
                format!("no task with id {task_id}"),
            ));
        };
        if task.completed {
            return Ok(());
        }
        task.completed = true;
        save_task_set(path, &set)
    })();

    let _ = lock.unlock();
    result
}

fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content)
        .map_err(|e| RunError::system("tasks_write_failed", format!("{}: {e}", tmp.display())))?;
    fs::rename(&tmp, path)
        .map_err(|e| RunError::system("tasks_rename_failed", format!("{}: {e}", path.display())))
}
