//! Scheduler - dependency resolution and mutex arbitration.
//!
//! The scheduler is a pure in-memory component: it tracks task states and
//! the mutex registry and nothing else. It does not know about worktrees,
//! agents, or git.

use crate::core::tasks::TaskSet;
use std::collections::HashMap;

/// Execution state of one task within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Done,
    Failed,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Named exclusive resources and their holders.
///
/// Invariant: at most one holder per name. Acquisition is all-or-nothing;
/// release drops every name held by the task, exactly once, when the task
/// leaves `running`.
#[derive(Debug, Default)]
pub struct MutexRegistry {
    held: HashMap<String, String>,
}

impl MutexRegistry {
    /// True when none of the names is currently held.
    #[must_use]
    pub fn available(&self, names: &[String]) -> bool {
        names
            .iter()
            .filter(|n| !n.is_empty())
            .all(|n| !self.held.contains_key(n))
    }

    /// Takes all names for the task. Callers must check [`available`] first;
    /// a partially available set is never acquired.
    ///
    /// [`available`]: MutexRegistry::available
    pub fn acquire(&mut self, task_id: &str, names: &[String]) {
        debug_assert!(self.available(names), "mutex set not available");
        for name in names {
            if !name.is_empty() {
                self.held.insert(name.clone(), task_id.to_string());
            }
        }
    }

    /// Releases every name held by the task.
    pub fn release(&mut self, task_id: &str) {
        self.held.retain(|_, holder| holder != task_id);
    }

    /// Current holder of a name, if any.
    #[must_use]
    pub fn holder(&self, name: &str) -> Option<&str> {
        self.held.get(name).map(String::as_str)
    }
}

/// Stateful DAG scheduler tracking task readiness and mutex locks.
pub struct Scheduler {
    /// Task ids in file order; `ready()` iterates this for determinism.
    order: Vec<String>,
    states: HashMap<String, TaskState>,
    deps: HashMap<String, Vec<String>>,
    mutexes: HashMap<String, Vec<String>>,
    registry: MutexRegistry,
}

impl Scheduler {
    /// Builds a scheduler from a task set. Completed tasks start `done`,
    /// everything else `pending`.
    #[must_use]
    pub fn new(set: &TaskSet) -> Self {
        let mut order = Vec::with_capacity(set.tasks.len());
        let mut states = HashMap::new();
        let mut deps = HashMap::new();
        let mut mutexes = HashMap::new();

        for task in &set.tasks {
            order.push(task.id.clone());
            let state = if task.completed {
                TaskState::Done
            } else {
                TaskState::Pending
            };
            states.insert(task.id.clone(), state);
            deps.insert(task.id.clone(), task.depends_on.clone());
            mutexes.insert(task.id.clone(), task.mutex.clone());
        }

        Self {
            order,
            states,
            deps,
            mutexes,
            registry: MutexRegistry::default(),
        }
    }

    /// Current state of a task.
    #[must_use]
    pub fn state(&self, task_id: &str) -> TaskState {
        self.states
            .get(task_id)
            .copied()
            .unwrap_or(TaskState::Pending)
    }

    fn count(&self, state: TaskState) -> usize {
        self.states.values().filter(|s| **s == state).count()
    }

    #[must_use]
    pub fn count_pending(&self) -> usize {
        self.count(TaskState::Pending)
    }

    #[must_use]
    pub fn count_running(&self) -> usize {
        self.count(TaskState::Running)
    }

    #[must_use]
    pub fn count_done(&self) -> usize {
        self.count(TaskState::Done)
    }

    #[must_use]
    pub fn count_failed(&self) -> usize {
        self.count(TaskState::Failed)
    }

    /// Pending task ids in file order.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.state(id) == TaskState::Pending)
            .cloned()
            .collect()
    }

    /// True when every dependency of the task is `done`.
    #[must_use]
    pub fn deps_satisfied(&self, task_id: &str) -> bool {
        self.deps
            .get(task_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter(|d| !d.is_empty())
            .all(|d| self.state(d) == TaskState::Done)
    }

    /// True when any dependency of the task is `failed`.
    #[must_use]
    pub fn has_failed_deps(&self, task_id: &str) -> bool {
        self.deps
            .get(task_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .any(|d| self.state(d) == TaskState::Failed)
    }

    fn mutex_names(&self, task_id: &str) -> &[String] {
        self.mutexes
            .get(task_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Pending tasks whose dependencies are all done and whose mutexes are
    /// all available, in file order.
    #[must_use]
    pub fn ready(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| {
                self.state(id) == TaskState::Pending
                    && self.deps_satisfied(id)
                    && self.registry.available(self.mutex_names(id))
            })
            .cloned()
            .collect()
    }

    /// `pending -> running`; acquires the task's mutexes atomically.
    pub fn start(&mut self, task_id: &str) {
        self.states
            .insert(task_id.to_string(), TaskState::Running);
        let names = self.mutexes.get(task_id).cloned().unwrap_or_default();
        self.registry.acquire(task_id, &names);
    }

    /// `running -> done`; releases mutexes.
    pub fn complete(&mut self, task_id: &str) {
        self.states.insert(task_id.to_string(), TaskState::Done);
        self.registry.release(task_id);
    }

    /// `running -> failed`; releases mutexes. Every exit from `running`
    /// (failure, stall kill, cancellation) funnels through here, so held
    /// mutexes are released before any deadlock evaluation.
    pub fn fail(&mut self, task_id: &str) {
        self.states.insert(task_id.to_string(), TaskState::Failed);
        self.registry.release(task_id);
    }

    /// `failed -> pending`; the explicit retry transition.
    pub fn retry(&mut self, task_id: &str) {
        debug_assert_eq!(self.state(task_id), TaskState::Failed);
        self.states
            .insert(task_id.to_string(), TaskState::Pending);
    }

    /// True when no progress is possible: pending work exists, nothing is
    /// running, and the ready set is empty.
    #[must_use]
    pub fn check_deadlock(&self) -> bool {
        self.count_pending() > 0 && self.count_running() == 0 && self.ready().is_empty()
    }

    /// Human-readable explanation of why a task is blocked: unmet
    /// dependencies with their states, held mutexes with their holders.
    #[must_use]
    pub fn explain_block(&self, task_id: &str) -> String {
        let mut reasons = Vec::new();

        let blocked_deps: Vec<String> = self
            .deps
            .get(task_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter(|d| !d.is_empty() && self.state(d) != TaskState::Done)
            .map(|d| format!("{d} ({})", self.state(d)))
            .collect();
        if !blocked_deps.is_empty() {
            reasons.push(format!("dependsOn: {}", blocked_deps.join(" ")));
        }

        let blocked_mutexes: Vec<String> = self
            .mutex_names(task_id)
            .iter()
            .filter_map(|m| {
                self.registry
                    .holder(m)
                    .map(|holder| format!("{m} (held by {holder})"))
            })
            .collect();
        if !blocked_mutexes.is_empty() {
            reasons.push(format!("mutex: {}", blocked_mutexes.join(" ")));
        }

        reasons.join(" ")
    }
}
