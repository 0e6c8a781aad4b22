//! Task-set validation gate.
//!
//! Runs once at load time and fails the run if any error is present.
//! Errors are collected, never short-circuited, so the user sees the full
//! list in one pass.

use crate::core::tasks::TaskSet;
use std::collections::{HashMap, HashSet};

/// Known exclusive resources. Anything else must use the `contract:` prefix.
pub const MUTEX_CATALOG: [&str; 4] = ["db-migrations", "lockfile", "router", "global-config"];

/// Prefix for caller-defined contract mutexes (any suffix is valid).
pub const CONTRACT_PREFIX: &str = "contract:";

/// Validates a task set. Returns the full list of errors (empty = valid).
#[must_use]
pub fn validate(set: &TaskSet) -> Vec<String> {
    let mut errors = Vec::new();

    if set.version > 1 {
        errors.push(format!("Unsupported version: {} (expected 1)", set.version));
    }

    if set.tasks.is_empty() {
        errors.push("No tasks defined".to_string());
        return errors;
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for task in &set.tasks {
        if task.id.is_empty() {
            errors.push(format!("Task missing id (title: {:?})", task.title));
            continue;
        }
        if !seen.insert(task.id.as_str()) {
            errors.push(format!("Duplicate id: {}", task.id));
        }
        if task.title.is_empty() {
            errors.push(format!("Task {} missing title", task.id));
        }
    }

    let ids: HashSet<&str> = set.tasks.iter().map(|t| t.id.as_str()).collect();
    for task in &set.tasks {
        for dep in &task.depends_on {
            if dep.is_empty() {
                continue;
            }
            if !ids.contains(dep.as_str()) {
                errors.push(format!(
                    "Task {}: dependency '{dep}' not found",
                    task.id
                ));
            }
        }
        for mutex in &task.mutex {
            if mutex.is_empty() {
                continue;
            }
            if !mutex.starts_with(CONTRACT_PREFIX) && !MUTEX_CATALOG.contains(&mutex.as_str()) {
                errors.push(format!("Task {}: unknown mutex '{mutex}'", task.id));
            }
        }
    }

    let cycle = detect_cycle(set);
    if !cycle.is_empty() {
        errors.push(format!("Cycle detected: {cycle}"));
    }

    errors
}

/// Detects a dependency cycle. Returns one cycle path (`A -> B -> A`) or
/// an empty string when the graph is a DAG.
///
/// Iterative DFS with an explicit stack; tasks referencing missing
/// dependencies are reported separately by [`validate`] and skipped here.
#[must_use]
pub fn detect_cycle(set: &TaskSet) -> String {
    let deps: HashMap<&str, Vec<&str>> = set
        .tasks
        .iter()
        .map(|t| {
            (
                t.id.as_str(),
                t.depends_on.iter().map(String::as_str).collect(),
            )
        })
        .collect();

    // 0 = unvisited, 1 = on the current path, 2 = fully explored
    let mut color: HashMap<&str, u8> = HashMap::new();

    for &start in deps.keys() {
        if color.get(start).copied().unwrap_or(0) != 0 {
            continue;
        }

        // Stack of (node, next-dependency-index); `path` mirrors the gray chain.
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        let mut path: Vec<&str> = vec![start];
        color.insert(start, 1);

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            let node_deps = deps.get(node).map(Vec::as_slice).unwrap_or_default();
            if frame.1 >= node_deps.len() {
                color.insert(node, 2);
                stack.pop();
                path.pop();
                continue;
            }
            let next = node_deps[frame.1];
            frame.1 += 1;

            if !deps.contains_key(next) {
                continue;
            }
            match color.get(next).copied().unwrap_or(0) {
                1 => {
                    let from = path.iter().position(|n| *n == next).unwrap_or(0);
                    let mut cycle: Vec<&str> = path[from..].to_vec();
                    cycle.push(next);
                    return cycle.join(" -> ");
                }
                0 => {
                    color.insert(next, 1);
                    stack.push((next, 0));
                    path.push(next);
                }
                _ => {}
            }
        }
    }

    String::new()
}
