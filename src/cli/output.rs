//! Console output: leveled log prefixes and table helpers.
//!
//! Errors go to stderr, everything else to stdout. Debug lines are gated
//! on the verbose flag set once at startup.

use colored::Colorize;
use comfy_table::Table;
use std::sync::atomic::{AtomicBool, Ordering};

static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Enables debug output. Called once from `main`.
pub fn set_verbose(enabled: bool) {
    VERBOSE.store(enabled, Ordering::Relaxed);
}

#[must_use]
pub fn verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

pub fn info(msg: &str) {
    println!("{} {msg}", "[INFO]".blue());
}

pub fn success(msg: &str) {
    println!("{} {msg}", "[OK]".green());
}

pub fn warn(msg: &str) {
    println!("{} {msg}", "[WARN]".yellow());
}

pub fn error(msg: &str) {
    eprintln!("{} {msg}", "[ERROR]".red());
}

pub fn debug(msg: &str) {
    if verbose() {
        println!("{}", format!("[DEBUG] {msg}").dimmed());
    }
}

/// Prints a plain line (for banners and summaries).
pub fn plain(msg: &str) {
    println!("{msg}");
}

/// Helper to create a table with headers.
#[must_use]
pub fn create_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_header(headers.to_vec());
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_flag_gates_debug() {
        set_verbose(false);
        assert!(!verbose());
        set_verbose(true);
        assert!(verbose());
        set_verbose(false);
    }

    #[test]
    fn table_has_headers() {
        let table = create_table(&["Task", "Reason"]);
        let rendered = table.to_string();
        assert!(rendered.contains("Task"));
        assert!(rendered.contains("Reason"));
    }
}
