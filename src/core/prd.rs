//! Requirements-document handling: prd-id extraction, run directory
//! layout, and the slug transform.

use crate::core::error::{Result, RunError};
use std::fs;
use std::path::{Path, PathBuf};

/// Root under which every run directory lives.
pub const RUN_ROOT: &str = "artifacts/prd";

/// Extracts the `prd-id:` value from a requirements document.
///
/// The id line sits immediately after the title; extraction tolerates
/// surrounding whitespace. Returns an empty string when absent.
#[must_use]
pub fn extract_prd_id(prd_file: &Path) -> String {
    let Ok(content) = fs::read_to_string(prd_file) else {
        return String::new();
    };
    for line in content.lines() {
        if let Some(rest) = line.trim_end().strip_prefix("prd-id:") {
            let id = rest.trim();
            if !id.is_empty() && !id.contains(char::is_whitespace) {
                return id.to_string();
            }
        }
    }
    String::new()
}

/// Creates `artifacts/prd/<prd-id>/reports` and returns the run directory.
pub fn setup_run_dir(prd_id: &str) -> Result<PathBuf> {
    let run_dir = Path::new(RUN_ROOT).join(prd_id);
    fs::create_dir_all(run_dir.join("reports")).map_err(|e| {
        RunError::precondition(
            "run_dir_unwritable",
            format!("cannot create {}: {e}", run_dir.display()),
        )
    })?;
    Ok(run_dir)
}

/// Searches common locations for a requirements file.
#[must_use]
pub fn find_prd_file() -> Option<PathBuf> {
    for name in ["PRD.md", "prd.md"] {
        let p = PathBuf::from(name);
        if p.is_file() {
            return Some(p);
        }
    }
    let tasks_dir = Path::new("tasks");
    if let Ok(entries) = fs::read_dir(tasks_dir) {
        let mut candidates: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with("prd-") && n.ends_with(".md"))
            })
            .collect();
        candidates.sort();
        return candidates.into_iter().next();
    }
    None
}

/// Copies the requirements document into the run directory as `PRD.md`.
pub fn copy_prd_to_run_dir(prd_file: &Path, run_dir: &Path) -> Result<()> {
    fs::copy(prd_file, run_dir.join("PRD.md")).map_err(|e| {
        RunError::system(
            "prd_copy_failed",
            format!("{} -> {}: {e}", prd_file.display(), run_dir.display()),
        )
    })?;
    Ok(())
}

/// Converts text to a branch-safe slug: lowercase, non-alphanumerics
/// collapsed to single hyphens, trimmed, truncated to 50 characters.
#[must_use]
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_hyphen = true;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_hyphen = false;
        } else if !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug.truncate(50);
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}
