//! Subcommand implementations.

pub mod exports;
pub mod format;
pub mod install;
pub mod manifest;
pub mod normalize;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Script and data files the text commands operate on.
pub const TEXT_EXTENSIONS: &[&str] = &["ps1", "psm1", "psd1"];

/// Expand `paths`: files are taken as given, directories are searched
/// recursively for files with one of `extensions`. The result is sorted
/// and free of duplicates.
pub fn collect_files(paths: &[PathBuf], extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for ext in extensions {
                let pattern = path.join("**").join(format!("*.{ext}"));
                let pattern = pattern.to_string_lossy();
                for entry in glob::glob(&pattern).with_context(|| format!("Invalid pattern {pattern}"))? {
                    let entry = entry.context("Failed to read directory entry")?;
                    if entry.is_file() {
                        files.push(entry);
                    }
                }
            }
        } else {
            files.push(path.clone());
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
