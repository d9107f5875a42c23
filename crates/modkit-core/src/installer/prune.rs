//! Retention pruning of installed version folders.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::version::ModuleVersion;

/// Outcome of pruning one module folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Folders deleted, oldest first.
    pub pruned: Vec<PathBuf>,
    /// Folders that should have been deleted but could not be, with the
    /// reason.
    pub failures: Vec<(PathBuf, String)>,
}

/// Version folders directly under `module_dir`, newest first. Entries whose
/// name is not a version are ignored.
pub fn version_folders(module_dir: &Path) -> Vec<(ModuleVersion, PathBuf)> {
    let mut folders: Vec<(ModuleVersion, PathBuf)> = walkdir::WalkDir::new(module_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_dir())
        .filter_map(|e| {
            let version = ModuleVersion::parse(e.file_name().to_str()?)?;
            Some((version, e.into_path()))
        })
        .collect();
    folders.sort_by(|a, b| b.0.cmp(&a.0));
    folders
}

/// Pick the folders to delete from `folders` (sorted newest first).
///
/// The first `keep` folders survive, as does any folder whose name matches
/// an entry of `preserve` (ignoring case) or whose version equals
/// `installed`.
pub fn plan_prune(
    folders: &[(ModuleVersion, PathBuf)],
    keep: usize,
    preserve: &[String],
    installed: &ModuleVersion,
) -> Vec<PathBuf> {
    folders
        .iter()
        .skip(keep)
        .filter(|(version, path)| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            version != installed && !preserve.iter().any(|p| p.trim().eq_ignore_ascii_case(&name))
        })
        .map(|(_, path)| path.clone())
        .collect()
}

/// Delete stale version folders under `module_dir`. Deletion is best
/// effort: a folder that cannot be removed is recorded and skipped.
pub fn prune_versions(
    module_dir: &Path,
    keep: usize,
    preserve: &[String],
    installed: &ModuleVersion,
) -> PruneReport {
    let folders = version_folders(module_dir);
    let mut report = PruneReport::default();
    for path in plan_prune(&folders, keep, preserve, installed) {
        match fs::remove_dir_all(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "pruned");
                report.pruned.push(path);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to prune version folder");
                report.failures.push((path, e.to_string()));
            }
        }
    }
    report
}
