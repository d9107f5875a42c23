//! Legacy flat layouts: module files placed directly under `<root>/<name>`
//! instead of inside a version folder.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::InstallError;
use crate::reporter::Reporter;
use crate::version::ModuleVersion;
use crate::{manifest, paths};

/// What to do with a legacy flat layout found under a destination root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegacyFlatHandling {
    /// Log a warning and leave the files in place.
    #[default]
    Warn,
    /// Move the flat files into a version folder named after the version
    /// in their manifest.
    Convert,
    /// Remove the flat files and folders.
    Delete,
    /// Do nothing and emit nothing.
    Ignore,
}

impl FromStr for LegacyFlatHandling {
    type Err = InstallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warn" => Ok(Self::Warn),
            "convert" => Ok(Self::Convert),
            "delete" => Ok(Self::Delete),
            "ignore" => Ok(Self::Ignore),
            other => Err(InstallError::Configuration(format!(
                "unknown legacy handling '{other}' (expected warn, convert, delete or ignore)"
            ))),
        }
    }
}

/// What [`handle_legacy_layout`] did for one root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacyOutcome {
    /// No flat files under the module folder.
    NotFound,
    /// Flat files present and left alone by request.
    Ignored,
    /// Flat files present; a warning was reported.
    Warned {
        /// Flat entries found.
        entries: usize,
    },
    /// Flat files were moved into a version folder.
    Converted {
        /// The folder they now live in.
        version_dir: PathBuf,
    },
    /// Conversion was not possible; the files were left in place.
    ConversionSkipped {
        /// Why conversion was refused.
        reason: String,
    },
    /// Flat files were deleted.
    Deleted {
        /// Entries removed.
        removed: Vec<PathBuf>,
    },
}

/// Entries of `module_dir` that are not version folders.
pub fn flat_entries(module_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(module_dir) else {
        return Vec::new();
    };
    let mut flat: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|e| {
            let is_dir = e.file_type().is_ok_and(|t| t.is_dir());
            let versioned = e.file_name().to_str().and_then(ModuleVersion::parse).is_some();
            !(is_dir && versioned)
        })
        .map(|e| e.path())
        .collect();
    flat.sort();
    flat
}

/// Detect and handle a legacy flat layout of module `name` under `root`.
///
/// # Errors
///
/// Returns [`InstallError::Io`] when a move or delete fails.
pub fn handle_legacy_layout(
    root: &Path,
    name: &str,
    mode: LegacyFlatHandling,
    reporter: &dyn Reporter,
) -> Result<LegacyOutcome, InstallError> {
    if mode == LegacyFlatHandling::Ignore {
        return Ok(LegacyOutcome::Ignored);
    }

    let module_dir = paths::module_dir(root, name);
    let flat = flat_entries(&module_dir);
    if flat.is_empty() {
        return Ok(LegacyOutcome::NotFound);
    }

    match mode {
        LegacyFlatHandling::Ignore => Ok(LegacyOutcome::Ignored),
        LegacyFlatHandling::Warn => {
            warn!(dir = %module_dir.display(), entries = flat.len(), "legacy flat module layout");
            reporter.warning(&format!(
                "Legacy flat layout in {} ({} entries outside version folders)",
                module_dir.display(),
                flat.len()
            ));
            Ok(LegacyOutcome::Warned { entries: flat.len() })
        }
        LegacyFlatHandling::Delete => {
            for path in &flat {
                if path.is_dir() {
                    fs::remove_dir_all(path)?;
                } else {
                    fs::remove_file(path)?;
                }
            }
            info!(dir = %module_dir.display(), removed = flat.len(), "deleted legacy flat layout");
            reporter.info(&format!("Removed legacy flat layout in {}", module_dir.display()));
            Ok(LegacyOutcome::Deleted { removed: flat })
        }
        LegacyFlatHandling::Convert => convert(&module_dir, name, &flat, reporter),
    }
}

fn convert(
    module_dir: &Path,
    name: &str,
    flat: &[PathBuf],
    reporter: &dyn Reporter,
) -> Result<LegacyOutcome, InstallError> {
    let legacy_manifest = module_dir.join(paths::manifest_file_name(name));
    let Some(version) = manifest::read_version(&legacy_manifest)
        .as_deref()
        .and_then(ModuleVersion::parse)
    else {
        return Ok(skip(module_dir, "no version could be read from the legacy manifest", reporter));
    };

    let target = module_dir.join(version.to_string());
    if target.exists() {
        return Ok(skip(
            module_dir,
            &format!("version folder {version} already exists"),
            reporter,
        ));
    }

    fs::create_dir(&target)?;
    for path in flat {
        if let Some(file_name) = path.file_name() {
            fs::rename(path, target.join(file_name))?;
        }
    }
    info!(dir = %module_dir.display(), %version, "converted legacy flat layout");
    reporter.info(&format!(
        "Converted legacy flat layout in {} to version {version}",
        module_dir.display()
    ));
    Ok(LegacyOutcome::Converted { version_dir: target })
}

fn skip(module_dir: &Path, reason: &str, reporter: &dyn Reporter) -> LegacyOutcome {
    warn!(dir = %module_dir.display(), reason, "legacy layout not converted");
    reporter.warning(&format!(
        "Legacy flat layout in {} not converted: {reason}",
        module_dir.display()
    ));
    LegacyOutcome::ConversionSkipped {
        reason: reason.to_string(),
    }
}
