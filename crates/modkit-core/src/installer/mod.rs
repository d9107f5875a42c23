//! Module installation.
//!
//! This module installs a staged module build into versioned destination
//! trees:
//!
//! - Resolving the target version (exact, or with a revision bump)
//! - Handling legacy flat layouts left by older installers
//! - Patching the staged manifest to the resolved version
//! - Copying the staging directory into every destination root
//! - Pruning old version folders beyond the retention count
//!
//! The main entry point is [`install_from_staging`]. Roots are written one
//! at a time, in order. A failure stops the install at that root and is
//! returned as [`InstallError::PartialInstall`] naming the roots already
//! written; nothing is rolled back.

pub mod legacy;
pub mod prune;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::InstallError;
use crate::manifest::{self, EditOutcome};
use crate::paths;
use crate::reporter::Reporter;
use crate::version::ModuleVersion;
pub use legacy::{LegacyFlatHandling, LegacyOutcome, handle_legacy_layout};
pub use prune::{PruneReport, prune_versions};

/// Default number of version folders kept per root.
pub const DEFAULT_KEEP_VERSIONS: usize = 3;

/// How the installed version is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallStrategy {
    /// Install exactly the requested version, overwriting an existing folder.
    #[default]
    Exact,
    /// Append the smallest unused revision segment when the requested
    /// version is already installed in any root.
    AutoRevision,
}

impl FromStr for InstallStrategy {
    type Err = InstallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "auto-revision" | "autorevision" => Ok(Self::AutoRevision),
            other => Err(InstallError::Configuration(format!(
                "unknown install strategy '{other}' (expected exact or auto-revision)"
            ))),
        }
    }
}

/// Options for [`install_from_staging`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    /// How the requested version maps to a folder name.
    pub strategy: InstallStrategy,
    /// Version folders kept per root after pruning; at least 1.
    pub keep_versions: usize,
    /// Destination roots in install order. Empty means the platform
    /// defaults from [`paths::default_module_roots`].
    pub roots: Vec<PathBuf>,
    /// Treatment of files installed flat under the module folder.
    pub legacy_flat: LegacyFlatHandling,
    /// Version folder names never pruned (case-insensitive).
    pub preserve_versions: Vec<String>,
    /// Rewrite the staged manifest's version to the resolved version
    /// before copying.
    pub update_manifest_to_resolved_version: bool,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            strategy: InstallStrategy::Exact,
            keep_versions: DEFAULT_KEEP_VERSIONS,
            roots: Vec::new(),
            legacy_flat: LegacyFlatHandling::Warn,
            preserve_versions: Vec::new(),
            update_manifest_to_resolved_version: true,
        }
    }
}

/// Everything needed for one install call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInstallSpec {
    /// Module name, which names the folder under each root.
    pub name: String,
    /// Requested version, before the strategy resolves it.
    pub version: String,
    /// Built module tree to copy.
    pub staging_path: PathBuf,
    /// Strategy, roots and retention.
    pub options: InstallOptions,
}

impl ModuleInstallSpec {
    /// An install with default options.
    pub fn new(name: impl Into<String>, version: impl Into<String>, staging_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            staging_path: staging_path.into(),
            options: InstallOptions::default(),
        }
    }

    /// Replace the options.
    pub fn with_options(mut self, options: InstallOptions) -> Self {
        self.options = options;
        self
    }

    /// Run the install described by this spec.
    ///
    /// # Errors
    ///
    /// See [`install_from_staging`].
    pub fn install(&self, reporter: &dyn Reporter) -> Result<ModuleInstallerResult, InstallError> {
        install_from_staging(&self.staging_path, &self.name, &self.version, &self.options, reporter)
    }
}

/// Result of a completed install.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleInstallerResult {
    /// The resolved version, which names every installed folder.
    pub version: String,
    /// One version folder per destination root, in root order.
    pub installed_paths: Vec<PathBuf>,
    /// Old version folders deleted, across all roots.
    pub pruned_paths: Vec<PathBuf>,
    /// Version folders that pruning failed to delete, with the reason.
    pub prune_failures: Vec<(PathBuf, String)>,
}

/// Resolve the version to install for module `name` across `roots`.
///
/// Under [`InstallStrategy::Exact`] this is `base`. Under
/// [`InstallStrategy::AutoRevision`] it is `base` when no root holds that
/// version yet, otherwise the first three segments of `base` plus the
/// smallest revision unused in every root.
///
/// # Errors
///
/// Returns [`InstallError::InvalidVersion`] when `base` is not a version.
pub fn resolve_target_version(
    roots: &[PathBuf],
    name: &str,
    base: &str,
    strategy: InstallStrategy,
) -> Result<String, InstallError> {
    let base: ModuleVersion = base.parse()?;
    if strategy == InstallStrategy::Exact {
        return Ok(base.to_string());
    }

    let existing: BTreeSet<ModuleVersion> = roots
        .iter()
        .flat_map(|root| prune::version_folders(&paths::module_dir(root, name)))
        .map(|(version, _)| version)
        .collect();
    if !existing.contains(&base) {
        return Ok(base.to_string());
    }

    let resolved = (1..)
        .map(|revision| base.with_revision(revision))
        .find(|candidate| !existing.contains(candidate))
        .unwrap_or_else(|| base.clone());
    debug!(%base, %resolved, "revision bumped");
    Ok(resolved.to_string())
}

/// Install a staged module into every destination root.
///
/// # Errors
///
/// Fails without writing anything when the configuration is unusable: an
/// empty name, an invalid version, `keep_versions == 0`, a missing staging
/// directory, no resolvable roots, or a requested manifest update with no
/// staged manifest. A failure while writing a root returns
/// [`InstallError::PartialInstall`] once an earlier root has completed.
pub fn install_from_staging(
    staging_path: &Path,
    name: &str,
    version: &str,
    options: &InstallOptions,
    reporter: &dyn Reporter,
) -> Result<ModuleInstallerResult, InstallError> {
    let name = name.trim();
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(InstallError::Configuration(format!("invalid module name '{name}'")));
    }
    if options.keep_versions == 0 {
        return Err(InstallError::Configuration(
            "keep_versions must be at least 1".to_string(),
        ));
    }
    ModuleVersion::from_str(version)?;
    if !staging_path.is_dir() {
        return Err(InstallError::StagingMissing(staging_path.to_path_buf()));
    }

    let roots = if options.roots.is_empty() {
        paths::default_module_roots()
    } else {
        options.roots.clone()
    };
    if roots.is_empty() {
        return Err(InstallError::Configuration(
            "no destination roots given and no platform default could be resolved".to_string(),
        ));
    }

    let staged_manifest = staging_path.join(paths::manifest_file_name(name));
    if !staged_manifest.is_file() {
        if options.update_manifest_to_resolved_version {
            return Err(InstallError::Configuration(format!(
                "staged manifest {} not found",
                staged_manifest.display()
            )));
        }
        warn!(path = %staged_manifest.display(), "staging directory has no manifest");
        reporter.warning(&format!("Staged manifest {} not found", staged_manifest.display()));
    }

    reporter.section("Installing");

    // Conversions create version folders, so this runs before resolution.
    for root in &roots {
        handle_legacy_layout(root, name, options.legacy_flat, reporter)?;
    }

    let resolved = resolve_target_version(&roots, name, version, options.strategy)?;
    let resolved_version: ModuleVersion = resolved.parse()?;
    info!(module = name, version = %resolved, roots = roots.len(), "installing");

    if options.update_manifest_to_resolved_version {
        update_staged_manifest(&staged_manifest, &resolved, reporter)?;
    }

    let mut result = ModuleInstallerResult {
        version: resolved.clone(),
        ..Default::default()
    };

    for root in &roots {
        let dest = paths::version_dir(root, name, &resolved);
        reporter.installing(name, &resolved, &dest);
        if let Err(e) = install_into(staging_path, &dest) {
            if result.installed_paths.is_empty() {
                return Err(e);
            }
            return Err(InstallError::PartialInstall {
                root: root.clone(),
                completed: result.installed_paths,
                source: Box::new(e),
            });
        }
        result.installed_paths.push(dest);
    }

    for root in &roots {
        let report = prune_versions(
            &paths::module_dir(root, name),
            options.keep_versions,
            &options.preserve_versions,
            &resolved_version,
        );
        for path in &report.pruned {
            reporter.pruned(path);
        }
        for (path, reason) in &report.failures {
            reporter.warning(&format!("Could not prune {}: {reason}", path.display()));
        }
        result.pruned_paths.extend(report.pruned);
        result.prune_failures.extend(report.failures);
    }

    Ok(result)
}

/// Patch the staged manifest's version, then read it back.
fn update_staged_manifest(manifest_path: &Path, resolved: &str, reporter: &dyn Reporter) -> Result<(), InstallError> {
    let outcome = manifest::set_version(manifest_path, resolved)
        .map_err(|e| InstallError::context("Failed to update staged manifest", e))?;
    if outcome == EditOutcome::KeyNotFound {
        warn!(path = %manifest_path.display(), "staged manifest has no version field");
    }

    let written = manifest::read_version(manifest_path);
    if written.as_deref() != Some(resolved) {
        let found = written.unwrap_or_else(|| "none".to_string());
        warn!(path = %manifest_path.display(), expected = resolved, %found, "manifest version mismatch");
        reporter.warning(&format!(
            "Manifest {} declares version {found}, expected {resolved}",
            manifest_path.display()
        ));
    }
    Ok(())
}

/// Replace `dest` with a copy of `staging`.
fn install_into(staging: &Path, dest: &Path) -> Result<(), InstallError> {
    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    fs::create_dir_all(dest)?;
    copy_dir_all(staging, dest)
}

/// Recursively copy the contents of `src` into `dst`.
///
/// Uses `fs_extra` for recursive copying with overwrite semantics.
///
/// # Errors
///
/// Returns [`InstallError::Copy`] if any file or directory cannot be copied.
pub fn copy_dir_all(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<(), InstallError> {
    fs_extra::dir::copy(
        src,
        dst,
        &fs_extra::dir::CopyOptions::new()
            .content_only(true)
            .overwrite(true),
    )
    .map_err(|e| InstallError::Copy(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::legacy::tests::Recording;
    use super::*;
    use crate::reporter::NullReporter;
    use tempfile::{TempDir, tempdir};

    fn staging(version: &str) -> TempDir {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("Widget.psd1"),
            format!("@{{\n    # build output\n    ModuleVersion = '{version}'\n    RootModule = 'Widget.psm1'\n}}\n"),
        )
        .unwrap();
        fs::write(dir.path().join("Widget.psm1"), "function Get-Widget {}\n").unwrap();
        fs::create_dir_all(dir.path().join("en-US")).unwrap();
        fs::write(dir.path().join("en-US").join("about_Widget.help.txt"), "help").unwrap();
        dir
    }

    fn options(roots: &[&Path]) -> InstallOptions {
        InstallOptions {
            roots: roots.iter().map(|r| r.to_path_buf()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_exact_resolution_is_the_base_version() {
        let root = tempdir().unwrap();
        fs::create_dir_all(root.path().join("Widget").join("2.0.26")).unwrap();
        let roots = vec![root.path().to_path_buf()];
        assert_eq!(
            resolve_target_version(&roots, "Widget", "2.0.26", InstallStrategy::Exact).unwrap(),
            "2.0.26"
        );
    }

    #[test]
    fn test_auto_revision_picks_smallest_unused_across_roots() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        for v in ["2.0.26", "2.0.26.1"] {
            fs::create_dir_all(a.path().join("Widget").join(v)).unwrap();
        }
        fs::create_dir_all(b.path().join("Widget").join("2.0.26.3")).unwrap();
        let roots = vec![a.path().to_path_buf(), b.path().to_path_buf()];

        let resolved = resolve_target_version(&roots, "Widget", "2.0.26", InstallStrategy::AutoRevision).unwrap();
        assert_eq!(resolved, "2.0.26.2");

        let fresh = resolve_target_version(&roots, "Widget", "2.0.27", InstallStrategy::AutoRevision).unwrap();
        assert_eq!(fresh, "2.0.27");
    }

    #[test]
    fn test_invalid_version_is_rejected() {
        let err = resolve_target_version(&[], "Widget", "2.x", InstallStrategy::Exact).unwrap_err();
        assert!(matches!(err, InstallError::InvalidVersion(_)));

        let stage = staging("1.0.0");
        let root = tempdir().unwrap();
        let err = install_from_staging(stage.path(), "Widget", "2.0.026", &options(&[root.path()]), &NullReporter)
            .unwrap_err();
        assert!(matches!(err, InstallError::InvalidVersion(_)));
        assert!(!root.path().join("Widget").exists());
    }

    #[test]
    fn test_install_into_every_root_and_patch_manifest() {
        let stage = staging("0.0.0");
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();

        let result =
            install_from_staging(stage.path(), "Widget", "1.2.0", &options(&[a.path(), b.path()]), &NullReporter)
                .unwrap();

        assert_eq!(result.version, "1.2.0");
        assert_eq!(
            result.installed_paths,
            vec![a.path().join("Widget").join("1.2.0"), b.path().join("Widget").join("1.2.0")]
        );
        for dest in &result.installed_paths {
            assert!(dest.join("en-US").join("about_Widget.help.txt").is_file());
            let text = fs::read_to_string(dest.join("Widget.psd1")).unwrap();
            assert!(text.contains("ModuleVersion = '1.2.0'"));
            assert!(text.contains("# build output"));
        }
        assert!(result.pruned_paths.is_empty());
    }

    #[test]
    fn test_exact_reinstall_overwrites_existing_folder() {
        let root = tempdir().unwrap();
        let dest = root.path().join("Widget").join("1.2.0");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("stale.ps1"), "old").unwrap();

        let stage = staging("1.2.0");
        install_from_staging(stage.path(), "Widget", "1.2.0", &options(&[root.path()]), &NullReporter).unwrap();
        assert!(!dest.join("stale.ps1").exists());
        assert!(dest.join("Widget.psm1").is_file());
    }

    #[test]
    fn test_auto_revision_install_and_prune() {
        let root = tempdir().unwrap();
        for v in ["1.0.0", "1.1.0", "1.2.0", "1.2.0.1"] {
            fs::create_dir_all(root.path().join("Widget").join(v)).unwrap();
        }
        let stage = staging("1.2.0");
        let opts = InstallOptions {
            strategy: InstallStrategy::AutoRevision,
            keep_versions: 2,
            preserve_versions: vec!["1.0.0".to_string()],
            ..options(&[root.path()])
        };

        let result = install_from_staging(stage.path(), "Widget", "1.2.0", &opts, &NullReporter).unwrap();
        assert_eq!(result.version, "1.2.0.2");
        assert_eq!(
            result.pruned_paths,
            vec![root.path().join("Widget").join("1.2.0"), root.path().join("Widget").join("1.1.0")]
        );
        let installed = fs::read_to_string(root.path().join("Widget").join("1.2.0.2").join("Widget.psd1")).unwrap();
        assert!(installed.contains("ModuleVersion = '1.2.0.2'"));
        assert!(root.path().join("Widget").join("1.0.0").is_dir());
    }

    #[test]
    fn test_configuration_errors_write_nothing() {
        let root = tempdir().unwrap();
        let stage = staging("1.0.0");
        let opts = options(&[root.path()]);

        let missing = install_from_staging(&root.path().join("nope"), "Widget", "1.0.0", &opts, &NullReporter);
        assert!(matches!(missing, Err(InstallError::StagingMissing(_))));

        let zero = InstallOptions {
            keep_versions: 0,
            ..opts.clone()
        };
        let keep = install_from_staging(stage.path(), "Widget", "1.0.0", &zero, &NullReporter);
        assert!(matches!(keep, Err(InstallError::Configuration(_))));

        let name = install_from_staging(stage.path(), "  ", "1.0.0", &opts, &NullReporter);
        assert!(matches!(name, Err(InstallError::Configuration(_))));

        let version = install_from_staging(stage.path(), "Widget", "latest", &opts, &NullReporter);
        assert!(matches!(version, Err(InstallError::InvalidVersion(_))));

        let no_manifest = install_from_staging(stage.path(), "Other", "1.0.0", &opts, &NullReporter);
        assert!(matches!(no_manifest, Err(InstallError::Configuration(_))));

        assert!(fs::read_dir(root.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_missing_manifest_only_warns_without_update() {
        let root = tempdir().unwrap();
        let stage = tempdir().unwrap();
        fs::write(stage.path().join("Widget.psm1"), "").unwrap();
        let opts = InstallOptions {
            update_manifest_to_resolved_version: false,
            ..options(&[root.path()])
        };
        let reporter = Recording::default();
        let result = install_from_staging(stage.path(), "Widget", "1.0.0", &opts, &reporter).unwrap();
        assert_eq!(result.installed_paths.len(), 1);
        assert_eq!(reporter.warnings.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_manifest_without_version_field_warns() {
        let root = tempdir().unwrap();
        let stage = tempdir().unwrap();
        fs::write(stage.path().join("Widget.psd1"), "@{ RootModule = 'Widget.psm1' }\n").unwrap();
        let reporter = Recording::default();
        install_from_staging(stage.path(), "Widget", "1.0.0", &options(&[root.path()]), &reporter).unwrap();
        let warnings = reporter.warnings.lock().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("declares version none"));
    }

    #[test]
    fn test_failure_on_second_root_is_partial_install() {
        let good = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let blocked = scratch.path().join("blocked");
        fs::write(&blocked, "a file where a root should be").unwrap();
        let stage = staging("1.0.0");

        let err = install_from_staging(stage.path(), "Widget", "1.0.0", &options(&[good.path(), blocked.as_path()]), &NullReporter)
            .unwrap_err();
        match err {
            InstallError::PartialInstall { root, completed, .. } => {
                assert_eq!(root, blocked);
                assert_eq!(completed, vec![good.path().join("Widget").join("1.0.0")]);
            }
            other => panic!("expected PartialInstall, got {other:?}"),
        }
        assert!(good.path().join("Widget").join("1.0.0").join("Widget.psm1").is_file());
    }

    #[test]
    fn test_legacy_convert_runs_before_resolution() {
        let root = tempdir().unwrap();
        let module = root.path().join("Widget");
        fs::create_dir_all(&module).unwrap();
        fs::write(module.join("Widget.psd1"), "@{ ModuleVersion = '1.0.0' }\n").unwrap();
        let stage = staging("1.0.0");
        let opts = InstallOptions {
            strategy: InstallStrategy::AutoRevision,
            legacy_flat: LegacyFlatHandling::Convert,
            ..options(&[root.path()])
        };

        let result = install_from_staging(stage.path(), "Widget", "1.0.0", &opts, &NullReporter).unwrap();
        assert_eq!(result.version, "1.0.0.1");
        assert!(module.join("1.0.0").join("Widget.psd1").is_file());
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("AutoRevision".parse::<InstallStrategy>().unwrap(), InstallStrategy::AutoRevision);
        assert_eq!("auto-revision".parse::<InstallStrategy>().unwrap(), InstallStrategy::AutoRevision);
        assert!("newest".parse::<InstallStrategy>().is_err());
    }
}
