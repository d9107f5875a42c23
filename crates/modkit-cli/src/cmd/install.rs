//! `modkit install`

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use modkit_core::installer::{InstallOptions, ModuleInstallSpec};
use modkit_core::{MANIFEST_EXTENSION, Reporter, manifest};

use super::print_json;
use crate::InstallArgs;
use crate::config::InstallSection;
use crate::ui::Output;

pub fn install(args: &InstallArgs, config: &InstallSection, json: bool, out: &Output) -> Result<()> {
    let name = match &args.name {
        Some(name) => name.clone(),
        None => infer_name(&args.staging)?,
    };
    let version = match &args.version {
        Some(v) => v.clone(),
        None => {
            let psd1 = args.staging.join(format!("{name}.{MANIFEST_EXTENSION}"));
            manifest::read_version(&psd1).with_context(|| {
                format!("No --module-version given and {} declares none", psd1.display())
            })?
        }
    };

    let spec = ModuleInstallSpec::new(name.as_str(), version.as_str(), args.staging.clone())
        .with_options(merge_options(args, config));
    let result = spec
        .install(out)
        .with_context(|| format!("Failed to install {name} {version}"))?;

    if json {
        return print_json(&result);
    }
    out.success(&format!(
        "Installed {name} {} into {} root(s)",
        result.version,
        result.installed_paths.len()
    ));
    if !result.pruned_paths.is_empty() {
        out.info(&format!("Pruned {} old version(s)", result.pruned_paths.len()));
    }
    Ok(())
}

/// Flags override `modkit.toml`, which overrides the built-in defaults.
pub fn merge_options(args: &InstallArgs, config: &InstallSection) -> InstallOptions {
    let defaults = InstallOptions::default();
    let mut preserve = config.preserve_versions.clone();
    preserve.extend(args.preserve.iter().cloned());
    InstallOptions {
        strategy: args.strategy.or(config.strategy).unwrap_or(defaults.strategy),
        keep_versions: args.keep.or(config.keep_versions).unwrap_or(defaults.keep_versions),
        roots: if args.roots.is_empty() {
            config.roots.clone()
        } else {
            args.roots.clone()
        },
        legacy_flat: args.legacy.or(config.legacy_flat).unwrap_or(defaults.legacy_flat),
        preserve_versions: preserve,
        update_manifest_to_resolved_version: !args.no_manifest_update
            && config
                .update_manifest
                .unwrap_or(defaults.update_manifest_to_resolved_version),
    }
}

/// The module name is the stem of the one manifest in the staging root.
fn infer_name(staging: &Path) -> Result<String> {
    let entries = fs::read_dir(staging)
        .with_context(|| format!("Failed to read staging directory {}", staging.display()))?;
    let mut names: Vec<String> = entries
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e.eq_ignore_ascii_case(MANIFEST_EXTENSION)))
        .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .collect();
    match names.len() {
        1 => Ok(names.remove(0)),
        0 => bail!("No .{MANIFEST_EXTENSION} in {}; pass --name", staging.display()),
        _ => bail!(
            "Several manifests in {} ({}); pass --name",
            staging.display(),
            names.join(", ")
        ),
    }
}
