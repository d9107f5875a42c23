//! `modkit exports`

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use modkit_core::exports::ExportSet;
use modkit_core::{Reporter, manifest};

use super::{collect_files, has_extension, print_json};
use crate::ui::Output;

const SCRIPT_EXTENSIONS: &[&str] = &["ps1", "psm1"];
const ASSEMBLY_EXTENSIONS: &[&str] = &["dll"];

/// Scan `paths` and print the export set; with `manifest`, also write the
/// three lists into it.
pub fn exports(paths: &[PathBuf], manifest_path: Option<&Path>, json: bool, out: &Output) -> Result<()> {
    let mut extensions = SCRIPT_EXTENSIONS.to_vec();
    extensions.extend_from_slice(ASSEMBLY_EXTENSIONS);
    let files = collect_files(paths, &extensions)?;

    let scripts: Vec<&PathBuf> = files.iter().filter(|f| has_extension(f, SCRIPT_EXTENSIONS)).collect();
    let assemblies: Vec<&PathBuf> = files
        .iter()
        .filter(|f| has_extension(f, ASSEMBLY_EXTENSIONS))
        .collect();
    tracing::debug!(scripts = scripts.len(), assemblies = assemblies.len(), "scanning");

    let set = ExportSet::detect(&scripts, &assemblies);

    if json {
        print_json(&set)?;
    } else {
        out.section("Exports");
        print_list(out, "Functions", &set.functions);
        print_list(out, "Cmdlets", &set.cmdlets);
        print_list(out, "Aliases", &set.aliases);
    }

    if let Some(path) = manifest_path {
        write_manifest(path, &set, out)?;
    }
    Ok(())
}

fn print_list(out: &Output, label: &str, names: &[String]) {
    if names.is_empty() {
        out.line(&format!("  {label}: (none)"));
    } else {
        out.line(&format!("  {label}: {}", names.join(", ")));
    }
}

fn write_manifest(path: &Path, set: &ExportSet, out: &Output) -> Result<()> {
    if !path.is_file() {
        bail!("Manifest not found: {}", path.display());
    }
    let lists = [
        ("FunctionsToExport", &set.functions),
        ("CmdletsToExport", &set.cmdlets),
        ("AliasesToExport", &set.aliases),
    ];
    for (key, values) in lists {
        match manifest::set_array(path, key, values)? {
            manifest::EditOutcome::Updated => out.success(&format!("Updated {key}")),
            manifest::EditOutcome::Unchanged => out.info(&format!("{key} unchanged")),
            manifest::EditOutcome::KeyNotFound => {
                out.warning(&format!("{key} not present in {}; left as is", path.display()));
            }
            manifest::EditOutcome::FileNotFound => bail!("Manifest not found: {}", path.display()),
        }
    }
    Ok(())
}
