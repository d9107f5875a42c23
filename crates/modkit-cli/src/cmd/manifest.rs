//! `modkit manifest ...`

use std::path::Path;

use anyhow::{Result, bail};
use modkit_core::manifest::{self, EditOutcome, RequiredModule};
use modkit_core::Reporter;

use super::print_json;
use crate::ManifestCommands;
use crate::ui::Output;

pub fn run(command: &ManifestCommands, json: bool, out: &Output) -> Result<()> {
    match command {
        ManifestCommands::Get { path, key } => get(path, key, json),
        ManifestCommands::Set { path, key, value } => {
            report(path, key, manifest::set_value(path, key, value)?, out)
        }
        ManifestCommands::SetArray { path, key, values } => {
            report(path, key, manifest::set_array(path, key, values)?, out)
        }
        ManifestCommands::SetVersion { path, version } => {
            if modkit_core::ModuleVersion::parse(version).is_none() {
                bail!("'{version}' is not a module version");
            }
            report(path, manifest::VERSION_KEY, manifest::set_version(path, version)?, out)
        }
        ManifestCommands::SetPsdata {
            path,
            key,
            value,
            section,
        } => {
            let outcome = match section {
                Some(section) => manifest::set_psdata_sub_value(path, section, key, value)?,
                None => manifest::set_psdata_value(path, key, value)?,
            };
            report(path, key, outcome, out)
        }
        ManifestCommands::SetPsdataArray { path, key, values } => {
            report(path, key, manifest::set_psdata_array(path, key, values)?, out)
        }
        ManifestCommands::SetRequired { path, modules } => {
            let records = modules
                .iter()
                .map(|m| parse_requirement(m))
                .collect::<Result<Vec<_>>>()?;
            report(
                path,
                manifest::REQUIRED_MODULES_KEY,
                manifest::set_required_modules(path, &records)?,
                out,
            )
        }
    }
}

fn get(path: &Path, key: &str, json: bool) -> Result<()> {
    let key_path: Vec<&str> = key.split('.').map(str::trim).filter(|k| !k.is_empty()).collect();
    if let Some(value) = manifest::get_value(path, &key_path) {
        if json {
            print_json(&value)?;
        } else {
            println!("{value}");
        }
        return Ok(());
    }
    match manifest::get_array(path, &key_path) {
        Some(values) if json => print_json(&values),
        Some(values) => {
            for v in values {
                println!("{v}");
            }
            Ok(())
        }
        None => bail!("{key} not found in {}", path.display()),
    }
}

/// A missing file or key is an error at the command line; an unchanged
/// value is not.
fn report(path: &Path, key: &str, outcome: EditOutcome, out: &Output) -> Result<()> {
    match outcome {
        EditOutcome::Updated => {
            out.success(&format!("Updated {key}"));
            Ok(())
        }
        EditOutcome::Unchanged => {
            out.info(&format!("{key} already up to date"));
            Ok(())
        }
        EditOutcome::KeyNotFound => bail!("{key} not found in {}", path.display()),
        EditOutcome::FileNotFound => bail!("Manifest not found: {}", path.display()),
    }
}

/// Parse `Name`, `Name@MinimumVersion` or `Name==RequiredVersion`.
pub fn parse_requirement(spec: &str) -> Result<RequiredModule> {
    let spec = spec.trim();
    let (name, minimum, required) = if let Some((name, v)) = spec.split_once("==") {
        (name, None, Some(v))
    } else if let Some((name, v)) = spec.split_once('@') {
        (name, Some(v), None)
    } else {
        (spec, None, None)
    };

    let name = name.trim();
    if name.is_empty() {
        bail!("Empty module name in '{spec}'");
    }
    let mut record = RequiredModule::new(name);
    for v in minimum.iter().chain(required.iter()) {
        if modkit_core::ModuleVersion::parse(v).is_none() {
            bail!("'{}' is not a module version in '{spec}'", v.trim());
        }
    }
    record.minimum_version = minimum.map(|v| v.trim().to_string());
    record.required_version = required.map(|v| v.trim().to_string());
    Ok(record)
}
