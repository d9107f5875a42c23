//! `modkit normalize`

use std::path::PathBuf;

use anyhow::Result;
use modkit_core::normalize::{BackupMode, NormalizeOptions, normalize_file};
use modkit_core::Reporter;
use serde::Serialize;

use super::{TEXT_EXTENSIONS, collect_files, print_json};
use crate::NormalizeArgs;
use crate::config::NormalizeSection;
use crate::ui::{Output, list};

#[derive(Debug, Serialize)]
struct Row {
    path: PathBuf,
    changed: bool,
    replacements: usize,
    source_encoding: String,
    encoding: String,
    rolled_back: bool,
    error: Option<String>,
}

/// Normalize every file. Returns `false` when any file failed or was
/// rolled back.
pub fn normalize(args: &NormalizeArgs, config: &NormalizeSection, json: bool, out: &Output) -> Result<bool> {
    let files = collect_files(&args.paths, TEXT_EXTENSIONS)?;
    let options = build_options(args, config)?;

    let mut rows = Vec::with_capacity(files.len());
    let mut ok = true;
    for file in &files {
        match normalize_file(file, &options) {
            Ok(result) => {
                ok &= !result.rolled_back && result.integrity_error.is_none();
                if !json {
                    list::print_normalization(out, &result);
                }
                rows.push(Row {
                    error: result.integrity_error.clone(),
                    path: result.path,
                    changed: result.changed,
                    replacements: result.replacements,
                    source_encoding: result.source_encoding.to_string(),
                    encoding: result.encoding,
                    rolled_back: result.rolled_back,
                });
            }
            Err(e) => {
                ok = false;
                if !json {
                    out.error(&format!("{}: {e}", file.display()));
                }
                rows.push(Row {
                    path: file.clone(),
                    changed: false,
                    replacements: 0,
                    source_encoding: String::new(),
                    encoding: String::new(),
                    rolled_back: false,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    if json {
        print_json(&rows)?;
    }
    Ok(ok)
}

pub fn build_options(args: &NormalizeArgs, config: &NormalizeSection) -> Result<NormalizeOptions> {
    let mut options = config.options()?;
    if args.encoding.is_some() {
        options.encoding = args.encoding;
    }
    if args.line_ending.is_some() {
        options.line_ending = args.line_ending;
    }
    options.ensure_final_newline |= args.final_newline;
    options.rollback_on_failure = !args.no_rollback;
    options.backup = match (&args.backup_suffix, &args.backup_root) {
        (Some(suffix), _) => Some(BackupMode::InPlace {
            suffix: suffix.clone(),
        }),
        (None, Some(root)) => Some(BackupMode::Mirror {
            root: root.clone(),
            base: std::env::current_dir()?,
        }),
        (None, None) => None,
    };
    Ok(options)
}
