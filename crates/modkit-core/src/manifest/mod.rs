//! Surgical edits to module manifests (`<Name>.psd1`).
//!
//! Every edit parses the manifest into a span-tagged tree, finds the
//! assignment at a key path, and splices a freshly rendered value into that
//! assignment's value span. The text before and after the span is copied
//! through untouched, so comments, ordering and the quoting style of every
//! other entry survive the edit byte-for-byte.
//!
//! Edits never create keys. A missing file or key is a first-class
//! [`EditOutcome`], not an error. The `try_set_*` family folds every outcome
//! and every [`ManifestError`] into a `bool` that is `true` only when the
//! file was rewritten with different content. Callers that depend on an
//! edit must read the value back with [`get_value`] or [`get_array`].

pub mod parser;
pub mod render;

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::ManifestError;
use crate::normalize::encoding::{self, SourceEncoding, TargetEncoding};
use parser::{Node, parse_document};
use render::Layout;

/// Top-level key holding the module version.
pub const VERSION_KEY: &str = "ModuleVersion";
/// Top-level key holding dependency records.
pub const REQUIRED_MODULES_KEY: &str = "RequiredModules";
/// Nested section for gallery metadata: `PrivateData -> PSData`.
pub const PSDATA_PATH: [&str; 2] = ["PrivateData", "PSData"];

/// What an edit did to the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    /// The value was replaced and the file rewritten.
    Updated,
    /// The key exists and already holds the rendered value.
    Unchanged,
    /// The manifest path does not exist.
    FileNotFound,
    /// The key is absent; nothing was written.
    KeyNotFound,
}

impl EditOutcome {
    /// `true` only for [`EditOutcome::Updated`].
    pub fn is_updated(self) -> bool {
        self == Self::Updated
    }
}

/// Result of applying an edit to manifest text in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextEdit {
    /// The full edited text.
    Replaced(String),
    /// The value already matched.
    Unchanged,
    /// The key path does not resolve.
    KeyNotFound,
}

/// One entry of `RequiredModules`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequiredModule {
    /// Module name (`ModuleName`).
    pub name: String,
    /// Exact version (`RequiredVersion`).
    pub required_version: Option<String>,
    /// Minimum version (`ModuleVersion`).
    pub minimum_version: Option<String>,
    /// Maximum version (`MaximumVersion`).
    pub maximum_version: Option<String>,
    /// Module identity (`GUID`).
    pub guid: Option<String>,
}

impl RequiredModule {
    /// A dependency on `name` with no version constraint.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// A bare name renders as a string; anything else as a hashtable.
    fn render(&self) -> String {
        let fields = [
            ("ModuleVersion", &self.minimum_version),
            ("RequiredVersion", &self.required_version),
            ("MaximumVersion", &self.maximum_version),
            ("GUID", &self.guid),
        ];
        if fields.iter().all(|(_, v)| v.is_none()) {
            return render::quote(&self.name);
        }

        let mut parts = vec![format!("ModuleName = {}", render::quote(&self.name))];
        for (key, value) in fields {
            if let Some(value) = value {
                parts.push(format!("{key} = {}", render::quote(value)));
            }
        }
        format!("@{{ {} }}", parts.join("; "))
    }
}

/// Replace the value at `key_path` in `text` with `render(layout)`.
///
/// # Errors
///
/// Returns [`ManifestError::Parse`] when `text` is not a valid manifest.
pub fn edit_text(
    text: &str,
    key_path: &[&str],
    render: impl FnOnce(Layout<'_>) -> String,
) -> Result<TextEdit, ManifestError> {
    let root = parse_document(text)?;
    let Some((key, parents)) = key_path.split_last() else {
        return Ok(TextEdit::KeyNotFound);
    };
    let Some(entry) = root.find(parents).and_then(|n| n.entry(key)) else {
        return Ok(TextEdit::KeyNotFound);
    };

    let replacement = render(Layout::at(text, entry.key_span.start));
    let span = entry.value.span.clone();
    if text[span.clone()] == replacement {
        return Ok(TextEdit::Unchanged);
    }

    let mut out = String::with_capacity(text.len() + replacement.len());
    out.push_str(&text[..span.start]);
    out.push_str(&replacement);
    out.push_str(&text[span.end..]);
    Ok(TextEdit::Replaced(out))
}

/// Decoded manifest text plus the encoding a rewrite goes back out in.
struct ManifestText {
    text: String,
    encoding: TargetEncoding,
}

impl ManifestText {
    fn read(path: &Path) -> Result<Option<Self>, ManifestError> {
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        let source = encoding::detect_encoding(&bytes);
        let text = encoding::decode(&bytes, source).ok_or(ManifestError::Encoding(source.name()))?;
        // An edit may introduce non-ASCII text, so ASCII files are written as UTF-8.
        let encoding = match source {
            SourceEncoding::Ascii => TargetEncoding::Utf8,
            other => TargetEncoding::preserving(other),
        };
        Ok(Some(Self { text, encoding }))
    }

    fn write(&self, path: &Path, text: &str) -> Result<(), ManifestError> {
        fs::write(path, encoding::encode(text, self.encoding))?;
        Ok(())
    }
}

fn edit_file(
    path: &Path,
    key_path: &[&str],
    render: impl FnOnce(Layout<'_>) -> String,
) -> Result<EditOutcome, ManifestError> {
    let Some(manifest) = ManifestText::read(path)? else {
        return Ok(EditOutcome::FileNotFound);
    };
    match edit_text(&manifest.text, key_path, render)? {
        TextEdit::Replaced(text) => {
            manifest.write(path, &text)?;
            Ok(EditOutcome::Updated)
        }
        TextEdit::Unchanged => Ok(EditOutcome::Unchanged),
        TextEdit::KeyNotFound => Ok(EditOutcome::KeyNotFound),
    }
}

fn settle(path: &Path, key: &str, result: Result<EditOutcome, ManifestError>) -> bool {
    match result {
        Ok(outcome) => {
            debug!(path = %path.display(), key, ?outcome, "manifest edit");
            outcome.is_updated()
        }
        Err(e) => {
            debug!(path = %path.display(), key, error = %e, "manifest edit ignored");
            false
        }
    }
}

fn psdata_path<'a>(rest: &[&'a str]) -> Vec<&'a str> {
    let mut path = PSDATA_PATH.to_vec();
    path.extend_from_slice(rest);
    path
}

/// Set a top-level scalar to a string value.
///
/// # Errors
///
/// Returns [`ManifestError`] on read, write, encoding or parse failure.
pub fn set_value(path: &Path, key: &str, value: &str) -> Result<EditOutcome, ManifestError> {
    edit_file(path, &[key], |_| render::quote(value))
}

/// Set a top-level key to a string array.
///
/// # Errors
///
/// Returns [`ManifestError`] on read, write, encoding or parse failure.
pub fn set_array(path: &Path, key: &str, values: &[String]) -> Result<EditOutcome, ManifestError> {
    edit_file(path, &[key], |layout| render::string_array(values, layout))
}

/// Set `ModuleVersion`.
///
/// # Errors
///
/// Returns [`ManifestError`] on read, write, encoding or parse failure.
pub fn set_version(path: &Path, version: &str) -> Result<EditOutcome, ManifestError> {
    set_value(path, VERSION_KEY, version)
}

/// Set a scalar under `PrivateData -> PSData`.
///
/// # Errors
///
/// Returns [`ManifestError`] on read, write, encoding or parse failure.
pub fn set_psdata_value(path: &Path, key: &str, value: &str) -> Result<EditOutcome, ManifestError> {
    edit_file(path, &psdata_path(&[key]), |_| render::quote(value))
}

/// Set a string array under `PrivateData -> PSData`.
///
/// # Errors
///
/// Returns [`ManifestError`] on read, write, encoding or parse failure.
pub fn set_psdata_array(
    path: &Path,
    key: &str,
    values: &[String],
) -> Result<EditOutcome, ManifestError> {
    edit_file(path, &psdata_path(&[key]), |layout| {
        render::string_array(values, layout)
    })
}

/// Set a scalar under `PrivateData -> PSData -> <section>`.
///
/// # Errors
///
/// Returns [`ManifestError`] on read, write, encoding or parse failure.
pub fn set_psdata_sub_value(
    path: &Path,
    section: &str,
    key: &str,
    value: &str,
) -> Result<EditOutcome, ManifestError> {
    edit_file(path, &psdata_path(&[section, key]), |_| render::quote(value))
}

/// Rewrite `RequiredModules` from dependency records.
///
/// # Errors
///
/// Returns [`ManifestError`] on read, write, encoding or parse failure.
pub fn set_required_modules(
    path: &Path,
    records: &[RequiredModule],
) -> Result<EditOutcome, ManifestError> {
    let items: Vec<String> = records
        .iter()
        .filter(|r| !r.name.trim().is_empty())
        .map(RequiredModule::render)
        .collect();
    edit_file(path, &[REQUIRED_MODULES_KEY], |layout| {
        render::list(&items, layout)
    })
}

/// [`set_value`], folded to "did the file change".
pub fn try_set_value(path: &Path, key: &str, value: &str) -> bool {
    settle(path, key, set_value(path, key, value))
}

/// [`set_array`], folded to "did the file change".
pub fn try_set_array(path: &Path, key: &str, values: &[String]) -> bool {
    settle(path, key, set_array(path, key, values))
}

/// [`set_version`], folded to "did the file change".
pub fn try_set_version(path: &Path, version: &str) -> bool {
    settle(path, VERSION_KEY, set_version(path, version))
}

/// [`set_psdata_value`], folded to "did the file change".
pub fn try_set_psdata_value(path: &Path, key: &str, value: &str) -> bool {
    settle(path, key, set_psdata_value(path, key, value))
}

/// [`set_psdata_array`], folded to "did the file change".
pub fn try_set_psdata_array(path: &Path, key: &str, values: &[String]) -> bool {
    settle(path, key, set_psdata_array(path, key, values))
}

/// [`set_psdata_sub_value`], folded to "did the file change".
pub fn try_set_psdata_sub_value(path: &Path, section: &str, key: &str, value: &str) -> bool {
    settle(path, key, set_psdata_sub_value(path, section, key, value))
}

/// [`set_required_modules`], folded to "did the file change".
pub fn try_set_required_modules(path: &Path, records: &[RequiredModule]) -> bool {
    settle(
        path,
        REQUIRED_MODULES_KEY,
        set_required_modules(path, records),
    )
}

fn read_node<T>(path: &Path, key_path: &[&str], extract: impl FnOnce(&Node) -> Option<T>) -> Option<T> {
    let manifest = ManifestText::read(path).ok()??;
    let root = parse_document(&manifest.text).ok()?;
    root.find(key_path).and_then(extract)
}

/// Read a scalar at `key_path`; `None` if the file, key or a scalar value is
/// missing.
pub fn get_value(path: &Path, key_path: &[&str]) -> Option<String> {
    read_node(path, key_path, |n| n.as_scalar().map(str::to_owned))
}

/// Read a string array at `key_path`; a scalar reads as one item.
pub fn get_array(path: &Path, key_path: &[&str]) -> Option<Vec<String>> {
    read_node(path, key_path, Node::as_string_list)
}

/// Read `ModuleVersion`.
pub fn read_version(path: &Path) -> Option<String> {
    get_value(path, &[VERSION_KEY])
}
