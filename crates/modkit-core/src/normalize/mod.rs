//! Line-ending and encoding normalization.
//!
//! [`normalize_file`] only ever changes how text is stored, never the text
//! itself (apart from the requested line endings and final newline). After
//! writing, the file is decoded again and compared against the expected
//! text; a mismatch means the target encoding could not represent the
//! content, and the original bytes are restored unless the caller disabled
//! rollback.

pub mod encoding;

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, warn};

use crate::error::NormalizeError;
pub use encoding::{SourceEncoding, TargetEncoding, decode, detect_encoding, encode};

/// Line-ending style found in a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEndingStyle {
    /// Only `\r\n`.
    Crlf,
    /// Only `\n`.
    Lf,
    /// Only a bare `\r`.
    Cr,
    /// More than one of CRLF, LF and CR.
    Mixed,
    /// No line breaks at all.
    None,
}

/// Line ending to convert to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    /// `\n`.
    Lf,
    /// `\r\n`.
    Crlf,
}

impl LineEnding {
    /// The line terminator itself.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::Crlf => "\r\n",
        }
    }
}

impl FromStr for LineEnding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lf" | "unix" => Ok(Self::Lf),
            "crlf" | "windows" => Ok(Self::Crlf),
            _ => Err(format!("unknown line ending '{s}'")),
        }
    }
}

/// Where to copy a file before it is rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupMode {
    /// Next to the file, with `suffix` appended to its name.
    InPlace {
        /// Suffix appended to the file name.
        suffix: String,
    },
    /// Under `root`, at the file's path relative to `base`.
    Mirror {
        /// Directory the backup tree is rooted at.
        root: PathBuf,
        /// Base the file path is made relative to.
        base: PathBuf,
    },
}

/// Options for [`normalize_file`].
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Target encoding; `None` keeps the detected one.
    pub encoding: Option<TargetEncoding>,
    /// Target line ending; `None` keeps the existing ones.
    pub line_ending: Option<LineEnding>,
    /// Append a line ending when the text does not end with one.
    pub ensure_final_newline: bool,
    /// Copy the file before rewriting it.
    pub backup: Option<BackupMode>,
    /// Restore the original bytes when verification fails.
    pub rollback_on_failure: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            encoding: None,
            line_ending: None,
            ensure_final_newline: false,
            backup: None,
            rollback_on_failure: true,
        }
    }
}

/// Outcome of normalizing one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizationResult {
    /// File the result is for.
    pub path: PathBuf,
    /// The bytes on disk differ from before the call.
    pub changed: bool,
    /// Approximate number of line endings rewritten or added.
    pub replacements: usize,
    /// Encoding the file is stored in after the call.
    pub encoding: String,
    /// Encoding detected before the call.
    pub source_encoding: SourceEncoding,
    /// Line endings found before the call.
    pub line_endings: LineEndingStyle,
    /// The text ended with a line break before the call.
    pub had_final_newline: bool,
    /// Where the backup was written, if one was.
    pub backup_path: Option<PathBuf>,
    /// The write was undone because verification failed.
    pub rolled_back: bool,
    /// Verification failure that was left in place (rollback disabled).
    pub integrity_error: Option<String>,
}

/// Classify the line endings of `text`.
pub fn detect_line_endings(text: &str) -> LineEndingStyle {
    let bytes = text.as_bytes();
    let (mut crlf, mut lf, mut cr) = (0usize, 0usize, 0usize);
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' if bytes.get(i + 1) == Some(&b'\n') => {
                crlf += 1;
                i += 1;
            }
            b'\r' => cr += 1,
            b'\n' => lf += 1,
            _ => {}
        }
        i += 1;
    }

    match (crlf > 0, lf > 0, cr > 0) {
        (false, false, false) => LineEndingStyle::None,
        (true, false, false) => LineEndingStyle::Crlf,
        (false, true, false) => LineEndingStyle::Lf,
        (false, false, true) => LineEndingStyle::Cr,
        _ => LineEndingStyle::Mixed,
    }
}

/// Whether `text` ends with a line break.
pub fn has_final_newline(text: &str) -> bool {
    text.ends_with('\n') || text.ends_with('\r')
}

/// Rewrite every line break in `text` as `target`, returning the new text
/// and the number of breaks that actually changed.
pub fn convert_line_endings(text: &str, target: LineEnding) -> (String, usize) {
    let newline = target.as_str();
    let mut out = String::with_capacity(text.len() + text.len() / 16);
    let mut replacements = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        match c {
            '\r' => {
                let original = if chars.peek().map(|&(_, n)| n) == Some('\n') {
                    chars.next();
                    "\r\n"
                } else {
                    "\r"
                };
                if original != newline {
                    replacements += 1;
                }
                out.push_str(newline);
            }
            '\n' => {
                if newline != "\n" {
                    replacements += 1;
                }
                out.push_str(newline);
            }
            _ => out.push(c),
        }
    }

    (out, replacements)
}

/// Normalize the encoding and line endings of a single file in place.
///
/// # Errors
///
/// Returns [`NormalizeError::NotFound`] when `path` is not a file,
/// [`NormalizeError::Decode`] when its bytes are invalid for the detected
/// encoding, and [`NormalizeError::Io`] for read, write or backup failures.
/// A failed verification is not an error; see
/// [`NormalizationResult::rolled_back`] and
/// [`NormalizationResult::integrity_error`].
pub fn normalize_file(
    path: &Path,
    options: &NormalizeOptions,
) -> Result<NormalizationResult, NormalizeError> {
    if !path.is_file() {
        return Err(NormalizeError::NotFound(path.to_path_buf()));
    }

    let original = fs::read(path)?;
    let source = detect_encoding(&original);
    let text = decode(&original, source).ok_or_else(|| NormalizeError::Decode {
        path: path.to_path_buf(),
        encoding: source.name(),
    })?;

    let line_endings = detect_line_endings(&text);
    let had_final_newline = has_final_newline(&text);

    let (mut expected, mut replacements) = match options.line_ending {
        Some(target) => convert_line_endings(&text, target),
        None => (text.clone(), 0),
    };

    if options.ensure_final_newline && !expected.is_empty() && !has_final_newline(&expected) {
        let newline = options.line_ending.unwrap_or(match line_endings {
            LineEndingStyle::Crlf => LineEnding::Crlf,
            _ => LineEnding::Lf,
        });
        expected.push_str(newline.as_str());
        replacements += 1;
    }

    let target = options
        .encoding
        .unwrap_or_else(|| TargetEncoding::preserving(source));
    let bytes = encode(&expected, target);

    let mut result = NormalizationResult {
        path: path.to_path_buf(),
        changed: false,
        replacements: 0,
        encoding: source.name().to_string(),
        source_encoding: source,
        line_endings,
        had_final_newline,
        backup_path: None,
        rolled_back: false,
        integrity_error: None,
    };

    if bytes == original {
        debug!(path = %path.display(), "already normalized");
        return Ok(result);
    }

    if let Some(mode) = &options.backup {
        result.backup_path = Some(take_backup(path, mode)?);
    }

    fs::write(path, &bytes)?;

    let written = fs::read(path)?;
    let verified = decode(&written, target.as_source()).as_deref() == Some(expected.as_str());

    if !verified {
        let detail = format!(
            "re-reading {} as {target} does not reproduce the original text",
            path.display()
        );
        if options.rollback_on_failure {
            fs::write(path, &original)?;
            warn!(path = %path.display(), encoding = %target, "conversion would lose characters; rolled back");
            result.rolled_back = true;
            return Ok(result);
        }
        warn!(path = %path.display(), "{detail}");
        result.integrity_error = Some(detail);
    }

    result.changed = true;
    result.replacements = replacements;
    result.encoding = target.name().to_string();
    Ok(result)
}

/// Copy `path` to its backup location and return that location.
fn take_backup(path: &Path, mode: &BackupMode) -> std::io::Result<PathBuf> {
    let dest = match mode {
        BackupMode::InPlace { suffix } => {
            let mut name = path.as_os_str().to_owned();
            name.push(suffix);
            PathBuf::from(name)
        }
        BackupMode::Mirror { root, base } => {
            let relative = match path.strip_prefix(base) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => path.file_name().map(PathBuf::from).unwrap_or_default(),
            };
            root.join(relative)
        }
    };

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(path, &dest)?;
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_detect_line_endings() {
        assert_eq!(detect_line_endings("a\r\nb\r\n"), LineEndingStyle::Crlf);
        assert_eq!(detect_line_endings("a\nb\n"), LineEndingStyle::Lf);
        assert_eq!(detect_line_endings("a\rb\r"), LineEndingStyle::Cr);
        assert_eq!(detect_line_endings("a\r\nb\n"), LineEndingStyle::Mixed);
        assert_eq!(detect_line_endings("single line"), LineEndingStyle::None);
    }

    #[test]
    fn test_convert_line_endings_counts_only_changes() {
        let (out, n) = convert_line_endings("a\r\nb\nc\rd", LineEnding::Crlf);
        assert_eq!(out, "a\r\nb\r\nc\r\nd");
        assert_eq!(n, 2);

        let (out, n) = convert_line_endings("a\r\nb\n", LineEnding::Lf);
        assert_eq!(out, "a\nb\n");
        assert_eq!(n, 1);
    }

    #[test]
    fn test_normalize_converts_line_endings_and_encoding() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Public.ps1");
        fs::write(&path, "function Get-A {\n}\n").unwrap();

        let options = NormalizeOptions {
            encoding: Some(TargetEncoding::Utf8Bom),
            line_ending: Some(LineEnding::Crlf),
            ..Default::default()
        };
        let result = normalize_file(&path, &options).unwrap();

        assert!(result.changed);
        assert_eq!(result.replacements, 2);
        assert_eq!(result.encoding, "utf-8-bom");
        assert_eq!(result.source_encoding, SourceEncoding::Ascii);
        assert_eq!(result.line_endings, LineEndingStyle::Lf);
        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[..3], &[0xEF, 0xBB, 0xBF]);
        assert_eq!(&bytes[3..], b"function Get-A {\r\n}\r\n");
    }

    #[test]
    fn test_normalize_is_noop_when_already_normalized() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ok.ps1");
        fs::write(&path, "a\nb\n").unwrap();

        let options = NormalizeOptions {
            line_ending: Some(LineEnding::Lf),
            ensure_final_newline: true,
            backup: Some(BackupMode::InPlace {
                suffix: ".bak".to_string(),
            }),
            ..Default::default()
        };
        let result = normalize_file(&path, &options).unwrap();
        assert!(!result.changed);
        assert!(result.backup_path.is_none());
        assert!(!dir.path().join("ok.ps1.bak").exists());
    }

    #[test]
    fn test_round_trip_preserves_decoded_text() {
        let dir = tempdir().unwrap();
        let text = "# \u{e9}t\u{e9}\r\n$x = '\u{2713}'\r\n";
        for (source, target) in [
            (TargetEncoding::Utf16Le, TargetEncoding::Utf8),
            (TargetEncoding::Utf8, TargetEncoding::Utf32Be),
            (TargetEncoding::Utf32Le, TargetEncoding::Utf16Be),
            (TargetEncoding::Utf8Bom, TargetEncoding::Utf8),
        ] {
            let path = dir.path().join("t.ps1");
            fs::write(&path, encode(text, source)).unwrap();
            let options = NormalizeOptions {
                encoding: Some(target),
                ..Default::default()
            };
            let result = normalize_file(&path, &options).unwrap();
            assert!(!result.rolled_back);
            let bytes = fs::read(&path).unwrap();
            assert_eq!(decode(&bytes, detect_encoding(&bytes)).as_deref(), Some(text));
        }
    }

    #[test]
    fn test_lossy_conversion_rolls_back_byte_for_byte() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lossy.ps1");
        let before = encode("Write-Host 'caf\u{e9}'\n", TargetEncoding::Utf8Bom);
        fs::write(&path, &before).unwrap();

        let options = NormalizeOptions {
            encoding: Some(TargetEncoding::Ascii),
            line_ending: Some(LineEnding::Crlf),
            ..Default::default()
        };
        let result = normalize_file(&path, &options).unwrap();

        assert!(result.rolled_back);
        assert!(!result.changed);
        assert!(result.integrity_error.is_none());
        assert_eq!(result.encoding, "utf-8-bom");
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_lossy_conversion_reported_when_rollback_disabled() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lossy.ps1");
        fs::write(&path, "caf\u{e9}\n").unwrap();

        let options = NormalizeOptions {
            encoding: Some(TargetEncoding::Ascii),
            rollback_on_failure: false,
            ..Default::default()
        };
        let result = normalize_file(&path, &options).unwrap();

        assert!(result.changed);
        assert!(!result.rolled_back);
        assert!(result.integrity_error.is_some());
        assert_eq!(fs::read(&path).unwrap(), b"caf?\n");
    }

    #[test]
    fn test_ensure_final_newline_uses_existing_style() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tail.ps1");
        fs::write(&path, "a\r\nb").unwrap();

        let options = NormalizeOptions {
            ensure_final_newline: true,
            ..Default::default()
        };
        let result = normalize_file(&path, &options).unwrap();
        assert!(result.changed);
        assert!(!result.had_final_newline);
        assert_eq!(result.replacements, 1);
        assert_eq!(fs::read(&path).unwrap(), b"a\r\nb\r\n");
    }

    #[test]
    fn test_backup_in_place_and_mirror() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("src");
        fs::create_dir_all(base.join("Public")).unwrap();
        let path = base.join("Public").join("Get-A.ps1");
        fs::write(&path, "a\n").unwrap();

        let options = NormalizeOptions {
            line_ending: Some(LineEnding::Crlf),
            backup: Some(BackupMode::InPlace {
                suffix: ".orig".to_string(),
            }),
            ..Default::default()
        };
        let result = normalize_file(&path, &options).unwrap();
        let backup = result.backup_path.unwrap();
        assert_eq!(backup, base.join("Public").join("Get-A.ps1.orig"));
        assert_eq!(fs::read(&backup).unwrap(), b"a\n");

        let mirror_root = dir.path().join("backup");
        let options = NormalizeOptions {
            line_ending: Some(LineEnding::Lf),
            backup: Some(BackupMode::Mirror {
                root: mirror_root.clone(),
                base: base.clone(),
            }),
            ..Default::default()
        };
        let result = normalize_file(&path, &options).unwrap();
        let backup = result.backup_path.unwrap();
        assert_eq!(backup, mirror_root.join("Public").join("Get-A.ps1"));
        assert_eq!(fs::read(&backup).unwrap(), b"a\r\n");
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let err = normalize_file(&dir.path().join("nope.ps1"), &NormalizeOptions::default())
            .unwrap_err();
        assert!(matches!(err, NormalizeError::NotFound(_)));
    }
}
