//! Formatting pipeline.
//!
//! A batch of files goes through three stages:
//!
//! 1. **Preprocess**: optional comment stripping around `param(...)` blocks
//!    and blank-line collapsing, done in-process ([`preprocess`]).
//! 2. **Format**: one invocation of the external formatter for the whole
//!    batch, bounded by a timeout ([`process`]).
//! 3. **Normalize**: line-ending and encoding normalization of every file
//!    the formatter did not fail or skip.
//!
//! Every file yields exactly one [`FormatterResult`]. A failure never aborts
//! the batch; it becomes that file's message. A timeout marks every file
//! in the batch `Skipped: Timeout`. Change detection compares SHA-256
//! digests taken before stage 1 and after stage 3.

pub mod preprocess;
pub mod process;
pub mod summary;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::FormatError;
use crate::normalize::encoding::{self, TargetEncoding};
use crate::normalize::{NormalizeOptions, normalize_file};
pub use preprocess::{BlankLineMode, PreprocessOptions};
pub use summary::{FormatterResult, FormattingSummary, Outcome, SummaryStatus};
use summary::{MSG_FORMATTED, MSG_NOT_FOUND, MSG_TIMEOUT, MSG_UNCHANGED};

/// Default bound on one formatter invocation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

const STDERR_TAIL_LINES: usize = 10;

/// How to invoke the external formatter:
/// `program args.. [settings_flag <settings.json>] files..`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatterCommand {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments placed before the settings flag and files.
    pub args: Vec<String>,
    /// Flag that introduces the settings file; settings are not passed
    /// when this is `None`.
    pub settings_flag: Option<String>,
}

impl FormatterCommand {
    /// A command with no arguments and no settings flag.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            settings_flag: None,
        }
    }
}

/// Options for [`format_files`].
#[derive(Debug, Clone)]
pub struct FormatOptions {
    /// See [`PreprocessOptions::strip_comments_before_param`].
    pub strip_comments_before_param: bool,
    /// See [`PreprocessOptions::strip_comments_in_param`].
    pub strip_comments_in_param: bool,
    /// Blank-line handling in stage 1.
    pub blank_lines: BlankLineMode,
    /// Stage 2 is skipped when `None`.
    pub formatter: Option<FormatterCommand>,
    /// Settings payload written to a temporary JSON file for the formatter.
    pub settings: Option<serde_json::Value>,
    /// Bound on each formatter invocation.
    pub timeout: Duration,
    /// Stage 3 is skipped when `None`.
    pub normalize: Option<NormalizeOptions>,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            strip_comments_before_param: false,
            strip_comments_in_param: false,
            blank_lines: BlankLineMode::Keep,
            formatter: None,
            settings: None,
            timeout: DEFAULT_TIMEOUT,
            normalize: Some(NormalizeOptions::default()),
        }
    }
}

impl FormatOptions {
    /// The stage 1 subset of these options.
    pub fn preprocess(&self) -> PreprocessOptions {
        PreprocessOptions {
            strip_comments_before_param: self.strip_comments_before_param,
            strip_comments_in_param: self.strip_comments_in_param,
            blank_lines: self.blank_lines,
        }
    }
}

/// One entry of a formatter's JSON report on stdout.
#[derive(Debug, Deserialize)]
struct ReportEntry {
    path: PathBuf,
    #[serde(default)]
    error: Option<String>,
}

/// A file moving through the pipeline. `result` is set once the file fails
/// or is skipped; later stages leave it alone.
struct Tracked {
    path: PathBuf,
    digest: String,
    result: Option<FormatterResult>,
}

impl Tracked {
    fn pending(&self) -> bool {
        self.result.is_none()
    }
}

/// Format one batch of files.
pub fn format_files<P: AsRef<Path>>(files: &[P], options: &FormatOptions) -> Vec<FormatterResult> {
    let mut missing = Vec::new();
    let mut batch: Vec<Tracked> = Vec::with_capacity(files.len());
    for (index, file) in files.iter().enumerate() {
        let path = file.as_ref().to_path_buf();
        match file_digest(&path) {
            Ok(digest) if path.is_file() => batch.push(Tracked {
                path,
                digest,
                result: None,
            }),
            _ => missing.push((index, FormatterResult::new(path, false, MSG_NOT_FOUND))),
        }
    }

    let pre = options.preprocess();
    if !pre.is_noop() {
        for file in &mut batch {
            if let Err(e) = preprocess_file(&file.path, &pre) {
                file.result = Some(FormatterResult::error(&file.path, e));
            }
        }
    }

    if let Some(formatter) = &options.formatter {
        run_formatter(formatter, options, &mut batch);
    }

    if let Some(normalize) = &options.normalize {
        for file in batch.iter_mut().filter(|f| f.pending()) {
            match normalize_file(&file.path, normalize) {
                Ok(r) if r.rolled_back => {
                    file.result = Some(FormatterResult::error(
                        &file.path,
                        "normalization failed verification and was rolled back",
                    ));
                }
                Ok(r) => {
                    if let Some(detail) = r.integrity_error {
                        file.result = Some(FormatterResult::error(
                            &file.path,
                            format!("normalization failed verification: {detail}"),
                        ));
                    }
                }
                Err(e) => file.result = Some(FormatterResult::error(&file.path, e)),
            }
        }
    }

    // `changed` reflects the bytes on disk even for skipped or failed files,
    // since preprocessing may already have rewritten them.
    let mut results: Vec<FormatterResult> = batch
        .into_iter()
        .map(|file| {
            let changed = !matches!(file_digest(&file.path), Ok(d) if d == file.digest);
            match file.result {
                Some(mut result) => {
                    result.changed = changed;
                    result
                }
                None => {
                    let message = if changed { MSG_FORMATTED } else { MSG_UNCHANGED };
                    FormatterResult::new(file.path, changed, message)
                }
            }
        })
        .collect();

    // Keep results in input order.
    for (index, result) in missing {
        results.insert(index.min(results.len()), result);
    }
    results
}

/// Split `files` into batches of `batch_size` and format them one after
/// another. Each batch has its own formatter process and timeout.
pub fn format_files_batched<P: AsRef<Path>>(
    files: &[P],
    options: &FormatOptions,
    batch_size: usize,
) -> Vec<FormatterResult> {
    files
        .chunks(batch_size.max(1))
        .enumerate()
        .flat_map(|(n, chunk)| {
            debug!(batch = n + 1, files = chunk.len(), "formatting batch");
            format_files(chunk, options)
        })
        .collect()
}

fn file_digest(path: &Path) -> std::io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Rewrite a file with preprocessing applied, keeping its encoding.
fn preprocess_file(path: &Path, options: &PreprocessOptions) -> Result<(), String> {
    let bytes = fs::read(path).map_err(|e| e.to_string())?;
    let source = encoding::detect_encoding(&bytes);
    let text = encoding::decode(&bytes, source)
        .ok_or_else(|| format!("Cannot decode {} as {}", path.display(), source.name()))?;

    let processed = preprocess::preprocess(&text, options);
    if processed != text {
        let out = encoding::encode(&processed, TargetEncoding::preserving(source));
        fs::write(path, out).map_err(|e| e.to_string())?;
        debug!(path = %path.display(), "preprocessed");
    }
    Ok(())
}

fn run_formatter(formatter: &FormatterCommand, options: &FormatOptions, batch: &mut [Tracked]) {
    let pending: Vec<PathBuf> = batch
        .iter()
        .filter(|f| f.pending())
        .map(|f| f.path.clone())
        .collect();
    if pending.is_empty() {
        return;
    }

    let output = match invoke(formatter, options, &pending) {
        Ok(output) => output,
        Err(e) => {
            fail_all(batch, |p| FormatterResult::error(p, &e));
            return;
        }
    };

    if output.timed_out() {
        info!(files = pending.len(), "formatter timed out; batch skipped");
        fail_all(batch, |p| FormatterResult::new(p, false, MSG_TIMEOUT));
        return;
    }

    let status = output.status.and_then(|s| s.code());
    if status != Some(0) {
        let detail = match status {
            Some(code) => format!("formatter failed with exit code {code}"),
            None => "formatter failed: terminated by signal".to_string(),
        };
        let tail = process::tail_lines(&output.stderr, STDERR_TAIL_LINES);
        let message = if tail.is_empty() {
            detail
        } else {
            format!("{detail}: {tail}")
        };
        fail_all(batch, |p| FormatterResult::error(p, &message));
        return;
    }

    let stdout = output.stdout.trim();
    if stdout.starts_with('[') {
        match serde_json::from_str::<Vec<ReportEntry>>(stdout) {
            Ok(report) => apply_report(batch, report),
            Err(e) => {
                debug!(error = %e, "formatter report did not parse");
                fail_all(batch, |p| FormatterResult::error(p, "Unparsable formatter output"));
            }
        }
    } else if !stdout.is_empty() {
        debug!(output = stdout, "formatter output");
    }
}

/// Give every file still pending the result built by `make`.
fn fail_all(batch: &mut [Tracked], make: impl Fn(&Path) -> FormatterResult) {
    for file in batch.iter_mut().filter(|f| f.pending()) {
        file.result = Some(make(&file.path));
    }
}

fn invoke(
    formatter: &FormatterCommand,
    options: &FormatOptions,
    files: &[PathBuf],
) -> Result<process::ProcessOutput, FormatError> {
    let mut command = Command::new(&formatter.program);
    command.args(&formatter.args);

    // Held until the process exits so the settings file outlives it.
    let mut settings_file = None;
    if let (Some(settings), Some(flag)) = (&options.settings, &formatter.settings_flag) {
        let mut file = tempfile::Builder::new()
            .prefix("modkit-settings-")
            .suffix(".json")
            .tempfile()?;
        serde_json::to_writer_pretty(&mut file, settings)?;
        file.flush()?;
        command.arg(flag).arg(file.path());
        settings_file = Some(file);
    }
    command.args(files);

    debug!(program = %formatter.program.display(), files = files.len(), "invoking formatter");
    let output = process::run(command, options.timeout);
    drop(settings_file);
    output
}

fn apply_report(batch: &mut [Tracked], report: Vec<ReportEntry>) {
    for entry in report {
        let Some(error) = entry.error.filter(|e| !e.trim().is_empty()) else {
            continue;
        };
        if let Some(file) = batch
            .iter_mut()
            .find(|f| f.pending() && same_file(&f.path, &entry.path))
        {
            file.result = Some(FormatterResult::error(&file.path, error.trim()));
        }
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    a == b
        || matches!(
            (fs::canonicalize(a), fs::canonicalize(b)),
            (Ok(x), Ok(y)) if x == y
        )
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::normalize::LineEnding;
    use tempfile::tempdir;

    fn shell(script: &str) -> FormatterCommand {
        FormatterCommand {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), script.to_string(), "formatter".to_string()],
            settings_flag: None,
        }
    }

    fn options(formatter: FormatterCommand) -> FormatOptions {
        FormatOptions {
            formatter: Some(formatter),
            timeout: Duration::from_secs(20),
            normalize: None,
            ..Default::default()
        }
    }

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_changed_unchanged_and_missing() {
        let dir = tempdir().unwrap();
        let a = write(dir.path(), "a.ps1", "Get-Thing\n");
        let b = write(dir.path(), "b.ps1", "Set-Thing\n");
        let missing = dir.path().join("gone.ps1");

        let opts = options(shell(r#"printf '# formatted\n' >> "$1""#));
        let results = format_files(&[a.clone(), missing.clone(), b.clone()], &opts);

        assert_eq!(results.len(), 3);
        assert_eq!(results[0], FormatterResult::new(&a, true, "Formatted"));
        assert_eq!(results[1], FormatterResult::new(&missing, false, "Skipped: File not found"));
        assert_eq!(results[2], FormatterResult::new(&b, false, "Unchanged"));

        let summary = FormattingSummary::from_results(&results);
        assert_eq!(summary.status(), SummaryStatus::Warning);
        assert_eq!(summary.changed, 1);
    }

    #[test]
    fn test_timeout_skips_whole_batch_without_normalizing() {
        let dir = tempdir().unwrap();
        let a = write(dir.path(), "a.ps1", "one\r\n");
        let b = write(dir.path(), "b.ps1", "two\r\n");

        let mut opts = options(shell("sleep 30"));
        opts.timeout = Duration::from_millis(300);
        opts.normalize = Some(NormalizeOptions {
            line_ending: Some(LineEnding::Lf),
            ..Default::default()
        });
        let results = format_files(&[&a, &b], &opts);

        assert!(results.iter().all(|r| r.message == "Skipped: Timeout" && !r.changed));
        assert_eq!(fs::read_to_string(&a).unwrap(), "one\r\n");
        assert_eq!(FormattingSummary::from_results(&results).skipped, 2);
    }

    #[test]
    fn test_timeout_after_preprocessing_reports_change() {
        let dir = tempdir().unwrap();
        let a = write(dir.path(), "a.ps1", "# note\nparam(\n  $x\n)\n");
        let b = write(dir.path(), "b.ps1", "'plain'\n");

        let mut opts = options(shell("sleep 30"));
        opts.timeout = Duration::from_millis(300);
        opts.strip_comments_before_param = true;
        let results = format_files(&[&a, &b], &opts);

        assert_eq!(results[0], FormatterResult::new(&a, true, "Skipped: Timeout"));
        assert_eq!(results[1], FormatterResult::new(&b, false, "Skipped: Timeout"));
        assert_eq!(fs::read_to_string(&a).unwrap(), "param(\n  $x\n)\n");
    }

    #[test]
    fn test_nonzero_exit_reports_stderr_tail() {
        let dir = tempdir().unwrap();
        let a = write(dir.path(), "a.ps1", "x\n");

        let results = format_files(&[&a], &options(shell("echo noise >&2; echo boom >&2; exit 2")));
        assert_eq!(
            results[0].message,
            "Error: formatter failed with exit code 2: noise\nboom"
        );
        assert_eq!(FormattingSummary::from_results(&results).status(), SummaryStatus::Fail);
    }

    #[test]
    fn test_json_report_marks_individual_files() {
        let dir = tempdir().unwrap();
        let a = write(dir.path(), "a.ps1", "x\n");
        let b = write(dir.path(), "b.ps1", "y\n");

        let script = r#"printf '[{"path":"%s","error":"Parse error at line 1"},{"path":"%s","error":null}]' "$1" "$2""#;
        let results = format_files(&[&a, &b], &options(shell(script)));
        assert_eq!(results[0].message, "Error: Parse error at line 1");
        assert_eq!(results[1].message, "Unchanged");
    }

    #[test]
    fn test_unparsable_report_fails_batch() {
        let dir = tempdir().unwrap();
        let a = write(dir.path(), "a.ps1", "x\n");
        let results = format_files(&[&a], &options(shell("echo '[not json'")));
        assert_eq!(results[0].message, "Error: Unparsable formatter output");
    }

    #[test]
    fn test_settings_are_passed_as_json_file() {
        let dir = tempdir().unwrap();
        let a = write(dir.path(), "a.ps1", "x\n");
        let seen = dir.path().join("seen.json");

        let mut cmd = shell(&format!(r#"[ "$1" = "--settings" ] && cp "$2" "{}""#, seen.display()));
        cmd.settings_flag = Some("--settings".to_string());
        let mut opts = options(cmd);
        opts.settings = Some(serde_json::json!({ "IncludeRules": ["PSUseConsistentIndentation"] }));

        let results = format_files(&[&a], &opts);
        assert_eq!(results[0].message, "Unchanged");
        let passed: serde_json::Value = serde_json::from_str(&fs::read_to_string(&seen).unwrap()).unwrap();
        assert_eq!(passed, opts.settings.unwrap());
    }

    #[test]
    fn test_spawn_failure_is_per_file_error() {
        let dir = tempdir().unwrap();
        let a = write(dir.path(), "a.ps1", "x\n");
        let opts = options(FormatterCommand::new("/nonexistent/formatter"));
        let results = format_files(&[&a], &opts);
        assert!(results[0].message.starts_with("Error: Failed to spawn formatter"));
    }

    #[test]
    fn test_preprocess_and_normalize_without_formatter() {
        let dir = tempdir().unwrap();
        let a = write(dir.path(), "a.ps1", "# note\r\nparam(\r\n  $x\r\n)\r\n\r\n\r\n'done'\r\n");
        let opts = FormatOptions {
            strip_comments_before_param: true,
            blank_lines: BlankLineMode::Collapse,
            normalize: Some(NormalizeOptions {
                line_ending: Some(LineEnding::Lf),
                ..Default::default()
            }),
            ..Default::default()
        };
        let results = format_files(&[&a], &opts);
        assert_eq!(results[0].message, "Formatted");
        assert!(results[0].changed);
        assert_eq!(fs::read_to_string(&a).unwrap(), "param(\n  $x\n)\n\n'done'\n");
    }

    #[test]
    fn test_batched_runs_one_process_per_batch() {
        let dir = tempdir().unwrap();
        let counter = dir.path().join("calls");
        let files: Vec<PathBuf> = (0..3)
            .map(|i| write(dir.path(), &format!("{i}.ps1"), "x\n"))
            .collect();

        let opts = options(shell(&format!("echo call >> '{}'", counter.display())));
        let results = format_files_batched(&files, &opts, 2);
        assert_eq!(results.len(), 3);
        assert_eq!(fs::read_to_string(&counter).unwrap().lines().count(), 2);
    }
}
