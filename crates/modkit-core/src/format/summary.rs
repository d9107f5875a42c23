//! Per-file formatter results and their aggregate.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// The formatter changed the file.
pub const MSG_FORMATTED: &str = "Formatted";
/// The file was already formatted.
pub const MSG_UNCHANGED: &str = "Unchanged";
/// The formatter run hit its timeout.
pub const MSG_TIMEOUT: &str = "Skipped: Timeout";
/// The input path does not exist.
pub const MSG_NOT_FOUND: &str = "Skipped: File not found";
/// The pipeline produced nothing for a file.
pub const MSG_NO_RESULT: &str = "No result returned";

const ERROR_PREFIX: &str = "Error:";
const SKIPPED_PREFIX: &str = "Skipped:";
const FAILURE_MARKERS: [&str; 2] = ["formatter failed", "Invoke-Formatter failed"];

/// Outcome of formatting one file. The message prefix carries the
/// classification: `Error:`, `Skipped:`, or a plain status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatterResult {
    /// File the result is for.
    pub path: PathBuf,
    /// The bytes on disk differ from before the run.
    pub changed: bool,
    /// Status or failure text.
    pub message: String,
}

impl FormatterResult {
    /// A result with an arbitrary message.
    pub fn new(path: impl Into<PathBuf>, changed: bool, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            changed,
            message: message.into(),
        }
    }

    /// An `Error:` result.
    pub fn error(path: impl Into<PathBuf>, detail: impl fmt::Display) -> Self {
        Self::new(path, false, format!("{ERROR_PREFIX} {detail}"))
    }

    /// A `Skipped:` result.
    pub fn skipped(path: impl Into<PathBuf>, reason: &str) -> Self {
        Self::new(path, false, format!("{SKIPPED_PREFIX} {reason}"))
    }

    /// Classification of the message.
    pub fn outcome(&self) -> Outcome {
        classify(&self.message)
    }
}

/// Classification of a result message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Formatted or unchanged.
    Ok,
    /// Not formatted, without a failure.
    Skipped,
    /// The run failed.
    Error,
}

/// Classify a message. The skip check comes first, so a skip message that
/// mentions a failure is never also an error.
pub fn classify(message: &str) -> Outcome {
    if message.starts_with(SKIPPED_PREFIX) {
        Outcome::Skipped
    } else if message.starts_with(ERROR_PREFIX)
        || message == MSG_NO_RESULT
        || FAILURE_MARKERS.iter().any(|m| message.contains(m))
    {
        Outcome::Error
    } else {
        Outcome::Ok
    }
}

/// Overall status of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SummaryStatus {
    /// Every file succeeded.
    Pass,
    /// Some files were skipped; none failed.
    Warning,
    /// At least one file failed.
    Fail,
}

impl fmt::Display for SummaryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pass => "Pass",
            Self::Warning => "Warning",
            Self::Fail => "Fail",
        })
    }
}

/// Counts folded from a batch of results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FormattingSummary {
    /// Results folded.
    pub total: usize,
    /// Successful results that changed their file.
    pub changed: usize,
    /// Successful results that left their file alone.
    pub unchanged: usize,
    /// Skipped results.
    pub skipped: usize,
    /// Failed results.
    pub errors: usize,
}

impl FormattingSummary {
    /// Count each result by its outcome.
    pub fn from_results(results: &[FormatterResult]) -> Self {
        results.iter().fold(Self::default(), |mut s, r| {
            s.total += 1;
            match r.outcome() {
                Outcome::Skipped => s.skipped += 1,
                Outcome::Error => s.errors += 1,
                Outcome::Ok if r.changed => s.changed += 1,
                Outcome::Ok => s.unchanged += 1,
            }
            s
        })
    }

    /// `Fail` on any error, else `Warning` on any skip, else `Pass`.
    pub fn status(&self) -> SummaryStatus {
        if self.errors > 0 {
            SummaryStatus::Fail
        } else if self.skipped > 0 {
            SummaryStatus::Warning
        } else {
            SummaryStatus::Pass
        }
    }
}
