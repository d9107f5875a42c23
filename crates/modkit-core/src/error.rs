//! Domain-specific errors for each subsystem.
//!
//! Only [`InstallError`] is ever surfaced to callers as a hard failure.
//! The other enums are internal currency: manifest edits fold them into
//! [`crate::manifest::EditOutcome`], export detection degrades them to empty
//! results, and the formatting pipeline turns them into per-file messages.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while installing a staged module.
#[derive(Error, Debug)]
pub enum InstallError {
    /// A caller-supplied option makes the install impossible.
    #[error("Invalid install configuration: {0}")]
    Configuration(String),

    /// The staging directory does not exist or is not a directory.
    #[error("Staging path not found: {}", .0.display())]
    StagingMissing(PathBuf),

    /// The requested version is not a 2 to 4 segment numeric version.
    #[error("Invalid module version '{0}'")]
    InvalidVersion(String),

    /// A write to one destination root failed after earlier roots completed.
    #[error("Install into {} failed after {} completed root(s): {source}", .root.display(), .completed.len())]
    PartialInstall {
        /// Root that failed.
        root: PathBuf,
        /// Version folders already written before the failure.
        completed: Vec<PathBuf>,
        /// Underlying failure.
        #[source]
        source: Box<InstallError>,
    },

    /// Copying the staged tree into a root failed.
    #[error("Copy failed: {0}")]
    Copy(String),

    /// Filesystem failure outside of copying.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A failure annotated with the operation it interrupted.
    #[error("{context}: {message}")]
    Context {
        /// Operation that failed.
        context: &'static str,
        /// Underlying failure, rendered.
        message: String,
    },
}

impl InstallError {
    /// Create an error with context for better debugging.
    pub fn context(ctx: &'static str, msg: impl std::fmt::Display) -> Self {
        Self::Context {
            context: ctx,
            message: msg.to_string(),
        }
    }
}

/// Errors raised while reading or patching a manifest.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// The manifest could not be read or written.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The manifest bytes are not valid in their detected encoding.
    #[error("Manifest is not valid {0}")]
    Encoding(&'static str),

    /// The manifest text does not follow the data-file grammar.
    #[error("Parse error at byte {offset}: {message}")]
    Parse {
        /// Byte offset into the decoded text.
        offset: usize,
        /// What the parser expected.
        message: String,
    },
}

/// Errors raised while reading assembly metadata.
#[derive(Error, Debug)]
pub enum ExportError {
    /// The assembly file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not a PE image.
    #[error("Not a PE image: {0}")]
    Pe(String),

    /// The PE image has no CLR header.
    #[error("Not a managed assembly")]
    NotManaged,

    /// The metadata tables are truncated or inconsistent.
    #[error("Malformed metadata: {0}")]
    Malformed(&'static str),

    /// A module with the same identity is already loaded in this context.
    #[error("Assembly with module identity {0} is already loaded in this context")]
    AlreadyLoaded(String),
}

/// Errors raised by the formatting pipeline itself, as opposed to per-file
/// outcomes which are reported through `FormatterResult` messages.
#[derive(Error, Debug)]
pub enum FormatError {
    /// Temporary files or formatted files could not be read or written.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The formatter process could not be started.
    #[error("Failed to spawn formatter '{program}': {source}")]
    Spawn {
        /// Program as configured.
        program: String,
        /// Error from the spawn call.
        #[source]
        source: std::io::Error,
    },

    /// The settings payload could not be serialized.
    #[error("Invalid formatter settings: {0}")]
    Settings(#[from] serde_json::Error),
}

/// Errors raised while normalizing a single file.
#[derive(Error, Debug)]
pub enum NormalizeError {
    /// The path does not name a file.
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Reading, writing or backing up the file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The file content could not be decoded with its detected encoding.
    #[error("Cannot decode {} as {encoding}", .path.display())]
    Decode {
        /// File being normalized.
        path: PathBuf,
        /// Name of the detected encoding.
        encoding: &'static str,
    },
}
