//! modkit - deterministic build and release engine for PowerShell modules.
//!
//! The engine is split into five subsystems, leaves first:
//!
//! - [`normalize`]: line-ending and text-encoding normalization with
//!   post-write verification and rollback.
//! - [`manifest`]: surgical, formatting-preserving edits to a module
//!   manifest (`<Name>.psd1`).
//! - [`exports`]: discovery of a module's public command surface from
//!   script text and compiled assemblies.
//! - [`format`]: out-of-process formatting of a batch of files followed by
//!   normalization.
//! - [`installer`]: versioned, idempotent installation of a staged module
//!   into one or more destination roots, with retention pruning.
//!
//! # Directory Layout
//!
//! ```text
//! <root>/
//! └── <ModuleName>/
//!     ├── 2.0.26/        # version folder (3 or 4 numeric segments)
//!     │   └── <ModuleName>.psd1
//!     └── 2.0.26.1/      # revision installed under AutoRevision
//! ```
//!
//! Every environment-derived value (roots, formatter program, timeouts) is
//! passed in explicitly; nothing in this crate reads ambient configuration.

pub mod error;
pub mod exports;
pub mod format;
pub mod installer;
pub mod manifest;
pub mod normalize;
pub mod paths;
pub mod reporter;
pub mod version;

pub use error::{ExportError, FormatError, InstallError, ManifestError, NormalizeError};
pub use exports::ExportSet;
pub use format::{FormatOptions, FormatterResult, FormattingSummary, SummaryStatus};
pub use installer::{
    InstallOptions, InstallStrategy, LegacyFlatHandling, ModuleInstallSpec, ModuleInstallerResult,
    install_from_staging, resolve_target_version,
};
pub use manifest::{EditOutcome, RequiredModule};
pub use normalize::{NormalizationResult, NormalizeOptions, normalize_file};
pub use paths::*;
pub use reporter::{NullReporter, Reporter};
pub use version::ModuleVersion;

/// File extension of a module manifest.
pub const MANIFEST_EXTENSION: &str = "psd1";
