//! modkit - build and release PowerShell modules
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_panics_doc)]
//!
//! Thin command-line front end over `modkit-core`.
//!
//! # Overview
//!
//! A typical release pipeline runs, in order:
//!
//! ```text
//! modkit exports   stage/ --manifest stage/Widget.psd1   # compute and write export lists
//! modkit format    stage/**/*.ps1                        # preprocess, format, normalize
//! modkit install   stage/ --strategy auto-revision        # versioned install + pruning
//! ```
//!
//! Defaults come from `modkit.toml` (see [`config`]); flags override them.

pub mod cmd;
pub mod config;
pub mod ui;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use modkit_core::format::BlankLineMode;
use modkit_core::installer::{InstallStrategy, LegacyFlatHandling};
use modkit_core::normalize::{LineEnding, TargetEncoding};

#[derive(Debug, Parser)]
#[command(name = "modkit")]
#[command(author, version, about = "modkit - build and release PowerShell modules")]
pub struct Cli {
    /// Config file (default: nearest modkit.toml above the working directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Install a staged module into versioned destination roots
    Install(InstallArgs),
    /// Detect exported functions, cmdlets and aliases
    Exports {
        /// Script files, assemblies, or directories to scan
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Write the detected lists into this manifest
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
    /// Run the formatting pipeline over files
    Format(FormatArgs),
    /// Normalize line endings and text encoding
    Normalize(NormalizeArgs),
    /// Read or edit a module manifest in place
    Manifest {
        #[command(subcommand)]
        command: ManifestCommands,
    },
}

#[derive(Debug, clap::Args)]
pub struct InstallArgs {
    /// Staging directory holding the built module
    pub staging: PathBuf,
    /// Module name (default: the single .psd1 in the staging directory)
    #[arg(long)]
    pub name: Option<String>,
    /// Base version (default: the staged manifest's ModuleVersion)
    #[arg(long = "module-version")]
    pub version: Option<String>,
    /// Destination root; repeat for several (default: platform module root)
    #[arg(long = "root")]
    pub roots: Vec<PathBuf>,
    /// exact or auto-revision
    #[arg(long)]
    pub strategy: Option<InstallStrategy>,
    /// Version folders kept per root
    #[arg(long)]
    pub keep: Option<usize>,
    /// Version folder never pruned; repeat for several
    #[arg(long = "preserve")]
    pub preserve: Vec<String>,
    /// warn, convert, delete or ignore
    #[arg(long)]
    pub legacy: Option<LegacyFlatHandling>,
    /// Leave the staged manifest's version untouched
    #[arg(long)]
    pub no_manifest_update: bool,
}

#[derive(Debug, clap::Args)]
pub struct FormatArgs {
    /// Files or directories to format
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
    /// External formatter executable
    #[arg(long)]
    pub formatter: Option<PathBuf>,
    /// Argument passed to the formatter before the files; repeat for several
    #[arg(long = "formatter-arg", allow_hyphen_values = true)]
    pub formatter_args: Vec<String>,
    /// Flag that introduces the settings file
    #[arg(long)]
    pub settings_flag: Option<String>,
    /// JSON settings payload for the formatter
    #[arg(long)]
    pub settings: Option<PathBuf>,
    /// Seconds before a formatter batch is killed
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Files per formatter invocation
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Remove comments directly above param blocks
    #[arg(long)]
    pub strip_comments_before_param: bool,
    /// Remove comments inside param blocks
    #[arg(long)]
    pub strip_comments_in_param: bool,
    /// keep, collapse or remove
    #[arg(long)]
    pub blank_lines: Option<BlankLineMode>,
    /// Target line ending for the normalize stage (lf or crlf)
    #[arg(long)]
    pub line_ending: Option<LineEnding>,
    /// Target encoding for the normalize stage
    #[arg(long)]
    pub encoding: Option<TargetEncoding>,
    /// Skip the normalize stage
    #[arg(long)]
    pub no_normalize: bool,
}

#[derive(Debug, clap::Args)]
pub struct NormalizeArgs {
    /// Files or directories to normalize
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
    /// Target encoding (ascii, utf8, utf8bom, utf16le, utf16be, utf32le, utf32be)
    #[arg(long)]
    pub encoding: Option<TargetEncoding>,
    /// Target line ending (lf or crlf)
    #[arg(long)]
    pub line_ending: Option<LineEnding>,
    /// Append a final newline when missing
    #[arg(long)]
    pub final_newline: bool,
    /// Keep a copy of each rewritten file with this suffix
    #[arg(long)]
    pub backup_suffix: Option<String>,
    /// Mirror backups under this directory instead
    #[arg(long, conflicts_with = "backup_suffix")]
    pub backup_root: Option<PathBuf>,
    /// Leave a write in place even when verification fails
    #[arg(long)]
    pub no_rollback: bool,
}

#[derive(Debug, Subcommand)]
pub enum ManifestCommands {
    /// Read a value; nested keys are dot-separated (PrivateData.PSData.Tags)
    Get { path: PathBuf, key: String },
    /// Set a top-level scalar
    Set { path: PathBuf, key: String, value: String },
    /// Set a top-level string array
    SetArray {
        path: PathBuf,
        key: String,
        values: Vec<String>,
    },
    /// Set ModuleVersion
    SetVersion { path: PathBuf, version: String },
    /// Set a scalar under PrivateData.PSData (or one of its sections)
    SetPsdata {
        path: PathBuf,
        key: String,
        value: String,
        /// Nested section under PSData, e.g. Repository
        #[arg(long)]
        section: Option<String>,
    },
    /// Set a string array under PrivateData.PSData
    SetPsdataArray {
        path: PathBuf,
        key: String,
        values: Vec<String>,
    },
    /// Rewrite RequiredModules; each entry is Name, Name@MinVersion or Name==Version
    SetRequired { path: PathBuf, modules: Vec<String> },
}
