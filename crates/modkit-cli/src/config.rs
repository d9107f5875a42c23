//! Project configuration parsed from `modkit.toml`.
//!
//! Every section is optional. Values here are defaults; command-line flags
//! override them. The file is found by walking up from the working
//! directory unless `--config` names one.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use modkit_core::format::{BlankLineMode, FormatterCommand};
use modkit_core::installer::{InstallStrategy, LegacyFlatHandling};
use modkit_core::normalize::{LineEnding, NormalizeOptions, TargetEncoding};
use serde::Deserialize;

/// Name of the project configuration file.
pub const CONFIG_FILE: &str = "modkit.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub install: InstallSection,
    pub format: FormatSection,
    pub normalize: NormalizeSection,
}

/// The `[install]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstallSection {
    pub roots: Vec<PathBuf>,
    pub keep_versions: Option<usize>,
    pub preserve_versions: Vec<String>,
    pub strategy: Option<InstallStrategy>,
    pub legacy_flat: Option<LegacyFlatHandling>,
    pub update_manifest: Option<bool>,
}

/// The `[format]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FormatSection {
    /// Formatter executable; no external formatter runs when unset.
    pub program: Option<PathBuf>,
    pub args: Vec<String>,
    pub settings_flag: Option<String>,
    /// JSON file holding the formatter settings payload.
    pub settings: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub batch_size: Option<usize>,
    pub strip_comments_before_param: bool,
    pub strip_comments_in_param: bool,
    pub blank_lines: Option<BlankLineMode>,
}

/// The `[normalize]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NormalizeSection {
    pub encoding: Option<String>,
    pub line_ending: Option<String>,
    pub ensure_final_newline: bool,
}

impl Config {
    /// Load `explicit` if given, else the nearest `modkit.toml` above the
    /// working directory, else defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read or parsed.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => std::env::current_dir().ok().and_then(|cwd| find_config(&cwd)),
        };
        match path {
            Some(p) => Self::from_file(&p),
            None => Ok(Self::default()),
        }
    }

    /// Parse a config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML for
    /// this schema.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }
}

impl FormatSection {
    pub fn formatter(&self) -> Option<FormatterCommand> {
        self.program.as_ref().map(|program| FormatterCommand {
            program: program.clone(),
            args: self.args.clone(),
            settings_flag: self.settings_flag.clone(),
        })
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl NormalizeSection {
    /// Normalizer options described by this section.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown encoding or line-ending name.
    pub fn options(&self) -> Result<NormalizeOptions> {
        let encoding = self
            .encoding
            .as_deref()
            .map(str::parse::<TargetEncoding>)
            .transpose()
            .map_err(anyhow::Error::msg)?;
        let line_ending = self
            .line_ending
            .as_deref()
            .map(str::parse::<LineEnding>)
            .transpose()
            .map_err(anyhow::Error::msg)?;
        Ok(NormalizeOptions {
            encoding,
            line_ending,
            ensure_final_newline: self.ensure_final_newline,
            ..Default::default()
        })
    }
}

/// Walk up from `start` looking for `modkit.toml`.
pub fn find_config(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE))
        .find(|candidate| candidate.is_file())
}
