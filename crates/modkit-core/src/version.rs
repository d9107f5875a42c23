//! Module version numbers.
//!
//! Version folders are named with 2 to 4 dot-separated numeric segments
//! (`major.minor[.build[.revision]]`). Ordering is segment-wise numeric, and
//! a shorter version sorts before a longer one with the same prefix, so
//! `2.0.26 < 2.0.26.0 < 2.0.26.1 < 2.0.27`.

use std::fmt;
use std::str::FromStr;

use crate::error::InstallError;

/// A parsed module version with 2 to 4 numeric segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleVersion {
    segments: Vec<u64>,
}

impl ModuleVersion {
    /// Parse a version string. Returns `None` for anything that is not 2 to 4
    /// dot-separated unsigned integers. A segment with a leading zero (`026`)
    /// is rejected so the rendered version always matches its source text.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        let segments = s
            .split('.')
            .map(|part| {
                if part.is_empty()
                    || !part.bytes().all(|b| b.is_ascii_digit())
                    || (part.len() > 1 && part.starts_with('0'))
                {
                    None
                } else {
                    part.parse::<u64>().ok()
                }
            })
            .collect::<Option<Vec<_>>>()?;

        if (2..=4).contains(&segments.len()) {
            Some(Self { segments })
        } else {
            None
        }
    }

    /// The three-segment stem used for revision bumps. A two-segment version
    /// is padded with a zero build segment.
    pub fn stem(&self) -> Self {
        let mut segments: Vec<u64> = self.segments.iter().copied().take(3).collect();
        while segments.len() < 3 {
            segments.push(0);
        }
        Self { segments }
    }

    /// The stem of this version with `revision` appended as a 4th segment.
    pub fn with_revision(&self, revision: u64) -> Self {
        let mut stem = self.stem();
        stem.segments.push(revision);
        stem
    }
}

impl FromStr for ModuleVersion {
    type Err = InstallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| InstallError::InvalidVersion(s.to_string()))
    }
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for seg in &self.segments {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{seg}")?;
            first = false;
        }
        Ok(())
    }
}
