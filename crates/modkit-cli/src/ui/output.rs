//! Line-oriented terminal output and the CLI's [`Reporter`].
//!
//! Progress and results go to stdout; warnings and errors go to stderr so
//! that `--json` output on stdout stays machine readable.

use std::path::Path;

use crossterm::style::Stylize;
use modkit_core::Reporter;

use super::theme::Theme;

#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    theme: Theme,
    quiet: bool,
}

impl Output {
    /// Suppress everything on stdout except explicit data output.
    pub fn quiet(quiet: bool) -> Self {
        Self {
            theme: Theme::default(),
            quiet,
        }
    }

    pub fn theme(&self) -> &Theme {
        &self.theme
    }

    pub fn success(&self, msg: &str) {
        if !self.quiet {
            println!("  {} {}", self.theme.icons.success.with(self.theme.colors.success), msg);
        }
    }

    /// Print a raw line unless quiet.
    pub fn line(&self, text: &str) {
        if !self.quiet {
            println!("{text}");
        }
    }
}

impl Reporter for Output {
    fn section(&self, title: &str) {
        if !self.quiet {
            println!();
            println!("{} {}", self.theme.icons.section, title.bold());
        }
    }

    fn installing(&self, name: &str, version: &str, destination: &Path) {
        if !self.quiet {
            println!(
                "  {} {} {}",
                name.with(self.theme.colors.name),
                version.with(self.theme.colors.version),
                format!("-> {}", destination.display()).with(self.theme.colors.secondary)
            );
        }
    }

    fn pruned(&self, path: &Path) {
        if !self.quiet {
            println!(
                "  {} {}",
                "pruned".with(self.theme.colors.secondary),
                path.display()
            );
        }
    }

    fn info(&self, msg: &str) {
        if !self.quiet {
            println!("  {} {}", self.theme.icons.info, msg);
        }
    }

    fn warning(&self, msg: &str) {
        eprintln!(
            "  {} {}",
            self.theme.icons.warning.with(self.theme.colors.warning).bold(),
            msg.with(self.theme.colors.warning)
        );
    }

    fn error(&self, msg: &str) {
        eprintln!(
            "  {} {}",
            self.theme.icons.error.with(self.theme.colors.error).bold(),
            msg.with(self.theme.colors.error)
        );
    }
}
