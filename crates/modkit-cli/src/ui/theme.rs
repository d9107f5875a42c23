//! Colors, icons and column widths shared by every view.

use crossterm::style::Color;

/// Status icons.
#[derive(Debug, Clone, Copy)]
pub struct Icons {
    pub success: &'static str,
    pub warning: &'static str,
    pub error: &'static str,
    pub info: &'static str,
    pub section: &'static str,
}

impl Default for Icons {
    fn default() -> Self {
        Self {
            success: "✓",
            warning: "!",
            error: "✗",
            info: "•",
            section: "▸",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Colors {
    pub success: Color,
    pub warning: Color,
    pub error: Color,
    pub secondary: Color,
    pub name: Color,
    pub version: Color,
}

impl Default for Colors {
    fn default() -> Self {
        Self {
            success: Color::Green,
            warning: Color::Yellow,
            error: Color::Red,
            secondary: Color::DarkGrey,
            name: Color::Cyan,
            version: Color::Blue,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Layout {
    /// Width of the status column in result tables.
    pub status_width: usize,
    /// Width of the label column in summaries.
    pub label_width: usize,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            status_width: 28,
            label_width: 12,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Theme {
    pub icons: Icons,
    pub colors: Colors,
    pub layout: Layout,
}
