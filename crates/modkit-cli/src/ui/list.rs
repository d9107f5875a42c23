//! Result rendering for `modkit format` and `modkit normalize`.

use crossterm::style::{Color, Stylize};
use modkit_core::format::{FormatterResult, FormattingSummary, Outcome, SummaryStatus};
use modkit_core::normalize::NormalizationResult;

use super::output::Output;

/// Print one row per formatter result, colored by outcome.
pub fn print_format_results(out: &Output, results: &[FormatterResult]) {
    let theme = out.theme();
    for result in results {
        let color = match result.outcome() {
            Outcome::Error => theme.colors.error,
            Outcome::Skipped => theme.colors.warning,
            Outcome::Ok if result.changed => theme.colors.success,
            Outcome::Ok => theme.colors.secondary,
        };
        let status = format!("{:<width$}", result.message, width = theme.layout.status_width);
        out.line(&format!("  {} {}", status.with(color), result.path.display()));
    }
}

/// Print the batch totals and the derived status.
pub fn print_format_summary(out: &Output, summary: &FormattingSummary) {
    let theme = out.theme();
    let status = summary.status();
    let color: Color = match status {
        SummaryStatus::Pass => theme.colors.success,
        SummaryStatus::Warning => theme.colors.warning,
        SummaryStatus::Fail => theme.colors.error,
    };
    out.line("");
    out.line(&format!(
        "  {:<lw$} {}  {}",
        "Status",
        status.to_string().with(color).bold(),
        format!(
            "{} files, {} changed, {} unchanged, {} skipped, {} errors",
            summary.total, summary.changed, summary.unchanged, summary.skipped, summary.errors
        )
        .with(theme.colors.secondary),
        lw = theme.layout.label_width
    ));
}

/// Print one row per normalized file.
pub fn print_normalization(out: &Output, result: &NormalizationResult) {
    let theme = out.theme();
    let (status, color) = if result.rolled_back {
        ("rolled back", theme.colors.error)
    } else if result.integrity_error.is_some() {
        ("corrupted", theme.colors.error)
    } else if result.changed {
        ("normalized", theme.colors.success)
    } else {
        ("unchanged", theme.colors.secondary)
    };
    let status = format!("{status:<width$}", width = theme.layout.status_width);
    out.line(&format!(
        "  {} {} {}",
        status.with(color),
        result.path.display(),
        format!("({} -> {})", result.source_encoding, result.encoding).with(theme.colors.secondary)
    ));
}
