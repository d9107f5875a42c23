//! `modkit format`

use std::time::Duration;

use anyhow::{Context, Result};
use modkit_core::format::{self, FormatOptions, FormattingSummary, SummaryStatus};
use serde::Serialize;

use super::{TEXT_EXTENSIONS, collect_files, print_json};
use crate::FormatArgs;
use crate::config::{FormatSection, NormalizeSection};
use crate::ui::{Output, list};

#[derive(Serialize)]
struct Report<'a> {
    results: &'a [format::FormatterResult],
    summary: FormattingSummary,
    status: SummaryStatus,
}

/// Format the files and report. Returns the batch status so the caller can
/// pick an exit code.
pub fn format(
    args: &FormatArgs,
    config: &FormatSection,
    normalize: &NormalizeSection,
    json: bool,
    out: &Output,
) -> Result<SummaryStatus> {
    let files = collect_files(&args.paths, TEXT_EXTENSIONS)?;
    let options = build_options(args, config, normalize)?;

    let results = match args.batch_size.or(config.batch_size) {
        Some(size) => format::format_files_batched(&files, &options, size),
        None => format::format_files(&files, &options),
    };
    let summary = FormattingSummary::from_results(&results);
    let status = summary.status();

    if json {
        print_json(&Report {
            results: &results,
            summary,
            status,
        })?;
    } else {
        list::print_format_results(out, &results);
        list::print_format_summary(out, &summary);
    }
    Ok(status)
}

pub fn build_options(
    args: &FormatArgs,
    config: &FormatSection,
    normalize: &NormalizeSection,
) -> Result<FormatOptions> {
    let mut formatter = config.formatter();
    if let Some(program) = &args.formatter {
        formatter = Some(modkit_core::format::FormatterCommand {
            program: program.clone(),
            args: args.formatter_args.clone(),
            settings_flag: args.settings_flag.clone(),
        });
    } else if let Some(cmd) = formatter.as_mut() {
        if !args.formatter_args.is_empty() {
            cmd.args.clone_from(&args.formatter_args);
        }
        if args.settings_flag.is_some() {
            cmd.settings_flag.clone_from(&args.settings_flag);
        }
    }

    let settings = match args.settings.as_ref().or(config.settings.as_ref()) {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read settings {}", path.display()))?;
            Some(
                serde_json::from_str(&text)
                    .with_context(|| format!("Settings {} are not valid JSON", path.display()))?,
            )
        }
        None => None,
    };

    let normalize = if args.no_normalize {
        None
    } else {
        let mut opts = normalize.options()?;
        if args.line_ending.is_some() {
            opts.line_ending = args.line_ending;
        }
        if args.encoding.is_some() {
            opts.encoding = args.encoding;
        }
        Some(opts)
    };

    Ok(FormatOptions {
        strip_comments_before_param: args.strip_comments_before_param || config.strip_comments_before_param,
        strip_comments_in_param: args.strip_comments_in_param || config.strip_comments_in_param,
        blank_lines: args.blank_lines.or(config.blank_lines).unwrap_or_default(),
        formatter,
        settings,
        timeout: args
            .timeout
            .map(Duration::from_secs)
            .or_else(|| config.timeout())
            .unwrap_or(format::DEFAULT_TIMEOUT),
        normalize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use modkit_core::format::BlankLineMode;
    use modkit_core::normalize::LineEnding;
    use std::path::PathBuf;

    fn args() -> FormatArgs {
        FormatArgs {
            paths: vec![PathBuf::from(".")],
            formatter: None,
            formatter_args: Vec::new(),
            settings_flag: None,
            settings: None,
            timeout: None,
            batch_size: None,
            strip_comments_before_param: false,
            strip_comments_in_param: false,
            blank_lines: None,
            line_ending: None,
            encoding: None,
            no_normalize: false,
        }
    }

    #[test]
    fn test_config_formatter_with_flag_overrides() {
        let config = FormatSection {
            program: Some(PathBuf::from("pwsh")),
            args: vec!["-File".to_string(), "fmt.ps1".to_string()],
            timeout_secs: Some(30),
            blank_lines: Some(BlankLineMode::Collapse),
            ..Default::default()
        };
        let mut a = args();
        a.settings_flag = Some("-Settings".to_string());
        a.line_ending = Some(LineEnding::Crlf);

        let opts = build_options(&a, &config, &NormalizeSection::default()).unwrap();
        let formatter = opts.formatter.unwrap();
        assert_eq!(formatter.program, PathBuf::from("pwsh"));
        assert_eq!(formatter.args, vec!["-File", "fmt.ps1"]);
        assert_eq!(formatter.settings_flag.as_deref(), Some("-Settings"));
        assert_eq!(opts.timeout, Duration::from_secs(30));
        assert_eq!(opts.blank_lines, BlankLineMode::Collapse);
        assert_eq!(opts.normalize.unwrap().line_ending, Some(LineEnding::Crlf));
    }

    #[test]
    fn test_defaults_without_config() {
        let mut a = args();
        a.no_normalize = true;
        let opts = build_options(&a, &FormatSection::default(), &NormalizeSection::default()).unwrap();
        assert!(opts.formatter.is_none());
        assert!(opts.normalize.is_none());
        assert_eq!(opts.timeout, format::DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_missing_settings_file_is_an_error() {
        let mut a = args();
        a.settings = Some(PathBuf::from("/nonexistent/settings.json"));
        assert!(build_options(&a, &FormatSection::default(), &NormalizeSection::default()).is_err());
    }
}
