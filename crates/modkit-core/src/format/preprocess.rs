//! Text clean-up applied before the external formatter runs.
//!
//! Works line by line. Here-string bodies are never touched, since any edit
//! there would change a string value.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Treatment of blank lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlankLineMode {
    /// Leave blank lines alone.
    #[default]
    Keep,
    /// Runs of blank lines become one.
    Collapse,
    /// Every blank line is dropped.
    Remove,
}

impl FromStr for BlankLineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "keep" => Ok(Self::Keep),
            "collapse" => Ok(Self::Collapse),
            "remove" => Ok(Self::Remove),
            _ => Err(format!("unknown blank line mode '{s}'")),
        }
    }
}

/// Which preprocessing steps to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreprocessOptions {
    /// Drop comments directly above a `param(...)` block.
    pub strip_comments_before_param: bool,
    /// Drop comments inside a `param(...)` block.
    pub strip_comments_in_param: bool,
    /// Blank-line treatment.
    pub blank_lines: BlankLineMode,
}

impl PreprocessOptions {
    /// No step is enabled.
    pub fn is_noop(&self) -> bool {
        !self.strip_comments_before_param
            && !self.strip_comments_in_param
            && self.blank_lines == BlankLineMode::Keep
    }
}

/// Apply `options` to `text`. Returns the text unchanged when no step is
/// enabled; otherwise lines are rejoined with the text's dominant newline.
pub fn preprocess(text: &str, options: &PreprocessOptions) -> String {
    if options.is_noop() {
        return text.to_string();
    }

    let newline = if text.contains("\r\n") { "\r\n" } else { "\n" };
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    let protected = here_string_bodies(&lines);
    let mut removed = vec![false; lines.len()];

    if options.strip_comments_before_param || options.strip_comments_in_param {
        for (start, end) in param_blocks(&lines, &protected) {
            if options.strip_comments_in_param {
                strip_inside(&mut lines, &mut removed, start, end);
            }
            if options.strip_comments_before_param {
                strip_above(&lines, &mut removed, &protected, start);
            }
        }
    }

    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    let mut previous_blank = false;
    for (i, line) in lines.iter().enumerate() {
        if removed[i] {
            continue;
        }
        let blank = !protected[i] && line.trim().is_empty();
        match options.blank_lines {
            BlankLineMode::Remove if blank => continue,
            BlankLineMode::Collapse if blank && previous_blank => continue,
            _ => {}
        }
        previous_blank = blank;
        out.push(line);
    }

    let mut result = out.join(newline);
    if text.ends_with('\n') && !result.is_empty() {
        result.push_str(newline);
    }
    result
}

/// Mark lines that sit inside a here-string body (opener and closer lines
/// included) so no step edits them.
fn here_string_bodies(lines: &[String]) -> Vec<bool> {
    let mut protected = vec![false; lines.len()];
    let mut closer: Option<&str> = None;
    for (i, line) in lines.iter().enumerate() {
        if let Some(end) = closer {
            protected[i] = true;
            if line.starts_with(end) {
                closer = None;
            }
            continue;
        }
        let trimmed = line.trim_end();
        if trimmed.ends_with("@'") {
            closer = Some("'@");
            protected[i] = true;
        } else if trimmed.ends_with("@\"") {
            closer = Some("\"@");
            protected[i] = true;
        }
    }
    protected
}

fn is_comment_line(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

/// Line ranges `(start, end)` of every `param(...)` block.
fn param_blocks(lines: &[String], protected: &[bool]) -> Vec<(usize, usize)> {
    let mut blocks = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        if protected[i] {
            i += 1;
            continue;
        }
        let trimmed = lines[i].trim_start();
        let opens = trimmed
            .get(..5)
            .is_some_and(|kw| kw.eq_ignore_ascii_case("param"))
            && trimmed[5..].trim_start().starts_with('(');
        if !opens {
            i += 1;
            continue;
        }
        match closing_line(lines, i) {
            Some(end) => {
                blocks.push((i, end));
                i = end + 1;
            }
            None => break,
        }
    }
    blocks
}

/// Index of the line holding the parenthesis that closes the `param(` on
/// line `start`. Quoted strings and comments are skipped.
fn closing_line(lines: &[String], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_block_comment = false;
    for (idx, line) in lines.iter().enumerate().skip(start) {
        let mut chars = line.chars().peekable();
        let mut quote: Option<char> = None;
        let mut prev = ' ';
        while let Some(c) = chars.next() {
            if in_block_comment {
                if c == '#' && chars.peek() == Some(&'>') {
                    chars.next();
                    in_block_comment = false;
                }
                continue;
            }
            if let Some(q) = quote {
                if c == '`' {
                    chars.next();
                } else if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '\'' | '"' => quote = Some(c),
                '<' if chars.peek() == Some(&'#') => {
                    chars.next();
                    in_block_comment = true;
                }
                '#' if prev.is_whitespace() || prev == '(' => break,
                '(' => depth += 1,
                ')' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return Some(idx);
                    }
                }
                _ => {}
            }
            prev = c;
        }
    }
    None
}

/// Remove comment lines, block comments and trailing comments inside a
/// param block.
fn strip_inside(lines: &mut [String], removed: &mut [bool], start: usize, end: usize) {
    let mut in_block = false;
    for i in start..=end {
        let trimmed = lines[i].trim();
        if in_block {
            removed[i] = true;
            if trimmed.ends_with("#>") {
                in_block = false;
            }
            continue;
        }
        if i > start && i < end {
            if trimmed.starts_with("<#") {
                removed[i] = true;
                in_block = !trimmed.ends_with("#>") || trimmed.len() < 4;
                continue;
            }
            if is_comment_line(trimmed) {
                removed[i] = true;
                continue;
            }
        }
        if let Some(cut) = trailing_comment_start(&lines[i]) {
            let kept = lines[i][..cut].trim_end().to_string();
            lines[i] = kept;
        }
    }
}

/// Byte offset of a `#` line comment that follows code on the same line.
fn trailing_comment_start(line: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut prev = ' ';
    let mut seen_code = false;
    let mut chars = line.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if let Some(q) = quote {
            if c == '`' {
                chars.next();
            } else if c == q {
                quote = None;
            }
            prev = c;
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '#' if seen_code && prev.is_whitespace() => return Some(i),
            _ => {}
        }
        if !c.is_whitespace() {
            seen_code = true;
        }
        prev = c;
    }
    None
}

/// Remove the comments stacked directly above line `start`, looking past
/// blank lines and attribute lines such as `[CmdletBinding()]`.
fn strip_above(lines: &[String], removed: &mut [bool], protected: &[bool], start: usize) {
    let mut i = start;
    while i > 0 {
        i -= 1;
        if protected[i] {
            return;
        }
        let trimmed = lines[i].trim();
        if trimmed.is_empty() || trimmed.starts_with('[') {
            continue;
        }
        if is_comment_line(trimmed) && !trimmed.ends_with("#>") {
            removed[i] = true;
            continue;
        }
        if trimmed.ends_with("#>") {
            // Walk up to the line that opens the block comment.
            let mut j = i;
            loop {
                removed[j] = true;
                if lines[j].contains("<#") || j == 0 {
                    break;
                }
                j -= 1;
            }
            i = j;
            continue;
        }
        return;
    }
}
