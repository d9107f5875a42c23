//! Line-based scan of script files for top-level declarations.
//!
//! This is not a language parser. A small lexer tracks brace depth while
//! skipping comments, quoted strings and here-strings, and keeps only the
//! lines that begin at depth zero in code. Declarations are then matched on
//! those lines with regular expressions.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::normalize::encoding;

static FUNCTION_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*function\s+(?:(?:global|script|local|private):)?([a-z][a-z0-9]*-[a-z0-9_]+)(?:\s|\{|\(|$)",
    )
    .expect("function pattern is valid")
});

static ALIAS_CMD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:set|new)-alias\s+(.*)$")
        .expect("alias pattern is valid")
});

static ALIAS_NAME_PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:^|\s)-name[:\s]\s*(?:'([^']+)'|"([^"]+)"|([^\s'"-][^\s]*))"#)
        .expect("alias name pattern is valid")
});

/// Top-level `function Verb-Noun` names in `text`.
pub fn function_names(text: &str) -> Vec<String> {
    top_level_lines(text)
        .iter()
        .filter_map(|line| FUNCTION_DECL.captures(line))
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Names given to top-level `Set-Alias` / `New-Alias` calls in `text`.
pub fn alias_names(text: &str) -> Vec<String> {
    top_level_lines(text)
        .iter()
        .filter_map(|line| ALIAS_CMD.captures(line))
        .filter_map(|caps| alias_argument(&caps[1]))
        .collect()
}

/// The alias name from an argument list: `-Name x` wins over the first
/// positional argument.
fn alias_argument(args: &str) -> Option<String> {
    if let Some(caps) = ALIAS_NAME_PARAM.captures(args) {
        return caps
            .get(1)
            .or_else(|| caps.get(2))
            .or_else(|| caps.get(3))
            .map(|m| m.as_str().to_string());
    }

    // Positional form: skip switch parameters and their values.
    let mut tokens = args.split_whitespace();
    while let Some(token) = tokens.next() {
        if token.starts_with('-') {
            if !token.contains(':') && !is_switch(token) {
                tokens.next();
            }
            continue;
        }
        let name = token.trim_matches(|c| c == '\'' || c == '"');
        return (!name.is_empty()).then(|| name.to_string());
    }
    None
}

fn is_switch(token: &str) -> bool {
    ["-force", "-passthru", "-whatif", "-confirm"]
        .iter()
        .any(|s| token.eq_ignore_ascii_case(s))
}

/// Read a script in whatever encoding its BOM declares, returning `None`
/// when it cannot be read or decoded.
pub(crate) fn read_script(path: &Path) -> Option<String> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "skipping unreadable script");
            return None;
        }
    };
    let text = encoding::decode(&bytes, encoding::detect_encoding(&bytes));
    if text.is_none() {
        debug!(path = %path.display(), "skipping undecodable script");
    }
    text
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Code,
    LineComment,
    BlockComment,
    SingleQuote,
    DoubleQuote,
    HereSingle,
    HereDouble,
}

/// Lines that start at brace depth zero outside any comment, string or
/// here-string. Comment text is removed; quoted strings are kept.
fn top_level_lines(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut state = State::Code;
    let mut depth = 0usize;
    let mut line_is_top = true;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c == '\n' {
            if line_is_top && !current.trim().is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            current.clear();
            if state == State::LineComment {
                state = State::Code;
            }
            i += 1;

            // A here-string closes only at the start of a line.
            let closer = match state {
                State::HereSingle => Some('\''),
                State::HereDouble => Some('"'),
                _ => None,
            };
            if let Some(q) = closer
                && chars.get(i) == Some(&q)
                && chars.get(i + 1) == Some(&'@')
            {
                state = State::Code;
                i += 2;
                line_is_top = false;
                continue;
            }
            line_is_top = state == State::Code && depth == 0;
            continue;
        }

        match state {
            State::LineComment | State::HereSingle | State::HereDouble => {}
            State::BlockComment => {
                if c == '#' && next == Some('>') {
                    state = State::Code;
                    i += 1;
                }
            }
            State::SingleQuote => {
                current.push(c);
                if c == '\'' {
                    if next == Some('\'') {
                        current.push('\'');
                        i += 1;
                    } else {
                        state = State::Code;
                    }
                }
            }
            State::DoubleQuote => {
                current.push(c);
                if c == '`' {
                    if let Some(n) = next.filter(|n| *n != '\n') {
                        current.push(n);
                        i += 1;
                    }
                } else if c == '"' {
                    if next == Some('"') {
                        current.push('"');
                        i += 1;
                    } else {
                        state = State::Code;
                    }
                }
            }
            State::Code => match c {
                '<' if next == Some('#') => {
                    state = State::BlockComment;
                    i += 1;
                }
                '#' => state = State::LineComment,
                '@' if matches!(next, Some('\'' | '"')) && opens_here_string(&chars, i + 2) => {
                    state = if next == Some('\'') {
                        State::HereSingle
                    } else {
                        State::HereDouble
                    };
                    i += 1;
                }
                '\'' => {
                    current.push(c);
                    state = State::SingleQuote;
                }
                '"' => {
                    current.push(c);
                    state = State::DoubleQuote;
                }
                '`' => {
                    current.push(c);
                    if let Some(n) = next.filter(|n| *n != '\n') {
                        current.push(n);
                        i += 1;
                    }
                }
                '{' => {
                    depth += 1;
                    current.push(c);
                }
                '}' => {
                    depth = depth.saturating_sub(1);
                    current.push(c);
                }
                _ => current.push(c),
            },
        }
        i += 1;
    }

    if line_is_top && !current.trim().is_empty() {
        lines.push(current);
    }
    lines
}

/// A here-string opener is `@'` or `@"` followed only by whitespace up to
/// the end of the line.
fn opens_here_string(chars: &[char], from: usize) -> bool {
    chars[from.min(chars.len())..]
        .iter()
        .take_while(|c| **c != '\n')
        .all(|c| c.is_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = r#"
<#
function Get-Commented { }
#>
function Get-Widget {
    param([string]$Name)
    function Get-NestedHelper { }
    "{ unbalanced in a string"
}

function global:Set-Widget($Value) { $Value }
# function Remove-Commented { }
function helper { }
FUNCTION Test-Widget
{
}
$text = @'
function Get-InHereString { }
'@
function Invoke-After { }
"#;

    #[test]
    fn test_top_level_functions_only() {
        let names = function_names(SCRIPT);
        assert_eq!(
            names,
            vec!["Get-Widget", "Set-Widget", "Test-Widget", "Invoke-After"]
        );
    }

    #[test]
    fn test_braces_in_strings_do_not_shift_depth() {
        let text = "function A-One {\n  $x = '}'\n  $y = \"}}\"\n}\nfunction B-Two { }\n";
        assert_eq!(function_names(text), vec!["A-One", "B-Two"]);
    }

    #[test]
    fn test_alias_declarations() {
        let text = "Set-Alias -Name gw -Value Get-Widget\nNew-Alias 'sw' Set-Widget -Force\nfunction X-Y {\n  Set-Alias inner X-Y\n}\nSet-Alias -Value Get-Widget -Name:\"gw2\"\nNew-Alias -Scope Global tw Test-Widget\n";
        assert_eq!(alias_names(text), vec!["gw", "sw", "gw2", "tw"]);
    }

    #[test]
    fn test_crlf_and_unterminated_constructs() {
        let text = "function Get-One {\r\n}\r\nfunction Get-Two { <# unterminated\r\nfunction Get-Three { }\r\n";
        assert_eq!(function_names(text), vec!["Get-One", "Get-Two"]);
    }
}
