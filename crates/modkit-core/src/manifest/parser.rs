//! Span-tagged parser for PowerShell data files.
//!
//! Only the data subset is understood: `@{}` hashtables, `@()` arrays,
//! bare comma lists, quoted strings and here-strings, numbers, variables
//! (`$true`, `$false`, `$null`) and bare words. Comments (`# ...` and
//! `<# ... #>`) and whitespace are skipped as trivia. Every node records
//! the byte range it occupies in the source, so an edit can replace one
//! value and leave every other byte alone.

use std::ops::Range;

use crate::error::ManifestError;

/// A parsed value and the byte range it was parsed from.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Byte range of the value in the source.
    pub span: Range<usize>,
    /// The parsed value.
    pub value: Value,
}

/// Value forms of the data subset.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `@{ ... }` literal, entries in source order.
    Hashtable(Vec<Entry>),
    /// `@( ... )` literal.
    Array(Vec<Node>),
    /// Comma-separated values without an `@( )` wrapper.
    List(Vec<Node>),
    /// Decoded string contents.
    String(String),
    /// Numbers, bare words and anything else kept verbatim.
    Bare(String),
    /// `$name`, without the sigil.
    Variable(String),
}

/// One `key = value` assignment inside a hashtable.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Key as written, without quotes.
    pub key: String,
    /// Byte range of the key.
    pub key_span: Range<usize>,
    /// Assigned value.
    pub value: Node,
}

impl Node {
    /// Look up a hashtable entry; keys compare case-insensitively.
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.entry(key).map(|e| &e.value)
    }

    /// The hashtable entry for `key`, including its key span.
    pub fn entry(&self, key: &str) -> Option<&Entry> {
        match &self.value {
            Value::Hashtable(entries) => entries.iter().find(|e| e.key.eq_ignore_ascii_case(key)),
            _ => None,
        }
    }

    /// Follow a path of hashtable keys from this node.
    pub fn find(&self, path: &[&str]) -> Option<&Node> {
        path.iter().try_fold(self, |node, key| node.get(key))
    }

    /// Scalar text of a string or bare word.
    pub fn as_scalar(&self) -> Option<&str> {
        match &self.value {
            Value::String(s) | Value::Bare(s) => Some(s),
            _ => None,
        }
    }

    /// Scalar items of an array or list; a lone scalar is a one-item list.
    pub fn as_string_list(&self) -> Option<Vec<String>> {
        match &self.value {
            Value::Array(items) | Value::List(items) => items
                .iter()
                .map(|n| n.as_scalar().map(str::to_owned))
                .collect(),
            Value::String(s) | Value::Bare(s) => Some(vec![s.clone()]),
            _ => None,
        }
    }
}

/// Parse a whole manifest. The document must be a single hashtable,
/// optionally surrounded by trivia.
///
/// # Errors
///
/// Returns [`ManifestError::Parse`] with the byte offset of the first
/// unexpected token.
pub fn parse_document(src: &str) -> Result<Node, ManifestError> {
    let mut parser = Parser::new(src);
    parser.skip_trivia();
    if !parser.at("@{") {
        return Err(parser.error("expected '@{' at start of manifest"));
    }
    let root = parser.parse_value()?;
    parser.skip_trivia();
    if parser.pos < src.len() {
        return Err(parser.error("unexpected content after manifest hashtable"));
    }
    Ok(root)
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn error(&self, message: &str) -> ManifestError {
        ManifestError::Parse {
            offset: self.pos,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn at(&self, token: &str) -> bool {
        self.bytes[self.pos..].starts_with(token.as_bytes())
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b) if b.is_ascii_whitespace() => self.pos += 1,
                Some(b'<') if self.at("<#") => {
                    self.pos = match self.src[self.pos + 2..].find("#>") {
                        Some(end) => self.pos + 2 + end + 2,
                        None => self.bytes.len(),
                    };
                }
                Some(b'#') => {
                    self.pos = match self.src[self.pos..].find('\n') {
                        Some(end) => self.pos + end + 1,
                        None => self.bytes.len(),
                    };
                }
                // Line continuation.
                Some(b'`') if matches!(self.bytes.get(self.pos + 1), Some(b'\n' | b'\r')) => {
                    self.pos += 1;
                }
                _ => return,
            }
        }
    }

    /// A value, extended into a [`Value::List`] when followed by commas.
    fn parse_value(&mut self) -> Result<Node, ManifestError> {
        let first = self.parse_single()?;
        let checkpoint = self.pos;
        self.skip_trivia();
        if self.peek() != Some(b',') {
            self.pos = checkpoint;
            return Ok(first);
        }

        let start = first.span.start;
        let mut items = vec![first];
        while self.peek() == Some(b',') {
            self.pos += 1;
            self.skip_trivia();
            items.push(self.parse_single()?);
            let checkpoint = self.pos;
            self.skip_trivia();
            if self.peek() != Some(b',') {
                self.pos = checkpoint;
                break;
            }
        }
        let end = items.last().map_or(start, |n| n.span.end);
        Ok(Node {
            span: start..end,
            value: Value::List(items),
        })
    }

    fn parse_single(&mut self) -> Result<Node, ManifestError> {
        let start = self.pos;
        match self.peek() {
            None => Err(self.error("unexpected end of input")),
            Some(b'@') if self.at("@{") => self.parse_hashtable(),
            Some(b'@') if self.at("@(") => self.parse_array(),
            Some(b'@') if self.at("@'") || self.at("@\"") => self.parse_here_string(),
            Some(b'\'') => self.parse_single_quoted(),
            Some(b'"') => self.parse_double_quoted(),
            Some(b'[') => {
                // Type literal such as [version]'1.0'; the cast is kept in the span.
                let close = self.src[self.pos..]
                    .find(']')
                    .ok_or_else(|| self.error("unterminated type literal"))?;
                self.pos += close + 1;
                self.skip_trivia();
                let inner = self.parse_single()?;
                Ok(Node {
                    span: start..inner.span.end,
                    value: inner.value,
                })
            }
            Some(b'$') => {
                self.pos += 1;
                let name = self.take_word();
                if name.is_empty() {
                    return Err(self.error("expected variable name after '$'"));
                }
                Ok(Node {
                    span: start..self.pos,
                    value: Value::Variable(name.to_string()),
                })
            }
            Some(b'}' | b')' | b',' | b';' | b'=') => Err(self.error("expected a value")),
            Some(_) => {
                let word = self.take_word();
                if word.is_empty() {
                    return Err(self.error("expected a value"));
                }
                Ok(Node {
                    span: start..self.pos,
                    value: Value::Bare(word.to_string()),
                })
            }
        }
    }

    /// Consume a run of non-delimiter bytes.
    fn take_word(&mut self) -> &'a str {
        let src = self.src;
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace()
                || matches!(b, b',' | b';' | b'=' | b'}' | b')' | b'(' | b'{' | b'#' | b'\'' | b'"')
            {
                break;
            }
            self.pos += 1;
        }
        &src[start..self.pos]
    }

    fn parse_hashtable(&mut self) -> Result<Node, ManifestError> {
        let start = self.pos;
        self.pos += 2;
        let mut entries = Vec::new();

        loop {
            self.skip_trivia();
            match self.peek() {
                None => return Err(self.error("unterminated hashtable")),
                Some(b'}') => {
                    self.pos += 1;
                    break;
                }
                Some(b';') => {
                    self.pos += 1;
                    continue;
                }
                _ => {}
            }

            let key_start = self.pos;
            let key = match self.peek() {
                Some(b'\'' | b'"') => match self.parse_single()?.value {
                    Value::String(s) => s,
                    _ => return Err(self.error("invalid hashtable key")),
                },
                _ => self.take_word().to_string(),
            };
            if key.is_empty() {
                return Err(self.error("expected hashtable key"));
            }
            let key_span = key_start..self.pos;

            self.skip_trivia();
            if self.peek() != Some(b'=') {
                return Err(self.error("expected '=' after hashtable key"));
            }
            self.pos += 1;
            self.skip_trivia();

            let value = self.parse_value()?;
            entries.push(Entry {
                key,
                key_span,
                value,
            });
        }

        Ok(Node {
            span: start..self.pos,
            value: Value::Hashtable(entries),
        })
    }

    fn parse_array(&mut self) -> Result<Node, ManifestError> {
        let start = self.pos;
        self.pos += 2;
        let mut items = Vec::new();

        loop {
            self.skip_trivia();
            match self.peek() {
                None => return Err(self.error("unterminated array")),
                Some(b')') => {
                    self.pos += 1;
                    break;
                }
                Some(b',' | b';') => {
                    self.pos += 1;
                    continue;
                }
                _ => {}
            }
            match self.parse_value()? {
                Node {
                    value: Value::List(inner),
                    ..
                } => items.extend(inner),
                node => items.push(node),
            }
        }

        Ok(Node {
            span: start..self.pos,
            value: Value::Array(items),
        })
    }

    fn parse_single_quoted(&mut self) -> Result<Node, ManifestError> {
        let src = self.src;
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        loop {
            let rest = &src[self.pos..];
            let Some(idx) = rest.find('\'') else {
                self.pos = start;
                return Err(self.error("unterminated string"));
            };
            out.push_str(&rest[..idx]);
            self.pos += idx + 1;
            if self.peek() == Some(b'\'') {
                out.push('\'');
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(Node {
            span: start..self.pos,
            value: Value::String(out),
        })
    }

    fn parse_double_quoted(&mut self) -> Result<Node, ManifestError> {
        let src = self.src;
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        let mut chars = src[self.pos..].char_indices().peekable();

        while let Some((idx, c)) = chars.next() {
            match c {
                '`' => {
                    if let Some((_, escaped)) = chars.next() {
                        out.push(match escaped {
                            'n' => '\n',
                            'r' => '\r',
                            't' => '\t',
                            '0' => '\0',
                            other => other,
                        });
                    }
                }
                '"' if chars.peek().map(|&(_, n)| n) == Some('"') => {
                    chars.next();
                    out.push('"');
                }
                '"' => {
                    self.pos += idx + 1;
                    return Ok(Node {
                        span: start..self.pos,
                        value: Value::String(out),
                    });
                }
                other => out.push(other),
            }
        }

        self.pos = start;
        Err(self.error("unterminated string"))
    }

    fn parse_here_string(&mut self) -> Result<Node, ManifestError> {
        let start = self.pos;
        let quote = self.bytes[self.pos + 1] as char;
        let body_start = match self.src[self.pos..].find('\n') {
            Some(idx) => self.pos + idx + 1,
            None => return Err(self.error("here-string header must end the line")),
        };
        let terminator = format!("\n{quote}@");
        let Some(rel_end) = self.src[body_start - 1..].find(&terminator) else {
            return Err(self.error("unterminated here-string"));
        };
        let body_end = body_start - 1 + rel_end;
        let body = if body_end >= body_start {
            self.src[body_start..body_end].trim_end_matches('\r')
        } else {
            ""
        };
        self.pos = body_end + terminator.len();
        Ok(Node {
            span: start..self.pos,
            value: Value::String(body.to_string()),
        })
    }
}
