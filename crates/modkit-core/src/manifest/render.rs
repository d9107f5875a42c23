//! Canonical rendering of replacement values.

/// Layout of the line a replaced value sits on.
#[derive(Debug, Clone, Copy)]
pub struct Layout<'a> {
    /// Leading whitespace of the line holding the key.
    pub indent: &'a str,
    /// Newline sequence used by the document.
    pub newline: &'a str,
}

impl<'a> Layout<'a> {
    /// Derive the layout for a value whose key starts at `key_start`.
    pub fn at(text: &'a str, key_start: usize) -> Self {
        let line_start = text[..key_start].rfind('\n').map_or(0, |i| i + 1);
        let indent_len = text[line_start..]
            .bytes()
            .take_while(|b| *b == b' ' || *b == b'\t')
            .count();
        Self {
            indent: &text[line_start..line_start + indent_len],
            newline: if text.contains("\r\n") { "\r\n" } else { "\n" },
        }
    }
}

/// Single-quoted string literal; embedded quotes are doubled.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Array literal of already-rendered items.
///
/// `@()` when empty, `@(item)` for one item, otherwise one item per line
/// indented four spaces past the key.
pub fn list(items: &[String], layout: Layout<'_>) -> String {
    match items {
        [] => "@()".to_string(),
        [one] => format!("@({one})"),
        _ => {
            let Layout { indent, newline } = layout;
            let body = items
                .iter()
                .map(|item| format!("{indent}    {item}"))
                .collect::<Vec<_>>()
                .join(&format!(",{newline}"));
            format!("@({newline}{body}{newline}{indent})")
        }
    }
}

/// Array literal of quoted strings.
pub fn string_array(values: &[String], layout: Layout<'_>) -> String {
    let items: Vec<String> = values.iter().map(|v| quote(v)).collect();
    list(&items, layout)
}
