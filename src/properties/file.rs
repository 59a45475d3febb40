//! Lossless model of a Java-style `.properties` file.
//!
//! Every physical line is kept verbatim, terminator included, so rendering an
//! unmodified file reproduces it byte for byte. Only entries that are
//! explicitly assigned get rewritten.

use std::fmt;

/// A logical line of a properties file
#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    /// Whitespace-only line
    Blank(String),
    /// `#` or `!` comment
    Comment(String),
    /// Key/value entry, possibly spanning several physical lines
    Entry(Entry),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    /// All physical lines of the entry, terminators included
    raw: String,
    /// Leading whitespace of the first physical line
    indent: String,
    /// Key exactly as written (escapes intact)
    key_raw: String,
    /// Separator as written, e.g. `=`, ` = `, `: `
    separator: String,
    /// Unescaped key
    key: String,
    /// Unescaped, continuation-joined value
    value: String,
    /// Terminator of the last physical line
    newline: String,
}

/// Reasons a properties file is rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// 1-based physical line number
    pub line: usize,
    pub reason: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.reason)
    }
}

/// Parsed properties file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyFile {
    lines: Vec<Line>,
    newline: String,
}

impl PropertyFile {
    /// Parse properties text, rejecting anything that would not round-trip.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let newline = if text.contains("\r\n") { "\r\n" } else { "\n" }.to_string();
        let physical: Vec<&str> = text.split_inclusive('\n').collect();
        let mut lines = Vec::new();
        let mut i = 0;

        while i < physical.len() {
            let raw = physical[i];
            let content = strip_terminator(raw);
            let trimmed = content.trim_start();

            if trimmed.is_empty() {
                lines.push(Line::Blank(raw.to_string()));
                i += 1;
                continue;
            }
            if trimmed.starts_with('#') || trimmed.starts_with('!') {
                lines.push(Line::Comment(raw.to_string()));
                i += 1;
                continue;
            }

            let start_line = i + 1;
            let mut entry_raw = raw.to_string();
            let mut logical = String::new();
            let mut current = content;
            let mut first = true;

            loop {
                let piece = if first { current } else { current.trim_start() };
                if continues(current) {
                    logical.push_str(&piece[..piece.len() - 1]);
                    i += 1;
                    if i >= physical.len() {
                        return Err(ParseError {
                            line: start_line,
                            reason: "line continuation at end of file".to_string(),
                        });
                    }
                    entry_raw.push_str(physical[i]);
                    current = strip_terminator(physical[i]);
                    first = false;
                } else {
                    logical.push_str(piece);
                    break;
                }
            }

            let newline_of_last = &physical[i][strip_terminator(physical[i]).len()..];
            let entry = parse_entry(&logical, entry_raw, newline_of_last.to_string()).map_err(|reason| {
                ParseError {
                    line: start_line,
                    reason,
                }
            })?;
            lines.push(Line::Entry(entry));
            i += 1;
        }

        Ok(Self { lines, newline })
    }

    /// Value of `key`; the last occurrence wins, as in `java.util.Properties`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries().filter(|e| e.key == key).last().map(|e| e.value.as_str())
    }

    /// All keys in file order (duplicates included)
    pub fn keys(&self) -> Vec<&str> {
        self.entries().map(|e| e.key.as_str()).collect()
    }

    /// Assign `value` to `key`.
    ///
    /// Existing entries are rewritten in place, keeping their indentation,
    /// key spelling and separator. Returns the number of entries rewritten;
    /// zero means a new entry was appended.
    pub fn set(&mut self, key: &str, value: &str) -> usize {
        let escaped = escape_value(value);
        let mut replaced = 0;

        for line in &mut self.lines {
            if let Line::Entry(entry) = line
                && entry.key == key
            {
                // A whitespace separator followed by nothing would read back as a bare key
                if escaped.is_empty() && !entry.separator.contains(['=', ':']) {
                    entry.separator = "=".to_string();
                }
                entry.raw = format!(
                    "{}{}{}{}{}",
                    entry.indent, entry.key_raw, entry.separator, escaped, entry.newline
                );
                entry.value = value.to_string();
                replaced += 1;
            }
        }

        if replaced == 0 {
            self.append(key, value, &escaped);
        }
        replaced
    }

    fn append(&mut self, key: &str, value: &str, escaped: &str) {
        if let Some(last) = self.lines.last_mut() {
            let raw = match last {
                Line::Blank(raw) | Line::Comment(raw) => raw,
                Line::Entry(entry) => {
                    if entry.newline.is_empty() {
                        entry.newline = self.newline.clone();
                    }
                    &mut entry.raw
                }
            };
            if !raw.ends_with('\n') {
                raw.push_str(&self.newline);
            }
        }

        let key_raw = escape_key(key);
        self.lines.push(Line::Entry(Entry {
            raw: format!("{}={}{}", key_raw, escaped, self.newline),
            indent: String::new(),
            key_raw,
            separator: "=".to_string(),
            key: key.to_string(),
            value: value.to_string(),
            newline: self.newline.clone(),
        }));
    }

    fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.lines.iter().filter_map(|l| match l {
            Line::Entry(e) => Some(e),
            _ => None,
        })
    }
}

impl fmt::Display for PropertyFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            match line {
                Line::Blank(raw) | Line::Comment(raw) => f.write_str(raw)?,
                Line::Entry(entry) => f.write_str(&entry.raw)?,
            }
        }
        Ok(())
    }
}

fn strip_terminator(raw: &str) -> &str {
    raw.strip_suffix("\r\n")
        .or_else(|| raw.strip_suffix('\n'))
        .unwrap_or(raw)
}

/// An odd number of trailing backslashes continues the line
fn continues(content: &str) -> bool {
    content.chars().rev().take_while(|&c| c == '\\').count() % 2 == 1
}

fn parse_entry(logical: &str, raw: String, newline: String) -> Result<Entry, String> {
    let body = logical.trim_start_matches([' ', '\t', '\x0c']);
    let indent = logical[..logical.len() - body.len()].to_string();

    let mut key_end = body.len();
    let mut escaped = false;
    for (idx, c) in body.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' | ' ' | '\t' | '\x0c' => {
                key_end = idx;
                break;
            }
            _ => {}
        }
    }

    let key_raw = &body[..key_end];
    if key_raw.is_empty() {
        return Err("entry has no key".to_string());
    }

    let rest = &body[key_end..];
    let after_ws = rest.trim_start_matches([' ', '\t', '\x0c']);
    let (after_sep, has_explicit_sep) = match after_ws.chars().next() {
        Some('=') | Some(':') => (after_ws[1..].trim_start_matches([' ', '\t', '\x0c']), true),
        _ => (after_ws, false),
    };

    if !has_explicit_sep && after_sep.is_empty() {
        return Err(format!("'{}' is not a key=value entry", body.trim_end()));
    }

    let separator = rest[..rest.len() - after_sep.len()].to_string();
    Ok(Entry {
        raw,
        indent,
        key_raw: key_raw.to_string(),
        separator,
        key: unescape(key_raw),
        value: unescape(after_sep),
        newline,
    })
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\x0c'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for (idx, c) in value.chars().enumerate() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ' ' if idx == 0 => out.push_str("\\ "),
            _ => out.push(c),
        }
    }
    out
}

fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for c in key.chars() {
        match c {
            '=' | ':' | ' ' | '#' | '!' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# Project settings\n\
        org.gradle.jvmargs=-Xmx2g -Dfile.encoding=UTF-8\n\
        \n\
        ! legacy comment\n\
        depVersion = 1.0\n\
        kotlin.code.style: official\n";

    #[test]
    fn test_round_trip_unmodified() {
        let file = PropertyFile::parse(SAMPLE).unwrap();
        assert_eq!(file.to_string(), SAMPLE);
    }

    #[test]
    fn test_get_values() {
        let file = PropertyFile::parse(SAMPLE).unwrap();
        assert_eq!(file.get("depVersion"), Some("1.0"));
        assert_eq!(file.get("kotlin.code.style"), Some("official"));
        assert_eq!(file.get("org.gradle.jvmargs"), Some("-Xmx2g -Dfile.encoding=UTF-8"));
        assert_eq!(file.get("missing"), None);
    }

    #[test]
    fn test_set_existing_keeps_separator_and_other_lines() {
        let mut file = PropertyFile::parse(SAMPLE).unwrap();
        assert_eq!(file.set("depVersion", "2.0"), 1);

        let expected = SAMPLE.replace("depVersion = 1.0", "depVersion = 2.0");
        assert_eq!(file.to_string(), expected);
    }

    #[test]
    fn test_set_appends_missing_key() {
        let mut file = PropertyFile::parse("a=1\n").unwrap();
        assert_eq!(file.set("b", "2"), 0);
        assert_eq!(file.to_string(), "a=1\nb=2\n");
    }

    #[test]
    fn test_append_without_trailing_newline() {
        let mut file = PropertyFile::parse("a=1").unwrap();
        file.set("b", "2");
        assert_eq!(file.to_string(), "a=1\nb=2\n");
    }

    #[test]
    fn test_append_to_empty_file() {
        let mut file = PropertyFile::parse("").unwrap();
        file.set("depVersion", "2.0");
        assert_eq!(file.to_string(), "depVersion=2.0\n");
    }

    #[test]
    fn test_crlf_preserved() {
        let text = "a=1\r\nb=2\r\n";
        let mut file = PropertyFile::parse(text).unwrap();
        file.set("b", "3");
        file.set("c", "4");
        assert_eq!(file.to_string(), "a=1\r\nb=3\r\nc=4\r\n");
    }

    #[test]
    fn test_duplicate_keys_all_rewritten() {
        let mut file = PropertyFile::parse("v=1\nother=x\nv=2\n").unwrap();
        assert_eq!(file.get("v"), Some("2"));
        assert_eq!(file.set("v", "3"), 2);
        assert_eq!(file.to_string(), "v=3\nother=x\nv=3\n");
    }

    #[test]
    fn test_continuation_lines() {
        let text = "list=a,\\\n    b,\\\n    c\nnext=1\n";
        let mut file = PropertyFile::parse(text).unwrap();
        assert_eq!(file.get("list"), Some("a,b,c"));
        assert_eq!(file.to_string(), text);

        file.set("list", "d");
        assert_eq!(file.to_string(), "list=d\nnext=1\n");
    }

    #[test]
    fn test_escaped_backslash_is_not_continuation() {
        let text = "path=C:\\\\tools\\\\\nnext=1\n";
        let file = PropertyFile::parse(text).unwrap();
        assert_eq!(file.get("path"), Some("C:\\tools\\"));
        assert_eq!(file.get("next"), Some("1"));
    }

    #[test]
    fn test_dangling_continuation_is_malformed() {
        let err = PropertyFile::parse("a=1\nb=2\\").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.reason.contains("continuation"));
    }

    #[test]
    fn test_missing_key_is_malformed() {
        let err = PropertyFile::parse("a=1\n=orphan\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.reason.contains("no key"));
    }

    #[test]
    fn test_bare_word_is_malformed() {
        let err = PropertyFile::parse("a=1\ngarbage\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.to_string(), "line 2: 'garbage' is not a key=value entry");
    }

    #[test]
    fn test_whitespace_separator_and_empty_value() {
        let file = PropertyFile::parse("key value\nempty=\n").unwrap();
        assert_eq!(file.get("key"), Some("value"));
        assert_eq!(file.get("empty"), Some(""));
    }

    #[test]
    fn test_clear_value_behind_whitespace_separator() {
        let mut file = PropertyFile::parse("depVersion 1.0\nother=x\n").unwrap();
        file.set("depVersion", "");
        assert_eq!(file.to_string(), "depVersion=\nother=x\n");

        let reparsed = PropertyFile::parse(&file.to_string()).unwrap();
        assert_eq!(reparsed.get("depVersion"), Some(""));
        assert_eq!(reparsed.get("other"), Some("x"));
    }

    #[test]
    fn test_set_then_parse_for_every_separator() {
        for separator in ["=", " = ", ":", ": ", " ", "\t"] {
            for value in ["2.1", "", " padded", "a\\b"] {
                let text = format!("# deps\ndepVersion{}1.0\nother=x\n", separator);
                let mut file = PropertyFile::parse(&text).unwrap();
                file.set("depVersion", value);

                let written = file.to_string();
                let reparsed = PropertyFile::parse(&written)
                    .unwrap_or_else(|e| panic!("{:?} with {:?} wrote {:?}: {}", separator, value, written, e));
                assert_eq!(reparsed.get("depVersion"), Some(value), "separator {:?}", separator);
                assert_eq!(reparsed.get("other"), Some("x"));
                assert!(written.starts_with("# deps\n"));
            }
        }
    }

    #[test]
    fn test_unicode_escape() {
        let file = PropertyFile::parse("greeting=caf\\u00e9\n").unwrap();
        assert_eq!(file.get("greeting"), Some("café"));
    }

    #[test]
    fn test_value_escaping_on_write() {
        let mut file = PropertyFile::parse("").unwrap();
        file.set("p", " lead\\and\nnewline");
        assert_eq!(file.to_string(), "p=\\ lead\\\\and\\nnewline\n");

        let reparsed = PropertyFile::parse(&file.to_string()).unwrap();
        assert_eq!(reparsed.get("p"), Some(" lead\\and\nnewline"));
    }

    #[test]
    fn test_key_escaping_on_append() {
        let mut file = PropertyFile::parse("").unwrap();
        file.set("odd key", "1");
        assert_eq!(file.to_string(), "odd\\ key=1\n");
        assert_eq!(PropertyFile::parse(&file.to_string()).unwrap().get("odd key"), Some("1"));
    }

    #[test]
    fn test_keys_in_order() {
        let file = PropertyFile::parse(SAMPLE).unwrap();
        assert_eq!(file.keys(), vec!["org.gradle.jvmargs", "depVersion", "kotlin.code.style"]);
    }
}
