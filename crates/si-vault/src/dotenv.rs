//! Layout-preserving dotenv codec
//!
//! The document is kept as raw lines with their original terminators so that
//! rewriting one value leaves comments, blank lines, ordering, `export`
//! prefixes, inline comments and CRLF endings untouched.

use crate::error::{Result, VaultError};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

/// Plaintext header carrying the recipient a file was encrypted to.
pub const PUBLIC_KEY_NAME: &str = "SI_VAULT_PUBLIC_KEY";

static KEY_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"));

pub fn validate_key_name(key: &str) -> Result<()> {
    if KEY_NAME.is_match(key) {
        Ok(())
    } else {
        Err(VaultError::InvalidKey(key.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    pub text: String,
    /// `"\n"`, `"\r\n"`, or empty for a final line without terminator.
    pub nl: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DotenvFile {
    pub lines: Vec<RawLine>,
    pub default_nl: String,
}

impl Default for DotenvFile {
    fn default() -> Self {
        Self {
            lines: Vec::new(),
            default_nl: "\n".to_string(),
        }
    }
}

/// One `KEY=value` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Zero-based line index.
    pub line: usize,
    pub key: String,
    /// Value as written, quotes included, inline comment excluded.
    pub value_raw: String,
}

#[derive(Debug, Clone, Default)]
struct Assignment {
    left_raw: String,
    key: String,
    value_raw: String,
    value_ws: String,
    comment: String,
}

fn leading_ws(s: &str) -> &str {
    let trimmed = s.trim_start_matches([' ', '\t']);
    &s[..s.len() - trimmed.len()]
}

fn parse_assignment(line: &str) -> Option<Assignment> {
    if line.trim().is_empty() || line.trim_start_matches([' ', '\t']).starts_with('#') {
        return None;
    }
    let eq = line.find('=')?;
    let (left, right) = (&line[..eq], &line[eq + 1..]);
    let left_trim = left.trim();
    let key_part = match left_trim.strip_prefix("export") {
        Some(rest) if rest.starts_with([' ', '\t']) => rest.trim(),
        _ => left_trim,
    };
    if key_part.is_empty() {
        return None;
    }
    let (value_raw, comment) = split_value_and_comment(right);
    Some(Assignment {
        left_raw: left.to_string(),
        key: key_part.to_string(),
        value_ws: leading_ws(value_raw).to_string(),
        value_raw: value_raw.to_string(),
        comment: comment.to_string(),
    })
}

/// Position just past the closing quote starting at `open`, if any.
fn closing_quote(right: &str, open: usize) -> Option<usize> {
    let bytes = right.as_bytes();
    let quote = bytes[open];
    let mut escaped = false;
    for (i, &ch) in bytes.iter().enumerate().skip(open + 1) {
        if quote == b'"' {
            if escaped {
                escaped = false;
                continue;
            }
            if ch == b'\\' {
                escaped = true;
                continue;
            }
        }
        if ch == quote {
            return Some(i + 1);
        }
    }
    None
}

fn split_value_and_comment(right: &str) -> (&str, &str) {
    let start = right.len() - right.trim_start_matches([' ', '\t']).len();
    if start >= right.len() {
        return (right, "");
    }
    let bytes = right.as_bytes();
    match bytes[start] {
        b'#' => ("", right),
        b'\'' | b'"' => {
            let Some(end) = closing_quote(right, start) else {
                return (right, "");
            };
            let rest = &right[end..];
            if rest.trim_start_matches([' ', '\t']).starts_with('#') {
                (&right[..end], &right[end..])
            } else {
                (right, "")
            }
        }
        _ => {
            for i in start + 1..bytes.len() {
                if bytes[i] == b'#' && matches!(bytes[i - 1], b' ' | b'\t') {
                    let mut cut = i - 1;
                    while cut > start && matches!(bytes[cut - 1], b' ' | b'\t') {
                        cut -= 1;
                    }
                    return (&right[..cut], &right[cut..]);
                }
            }
            (right, "")
        }
    }
}

/// Plain value of a raw dotenv value: quotes removed, escapes in double
/// quotes resolved, unquoted values trimmed.
pub fn normalize_value(raw: &str) -> std::result::Result<String, String> {
    let value = raw.trim();
    if let Some(inner) = value.strip_prefix('\'') {
        return inner
            .strip_suffix('\'')
            .map(str::to_string)
            .ok_or_else(|| "unterminated single quote".to_string());
    }
    if let Some(inner) = value.strip_prefix('"') {
        let Some(inner) = inner.strip_suffix('"').filter(|_| value.len() >= 2) else {
            return Err("unterminated double quote".to_string());
        };
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(ch) = chars.next() {
            if ch != '\\' {
                out.push(ch);
                continue;
            }
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        }
        return Ok(out);
    }
    Ok(value.to_string())
}

/// Dotenv spelling of a plain value, quoted only when needed.
pub fn render_value(plain: &str) -> String {
    let needs_quotes = plain.is_empty()
        || plain != plain.trim()
        || plain.contains(['#', '"', '\'', '\\', '\n', '\r', '\t', ' ']);
    if !needs_quotes {
        return plain.to_string();
    }
    let mut out = String::with_capacity(plain.len() + 2);
    out.push('"');
    for ch in plain.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

fn render_assignment(existing: Option<&Assignment>, key: &str, value: &str) -> String {
    match existing {
        Some(a) if !a.left_raw.trim().is_empty() => {
            format!("{}={}{}{}", a.left_raw, a.value_ws, value.trim(), a.comment)
        }
        _ => format!("{}={}", key.trim(), value.trim()),
    }
}

impl DotenvFile {
    pub fn parse(data: &str) -> Self {
        let mut lines = Vec::new();
        let mut rest = data;
        while !rest.is_empty() {
            match rest.find('\n') {
                Some(idx) => {
                    let line = &rest[..idx];
                    let (text, nl) = match line.strip_suffix('\r') {
                        Some(text) => (text, "\r\n"),
                        None => (line, "\n"),
                    };
                    lines.push(RawLine {
                        text: text.to_string(),
                        nl: nl.to_string(),
                    });
                    rest = &rest[idx + 1..];
                }
                None => {
                    lines.push(RawLine {
                        text: rest.to_string(),
                        nl: String::new(),
                    });
                    rest = "";
                }
            }
        }
        let default_nl = lines
            .iter()
            .find(|l| !l.nl.is_empty())
            .map(|l| l.nl.clone())
            .unwrap_or_else(|| "\n".to_string());
        Self { lines, default_nl }
    }

    pub fn read(path: &Path) -> Result<Self> {
        Ok(Self::parse(&std::fs::read_to_string(path)?))
    }

    /// A missing file reads as an empty document.
    pub fn read_or_empty(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(data) => Ok(Self::parse(&data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        si_config::write_atomic(path, self.render().as_bytes())?;
        Ok(())
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&line.text);
            out.push_str(&line.nl);
        }
        out
    }

    /// Assignments in file order; keys are validated.
    pub fn entries(&self) -> Result<Vec<Entry>> {
        let mut out = Vec::new();
        for (idx, line) in self.lines.iter().enumerate() {
            let Some(assign) = parse_assignment(&line.text) else {
                continue;
            };
            validate_key_name(&assign.key).map_err(|_| VaultError::Dotenv {
                line: idx + 1,
                message: format!("invalid key name {:?}", assign.key),
            })?;
            out.push(Entry {
                line: idx,
                key: assign.key,
                value_raw: assign.value_raw.trim().to_string(),
            });
        }
        Ok(out)
    }

    /// Raw value of the last assignment of `key`.
    pub fn lookup(&self, key: &str) -> Option<String> {
        self.lines
            .iter()
            .filter_map(|l| parse_assignment(&l.text))
            .filter(|a| a.key == key.trim())
            .last()
            .map(|a| a.value_raw.trim().to_string())
    }

    /// Set `key` to the already-rendered `value`, rewriting the last
    /// assignment in place or appending. Returns whether the text changed.
    pub fn set(&mut self, key: &str, value: &str) -> Result<bool> {
        let key = key.trim();
        validate_key_name(key)?;
        let last = self
            .lines
            .iter()
            .enumerate()
            .filter_map(|(i, l)| parse_assignment(&l.text).map(|a| (i, a)))
            .filter(|(_, a)| a.key == key)
            .last();
        if let Some((idx, assign)) = last {
            let text = render_assignment(Some(&assign), key, value);
            if self.lines[idx].text == text {
                return Ok(false);
            }
            self.lines[idx].text = text;
            return Ok(true);
        }
        if let Some(last) = self.lines.last_mut()
            && last.nl.is_empty()
        {
            last.nl = self.default_nl.clone();
        }
        self.lines.push(RawLine {
            text: render_assignment(None, key, value),
            nl: self.default_nl.clone(),
        });
        Ok(true)
    }

    /// Replace the value on line `idx`, keeping its layout.
    pub fn replace_at(&mut self, idx: usize, value: &str) -> bool {
        let Some(line) = self.lines.get_mut(idx) else {
            return false;
        };
        let Some(assign) = parse_assignment(&line.text) else {
            return false;
        };
        let text = render_assignment(Some(&assign), &assign.key, value);
        if line.text == text {
            return false;
        }
        line.text = text;
        true
    }

    /// Remove every assignment of `key`.
    pub fn unset(&mut self, key: &str) -> Result<bool> {
        let key = key.trim();
        validate_key_name(key)?;
        let before = self.lines.len();
        self.lines
            .retain(|l| parse_assignment(&l.text).is_none_or(|a| a.key != key));
        Ok(self.lines.len() != before)
    }
}

impl DotenvFile {
    /// Write `PUBLIC_KEY_NAME=<recipient>` as the first line (after a `#!`
    /// line) followed by a blank line, dropping any other header line.
    /// Returns whether the text changed.
    pub fn ensure_public_key_header(&mut self, recipient: &str) -> bool {
        let before = self.render();
        self.lines
            .retain(|l| parse_assignment(&l.text).is_none_or(|a| a.key != PUBLIC_KEY_NAME));

        let mut at = 0;
        if let Some(first) = self.lines.first_mut()
            && first.text.starts_with("#!")
        {
            if first.nl.is_empty() {
                first.nl = self.default_nl.clone();
            }
            at = 1;
        }
        self.lines.insert(
            at,
            RawLine {
                text: format!("{PUBLIC_KEY_NAME}={}", render_value(recipient.trim())),
                nl: self.default_nl.clone(),
            },
        );
        match self.lines.get_mut(at + 1) {
            Some(next) if next.text.trim().is_empty() => {
                if next.nl.is_empty() {
                    next.nl = self.default_nl.clone();
                }
            }
            _ => self.lines.insert(
                at + 1,
                RawLine {
                    text: String::new(),
                    nl: self.default_nl.clone(),
                },
            ),
        }
        self.render() != before
    }
}

impl std::fmt::Display for DotenvFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}
