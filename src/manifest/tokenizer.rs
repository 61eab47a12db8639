//! Shared line tokenizer for the Atffile and test-case-listing formats.
//!
//! Both formats share the same outer framing: a `Content-Type` header line
//! naming the format and version, followed by a body of records. Rather than
//! modeling that sharing with an inheritance hierarchy (as the original
//! implementation does), this module exposes a single tokenizer that the
//! two record-level parsers (`manifest::atffile`, `manifest::caselist`)
//! drive independently.

use std::fmt;

/// A single parse error, tied to the 1-indexed line on which it occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// A batch of accumulated parse errors.
///
/// This is the only error shape a parser in this module can produce: a
/// single error escaping alone (rather than as a one-element batch) would be
/// a parser-internal bug, not a user-facing error class.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("{} parse error(s): {}", .0.len(), join_errors(.0))]
pub struct ParseErrors(pub Vec<ParseError>);

fn join_errors(errors: &[ParseError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ParseErrors {
    pub fn single(line: usize, message: impl Into<String>) -> Self {
        Self(vec![ParseError {
            line,
            message: message.into(),
        }])
    }
}

/// The parsed `Content-Type` header shared by both formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub content_type: String,
    pub version: String,
}

/// Validates and parses the header line.
///
/// Expected shape: `Content-Type: application/X-atf-<name>; version="<v>"`.
/// `expected_name` is the `X-atf-<name>` component without the `application/`
/// prefix, e.g. `"atf-atffile"` or `"atf-tp"`.
pub fn parse_header(line: &str, expected_name: &str) -> Result<Header, String> {
    let Some(rest) = line.strip_prefix("Content-Type:") else {
        return Err(format!(
            "Expected 'Content-Type' header, got '{line}'"
        ));
    };
    let rest = rest.trim();

    let mut parts = rest.splitn(2, ';');
    let content_type = parts.next().unwrap_or("").trim().to_string();
    let expected_ct = format!("application/X-{expected_name}");
    if content_type != expected_ct {
        return Err(format!(
            "Unsupported content type '{content_type}'; expected '{expected_ct}'"
        ));
    }

    let version_part = parts.next().unwrap_or("").trim();
    let Some(version_str) = version_part.strip_prefix("version=") else {
        return Err(format!("Missing version in header '{line}'"));
    };
    let version = version_str.trim().trim_matches('"').to_string();
    if version.is_empty() {
        return Err(format!("Empty version in header '{line}'"));
    }

    Ok(Header {
        content_type,
        version,
    })
}

/// Splits raw input into 1-indexed `(line_number, text)` pairs, with
/// trailing newlines stripped.
pub fn numbered_lines(input: &str) -> impl Iterator<Item = (usize, &str)> {
    input.lines().enumerate().map(|(i, l)| (i + 1, l))
}

/// Strips a `#`-introduced comment and trailing whitespace from a line.
///
/// Used by the Atffile parser; the test-case listing format has no comment
/// syntax and should not call this.
pub fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => line[..idx].trim_end(),
        None => line.trim_end(),
    }
}

/// Splits a `key: value` record. Returns `None` if there is no `:`.
pub fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let idx = line.find(':')?;
    Some((line[..idx].trim(), line[idx + 1..].trim()))
}
