//! Parser for the test-case listing format a test program prints to stdout
//! when invoked with its list flag.
//!
//! ```text
//! Content-Type: application/X-atf-tp; version="1"
//!
//! ident: t1
//! descr: does a thing
//! use.fs: true
//!
//! ident: t2
//! has.cleanup: true
//! ```
//!
//! Each case begins with an `ident: <name>` record, followed by zero or more
//! `key: value` records, terminated by a blank line (or end of input).

use std::collections::HashMap;

use super::tokenizer::{self, ParseError, ParseErrors};

/// Recognized per-case properties, typed accessors over the raw string map
/// (spec.md §3).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseProps(pub HashMap<String, String>);

impl CaseProps {
    pub fn descr(&self) -> Option<&str> {
        self.0.get("descr").map(String::as_str)
    }

    pub fn has_cleanup(&self) -> bool {
        parse_bool(self.0.get("has.cleanup"))
    }

    pub fn use_fs(&self) -> bool {
        parse_bool(self.0.get("use.fs"))
    }

    /// `timeout` in seconds; `0` disables the timeout; absent uses the
    /// platform default (handled by the caller, not here).
    pub fn timeout(&self) -> Option<u64> {
        self.0.get("timeout").and_then(|v| v.parse::<u64>().ok())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

fn parse_bool(v: Option<&String>) -> bool {
    matches!(v.map(String::as_str), Some("true") | Some("yes"))
}

/// An ordered test-case name -> properties mapping, preserving manifest
/// order (spec.md §3, §4.8 "iterate cases in parsed order").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestProgramMetadata {
    pub cases: Vec<(String, CaseProps)>,
}

impl TestProgramMetadata {
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn get(&self, name: &str) -> Option<&CaseProps> {
        self.cases.iter().find(|(n, _)| n == name).map(|(_, p)| p)
    }
}

/// Parses a test-case listing.
///
/// An empty case list is syntactically valid here (spec.md §4.1); the
/// driver is responsible for treating it as a runtime failure.
pub fn parse(input: &str) -> Result<TestProgramMetadata, ParseErrors> {
    let mut lines = tokenizer::numbered_lines(input);

    let Some((header_line_no, header_line)) = lines.next() else {
        return Err(ParseErrors::single(1, "Empty test-case list: missing header"));
    };
    let header = tokenizer::parse_header(header_line, "atf-tp")
        .map_err(|e| ParseErrors::single(header_line_no, e))?;
    if header.version != "1" {
        return Err(ParseErrors::single(
            header_line_no,
            format!("Unsupported test-case list version '{}'", header.version),
        ));
    }

    let mut metadata = TestProgramMetadata::default();
    let mut errors = Vec::new();
    let mut current: Option<(String, HashMap<String, String>)> = None;
    let mut recovering = false;

    let flush = |current: &mut Option<(String, HashMap<String, String>)>,
                 metadata: &mut TestProgramMetadata| {
        if let Some((name, props)) = current.take() {
            metadata.cases.push((name, CaseProps(props)));
        }
    };

    for (line_no, raw) in lines {
        if raw.trim().is_empty() {
            flush(&mut current, &mut metadata);
            recovering = false;
            continue;
        }

        if recovering {
            continue;
        }

        let Some((key, value)) = tokenizer::split_key_value(raw) else {
            errors.push(ParseError {
                line: line_no,
                message: format!("Malformed record: '{raw}'"),
            });
            recovering = true;
            continue;
        };

        if key == "ident" {
            flush(&mut current, &mut metadata);
            if value.is_empty() {
                errors.push(ParseError {
                    line: line_no,
                    message: "Empty test case name in 'ident' record".to_string(),
                });
                recovering = true;
                continue;
            }
            current = Some((value.to_string(), HashMap::new()));
        } else {
            match current.as_mut() {
                Some((_, props)) => {
                    props.insert(key.to_string(), value.to_string());
                }
                None => errors.push(ParseError {
                    line: line_no,
                    message: format!("Property '{key}' outside of any test case"),
                }),
            }
        }
    }
    flush(&mut current, &mut metadata);

    if errors.is_empty() {
        Ok(metadata)
    } else {
        Err(ParseErrors(errors))
    }
}
