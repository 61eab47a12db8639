//! Parser for the `Atffile` suite manifest format.
//!
//! Grammar (see DESIGN.md for the §4.1/§6 ambiguity this resolves):
//!
//! ```text
//! Content-Type: application/X-atf-atffile; version="1"
//!
//! prop <name> = <value>
//! conf <path>
//! tp <path>
//! ```
//!
//! `#` starts a comment that runs to end of line. Blank lines are ignored
//! outside of header parsing. The parser accumulates every malformed record
//! it finds rather than stopping at the first one.

use std::collections::HashMap;
use std::path::PathBuf;

use super::tokenizer::{self, ParseError, ParseErrors};

/// A fully parsed `Atffile`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AtfFile {
    /// Suite-level properties, e.g. `test-suite`.
    pub props: HashMap<String, String>,
    /// Configuration file paths contributed by `conf` records, in file order.
    pub conf: Vec<PathBuf>,
    /// Test-program paths contributed by `tp` records, in file order.
    pub tps: Vec<PathBuf>,
}

impl AtfFile {
    /// The required `test-suite` property naming the configuration scope.
    pub fn test_suite(&self) -> Option<&str> {
        self.props.get("test-suite").map(String::as_str)
    }
}

/// Parses the contents of an `Atffile`.
///
/// Returns every accumulated error rather than bailing at the first one
/// (spec.md §4.1, §8 "Parser error accumulation").
pub fn parse(input: &str) -> Result<AtfFile, ParseErrors> {
    let mut lines = tokenizer::numbered_lines(input);

    let Some((header_line_no, header_line)) = lines.next() else {
        return Err(ParseErrors::single(1, "Empty Atffile: missing header"));
    };
    let header = tokenizer::parse_header(header_line, "atf-atffile")
        .map_err(|e| ParseErrors::single(header_line_no, e))?;
    if header.version != "1" {
        return Err(ParseErrors::single(
            header_line_no,
            format!("Unsupported Atffile version '{}'", header.version),
        ));
    }

    let mut file = AtfFile::default();
    let mut errors = Vec::new();

    for (line_no, raw) in lines {
        let line = tokenizer::strip_comment(raw);
        if line.trim().is_empty() {
            continue;
        }

        match parse_record(line) {
            Ok(Record::Prop(name, value)) => {
                file.props.insert(name, value);
            }
            Ok(Record::Conf(path)) => file.conf.push(PathBuf::from(path)),
            Ok(Record::Tp(path)) => file.tps.push(PathBuf::from(path)),
            Err(message) => errors.push(ParseError { line: line_no, message }),
        }
    }

    if file.test_suite().is_none() {
        errors.push(ParseError {
            line: header_line_no,
            message: "Required property 'test-suite' not defined".to_string(),
        });
    }

    if errors.is_empty() {
        Ok(file)
    } else {
        Err(ParseErrors(errors))
    }
}

enum Record {
    Prop(String, String),
    Conf(String),
    Tp(String),
}

fn parse_record(line: &str) -> Result<Record, String> {
    let (keyword, rest) = line
        .split_once(char::is_whitespace)
        .map(|(k, r)| (k, r.trim()))
        .unwrap_or((line, ""));

    match keyword {
        "prop" => {
            let Some((name, value)) = rest.split_once('=') else {
                return Err(format!("Malformed 'prop' record: '{line}'"));
            };
            let name = name.trim();
            let value = value.trim();
            if name.is_empty() {
                return Err(format!("Malformed 'prop' record: '{line}'"));
            }
            Ok(Record::Prop(name.to_string(), value.to_string()))
        }
        "conf" => {
            if rest.is_empty() {
                return Err("Malformed 'conf' record: missing path".to_string());
            }
            Ok(Record::Conf(rest.to_string()))
        }
        "tp" => {
            if rest.is_empty() {
                return Err("Malformed 'tp' record: missing path".to_string());
            }
            Ok(Record::Tp(rest.to_string()))
        }
        other => Err(format!("Unknown record keyword '{other}'")),
    }
}
