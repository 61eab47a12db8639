//! Parsers for the two line-structured formats the driver reads: suite
//! manifests (`Atffile`) and test-program case listings.
//!
//! Both formats share a `Content-Type` header stanza followed by a body of
//! records, and both must accumulate every parse error they encounter rather
//! than stopping at the first one. That shared shape lives in [`tokenizer`]
//! and is consumed by [`atffile`] and [`caselist`] independently, rather than
//! through a shared base parser.

pub mod atffile;
pub mod caselist;
pub mod tokenizer;

pub use atffile::AtfFile;
pub use caselist::{CaseProps, TestProgramMetadata};
pub use tokenizer::{ParseError, ParseErrors};
