//! Event writer: serializes the totally ordered event stream documenting a
//! run (spec.md §4.7, §6).

use std::io::Write;

use crate::arbiter::TestCaseResult;

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("{0}")]
    OutOfOrder(String),

    #[error("failed to write event: {0}")]
    Io(#[from] std::io::Error),
}

pub type EventResult<T> = Result<T, EventError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    BeforeHeader,
    Idle,
    InProgram,
    InCase,
}

/// Stateful writer for the event stream.
///
/// Rejects out-of-order events — this is a structural invariant, not a user
/// error (spec.md §4.7): a `tc-end` without a matching `tc-start`, a nested
/// `tp-start`, output events outside of any open case, and so on.
pub struct EventWriter<W: Write> {
    sink: W,
    state: State,
    current_program: Option<String>,
    current_case: Option<String>,
}

impl<W: Write> EventWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            state: State::BeforeHeader,
            current_program: None,
            current_case: None,
        }
    }

    fn write_line(&mut self, line: &str) -> EventResult<()> {
        writeln!(self.sink, "{line}")?;
        Ok(())
    }

    /// Emits the stream header and the initial `tps-count` event. Must be
    /// called exactly once, first.
    pub fn tps_count(&mut self, n: usize) -> EventResult<()> {
        if self.state != State::BeforeHeader {
            return Err(EventError::OutOfOrder(
                "tps-count emitted more than once".to_string(),
            ));
        }
        self.write_line(r#"Content-Type: application/X-atf-tps; version="3""#)?;
        self.write_line("")?;
        self.write_line(&format!("tps-count: {n}"))?;
        self.state = State::Idle;
        Ok(())
    }

    pub fn tp_start(&mut self, path: &str, case_count: usize) -> EventResult<()> {
        if self.state != State::Idle {
            return Err(EventError::OutOfOrder(format!(
                "tp-start for '{path}' while another program is still open"
            )));
        }
        self.write_line(&format!("tp-start: {path}, {case_count}"))?;
        self.current_program = Some(path.to_string());
        self.state = State::InProgram;
        Ok(())
    }

    pub fn tc_start(&mut self, name: &str) -> EventResult<()> {
        if self.state != State::InProgram {
            return Err(EventError::OutOfOrder(format!(
                "tc-start for '{name}' outside of an open program"
            )));
        }
        self.write_line(&format!("tc-start: {name}"))?;
        self.current_case = Some(name.to_string());
        self.state = State::InCase;
        Ok(())
    }

    pub fn tc_stdout(&mut self, line: &str) -> EventResult<()> {
        self.require_open_case("tc-so")?;
        self.write_line(&format!("tc-so: {line}"))
    }

    pub fn tc_stderr(&mut self, line: &str) -> EventResult<()> {
        self.require_open_case("tc-se")?;
        self.write_line(&format!("tc-se: {line}"))
    }

    fn require_open_case(&self, event: &str) -> EventResult<()> {
        if self.state != State::InCase {
            return Err(EventError::OutOfOrder(format!(
                "{event} outside of an open case"
            )));
        }
        Ok(())
    }

    pub fn tc_end(&mut self, name: &str, result: &TestCaseResult) -> EventResult<()> {
        if self.state != State::InCase || self.current_case.as_deref() != Some(name) {
            return Err(EventError::OutOfOrder(format!(
                "tc-end for '{name}' without a matching tc-start"
            )));
        }
        self.write_line(&format!("tc-end: {name}, {}, {}", result.state, result.reason))?;
        self.current_case = None;
        self.state = State::InProgram;
        Ok(())
    }

    pub fn tp_end(&mut self, path: &str, error: &str) -> EventResult<()> {
        if self.state != State::InProgram || self.current_program.as_deref() != Some(path) {
            return Err(EventError::OutOfOrder(format!(
                "tp-end for '{path}' without a matching tp-start"
            )));
        }
        self.write_line(&format!("tp-end: {path}, {error}"))?;
        self.current_program = None;
        self.state = State::Idle;
        Ok(())
    }

    /// A one-off diagnostic line (e.g. the shared-workdir immutability
    /// warning from spec.md §4.4), emitted without affecting the state
    /// machine.
    pub fn diagnostic(&mut self, message: &str) -> EventResult<()> {
        self.write_line(&format!("# {message}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbiter::TestCaseResult;

    fn sink() -> Vec<u8> {
        Vec::new()
    }

    #[test]
    fn happy_path_sequence() {
        let mut w = EventWriter::new(sink());
        w.tps_count(1).unwrap();
        w.tp_start("t1", 1).unwrap();
        w.tc_start("case1").unwrap();
        w.tc_stdout("hello").unwrap();
        w.tc_end("case1", &TestCaseResult::passed()).unwrap();
        w.tp_end("t1", "").unwrap();

        let output = String::from_utf8(w.sink).unwrap();
        assert!(output.contains("tps-count: 1"));
        assert!(output.contains("tp-start: t1, 1"));
        assert!(output.contains("tc-start: case1"));
        assert!(output.contains("tc-so: hello"));
        assert!(output.contains("tc-end: case1, passed, "));
        assert!(output.contains("tp-end: t1, "));
    }

    #[test]
    fn tc_end_without_tc_start_is_rejected() {
        let mut w = EventWriter::new(sink());
        w.tps_count(1).unwrap();
        w.tp_start("t1", 1).unwrap();
        let err = w.tc_end("case1", &TestCaseResult::passed());
        assert!(err.is_err());
    }

    #[test]
    fn nested_tp_start_is_rejected() {
        let mut w = EventWriter::new(sink());
        w.tps_count(1).unwrap();
        w.tp_start("t1", 1).unwrap();
        let err = w.tp_start("t2", 1);
        assert!(err.is_err());
    }

    #[test]
    fn output_event_outside_case_is_rejected() {
        let mut w = EventWriter::new(sink());
        w.tps_count(1).unwrap();
        w.tp_start("t1", 1).unwrap();
        assert!(w.tc_stdout("orphaned").is_err());
    }

    #[test]
    fn tps_count_twice_is_rejected() {
        let mut w = EventWriter::new(sink());
        w.tps_count(1).unwrap();
        assert!(w.tps_count(1).is_err());
    }
}
