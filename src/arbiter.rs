//! Outcome arbiter: reconciles a child's self-reported result file against
//! its observed termination status into a final `TestCaseResult`
//! (spec.md §4.6).

use std::fmt;
use std::path::Path;

/// How a child process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Exited { code: i32 },
    Signaled { signal: i32, coredump: bool },
}

/// The five outcomes a test case can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestCaseState {
    Passed,
    Failed,
    Skipped,
    ExpectedFailure,
    Broken,
}

impl TestCaseState {
    fn wire_name(self) -> &'static str {
        match self {
            TestCaseState::Passed => "passed",
            TestCaseState::Failed => "failed",
            TestCaseState::Skipped => "skipped",
            TestCaseState::ExpectedFailure => "expected_failure",
            TestCaseState::Broken => "broken",
        }
    }
}

impl fmt::Display for TestCaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// The arbitrated outcome of a test case: a state plus a reason, required
/// for every state but `Passed` (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCaseResult {
    pub state: TestCaseState,
    pub reason: String,
}

impl TestCaseResult {
    pub fn passed() -> Self {
        Self {
            state: TestCaseState::Passed,
            reason: String::new(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            state: TestCaseState::Failed,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArbiterError {
    #[error("cannot read result file {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type ArbiterResult<T> = Result<T, ArbiterError>;

/// Parses the one-line result-file grammar (spec.md §4.6, §6):
/// `passed` | `failed: <reason>` | `skipped: <reason>` |
/// `expected_failure: <reason>` | `broken: <reason>`.
fn parse_result_line(line: &str) -> Result<TestCaseResult, String> {
    let line = line.trim_end_matches('\n').trim();
    if line == "passed" {
        return Ok(TestCaseResult::passed());
    }
    let Some((state_name, reason)) = line.split_once(':') else {
        return Err(format!("malformed result line '{line}'"));
    };
    let reason = reason.trim().to_string();
    let state = match state_name {
        "failed" => TestCaseState::Failed,
        "skipped" => TestCaseState::Skipped,
        "expected_failure" => TestCaseState::ExpectedFailure,
        "broken" => TestCaseState::Broken,
        other => return Err(format!("unknown result state '{other}'")),
    };
    Ok(TestCaseResult { state, reason })
}

/// Reconciles the parent-detected `broken_reason`, the child's observed
/// `ProcessStatus`, and its self-reported result file into the final
/// outcome. Implements the rules of spec.md §4.6 in order; the rules are
/// pairwise disjoint and jointly exhaustive (spec.md §8).
pub fn arbitrate(
    broken_reason: &str,
    status: ProcessStatus,
    result_path: &Path,
) -> ArbiterResult<TestCaseResult> {
    if !broken_reason.is_empty() {
        return Ok(TestCaseResult::failed(broken_reason));
    }

    if let ProcessStatus::Signaled { signal, coredump } = status {
        let mut reason = format!("Test program received signal {signal}");
        if coredump {
            reason.push_str(" (core dumped)");
        }
        return Ok(TestCaseResult::failed(reason));
    }

    let ProcessStatus::Exited { code } = status else {
        unreachable!("Signaled case handled above");
    };

    let contents = match std::fs::read_to_string(result_path) {
        Ok(contents) => contents,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
            return Ok(TestCaseResult::failed(
                "Test case exited normally but failed to create the results file: \
                 no such file",
            ));
        }
        Err(source) => {
            return Err(ArbiterError::Io {
                path: result_path.to_path_buf(),
                source,
            });
        }
    };

    let parsed = match parse_result_line(contents.lines().next().unwrap_or("")) {
        Ok(result) => result,
        Err(detail) => {
            return Ok(TestCaseResult::failed(format!(
                "Test case exited normally but failed to create the results file: {detail}"
            )));
        }
    };

    if parsed.state == TestCaseState::Failed && code == 0 {
        return Ok(TestCaseResult::failed(
            "Test case exited successfully but reported failure",
        ));
    }
    if parsed.state != TestCaseState::Failed && code != 0 {
        return Ok(TestCaseResult::failed(
            "Test case exited with error but reported success",
        ));
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_result(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{contents}").unwrap();
        f
    }

    #[test]
    fn broken_reason_always_wins() {
        let f = write_result("passed\n");
        let result =
            arbitrate("could not chdir", ProcessStatus::Exited { code: 0 }, f.path()).unwrap();
        assert_eq!(result, TestCaseResult::failed("could not chdir"));
    }

    #[test]
    fn signaled_with_core_dump() {
        let f = write_result("passed\n");
        let status = ProcessStatus::Signaled {
            signal: 11,
            coredump: true,
        };
        let result = arbitrate("", status, f.path()).unwrap();
        assert_eq!(
            result,
            TestCaseResult::failed("Test program received signal 11 (core dumped)")
        );
    }

    #[test]
    fn signaled_without_core_dump() {
        let f = write_result("passed\n");
        let status = ProcessStatus::Signaled {
            signal: 15,
            coredump: false,
        };
        let result = arbitrate("", status, f.path()).unwrap();
        assert_eq!(
            result,
            TestCaseResult::failed("Test program received signal 15")
        );
    }

    #[test]
    fn contradictory_success_exit_zero_but_failed_result() {
        let f = write_result("failed: oops\n");
        let status = ProcessStatus::Exited { code: 0 };
        let result = arbitrate("", status, f.path()).unwrap();
        assert_eq!(
            result,
            TestCaseResult::failed("Test case exited successfully but reported failure")
        );
    }

    #[test]
    fn contradictory_failure_nonzero_exit_but_passed_result() {
        let f = write_result("passed\n");
        let status = ProcessStatus::Exited { code: 1 };
        let result = arbitrate("", status, f.path()).unwrap();
        assert_eq!(
            result,
            TestCaseResult::failed("Test case exited with error but reported success")
        );
    }

    #[test]
    fn consistent_pass() {
        let f = write_result("passed\n");
        let status = ProcessStatus::Exited { code: 0 };
        let result = arbitrate("", status, f.path()).unwrap();
        assert_eq!(result, TestCaseResult::passed());
    }

    #[test]
    fn consistent_skip_with_reason() {
        let f = write_result("skipped: not applicable here\n");
        let status = ProcessStatus::Exited { code: 0 };
        let result = arbitrate("", status, f.path()).unwrap();
        assert_eq!(
            result,
            TestCaseResult {
                state: TestCaseState::Skipped,
                reason: "not applicable here".to_string(),
            }
        );
    }

    #[test]
    fn missing_result_file_is_a_failure() {
        let status = ProcessStatus::Exited { code: 0 };
        let result = arbitrate("", status, Path::new("/nonexistent/result")).unwrap();
        assert_eq!(result.state, TestCaseState::Failed);
        assert!(result.reason.contains("failed to create the results file"));
    }

    #[test]
    fn unparseable_result_file_is_a_failure() {
        let f = write_result("this is not valid\n");
        let status = ProcessStatus::Exited { code: 0 };
        let result = arbitrate("", status, f.path()).unwrap();
        assert_eq!(result.state, TestCaseState::Failed);
        assert!(result.reason.contains("failed to create the results file"));
    }
}
