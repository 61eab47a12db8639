//! Case executor: spawns a test case's body or cleanup phase as an isolated
//! child process, waits for it (with a timeout), and streams its captured
//! output into the event writer (spec.md §4.5).

use std::io::Write as _;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tracing::{debug, warn};

use crate::arbiter::ProcessStatus;
use crate::config::ConfigMap;
use crate::events::EventWriter;
use crate::manifest::CaseProps;

/// The default per-case timeout when a case does not set `timeout` and the
/// installation has no override: 5 minutes, matching common atf
/// installations' compiled-in default.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Body,
    Cleanup,
}

impl Phase {
    fn wire_suffix(self) -> &'static str {
        match self {
            Phase::Body => "body",
            Phase::Cleanup => "cleanup",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Event(#[from] crate::events::EventError),
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Runs a single phase of a test case.
///
/// `workdir` is the directory the child is `chdir`'d into — the shared
/// read-only directory for `use.fs=false` cases, or a private temp
/// directory otherwise (spec.md §4.4) — and may not be writable. `scratch`
/// is always a writable per-case directory, used to capture stdout/stderr;
/// `result_path` (where the child is told, via `-r`, to write its outcome)
/// lives under the same scratch directory, never under `workdir`.
///
/// Returns `(broken_reason, status)`: `broken_reason` is empty on normal
/// execution and non-empty when the parent detected a structural failure
/// before or during execution, in which case `status` carries no meaning
/// and must be ignored by the arbiter (spec.md §4.5).
pub async fn run_case<W: std::io::Write>(
    program: &Path,
    case_name: &str,
    phase: Phase,
    case_props: &CaseProps,
    config: &ConfigMap,
    result_path: &Path,
    workdir: &Path,
    scratch: &Path,
    writer: &mut EventWriter<W>,
) -> ExecutorResult<(String, ProcessStatus)> {
    let stdout_path = scratch.join(format!("{}.stdout", phase.wire_suffix()));
    let stderr_path = scratch.join(format!("{}.stderr", phase.wire_suffix()));

    let (stdout_file, stderr_file) =
        match (std::fs::File::create(&stdout_path), std::fs::File::create(&stderr_path)) {
            (Ok(out), Ok(err)) => (out, err),
            (res_out, res_err) => {
                let detail = res_out.err().or(res_err.err()).unwrap();
                return Ok((
                    format!("Could not create output files in {}: {detail}", scratch.display()),
                    ProcessStatus::Exited { code: -1 },
                ));
            }
        };

    let src_dir = program.parent().unwrap_or(Path::new("."));
    // `timeout: 0` means "no timeout" (spec.md §3, §4.5), not "time out
    // immediately" — only a missing property falls back to the default.
    let timeout_secs = match case_props.timeout() {
        Some(0) => None,
        Some(secs) => Some(secs),
        None => Some(DEFAULT_TIMEOUT_SECS),
    };

    let mut cmd = tokio::process::Command::new(program);
    cmd.current_dir(workdir);
    cmd.arg("-r").arg(result_path);
    cmd.arg("-s").arg(src_dir);
    for (key, value) in config.iter() {
        cmd.arg("-v").arg(format!("{key}={value}"));
    }
    cmd.arg(format!("{case_name}:{}", phase.wire_suffix()));

    for var in ["LC_ALL", "LC_CTYPE", "LC_COLLATE", "LC_MESSAGES", "LC_MONETARY", "LC_NUMERIC", "LC_TIME", "LANG", "TZ"] {
        cmd.env_remove(var);
    }
    cmd.env("HOME", workdir);
    cmd.env("LANG", "C");
    cmd.env("LC_ALL", "C");

    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::from(stdout_file));
    cmd.stderr(Stdio::from(stderr_file));

    // Run the child in its own process group so a timeout can kill every
    // descendant with a single `killpg`, not just the direct child.
    // SAFETY: `setsid` is async-signal-safe and called only in the forked
    // child before exec.
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    debug!(case = case_name, phase = ?phase, "spawning test case");

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return Ok((
                format!("Could not execute test program: {e}"),
                ProcessStatus::Exited { code: -1 },
            ));
        }
    };

    let pid = child.id().map(|p| p as libc::pid_t);

    let wait_result = match timeout_secs {
        None => Ok(child.wait().await),
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), child.wait()).await,
    };

    let status = match wait_result {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            return Ok((
                format!("Error waiting for test case: {e}"),
                ProcessStatus::Exited { code: -1 },
            ));
        }
        Err(_elapsed) => {
            if let Some(pid) = pid {
                // SAFETY: killing a process group we created via `setsid`
                // above; a negated pid addresses the whole group.
                unsafe {
                    libc::killpg(pid, libc::SIGKILL);
                }
            }
            let _ = child.wait().await;
            let secs = timeout_secs.expect("timeout elapsed implies a timeout was set");
            warn!(case = case_name, timeout = secs, "test case timed out");
            return Ok((
                format!("Test case timed out after {secs} seconds"),
                ProcessStatus::Exited { code: -1 },
            ));
        }
    };

    stream_captured_output(&stdout_path, &stderr_path, writer)?;

    Ok(("".to_string(), process_status_from_exit(status)))
}

fn process_status_from_exit(status: std::process::ExitStatus) -> ProcessStatus {
    if let Some(code) = status.code() {
        ProcessStatus::Exited { code }
    } else {
        ProcessStatus::Signaled {
            signal: status.signal().unwrap_or(0),
            coredump: status.core_dumped(),
        }
    }
}

fn stream_captured_output<W: std::io::Write>(
    stdout_path: &Path,
    stderr_path: &Path,
    writer: &mut EventWriter<W>,
) -> ExecutorResult<()> {
    if let Ok(contents) = std::fs::read_to_string(stdout_path) {
        for line in contents.lines() {
            writer.tc_stdout(line)?;
        }
    }
    if let Ok(contents) = std::fs::read_to_string(stderr_path) {
        for line in contents.lines() {
            writer.tc_stderr(line)?;
        }
    }
    Ok(())
}

/// Builds the full path to the results file for a case within `workdir`,
/// per spec.md §4.5's `-r <result_path>` argument.
pub fn result_path_for(workdir: &Path) -> PathBuf {
    workdir.join("tc-result")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn make_script(body: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake-test");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "#!/bin/sh\n{body}").unwrap();
        drop(f);
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn passing_case_reports_no_broken_reason_and_exit_zero() {
        let (_src_dir, program) = make_script(
            r#"
result=""
while [ $# -gt 0 ]; do
  case "$1" in
    -r) result="$2"; shift 2 ;;
    -s) shift 2 ;;
    -v) shift 2 ;;
    *) shift ;;
  esac
done
echo passed > "$result"
exit 0
"#,
        );

        let workdir = tempfile::tempdir().unwrap();
        let result_path = result_path_for(workdir.path());
        let config = ConfigMap::new();
        let props = CaseProps(HashMap::new());
        let mut writer = EventWriter::new(Vec::new());
        writer.tps_count(1).unwrap();
        writer.tp_start("fake-test", 1).unwrap();
        writer.tc_start("t1").unwrap();

        let (broken, status) = run_case(
            &program,
            "t1",
            Phase::Body,
            &props,
            &config,
            &result_path,
            workdir.path(),
            workdir.path(),
            &mut writer,
        )
        .await
        .unwrap();

        assert_eq!(broken, "");
        assert_eq!(status, ProcessStatus::Exited { code: 0 });
        assert_eq!(std::fs::read_to_string(&result_path).unwrap().trim(), "passed");
    }

    #[tokio::test]
    async fn timeout_kills_child_and_reports_broken_reason() {
        let (_dir, program) = make_script("sleep 5");
        let workdir = tempfile::tempdir().unwrap();
        let result_path = result_path_for(workdir.path());
        let config = ConfigMap::new();
        let mut map = HashMap::new();
        map.insert("timeout".to_string(), "1".to_string());
        let props = CaseProps(map);
        let mut writer = EventWriter::new(Vec::new());
        writer.tps_count(1).unwrap();
        writer.tp_start("fake-test", 1).unwrap();
        writer.tc_start("t1").unwrap();

        let (broken, _status) = run_case(
            &program,
            "t1",
            Phase::Body,
            &props,
            &config,
            &result_path,
            workdir.path(),
            workdir.path(),
            &mut writer,
        )
        .await
        .unwrap();

        assert!(broken.contains("timed out after 1 seconds"));
    }

    #[tokio::test]
    async fn timeout_zero_means_no_timeout() {
        let (_src_dir, program) = make_script(
            r#"
result=""
while [ $# -gt 0 ]; do
  case "$1" in
    -r) result="$2"; shift 2 ;;
    -s) shift 2 ;;
    -v) shift 2 ;;
    *) shift ;;
  esac
done
sleep 1
echo passed > "$result"
exit 0
"#,
        );

        let workdir = tempfile::tempdir().unwrap();
        let result_path = result_path_for(workdir.path());
        let config = ConfigMap::new();
        let mut map = HashMap::new();
        map.insert("timeout".to_string(), "0".to_string());
        let props = CaseProps(map);
        let mut writer = EventWriter::new(Vec::new());
        writer.tps_count(1).unwrap();
        writer.tp_start("fake-test", 1).unwrap();
        writer.tc_start("t1").unwrap();

        let (broken, status) = run_case(
            &program,
            "t1",
            Phase::Body,
            &props,
            &config,
            &result_path,
            workdir.path(),
            workdir.path(),
            &mut writer,
        )
        .await
        .unwrap();

        assert_eq!(broken, "");
        assert_eq!(status, ProcessStatus::Exited { code: 0 });
    }
}
