//! Driver: the top-level recursive descent over a suite manifest, fanning
//! out to the case executor and aggregating pass/fail (spec.md §4.8).

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::arbiter::{self, ProcessStatus, TestCaseResult, TestCaseState};
use crate::config::{self, ConfigMap, InstalledConfig};
use crate::events::EventWriter;
use crate::executor::{self, Phase};
use crate::hooks::{self, Hook};
use crate::manifest::{CaseProps, TestProgramMetadata, atffile, caselist};
use crate::requirements::{self, Platform};
use crate::signals::ShutdownFlag;
use crate::workdir;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("cannot read manifest {path}: {source}")]
    ReadManifest {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {errors}")]
    ManifestParse {
        path: PathBuf,
        errors: crate::manifest::ParseErrors,
    },

    #[error(transparent)]
    Workdir(#[from] workdir::WorkdirError),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Event(#[from] crate::events::EventError),

    #[error(transparent)]
    Hook(#[from] hooks::HookError),

    #[error(transparent)]
    Executor(#[from] executor::ExecutorError),

    #[error(transparent)]
    Arbiter(#[from] arbiter::ArbiterError),

    #[error(transparent)]
    Requirements(#[from] requirements::RequirementsError),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// The top-level test-suite driver.
///
/// Owns the event sink for the full run (spec.md §5 "the event sink is
/// owned exclusively by the driver; no component writes to it directly").
pub struct Driver<'a, W: std::io::Write> {
    installed: &'a dyn InstalledConfig,
    shutdown: ShutdownFlag,
    writer: EventWriter<W>,
    platform: Platform,
    is_root: bool,
    cli_vflags: Vec<(String, String)>,
}

impl<'a, W: std::io::Write> Driver<'a, W> {
    pub fn new(installed: &'a dyn InstalledConfig, shutdown: ShutdownFlag, writer: EventWriter<W>) -> Self {
        Self {
            installed,
            shutdown,
            writer,
            platform: Platform::current(),
            is_root: requirements::running_as_root(),
            cli_vflags: Vec::new(),
        }
    }

    /// Runs the suite rooted at `atffile_path`. `program_overrides`, when
    /// non-empty, replaces the manifest's own `tps` list with the given
    /// paths (spec.md §6). Returns whether every program in the suite
    /// succeeded.
    pub async fn run(
        mut self,
        atffile_path: &Path,
        program_overrides: &[PathBuf],
        cli_vflags: &[(String, String)],
    ) -> DriverResult<bool>
    where
        W: Send,
    {
        self.cli_vflags = cli_vflags.to_vec();

        hooks::run_hook(self.installed, "atf-run", Hook::InfoStart).await?;

        let manifest_dir = atffile_path.parent().unwrap_or(Path::new("."));
        let manifest = read_manifest(atffile_path)?;
        let test_suite = manifest.test_suite().unwrap_or_default().to_string();
        let config = config::resolve(manifest_dir, &manifest.conf, &test_suite, self.installed, &self.cli_vflags)?;

        let tps: Vec<PathBuf> = if program_overrides.is_empty() {
            manifest.tps.clone()
        } else {
            program_overrides.to_vec()
        };

        let workdir_root = PathBuf::from(self.installed.get("atf_workdir").unwrap_or("/var/tmp"));
        let (shared_ro, diagnostic) = workdir::make_shared_ro_workdir(&workdir_root, "atf-run-shared-")?;

        let total = count_programs(manifest_dir, &tps)?;
        self.writer.tps_count(total)?;
        if let Some(message) = diagnostic {
            self.writer.diagnostic(&message)?;
        }

        let mut all_ok = true;
        for tp in &tps {
            if self.shutdown.requested() {
                break;
            }
            let ok = self
                .run_entry(manifest_dir, tp, &config, &test_suite, shared_ro.path(), &workdir_root)
                .await?;
            all_ok &= ok;
        }

        hooks::run_hook(self.installed, "atf-run", Hook::InfoEnd).await?;

        Ok(all_ok && !self.shutdown.requested())
    }

    /// Resolves a `tps` entry: a directory recurses into its own nested
    /// `Atffile`, with the nested config merged over the parent's
    /// (SPEC_FULL.md item 1); a file runs as a test program.
    fn run_entry<'f>(
        &'f mut self,
        parent_dir: &'f Path,
        tp: &'f Path,
        parent_config: &'f ConfigMap,
        test_suite: &'f str,
        shared_ro: &'f Path,
        workdir_root: &'f Path,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = DriverResult<bool>> + Send + 'f>>
    where
        W: Send,
    {
        Box::pin(async move {
            let full_path = parent_dir.join(tp);

            if full_path.is_dir() {
                let nested_manifest_path = full_path.join("Atffile");
                let nested = read_manifest(&nested_manifest_path)?;
                let nested_suite = nested.test_suite().unwrap_or(test_suite).to_string();
                let nested_config =
                    config::resolve(&full_path, &nested.conf, &nested_suite, self.installed, &self.cli_vflags)?;
                let effective_config = parent_config.clone().merged_over(&nested_config);

                let mut ok = true;
                for nested_tp in &nested.tps {
                    if self.shutdown.requested() {
                        break;
                    }
                    let entry_ok = self
                        .run_entry(&full_path, nested_tp, &effective_config, &nested_suite, shared_ro, workdir_root)
                        .await?;
                    ok &= entry_ok;
                }
                Ok(ok)
            } else {
                self.run_program(&full_path, parent_config, shared_ro, workdir_root).await
            }
        })
    }

    async fn run_program(
        &mut self,
        program: &Path,
        config: &ConfigMap,
        shared_ro: &Path,
        workdir_root: &Path,
    ) -> DriverResult<bool> {
        let path_str = program.display().to_string();

        let metadata = match list_cases(program).await {
            Ok(metadata) => metadata,
            Err(message) => {
                self.writer.tp_start(&path_str, 0)?;
                self.writer.tp_end(&path_str, &message)?;
                return Ok(false);
            }
        };

        if metadata.is_empty() {
            self.writer.tp_start(&path_str, 0)?;
            self.writer
                .tp_end(&path_str, "Bogus test program: reported 0 test cases")?;
            return Ok(false);
        }

        self.writer.tp_start(&path_str, metadata.len())?;

        let mut program_ok = true;
        let mut interrupted = false;
        for (name, props) in &metadata.cases {
            if self.shutdown.requested() {
                interrupted = true;
                break;
            }
            let case_ok = self
                .run_one_case(program, name, props, config, shared_ro, workdir_root)
                .await?;
            program_ok &= case_ok;
        }

        if interrupted {
            self.writer.tp_end(&path_str, "Interrupted by signal")?;
        } else {
            self.writer.tp_end(&path_str, "")?;
        }
        Ok(program_ok && !interrupted)
    }

    async fn run_one_case(
        &mut self,
        program: &Path,
        name: &str,
        props: &CaseProps,
        config: &ConfigMap,
        shared_ro: &Path,
        workdir_root: &Path,
    ) -> DriverResult<bool> {
        self.writer.tc_start(name)?;

        match requirements::evaluate(props, config, &self.platform, self.is_root) {
            Ok(Some(reason)) => {
                let result = TestCaseResult {
                    state: TestCaseState::Skipped,
                    reason,
                };
                self.writer.tc_end(name, &result)?;
                return Ok(true);
            }
            Ok(None) => {}
            Err(e) => {
                // A malformed requirement (e.g. a relative `require.progs`
                // entry, an unrecognized `require.user` value) is a
                // case-scoped structural failure, not a fatal driver error
                // (spec.md §4.3, §7 item 3): it fails this one case and the
                // run continues with the next.
                let result = TestCaseResult::failed(e.to_string());
                self.writer.tc_end(name, &result)?;
                return Ok(false);
            }
        }

        let case_workdir = if props.use_fs() {
            Some(workdir::make_temp_dir(workdir_root, "atf-run-case-")?)
        } else {
            None
        };
        let workdir_path: &Path = case_workdir.as_ref().map(|w| w.path()).unwrap_or(shared_ro);

        // `workdir_path` may be the shared read-only directory, which can't
        // hold the result/stdout/stderr files; a private temp dir doubles as
        // its own scratch space, but the shared one needs a writable sibling.
        let scratch_dir = if case_workdir.is_some() {
            None
        } else {
            Some(workdir::make_temp_dir(workdir_root, "atf-run-out-")?)
        };
        let scratch_path: &Path = scratch_dir.as_ref().map(|w| w.path()).unwrap_or(workdir_path);
        let result_path = executor::result_path_for(scratch_path);

        let (broken, status) = executor::run_case(
            program,
            name,
            Phase::Body,
            props,
            config,
            &result_path,
            workdir_path,
            scratch_path,
            &mut self.writer,
        )
        .await?;

        let result = arbiter::arbitrate(&broken, status, &result_path)?;

        // The result file is unlinked here rather than left for the scratch
        // dir's own teardown (spec.md §3: "it is unlinked on every exit path").
        if let Err(e) = std::fs::remove_file(&result_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(case = name, path = %result_path.display(), error = %e, "failed to unlink result file");
            }
        }

        if props.has_cleanup() {
            let cleanup_result_path = scratch_path.join("tc-result.cleanup");
            let (cleanup_broken, cleanup_status) = executor::run_case(
                program,
                name,
                Phase::Cleanup,
                props,
                config,
                &cleanup_result_path,
                workdir_path,
                scratch_path,
                &mut self.writer,
            )
            .await?;
            if !cleanup_broken.is_empty() {
                warn!(case = name, reason = %cleanup_broken, "cleanup phase failed");
            } else if !matches!(cleanup_status, ProcessStatus::Exited { code: 0 }) {
                warn!(case = name, "cleanup phase exited non-zero");
            }
        }

        let passed = !matches!(result.state, TestCaseState::Failed);
        self.writer.tc_end(name, &result)?;
        Ok(passed)
    }
}

fn read_manifest(path: &Path) -> DriverResult<crate::manifest::AtfFile> {
    let contents = std::fs::read_to_string(path).map_err(|source| DriverError::ReadManifest {
        path: path.to_path_buf(),
        source,
    })?;
    atffile::parse(&contents).map_err(|errors| DriverError::ManifestParse {
        path: path.to_path_buf(),
        errors,
    })
}

/// Invokes `program` with a metadata sub-invocation (`-l`) to obtain its
/// case listing.
async fn list_cases(program: &Path) -> Result<TestProgramMetadata, String> {
    let output = tokio::process::Command::new(program)
        .arg("-l")
        .output()
        .await
        .map_err(|e| format!("Could not invoke test program for metadata: {e}"))?;

    if !output.status.success() {
        return Err(format!(
            "Test program exited with status {:?} while listing test cases",
            output.status.code()
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    caselist::parse(&stdout).map_err(|errors| errors.to_string())
}

/// Counts total test programs (not cases) across the whole recursive
/// manifest tree, computed before any test runs (SPEC_FULL.md item 1,
/// mirroring the original's `count_tps`).
fn count_programs(manifest_dir: &Path, tps: &[PathBuf]) -> DriverResult<usize> {
    let mut total = 0;
    for tp in tps {
        let full = manifest_dir.join(tp);
        if full.is_dir() {
            let nested_manifest_path = full.join("Atffile");
            let nested = read_manifest(&nested_manifest_path)?;
            total += count_programs(&full, &nested.tps)?;
        } else {
            total += 1;
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigResult;
    use std::io::Write as _;

    struct FakeInstalledConfig {
        workdir: PathBuf,
        pkgdatadir: PathBuf,
    }

    impl InstalledConfig for FakeInstalledConfig {
        fn get(&self, key: &str) -> ConfigResult<&str> {
            match key {
                "atf_workdir" => Ok(self.workdir.to_str().unwrap()),
                "atf_shell" => Ok("/bin/sh"),
                "atf_pkgdatadir" => Ok(self.pkgdatadir.to_str().unwrap()),
                other => Err(crate::config::ConfigError::UnknownVariable(other.to_string())),
            }
        }
    }

    fn write_program(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "#!/bin/sh\n{body}").unwrap();
        drop(f);
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    /// Installs a no-op `atf-run.hooks` script so `Driver::run` can invoke
    /// its mandatory start/end hooks without a real atf installation.
    fn write_noop_hooks(pkgdatadir: &Path) {
        write_program(pkgdatadir, "atf-run.hooks", "exit 0");
    }

    const LIST_ONE_CASE: &str = r#"
if [ "$1" = "-l" ]; then
  cat <<'EOF'
Content-Type: application/X-atf-tp; version="1"

ident: t1
EOF
  exit 0
fi
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
"#;

    #[tokio::test]
    async fn full_suite_with_one_passing_program_succeeds() {
        let suite_dir = tempfile::tempdir().unwrap();
        let workdir_root = tempfile::tempdir().unwrap();
        let pkgdatadir = tempfile::tempdir().unwrap();

        write_program(suite_dir.path(), "prog1", LIST_ONE_CASE);
        write_noop_hooks(pkgdatadir.path());
        let atffile_path = suite_dir.path().join("Atffile");
        std::fs::write(
            &atffile_path,
            "Content-Type: application/X-atf-atffile; version=\"1\"\n\nprop test-suite = mysuite\ntp prog1\n",
        )
        .unwrap();

        let installed = FakeInstalledConfig {
            workdir: workdir_root.path().to_path_buf(),
            pkgdatadir: pkgdatadir.path().to_path_buf(),
        };

        let writer = EventWriter::new(Vec::new());
        let driver = Driver::new(&installed, ShutdownFlag::new(), writer);
        let ok = driver.run(&atffile_path, &[], &[]).await.unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn empty_case_list_fails_the_program() {
        let suite_dir = tempfile::tempdir().unwrap();
        let workdir_root = tempfile::tempdir().unwrap();
        let pkgdatadir = tempfile::tempdir().unwrap();

        write_program(
            suite_dir.path(),
            "prog1",
            r#"
if [ "$1" = "-l" ]; then
  printf 'Content-Type: application/X-atf-tp; version="1"\n'
  exit 0
fi
exit 0
"#,
        );
        write_noop_hooks(pkgdatadir.path());
        let atffile_path = suite_dir.path().join("Atffile");
        std::fs::write(
            &atffile_path,
            "Content-Type: application/X-atf-atffile; version=\"1\"\n\nprop test-suite = mysuite\ntp prog1\n",
        )
        .unwrap();

        let installed = FakeInstalledConfig {
            workdir: workdir_root.path().to_path_buf(),
            pkgdatadir: pkgdatadir.path().to_path_buf(),
        };

        let writer = EventWriter::new(Vec::new());
        let driver = Driver::new(&installed, ShutdownFlag::new(), writer);
        let ok = driver.run(&atffile_path, &[], &[]).await.unwrap();
        assert!(!ok);
    }
}
