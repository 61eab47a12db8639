//! Lifecycle hooks: shell scripts invoked once at the start and once at the
//! end of a run (spec.md §4.8, SPEC_FULL.md item 3).

use std::path::PathBuf;
use std::process::Stdio;

use crate::config::InstalledConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    InfoStart,
    InfoEnd,
}

impl Hook {
    fn wire_name(self) -> &'static str {
        match self {
            Hook::InfoStart => "info_start_hook",
            Hook::InfoEnd => "info_end_hook",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("could not run {tool}.hooks {hook}: {source}")]
    Spawn {
        tool: String,
        hook: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool}.hooks {hook} exited with status {status}")]
    NonZeroExit { tool: String, hook: &'static str, status: i32 },

    #[error("{tool}.hooks {hook} was terminated by signal {signal}")]
    Signaled { tool: String, hook: &'static str, signal: i32 },
}

pub type HookResult<T> = Result<T, HookError>;

/// Invokes `$ATF_SHELL $ATF_PKGDATADIR/<tool>.hooks <hook-name>` with stdio
/// inherited from the driver. Any non-zero exit or abnormal termination is
/// fatal — the caller must abort the run (spec.md §4.8 "Hook failure is
/// fatal"). The shell is exec'd unconditionally; a missing hooks script
/// is the shell's own "no such file" failure, not a case this function
/// special-cases.
pub async fn run_hook(installed: &dyn InstalledConfig, tool: &str, hook: Hook) -> HookResult<()> {
    let shell = installed.get("atf_shell").unwrap_or("/bin/sh");
    let pkgdatadir = installed.get("atf_pkgdatadir").unwrap_or("/usr/share/atf");
    let script: PathBuf = PathBuf::from(pkgdatadir).join(format!("{tool}.hooks"));

    let status = tokio::process::Command::new(shell)
        .arg(&script)
        .arg(hook.wire_name())
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|source| HookError::Spawn {
            tool: tool.to_string(),
            hook: hook.wire_name(),
            source,
        })?;

    use std::os::unix::process::ExitStatusExt;
    match status.code() {
        Some(0) => Ok(()),
        Some(code) => Err(HookError::NonZeroExit {
            tool: tool.to_string(),
            hook: hook.wire_name(),
            status: code,
        }),
        None => Err(HookError::Signaled {
            tool: tool.to_string(),
            hook: hook.wire_name(),
            signal: status.signal().unwrap_or(0),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvInstalledConfig;

    #[tokio::test]
    async fn missing_hooks_script_is_fatal() {
        // SAFETY (test-only, single-threaded test): points pkgdatadir at an
        // empty directory so no `<tool>.hooks` script exists; the shell
        // itself then fails to open it.
        unsafe {
            std::env::set_var("ATF_PKGDATADIR", std::env::temp_dir());
        }
        let installed = EnvInstalledConfig::from_env();
        let result = run_hook(&installed, "atf-run", Hook::InfoStart).await;
        unsafe {
            std::env::remove_var("ATF_PKGDATADIR");
        }
        assert!(result.is_err());
    }
}
