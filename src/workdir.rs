//! Workdir manager: creates per-case temporary directories and the shared
//! read-only immutable directory, and guarantees their cleanup on every exit
//! path (spec.md §4.4).

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum WorkdirError {
    #[error("cannot create temporary directory under {root}: {source}")]
    Create {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot restrict permissions on {path}: {source}")]
    Permissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type WorkdirResult<T> = Result<T, WorkdirError>;

/// A scoped temporary directory.
///
/// Removed recursively on drop; a removal failure is logged, never
/// propagated — spec.md §4.4 requires destruction to "log but do not
/// throw" on failure, and `Drop` cannot return a `Result` anyway.
pub struct Workdir {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl Workdir {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Workdir {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(e) = dir.close() {
                warn!(path = %self.path.display(), error = %e, "failed to remove workdir");
            }
        }
    }
}

/// Creates a fresh per-case temporary directory under `root`.
pub fn make_temp_dir(root: &Path, prefix: &str) -> WorkdirResult<Workdir> {
    let dir = tempfile::Builder::new()
        .prefix(prefix)
        .tempdir_in(root)
        .map_err(|source| WorkdirError::Create {
            root: root.to_path_buf(),
            source,
        })?;
    let path = dir.path().to_path_buf();
    Ok(Workdir { dir: Some(dir), path })
}

/// Creates the shared read-only workdir: a temp directory restricted to
/// execute-only for the owner (matching the original's `chmod 0100`), with a
/// best-effort attempt at a platform "immutable" attribute.
///
/// Returns the directory plus a diagnostic string if the immutable
/// attribute could not be set; the caller reports that diagnostic to the
/// event stream exactly once, per spec.md §4.4 — this is expected on most
/// filesystems (tmpfs, overlayfs) and is not itself a failure.
pub fn make_shared_ro_workdir(
    root: &Path,
    prefix: &str,
) -> WorkdirResult<(Workdir, Option<String>)> {
    let workdir = make_temp_dir(root, prefix)?;

    restrict_to_execute_only(workdir.path()).map_err(|source| WorkdirError::Permissions {
        path: workdir.path().to_path_buf(),
        source,
    })?;

    let diagnostic = match set_immutable(workdir.path()) {
        Ok(()) => None,
        Err(e) => Some(format!("Could not mark shared workdir immutable: {e}")),
    };

    Ok((workdir, diagnostic))
}

#[cfg(unix)]
fn restrict_to_execute_only(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o100))
}

#[cfg(not(unix))]
fn restrict_to_execute_only(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Attempts to set the Linux `FS_IMMUTABLE_FL` attribute via
/// `ioctl(FS_IOC_SETFLAGS)`. Unsupported filesystems (tmpfs, overlayfs, most
/// CI runners) return an error here, which callers must treat as
/// non-fatal.
#[cfg(target_os = "linux")]
fn set_immutable(path: &Path) -> std::io::Result<()> {
    use std::fs::File;
    use std::os::fd::AsRawFd;

    const FS_IOC_GETFLAGS: libc::c_ulong = 0x8008_6601;
    const FS_IOC_SETFLAGS: libc::c_ulong = 0x4008_6601;
    const FS_IMMUTABLE_FL: libc::c_int = 0x0000_0010;

    let file = File::open(path)?;
    let fd = file.as_raw_fd();

    let mut flags: libc::c_int = 0;
    // SAFETY: `fd` is a valid, open file descriptor for the lifetime of
    // `file`; `flags` is a valid pointer to an in-scope `c_int`.
    let rc = unsafe { libc::ioctl(fd, FS_IOC_GETFLAGS, &mut flags) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }

    flags |= FS_IMMUTABLE_FL;
    // SAFETY: same as above.
    let rc = unsafe { libc::ioctl(fd, FS_IOC_SETFLAGS, &flags) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_immutable(_path: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "immutable attribute not supported on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_dir_is_created_and_removed_on_drop() {
        let root = std::env::temp_dir();
        let path;
        {
            let dir = make_temp_dir(&root, "atf-run-test-").unwrap();
            path = dir.path().to_path_buf();
            assert!(path.is_dir());
        }
        assert!(!path.exists());
    }

    #[test]
    fn shared_ro_workdir_is_execute_only() {
        let root = std::env::temp_dir();
        let (dir, _diagnostic) = make_shared_ro_workdir(&root, "atf-run-ro-test-").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dir.path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o100);
        }
    }
}
