//! Shutdown signal handling: installs handlers for `SIGINT`/`SIGTERM`/
//! `SIGHUP`/`SIGQUIT` that set a shared flag, polled by the driver at safe
//! points between cases (spec.md §5).

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use tokio::signal::unix::{SignalKind, signal};
use tracing::info;

/// Shared flag the driver polls between cases. Holds the raw signal number
/// once tripped, so the caller can report a signal-indicating exit status
/// (spec.md §5).
#[derive(Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicI32>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicI32::new(0)))
    }

    pub fn requested(&self) -> bool {
        self.0.load(Ordering::SeqCst) != 0
    }

    /// The signal that tripped the flag, if any.
    pub fn signal(&self) -> Option<i32> {
        match self.0.load(Ordering::SeqCst) {
            0 => None,
            n => Some(n),
        }
    }

    fn trip(&self, signal: i32) {
        // Only the first signal matters; later ones are ignored.
        let _ = self
            .0
            .compare_exchange(0, signal, Ordering::SeqCst, Ordering::SeqCst);
    }
}

/// Spawns a background task that waits on the first of
/// `SIGINT`/`SIGTERM`/`SIGHUP`/`SIGQUIT` and trips `flag`. Returns once the
/// handlers are installed; the spawned task runs for the life of the tokio
/// runtime.
pub fn install(flag: ShutdownFlag) -> std::io::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::spawn(async move {
        let signum = tokio::select! {
            _ = sigint.recv() => { info!(signal = "SIGINT", "shutdown requested"); libc::SIGINT }
            _ = sigterm.recv() => { info!(signal = "SIGTERM", "shutdown requested"); libc::SIGTERM }
            _ = sighup.recv() => { info!(signal = "SIGHUP", "shutdown requested"); libc::SIGHUP }
            _ = sigquit.recv() => { info!(signal = "SIGQUIT", "shutdown requested"); libc::SIGQUIT }
        };
        flag.trip(signum);
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sigint_trips_the_flag() {
        let flag = ShutdownFlag::new();
        install(flag.clone()).unwrap();
        assert!(!flag.requested());

        unsafe {
            libc::raise(libc::SIGINT);
        }
        // Give the spawned task a turn to run.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(flag.requested());
    }
}
