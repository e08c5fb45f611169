//! Small process-related helpers shared across the workspace.
//!
//! Besides window-less spawning on Windows, this crate owns the one place where
//! a supervised child is asked to exit: a polite termination request, a bounded
//! wait, and a hard kill when the grace period runs out.

use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

pub use supervise::{Termination, request_terminate, terminate_gracefully};

mod supervise {
    use std::io;
    use std::process::ExitStatus;
    use std::time::Duration;

    use tokio::process::Child;
    use tracing::{debug, warn};

    /// How a child ended after [`terminate_gracefully`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Termination {
        /// The process had already exited before termination was requested.
        AlreadyExited(ExitStatus),
        /// The process honoured the termination request within the grace period.
        Graceful(ExitStatus),
        /// The grace period elapsed and the process was killed.
        Killed(ExitStatus),
    }

    impl Termination {
        pub fn status(&self) -> ExitStatus {
            match self {
                Self::AlreadyExited(status) | Self::Graceful(status) | Self::Killed(status) => {
                    *status
                }
            }
        }
    }

    /// Ask a child to exit without waiting for it.
    ///
    /// Sends `SIGTERM` on Unix so the child can flush and close its outputs.
    /// Other targets have no polite equivalent and get a hard kill.
    pub fn request_terminate(child: &mut Child) -> io::Result<()> {
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                let pid = libc::pid_t::try_from(pid).map_err(io::Error::other)?;
                // SAFETY: `kill` has no memory-safety preconditions; `pid` belongs to
                // a child we have not reaped yet, so it cannot have been recycled.
                let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
                if rc == 0 {
                    return Ok(());
                }
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::ESRCH) {
                    return Ok(());
                }
                return Err(err);
            }
        }

        child.start_kill()
    }

    /// Request termination, wait up to `grace`, then kill and reap.
    ///
    /// The child is always reaped when this returns `Ok`.
    pub async fn terminate_gracefully(
        child: &mut Child,
        grace: Duration,
    ) -> io::Result<Termination> {
        if let Some(status) = child.try_wait()? {
            return Ok(Termination::AlreadyExited(status));
        }

        request_terminate(child)?;

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!(?status, "Process exited after termination request");
                Ok(Termination::Graceful(status))
            }
            Err(_) => {
                warn!(
                    pid = ?child.id(),
                    grace_ms = grace.as_millis() as u64,
                    "Process ignored termination request, killing"
                );
                child.kill().await?;
                let status = child.wait().await?;
                Ok(Termination::Killed(status))
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn terminate_gracefully_stops_cooperative_child() {
        let mut child = tokio_command("sleep").arg("30").spawn().unwrap();

        let started = Instant::now();
        let outcome = terminate_gracefully(&mut child, Duration::from_secs(5))
            .await
            .unwrap();

        assert!(matches!(outcome, Termination::Graceful(_)));
        assert!(!outcome.status().success());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn terminate_gracefully_kills_child_ignoring_sigterm() {
        let mut child = tokio_command("sh")
            .arg("-c")
            .arg("trap '' TERM; sleep 5")
            .spawn()
            .unwrap();
        // Give the shell time to install the trap.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let outcome = terminate_gracefully(&mut child, Duration::from_millis(200))
            .await
            .unwrap();

        assert!(matches!(outcome, Termination::Killed(_)));
    }

    #[tokio::test]
    async fn terminate_gracefully_reports_already_exited_child() {
        let mut child = tokio_command("true").spawn().unwrap();
        child.wait().await.unwrap();

        let outcome = terminate_gracefully(&mut child, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(matches!(outcome, Termination::AlreadyExited(status) if status.success()));
    }
}
