//! Platform strategies for terminating processes that the supervisor cannot target directly.
//!
//! A name sweep terminates every process whose command line matches the backend executable,
//! which can include unrelated processes sharing that name. It is only used when no handle
//! for the job's own process is tracked.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::process::Command;

#[async_trait]
pub trait ProcessTerminator: Send + Sync + fmt::Debug {
    /// Short label for logs.
    fn name(&self) -> &'static str;

    /// Terminate all processes matching `executable`.
    async fn sweep(&self, executable: &str) -> io::Result<()>;
}

/// `pkill -f <executable>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixTerminator;

#[async_trait]
impl ProcessTerminator for UnixTerminator {
    fn name(&self) -> &'static str {
        "pkill"
    }

    async fn sweep(&self, executable: &str) -> io::Result<()> {
        let status = Command::new("pkill").arg("-f").arg(executable).status().await?;
        // pkill exits 1 when nothing matched; the process may already be gone.
        match status.code() {
            Some(0 | 1) => Ok(()),
            _ => Err(io::Error::other(format!("pkill exited with {status}"))),
        }
    }
}

/// `taskkill /F /T /IM <executable>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsTerminator;

#[async_trait]
impl ProcessTerminator for WindowsTerminator {
    fn name(&self) -> &'static str {
        "taskkill"
    }

    async fn sweep(&self, executable: &str) -> io::Result<()> {
        let status = Command::new("taskkill")
            .args(["/F", "/T", "/IM", executable])
            .status()
            .await?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!("taskkill exited with {status}")))
        }
    }
}

/// Terminator for the host platform.
#[must_use]
pub fn platform_terminator() -> Arc<dyn ProcessTerminator> {
    if cfg!(windows) {
        Arc::new(WindowsTerminator)
    } else {
        Arc::new(UnixTerminator)
    }
}

/// Forcefully terminate a process spawned as a group leader, together with its descendants.
///
/// On Unix the whole process group `pid` is signalled; a group that no longer exists is
/// not an error.
#[cfg_attr(unix, allow(clippy::unused_async))]
pub async fn kill_process_tree(pid: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let pgid = i32::try_from(pid).map_err(|_| io::Error::other(format!("pid {pid} out of range")))?;
        match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(io::Error::from(e)),
        }
    }
    #[cfg(not(unix))]
    {
        let status = Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .status()
            .await?;
        // 128: no such process.
        match status.code() {
            Some(0 | 128) => Ok(()),
            _ => Err(io::Error::other(format!("taskkill exited with {status}"))),
        }
    }
}

/// Image name used for a sweep: the file name of the program path.
#[must_use]
pub fn executable_name(program: &str) -> String {
    std::path::Path::new(program)
        .file_name()
        .map_or_else(|| program.to_string(), |n| n.to_string_lossy().into_owned())
}
