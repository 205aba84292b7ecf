//! Worker process spawning and control.
//!
//! [`WorkerCommand`] describes how to launch the pressy worker and
//! [`WorkerProcess`] owns the running child. The standard streams are handed
//! out exactly once each so that the writer and reader roles can live in
//! separate tasks while the process lifecycle stays with the supervisor.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::worker::LineReader;

/// Error type for worker spawning.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The worker executable was not found.
    #[error("Worker executable not found: {0}")]
    NotFound(PathBuf),
    /// The worker executable could not be executed.
    #[error("Permission denied executing {0}")]
    PermissionDenied(PathBuf),
    /// A standard stream was not piped.
    #[error("Worker {0} not available")]
    MissingPipe(&'static str),
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    fn from_io(err: std::io::Error, program: &Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(program.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(program.to_path_buf()),
            _ => Self::Io(err),
        }
    }
}

/// Launch description for a worker process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    include_stderr: bool,
}

impl WorkerCommand {
    /// Create a command for the given executable.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            include_stderr: true,
        }
    }

    /// Append extra command-line arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory of the worker.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Pipe stderr (`true`) or discard it (`false`).
    #[must_use]
    pub fn include_stderr(mut self, include: bool) -> Self {
        self.include_stderr = include;
        self
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    #[must_use]
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    #[must_use]
    pub fn get_working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }
}

/// Write half of the worker's stdin.
#[derive(Debug)]
pub struct WorkerStdin {
    inner: ChildStdin,
}

impl WorkerStdin {
    /// Write raw bytes and flush.
    ///
    /// # Errors
    ///
    /// Returns `BrokenPipe` if the worker already closed its stdin.
    pub async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.inner.write_all(bytes).await?;
        self.inner.flush().await
    }
}

/// A running worker process.
#[derive(Debug)]
pub struct WorkerProcess {
    child: Child,
    exit_status: Option<ExitStatus>,
}

impl WorkerProcess {
    /// Spawn the worker described by `command`.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn(command: &WorkerCommand) -> Result<Self, SpawnError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true);

        if command.include_stderr {
            cmd.stderr(Stdio::piped());
        } else {
            cmd.stderr(Stdio::null());
        }

        if let Some(ref dir) = command.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .map_err(|e| SpawnError::from_io(e, &command.program))?;

        tracing::debug!(
            program = %command.program.display(),
            pid = ?child.id(),
            "Worker spawned"
        );

        Ok(Self {
            child,
            exit_status: None,
        })
    }

    /// Take ownership of stdin.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdin(&mut self) -> Option<WorkerStdin> {
        self.child.stdin.take().map(|inner| WorkerStdin { inner })
    }

    /// Take stdout as a line reader.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn stdout_lines(&mut self) -> Option<LineReader<ChildStdout>> {
        self.child.stdout.take().map(LineReader::new)
    }

    /// Take stderr as a line reader. `None` when stderr is not piped.
    pub fn stderr_lines(&mut self) -> Option<LineReader<ChildStderr>> {
        self.child.stderr.take().map(LineReader::new)
    }

    /// Get the process ID, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Exit status, once [`wait`](Self::wait) has returned.
    #[must_use]
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Wait for the process to exit.
    ///
    /// Repeated calls return the cached status.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }
        let status = self.child.wait().await?;
        self.exit_status = Some(status);
        Ok(status)
    }

    /// Forcefully kill the process.
    ///
    /// # Errors
    ///
    /// Returns an error if the kill signal cannot be sent.
    pub async fn kill(&mut self) -> std::io::Result<()> {
        if self.exit_status.is_some() {
            return Ok(());
        }
        self.child.kill().await
    }

    /// Attempt graceful termination with a timeout.
    ///
    /// On Unix, sends SIGTERM first, then SIGKILL after the timeout.
    /// On other platforms, falls back to immediate kill.
    ///
    /// # Errors
    ///
    /// Returns an error if termination fails.
    pub async fn graceful_terminate(&mut self, timeout: Duration) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            self.graceful_terminate_unix(timeout).await
        }

        #[cfg(not(unix))]
        {
            let _ = timeout;
            self.kill().await
        }
    }

    #[cfg(unix)]
    async fn graceful_terminate_unix(&mut self, timeout: Duration) -> std::io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.id() else {
            return Ok(());
        };

        let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
        if let Err(e) = kill(nix_pid, Signal::SIGTERM) {
            tracing::debug!(pid, error = %e, "SIGTERM not delivered");
        }

        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::warn!(pid, "Worker ignored SIGTERM, killing");
                self.child.kill().await
            }
        }
    }
}
