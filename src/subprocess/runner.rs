use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use super::error::ProcessError;
use super::streaming::StreamSource;

#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ProcessCommand {
    /// Program and arguments joined for logs and error messages
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// How a child process ended.
///
/// `Cancelled` means the execution context fired before the process exited on
/// its own; the process was killed and its real status is not interesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
    Signal(i32),
    Cancelled,
}

impl ExitStatus {
    /// A status worth reporting to the client
    pub fn is_failure(&self) -> bool {
        matches!(self, ExitStatus::Error(_) | ExitStatus::Signal(_))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Success => write!(f, "exit status 0"),
            ExitStatus::Error(code) => write!(f, "exit status {code}"),
            ExitStatus::Signal(signal) => write!(f, "signal: {signal}"),
            ExitStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Exited,
    Killed,
}

pub type OutputReader = Pin<Box<dyn AsyncRead + Send>>;
pub type ExitFuture = Pin<Box<dyn Future<Output = Result<ExitStatus, ProcessError>> + Send>>;

/// One spawned command and its output pipes.
///
/// The handle is bound to the token it was spawned with: cancelling that token
/// kills the process if it is still running, and [`ChildHandle::wait`] then
/// resolves to [`ExitStatus::Cancelled`].
pub struct ChildHandle {
    command: String,
    pid: Option<u32>,
    stdout: Option<OutputReader>,
    stderr: Option<OutputReader>,
    exit: Option<ExitFuture>,
    token: CancellationToken,
    state: ProcessState,
    status: Option<ExitStatus>,
}

impl ChildHandle {
    pub fn new(
        command: String,
        pid: Option<u32>,
        stdout: Option<OutputReader>,
        stderr: Option<OutputReader>,
        exit: ExitFuture,
        token: CancellationToken,
    ) -> Self {
        Self {
            command,
            pid,
            stdout,
            stderr,
            exit: Some(exit),
            token,
            state: ProcessState::Running,
            status: None,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Hand the output pipes over to a reader; later calls yield `None` streams
    pub fn take_streams(&mut self) -> Vec<(StreamSource, Option<OutputReader>)> {
        vec![
            (StreamSource::Stdout, self.stdout.take()),
            (StreamSource::Stderr, self.stderr.take()),
        ]
    }

    /// Request termination. Safe to call any number of times, before or after exit.
    pub fn terminate(&self) {
        if self.state != ProcessState::Running || self.token.is_cancelled() {
            return;
        }
        tracing::debug!("Terminating {} (pid {:?})", self.command, self.pid);
        self.token.cancel();
    }

    /// Wait for the process to exit or for the execution context to be cancelled.
    ///
    /// Cancel safe: dropping the returned future keeps the exit pending for a
    /// later call.
    pub async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        let Some(exit) = self.exit.as_mut() else {
            return Ok(self.status.unwrap_or(ExitStatus::Cancelled));
        };
        let result = exit.await;
        self.exit = None;
        let status = result?;
        self.state = match status {
            ExitStatus::Cancelled => ProcessState::Killed,
            _ => ProcessState::Exited,
        };
        self.status = Some(status);
        Ok(status)
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Start `command` bound to `token`: cancelling the token kills the process.
    async fn spawn(
        &self,
        command: &ProcessCommand,
        token: CancellationToken,
    ) -> Result<ChildHandle, ProcessError>;
}

pub struct TokioProcessRunner;

impl TokioProcessRunner {
    fn configure_command(command: &ProcessCommand) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&command.program);

        // Own process group so a kill reaches everything the command started
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        cmd.args(&command.args);

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }

    fn map_spawn_error(error: std::io::Error, command: &ProcessCommand) -> ProcessError {
        if error.kind() == std::io::ErrorKind::NotFound {
            ProcessError::CommandNotFound(command.program.clone())
        } else {
            ProcessError::SpawnFailed {
                command: command.display(),
                source: error,
            }
        }
    }

    fn extract_stream<T>(
        stream: Option<T>,
        stream_name: &'static str,
        command: &ProcessCommand,
    ) -> Result<T, ProcessError> {
        stream.ok_or_else(|| ProcessError::StreamCapture {
            command: command.display(),
            stream: stream_name,
        })
    }

    fn parse_exit_status(status: std::process::ExitStatus) -> ExitStatus {
        if status.success() {
            ExitStatus::Success
        } else if let Some(code) = status.code() {
            ExitStatus::Error(code)
        } else {
            Self::parse_signal_status(status)
        }
    }

    #[cfg(unix)]
    fn parse_signal_status(status: std::process::ExitStatus) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        match status.signal() {
            Some(signal) => ExitStatus::Signal(signal),
            None => ExitStatus::Error(1),
        }
    }

    #[cfg(not(unix))]
    fn parse_signal_status(_status: std::process::ExitStatus) -> ExitStatus {
        ExitStatus::Error(1)
    }

    /// Kill the child and everything in its process group.
    fn kill_child(child: &mut tokio::process::Child, command: &str) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
                match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
                    Ok(()) => return,
                    Err(e) => tracing::debug!("killpg failed for {}: {}", command, e),
                }
            }
        }

        if let Err(e) = child.start_kill() {
            tracing::debug!("Failed to kill {}: {}", command, e);
        }
    }

    /// Own the child on a waiter task that races its exit against cancellation.
    fn supervise(
        mut child: tokio::process::Child,
        token: CancellationToken,
        command: String,
    ) -> ExitFuture {
        let waiter_command = command.clone();
        let waiter = tokio::spawn(async move {
            let command = waiter_command;
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => {
                        let status = Self::parse_exit_status(status);
                        tracing::debug!("Subprocess {} finished: {}", command, status);
                        Ok(status)
                    }
                    Err(source) => Err(ProcessError::Wait { command, source }),
                },
                _ = token.cancelled() => {
                    Self::kill_child(&mut child, &command);
                    if let Err(e) = child.wait().await {
                        tracing::warn!("Failed to reap {} after kill: {}", command, e);
                    }
                    tracing::debug!("Subprocess {} killed on cancellation", command);
                    Ok(ExitStatus::Cancelled)
                }
            }
        });

        Box::pin(async move {
            match waiter.await {
                Ok(result) => result,
                Err(e) => Err(ProcessError::Wait {
                    command,
                    source: std::io::Error::other(e),
                }),
            }
        })
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn spawn(
        &self,
        command: &ProcessCommand,
        token: CancellationToken,
    ) -> Result<ChildHandle, ProcessError> {
        tracing::debug!("Executing subprocess: {}", command.display());

        let mut child = Self::configure_command(command).spawn().map_err(|e| {
            tracing::error!("Failed to spawn '{}': {} (kind: {:?})", command.program, e, e.kind());
            Self::map_spawn_error(e, command)
        })?;

        // Dropping `child` on an early return kills it (kill_on_drop)
        let stdout = Self::extract_stream(child.stdout.take(), "stdout", command)?;
        let stderr = Self::extract_stream(child.stderr.take(), "stderr", command)?;
        let pid = child.id();

        tracing::info!("Started {} (pid {:?})", command.display(), pid);

        let stdout: OutputReader = Box::pin(stdout);
        let stderr: OutputReader = Box::pin(stderr);
        let exit = Self::supervise(child, token.clone(), command.display());
        Ok(ChildHandle::new(
            command.display(),
            pid,
            Some(stdout),
            Some(stderr),
            exit,
            token,
        ))
    }
}
