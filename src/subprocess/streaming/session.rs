//! Per-request lifecycle of one streamed command

use tokio_util::sync::CancellationToken;

use super::multiplexer::{LineMultiplexer, MultiplexedLines};
use super::types::EXEC_FAILED_NOTICE;
use super::writer::{write_lines, write_text, LineSink, WriteOutcome};
use crate::subprocess::{ExitStatus, ProcessCommand, ProcessRunner};

/// Lifecycle states of a streaming request.
///
/// `Idle` and `Unauthorized` belong to the HTTP layer, which decides admission
/// before a session exists. A [`StreamSession`] starts in `Authorized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Unauthorized,
    Authorized,
    Spawned,
    SpawnFailed,
    Streaming,
    Terminating,
    Done,
}

/// Trailing failure notice; the client may already be gone
async fn write_notice<S>(sink: &mut S, notice: &str)
where
    S: LineSink + ?Sized,
{
    if let Err(e) = write_text(sink, notice).await {
        tracing::debug!("Client went away before the failure notice: {}", e);
    }
}

/// How a finished session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The command could not be started; one notice was written
    SpawnFailed,
    /// The command ran to completion with this status
    Exited(ExitStatus),
    /// The execution context was cancelled (shutdown or explicit termination)
    Cancelled,
    /// The client stopped reading
    Disconnected,
    /// The process ran but its exit could not be collected
    WaitFailed,
}

/// Runs one command and streams its output into a sink.
///
/// On return, whatever the exit path, the execution context is cancelled, the
/// child has been reaped and every reader task has been joined.
pub struct StreamSession {
    command: ProcessCommand,
    token: CancellationToken,
    multiplexer: LineMultiplexer,
    state: SessionState,
}

impl StreamSession {
    pub fn new(command: ProcessCommand, token: CancellationToken) -> Self {
        Self {
            command,
            token,
            multiplexer: LineMultiplexer::new(),
            state: SessionState::Authorized,
        }
    }

    pub fn with_multiplexer(mut self, multiplexer: LineMultiplexer) -> Self {
        self.multiplexer = multiplexer;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        tracing::trace!(
            "Session for {}: {:?} -> {:?}",
            self.command.program,
            self.state,
            next
        );
        self.state = next;
    }

    pub async fn run<S>(mut self, runner: &dyn ProcessRunner, sink: &mut S) -> SessionOutcome
    where
        S: LineSink + ?Sized,
    {
        let mut child = match runner.spawn(&self.command, self.token.clone()).await {
            Ok(child) => child,
            Err(e) => {
                self.transition(SessionState::SpawnFailed);
                tracing::warn!("Could not start {}: {}", self.command.display(), e);
                write_notice(sink, &format!("{EXEC_FAILED_NOTICE}: {e}")).await;
                self.token.cancel();
                return SessionOutcome::SpawnFailed;
            }
        };
        self.transition(SessionState::Spawned);

        let MultiplexedLines { mut lines, closer } =
            self.multiplexer.spawn(child.take_streams(), self.token.clone());
        self.transition(SessionState::Streaming);

        let written = write_lines(&mut lines, &self.token, sink).await;
        self.transition(SessionState::Terminating);

        let outcome = match written {
            WriteOutcome::Completed => match child.wait().await {
                Ok(ExitStatus::Cancelled) => SessionOutcome::Cancelled,
                Ok(status) => {
                    if status.is_failure() && !self.token.is_cancelled() {
                        write_notice(sink, &format!("{EXEC_FAILED_NOTICE}: {status}\n")).await;
                    }
                    SessionOutcome::Exited(status)
                }
                Err(e) => {
                    if !self.token.is_cancelled() {
                        write_notice(sink, &format!("{EXEC_FAILED_NOTICE}: {e}\n")).await;
                    }
                    SessionOutcome::WaitFailed
                }
            },
            WriteOutcome::Cancelled | WriteOutcome::Disconnected => {
                child.terminate();
                if let Err(e) = child.wait().await {
                    tracing::warn!("Waiting for {} failed: {}", child.command(), e);
                }
                if written == WriteOutcome::Disconnected {
                    SessionOutcome::Disconnected
                } else {
                    SessionOutcome::Cancelled
                }
            }
        };

        self.token.cancel();
        drop(lines);
        if let Err(e) = closer.await {
            tracing::warn!("Output closer task failed: {}", e);
        }
        self.transition(SessionState::Done);

        tracing::info!("{} finished: {:?}", self.command.display(), outcome);
        outcome
    }
}
