use async_trait::async_trait;
use axum::body::Bytes;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use super::error::ProcessError;
use super::runner::{
    ChildHandle, ExitFuture, ExitStatus, OutputReader, ProcessCommand, ProcessRunner,
};

/// Scripted stand-in for real processes.
///
/// Each expectation describes what a program prints on stdout/stderr and how it
/// exits. Programs without an expectation behave like a missing executable.
#[derive(Clone)]
pub struct MockProcessRunner {
    expectations: Arc<Mutex<Vec<MockExpectation>>>,
    call_history: Arc<Mutex<Vec<ProcessCommand>>>,
}

#[derive(Clone)]
struct MockExpectation {
    program: String,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    stderr_error: Option<String>,
    status: ExitStatus,
    spawn_error: Option<String>,
    hold_open: bool,
}

pub struct MockCommandConfig {
    runner: MockProcessRunner,
    expectation: MockExpectation,
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self {
            expectations: Arc::new(Mutex::new(Vec::new())),
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn expect_command(&mut self, program: &str) -> MockCommandConfig {
        MockCommandConfig {
            runner: self.clone(),
            expectation: MockExpectation {
                program: program.to_string(),
                stdout: Vec::new(),
                stderr: Vec::new(),
                stderr_error: None,
                status: ExitStatus::Success,
                spawn_error: None,
                hold_open: false,
            },
        }
    }

    pub fn verify_called(&self, program: &str, times: usize) -> bool {
        let history = self
            .call_history
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        history.iter().filter(|cmd| cmd.program == program).count() == times
    }

    pub fn get_call_history(&self) -> Vec<ProcessCommand> {
        self.call_history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn find(&self, program: &str) -> Option<MockExpectation> {
        self.expectations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|e| e.program == program)
            .cloned()
    }

    /// A pipe that yields `data` and then either ends or stays open until the
    /// returned writer is dropped.
    async fn pipe(data: &[u8]) -> (OutputReader, tokio::io::DuplexStream) {
        let (reader, mut writer) = tokio::io::duplex(data.len().max(64) + 1);
        // Capacity exceeds the payload so this never waits
        let _ = writer.write_all(data).await;
        (Box::pin(reader), writer)
    }

    fn failing_pipe(data: &[u8], error: &str) -> OutputReader {
        let chunks = vec![
            Ok(Bytes::copy_from_slice(data)),
            Err(std::io::Error::other(error.to_string())),
        ];
        Box::pin(StreamReader::new(futures::stream::iter(chunks)))
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn spawn(
        &self,
        command: &ProcessCommand,
        token: CancellationToken,
    ) -> Result<ChildHandle, ProcessError> {
        self.call_history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.clone());

        let Some(expectation) = self.find(&command.program) else {
            return Err(ProcessError::CommandNotFound(command.program.clone()));
        };
        if let Some(message) = expectation.spawn_error {
            return Err(ProcessError::SpawnFailed {
                command: command.display(),
                source: std::io::Error::other(message),
            });
        }

        let (stdout, stdout_writer) = Self::pipe(&expectation.stdout).await;
        let (stderr, stderr_writer) = match &expectation.stderr_error {
            Some(error) => (Self::failing_pipe(&expectation.stderr, error), None),
            None => {
                let (reader, writer) = Self::pipe(&expectation.stderr).await;
                (reader, Some(writer))
            }
        };

        let status = expectation.status;
        let exit_token = token.clone();
        let exit: ExitFuture = if expectation.hold_open {
            Box::pin(async move {
                exit_token.cancelled().await;
                drop((stdout_writer, stderr_writer));
                Ok(ExitStatus::Cancelled)
            })
        } else {
            drop((stdout_writer, stderr_writer));
            Box::pin(async move {
                if exit_token.is_cancelled() {
                    Ok(ExitStatus::Cancelled)
                } else {
                    Ok(status)
                }
            })
        };

        Ok(ChildHandle::new(
            command.display(),
            None,
            Some(stdout),
            Some(stderr),
            exit,
            token,
        ))
    }
}

impl MockCommandConfig {
    pub fn returns_stdout(mut self, stdout: &str) -> Self {
        self.expectation.stdout = stdout.as_bytes().to_vec();
        self
    }

    pub fn returns_stderr(mut self, stderr: &str) -> Self {
        self.expectation.stderr = stderr.as_bytes().to_vec();
        self
    }

    /// Fail the stderr pipe with `error` after its scripted output
    pub fn fails_stderr_read(mut self, error: &str) -> Self {
        self.expectation.stderr_error = Some(error.to_string());
        self
    }

    pub fn returns_exit_code(mut self, code: i32) -> Self {
        self.expectation.status = if code == 0 {
            ExitStatus::Success
        } else {
            ExitStatus::Error(code)
        };
        self
    }

    pub fn returns_success(mut self) -> Self {
        self.expectation.status = ExitStatus::Success;
        self
    }

    pub fn fails_to_spawn(mut self, error: &str) -> Self {
        self.expectation.spawn_error = Some(error.to_string());
        self
    }

    /// Keep the pipes open and the process "running" until cancelled
    pub fn runs_until_cancelled(mut self) -> Self {
        self.expectation.hold_open = true;
        self
    }

    pub fn finish(self) {
        self.runner
            .expectations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.expectation);
    }
}

impl Default for MockProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}
