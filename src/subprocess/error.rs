#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("{}", not_found_message(.0))]
    CommandNotFound(String),

    #[error("failed to start {command}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to capture {stream} of {command}")]
    StreamCapture {
        command: String,
        stream: &'static str,
    },

    #[error("failed to wait for {command}: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProcessError {
    /// Whether the process never started, as opposed to failing afterwards
    pub fn is_spawn_error(&self) -> bool {
        matches!(
            self,
            ProcessError::CommandNotFound(_)
                | ProcessError::SpawnFailed { .. }
                | ProcessError::StreamCapture { .. }
        )
    }
}

/// Paths fail at exec time; bare names fail the `PATH` lookup
fn not_found_message(program: &str) -> String {
    if program.contains('/') {
        format!("fork/exec {program}: no such file or directory")
    } else {
        format!("exec: \"{program}\": executable file not found in $PATH")
    }
}
