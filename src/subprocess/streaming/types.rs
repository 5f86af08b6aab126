//! Core types for streaming infrastructure

/// Capacity of the merged line channel between readers and the response writer
pub const LINE_CHANNEL_CAPACITY: usize = 128;

/// Initial per-stream read buffer
pub const INITIAL_LINE_BUFFER: usize = 64 * 1024;

/// Longest line a reader accepts before giving up on its stream
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Prefix of the inline notice emitted when an output stream fails mid-read
pub const READ_FAILED_NOTICE: &str = "读取输出失败";

/// Prefix of the inline notice emitted when the command fails to start or exits badly
pub const EXEC_FAILED_NOTICE: &str = "执行失败";

/// Stream source identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// One unit of output on its way to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineMessage {
    /// A complete line, without its terminator
    Output { source: StreamSource, line: String },
    /// The stream failed and will produce nothing more
    ReadFailed { source: StreamSource, error: String },
}

impl LineMessage {
    /// Build an output line from raw bytes, dropping a trailing `\r`
    pub fn output(source: StreamSource, raw: &[u8]) -> Self {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        LineMessage::Output {
            source,
            line: String::from_utf8_lossy(raw).into_owned(),
        }
    }

    pub fn read_failed(source: StreamSource, error: impl std::fmt::Display) -> Self {
        LineMessage::ReadFailed {
            source,
            error: error.to_string(),
        }
    }

    pub fn source(&self) -> StreamSource {
        match self {
            LineMessage::Output { source, .. } | LineMessage::ReadFailed { source, .. } => *source,
        }
    }

    /// The exact text sent to the client, always newline terminated
    pub fn render(&self) -> String {
        match self {
            LineMessage::Output { line, .. } => format!("{line}\n"),
            LineMessage::ReadFailed { error, .. } => format!("{READ_FAILED_NOTICE}: {error}\n"),
        }
    }
}
