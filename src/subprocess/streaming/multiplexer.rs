//! Fan-in of several output streams into one bounded line channel

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use super::types::{
    LineMessage, StreamSource, INITIAL_LINE_BUFFER, LINE_CHANNEL_CAPACITY, MAX_LINE_LENGTH,
};
use crate::subprocess::runner::OutputReader;

/// Receiving end of a multiplexed set of streams.
///
/// `lines` yields `None` once every reader has finished. `closer` completes
/// when all reader tasks have been joined and the channel has been closed.
pub struct MultiplexedLines {
    pub lines: mpsc::Receiver<LineMessage>,
    pub closer: JoinHandle<()>,
}

#[derive(Debug, Clone)]
pub struct LineMultiplexer {
    capacity: usize,
    max_line_length: usize,
}

impl LineMultiplexer {
    pub fn new() -> Self {
        Self {
            capacity: LINE_CHANNEL_CAPACITY,
            max_line_length: MAX_LINE_LENGTH,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    /// Start one reader task per present stream and a closer that joins them.
    ///
    /// Missing streams are skipped. Every send races `token`, so readers never
    /// outlive a cancellation by more than one poll.
    pub fn spawn(
        &self,
        streams: Vec<(StreamSource, Option<OutputReader>)>,
        token: CancellationToken,
    ) -> MultiplexedLines {
        let (tx, lines) = mpsc::channel(self.capacity);
        let mut readers = JoinSet::new();

        for (source, stream) in streams {
            let Some(stream) = stream else {
                tracing::trace!("Skipping absent {:?} stream", source);
                continue;
            };
            readers.spawn(read_lines(
                source,
                stream,
                tx.clone(),
                token.clone(),
                self.max_line_length,
            ));
        }

        let closer = tokio::spawn(async move {
            while let Some(joined) = readers.join_next().await {
                if let Err(e) = joined {
                    tracing::warn!("Output reader task failed: {}", e);
                }
            }
            // Last sender: the channel closes here, after every reader is gone
            drop(tx);
        });

        MultiplexedLines { lines, closer }
    }
}

impl Default for LineMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward every line of one stream until EOF, failure, or cancellation.
async fn read_lines<R>(
    source: StreamSource,
    stream: R,
    tx: mpsc::Sender<LineMessage>,
    token: CancellationToken,
    max_line_length: usize,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::with_capacity(INITIAL_LINE_BUFFER, stream);
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = tokio::select! {
            _ = token.cancelled() => return,
            read = read_line(&mut reader, &mut line, max_line_length) => read,
        };

        match read {
            Ok(false) => {
                tracing::trace!("{:?} reached EOF", source);
                return;
            }
            Ok(true) => {
                let message = LineMessage::output(source, &line);
                tokio::select! {
                    _ = token.cancelled() => return,
                    sent = tx.send(message) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                if token.is_cancelled() {
                    return;
                }
                tracing::warn!("Reading {:?} failed: {}", source, e);
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tx.send(LineMessage::read_failed(source, &e)) => {}
                }
                return;
            }
        }
    }
}

/// Read one `\n`-terminated line into `line` (terminator excluded).
///
/// Returns `Ok(false)` at EOF with nothing buffered. A final line without a
/// terminator is still returned. Lines longer than `max` are an error.
async fn read_line<R>(reader: &mut R, line: &mut Vec<u8>, max: usize) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(!line.is_empty());
        }

        let (consumed, complete) = match available.iter().position(|b| *b == b'\n') {
            Some(end) => {
                line.extend_from_slice(&available[..end]);
                (end + 1, true)
            }
            None => {
                line.extend_from_slice(available);
                (available.len(), false)
            }
        };
        reader.consume(consumed);

        if line.len() > max {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line exceeds {max} bytes"),
            ));
        }
        if complete {
            return Ok(true);
        }
    }
}
