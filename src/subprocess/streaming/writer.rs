//! Draining merged output to the client, one flushed line at a time

use async_trait::async_trait;
use axum::body::Bytes;
use std::io;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::types::LineMessage;

/// Destination of streamed text.
///
/// A write error means the client is gone; callers treat it as a disconnect,
/// never as something to report.
#[async_trait]
pub trait LineSink: Send {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()>;

    async fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sink feeding an HTTP response body.
///
/// Every chunk becomes its own body frame, which hyper writes out as soon as it
/// is received, so `flush` has nothing left to do.
pub struct BodySink {
    tx: mpsc::Sender<io::Result<Bytes>>,
}

impl BodySink {
    pub fn new(tx: mpsc::Sender<io::Result<Bytes>>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl LineSink for BodySink {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.tx
            .send(Ok(Bytes::copy_from_slice(chunk)))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected"))
    }
}

#[async_trait]
impl LineSink for Vec<u8> {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.extend_from_slice(chunk);
        Ok(())
    }
}

/// Why the write loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Every producer finished and the channel closed
    Completed,
    /// The execution context was cancelled
    Cancelled,
    /// The sink refused a write; the context has been cancelled
    Disconnected,
}

/// Write `text` and flush it.
pub async fn write_text<S>(sink: &mut S, text: &str) -> io::Result<()>
where
    S: LineSink + ?Sized,
{
    sink.write(text.as_bytes()).await?;
    sink.flush().await
}

/// Drain `lines` into `sink` until the channel closes or `token` is cancelled.
///
/// Nothing is written once cancellation is observed. A failed write cancels
/// `token` so the producers and the process stop as well.
pub async fn write_lines<S>(
    lines: &mut mpsc::Receiver<LineMessage>,
    token: &CancellationToken,
    sink: &mut S,
) -> WriteOutcome
where
    S: LineSink + ?Sized,
{
    loop {
        let message = tokio::select! {
            biased;
            _ = token.cancelled() => return WriteOutcome::Cancelled,
            message = lines.recv() => match message {
                Some(message) => message,
                None => return WriteOutcome::Completed,
            },
        };

        let text = message.render();
        let written = tokio::select! {
            biased;
            _ = token.cancelled() => return WriteOutcome::Cancelled,
            written = write_text(sink, &text) => written,
        };

        if let Err(e) = written {
            tracing::debug!("Client went away while streaming: {}", e);
            token.cancel();
            return WriteOutcome::Disconnected;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::streaming::StreamSource;

    #[derive(Default)]
    struct RecordingSink {
        written: Vec<u8>,
        flushes: usize,
        fail_after: Option<usize>,
        writes: usize,
    }

    #[async_trait]
    impl LineSink for RecordingSink {
        async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
            if self.fail_after.is_some_and(|limit| self.writes >= limit) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
            }
            self.writes += 1;
            self.written.extend_from_slice(chunk);
            Ok(())
        }

        async fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    fn line(text: &str) -> LineMessage {
        LineMessage::output(StreamSource::Stdout, text.as_bytes())
    }

    #[tokio::test]
    async fn test_writes_and_flushes_every_line() {
        let (tx, mut rx) = mpsc::channel(8);
        for text in ["a", "b", "c"] {
            tx.send(line(text)).await.unwrap();
        }
        drop(tx);

        let token = CancellationToken::new();
        let mut sink = RecordingSink::default();
        let outcome = write_lines(&mut rx, &token, &mut sink).await;

        assert_eq!(outcome, WriteOutcome::Completed);
        assert_eq!(sink.written, b"a\nb\nc\n");
        assert_eq!(sink.flushes, 3);
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_context_writes_nothing() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(line("never")).await.unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let mut sink = RecordingSink::default();
        let outcome = write_lines(&mut rx, &token, &mut sink).await;

        assert_eq!(outcome, WriteOutcome::Cancelled);
        assert!(sink.written.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_stops_a_waiting_writer() {
        let (tx, mut rx) = mpsc::channel::<LineMessage>(8);
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let mut sink = Vec::<u8>::new();
        let outcome = write_lines(&mut rx, &token, &mut sink).await;
        assert_eq!(outcome, WriteOutcome::Cancelled);
        assert!(sink.is_empty());
        drop(tx);
    }

    #[tokio::test]
    async fn test_failed_write_cancels_context() {
        let (tx, mut rx) = mpsc::channel(8);
        for text in ["a", "b", "c"] {
            tx.send(line(text)).await.unwrap();
        }
        drop(tx);

        let token = CancellationToken::new();
        let mut sink = RecordingSink {
            fail_after: Some(1),
            ..Default::default()
        };
        let outcome = write_lines(&mut rx, &token, &mut sink).await;

        assert_eq!(outcome, WriteOutcome::Disconnected);
        assert_eq!(sink.written, b"a\n");
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_body_sink_reports_dropped_receiver() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut sink = BodySink::new(tx);

        let err = sink.write(b"x\n").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
