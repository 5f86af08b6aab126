//! Real-time streaming of subprocess output to HTTP clients
//!
//! A [`StreamSession`] spawns a command through a
//! [`ProcessRunner`](crate::subprocess::ProcessRunner), fans its stdout and
//! stderr into one bounded channel with a [`LineMultiplexer`], and drains that
//! channel into a [`LineSink`] one flushed line at a time. All of it is scoped
//! to one cancellation token per request.

pub mod multiplexer;
pub mod session;
pub mod slot;
pub mod types;
pub mod writer;


pub use multiplexer::{LineMultiplexer, MultiplexedLines};
pub use session::{SessionOutcome, SessionState, StreamSession};
pub use slot::{SessionSlot, SlotLease};
pub use types::{
    LineMessage, StreamSource, EXEC_FAILED_NOTICE, INITIAL_LINE_BUFFER, LINE_CHANNEL_CAPACITY,
    MAX_LINE_LENGTH, READ_FAILED_NOTICE,
};
pub use writer::{write_lines, write_text, BodySink, LineSink, WriteOutcome};
