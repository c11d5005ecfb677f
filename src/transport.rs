//! Framed connection boundary.
//!
//! The HTTP upgrade that produces a bidirectional connection happens
//! outside this crate. What the broker consumes is a split pair of frame
//! halves: a blocking [`FrameReader`] with a read deadline and a
//! [`FrameWriter`] with a write timeout. Any transport that can carry
//! text/ping/pong/close frames (a WebSocket, most usefully) plugs in here.
//!
//! [`pipe`] builds an in-memory duplex over crossbeam channels; it backs
//! the integration tests and in-process peers.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};

use crate::error::TransportError;

/// Default limit on inbound frame size, in bytes.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 512;

/// One wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text payload (commands inbound, envelopes outbound).
    Text(String),
    /// Liveness probe.
    Ping,
    /// Liveness response.
    Pong,
    /// Orderly connection close.
    Close,
}

/// The receiving half of a connection.
pub trait FrameReader: Send {
    /// Block until the next frame arrives or the read deadline passes.
    fn read(&mut self) -> Result<Frame, TransportError>;

    /// Set the deadline applied to subsequent [`FrameReader::read`] calls.
    fn set_deadline(&mut self, timeout: Duration);
}

/// The sending half of a connection.
pub trait FrameWriter: Send {
    /// Write one frame, waiting at most the write timeout.
    fn write(&mut self, frame: &Frame) -> Result<(), TransportError>;

    /// Release the half. Subsequent writes fail; the peer's reader
    /// observes a close. Idempotent.
    fn close(&mut self);
}

/// In-memory reader half produced by [`pipe`].
#[derive(Debug)]
pub struct PipeReader {
    rx: Receiver<Frame>,
    deadline: Option<Duration>,
    max_frame_bytes: usize,
}

impl FrameReader for PipeReader {
    fn read(&mut self) -> Result<Frame, TransportError> {
        let frame = match self.deadline {
            Some(deadline) => self.rx.recv_timeout(deadline).map_err(|err| match err {
                RecvTimeoutError::Timeout => TransportError::ReadTimeout,
                RecvTimeoutError::Disconnected => TransportError::Closed,
            })?,
            None => self.rx.recv().map_err(|_| TransportError::Closed)?,
        };

        if let Frame::Text(ref text) = frame {
            if text.len() > self.max_frame_bytes {
                return Err(TransportError::FrameTooLarge {
                    size: text.len(),
                    limit: self.max_frame_bytes,
                });
            }
        }
        Ok(frame)
    }

    fn set_deadline(&mut self, timeout: Duration) {
        self.deadline = Some(timeout);
    }
}

/// In-memory writer half produced by [`pipe`].
#[derive(Debug)]
pub struct PipeWriter {
    tx: Option<Sender<Frame>>,
    write_wait: Duration,
}

impl FrameWriter for PipeWriter {
    fn write(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(TransportError::Closed);
        };
        tx.send_timeout(frame.clone(), self.write_wait)
            .map_err(|err| match err {
                SendTimeoutError::Timeout(_) => TransportError::WriteTimeout {
                    duration_ms: self.write_wait.as_millis().min(u128::from(u64::MAX)) as u64,
                },
                SendTimeoutError::Disconnected(_) => TransportError::Closed,
            })
    }

    fn close(&mut self) {
        // Dropping the sender disconnects the peer's reader.
        self.tx.take();
    }
}

/// Buffered frames per direction before writers start waiting.
const PIPE_CAPACITY: usize = 256;

/// Build a connected in-memory duplex.
///
/// Returns `(local, remote)` endpoint halves: what `local.1` writes,
/// `remote.0` reads, and vice versa. `max_frame_bytes` bounds inbound text
/// frames on both ends; `write_wait` bounds how long a full direction may
/// block a writer.
#[must_use]
pub fn pipe(
    max_frame_bytes: usize,
    write_wait: Duration,
) -> ((PipeReader, PipeWriter), (PipeReader, PipeWriter)) {
    let (to_remote_tx, to_remote_rx) = bounded(PIPE_CAPACITY);
    let (to_local_tx, to_local_rx) = bounded(PIPE_CAPACITY);

    let local = (
        PipeReader {
            rx: to_local_rx,
            deadline: None,
            max_frame_bytes,
        },
        PipeWriter {
            tx: Some(to_remote_tx),
            write_wait,
        },
    );
    let remote = (
        PipeReader {
            rx: to_remote_rx,
            deadline: None,
            max_frame_bytes,
        },
        PipeWriter {
            tx: Some(to_local_tx),
            write_wait,
        },
    );
    (local, remote)
}
