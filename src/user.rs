//! Per-connection delivery sink handed to topic handlers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crossbeam_channel::{Sender, TrySendError};
use serde_json::Value;

use crate::message::Message;

/// The delivery sink a handler writes through.
///
/// One `User` exists per connection and is shared by every handler the
/// connection subscribes. The identity is opaque and supplied by whoever
/// accepted the connection. Delivery is non-blocking: once the connection
/// is closed, or when the client's inbound queue is full, writes are
/// dropped rather than stalling the handler.
#[derive(Debug)]
pub struct User {
    identity: Mutex<Option<Value>>,
    first: AtomicBool,
    closed: AtomicBool,
    tx: Sender<Message>,
    dropped: AtomicU64,
}

impl User {
    pub(crate) fn new(tx: Sender<Message>) -> Self {
        Self {
            identity: Mutex::new(None),
            first: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            tx,
            dropped: AtomicU64::new(0),
        }
    }

    /// The opaque identity, if one was attached.
    #[must_use]
    pub fn identity(&self) -> Option<Value> {
        self.identity.lock().ok().and_then(|guard| guard.clone())
    }

    /// Attach an opaque identity (typically right after the upgrade).
    pub fn set_identity(&self, identity: Value) {
        if let Ok(mut guard) = self.identity.lock() {
            *guard = Some(identity);
        }
    }

    /// True only during the single synchronous handler call made at
    /// subscribe time.
    #[must_use]
    pub fn first(&self) -> bool {
        self.first.load(Ordering::Acquire)
    }

    pub(crate) fn set_first(&self, first: bool) {
        self.first.store(first, Ordering::Release);
    }

    /// Queue a message for delivery to this connection.
    ///
    /// Never blocks. Writes after close, and writes that would overflow the
    /// client's inbound queue, are dropped.
    pub fn write(&self, message: Message) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        match self.tx.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Messages dropped by [`User::write`] since the connection opened.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether the connection has been torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
