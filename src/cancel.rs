//! Cancellation plumbing shared by clients, readers, and the hub.
//!
//! A [`Canceller`]/[`CancelToken`] pair is built on a crossbeam channel:
//! cancelling drops the sole sender, which disconnects every cloned
//! receiver and wakes any `select!` arm parked on the token. An atomic
//! flag answers polling checks without touching the channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

/// Create a linked canceller/token pair.
#[must_use]
pub fn cancel_pair() -> (Canceller, CancelToken) {
    let (tx, rx) = bounded::<()>(0);
    let flag = Arc::new(AtomicBool::new(false));
    let canceller = Canceller {
        tx: Mutex::new(Some(tx)),
        flag: Arc::clone(&flag),
    };
    let token = CancelToken { rx, flag };
    (canceller, token)
}

/// The cancelling side of a pair. Held by whoever owns the lifecycle.
#[derive(Debug)]
pub struct Canceller {
    tx: Mutex<Option<Sender<()>>>,
    flag: Arc<AtomicBool>,
}

impl Canceller {
    /// Trigger cancellation. Idempotent; never blocks.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
        if let Ok(mut guard) = self.tx.lock() {
            // Dropping the sender disconnects all token receivers.
            guard.take();
        }
    }

    /// Whether [`Canceller::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

impl Drop for Canceller {
    fn drop(&mut self) {
        self.flag.store(true, Ordering::Release);
    }
}

/// The observing side of a pair. Cheap to clone; one clone per loop.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Receiver<()>,
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Non-blocking cancellation check.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// The underlying channel, for use in `select!` arms.
    ///
    /// The channel never yields a value; a `recv` completes (with a
    /// disconnect error) only once the pair is cancelled.
    #[must_use]
    pub fn channel(&self) -> &Receiver<()> {
        &self.rx
    }

    /// Block until cancelled or until `timeout` elapses.
    ///
    /// Returns `true` if the token was cancelled within the window. Used by
    /// readers to make their retry backoff interruptible.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => self.is_cancelled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn cancel_is_observed_and_idempotent() {
        let (canceller, token) = cancel_pair();
        assert!(!token.is_cancelled());

        canceller.cancel();
        canceller.cancel();
        assert!(canceller.is_cancelled());
        assert!(token.is_cancelled());
        assert!(token.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn wait_timeout_unblocks_on_cancel() {
        let (canceller, token) = cancel_pair();
        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            assert!(token.wait_timeout(Duration::from_secs(5)));
            start.elapsed()
        });

        std::thread::sleep(Duration::from_millis(20));
        canceller.cancel();
        let waited = handle.join().unwrap();
        assert!(waited < Duration::from_secs(5));
    }

    #[test]
    fn wait_timeout_expires_when_not_cancelled() {
        let (_canceller, token) = cancel_pair();
        assert!(!token.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn dropping_canceller_cancels_token() {
        let (canceller, token) = cancel_pair();
        drop(canceller);
        assert!(token.is_cancelled());
        assert!(token.wait_timeout(Duration::from_millis(1)));
    }
}
