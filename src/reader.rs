//! External event sources.
//!
//! A [`Reader`] adapts one external source (a message queue consumer, a
//! poller, anything that blocks for the next item) to the hub's ingestion
//! stream. The hub registers readers by name and runs each `start` on its
//! own thread; `stop` is the only way a reader terminates. Read errors
//! are logged and retried after a fixed backoff, forever.

use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{select, Sender};
use log::{error, info, warn};
use serde_json::Value;

use crate::cancel::{cancel_pair, CancelToken, Canceller};
use crate::error::SourceError;
use crate::event::Event;

/// Fixed delay between retries after a source read error.
pub const DEFAULT_SOURCE_BACKOFF: Duration = Duration::from_secs(5);

/// A named external event source feeding the hub.
pub trait Reader: Send + Sync {
    /// Stable identifier; the hub's registration key.
    fn name(&self) -> &str;

    /// Bind the ingestion sender. Called by the hub at registration time.
    fn set_channel(&self, tx: Sender<Event>);

    /// Run until [`Reader::stop`]: pull items and push them into the bound
    /// channel. Blocking; the hub calls this on a dedicated thread.
    fn start(&self);

    /// Trigger cancellation. `start` exits after finishing or abandoning
    /// its current read.
    fn stop(&self);
}

/// A blocking pull from an external system.
///
/// Implementations wrap the actual consumer (the wire protocol of which is
/// outside this crate) and surface one opaque payload per call.
pub trait EventSource: Send + Sync {
    /// Block until the next item is available.
    fn fetch(&self) -> Result<Value, SourceError>;
}

/// Reusable [`Reader`] over any [`EventSource`].
///
/// Wraps each fetched payload in an [`Event`] stamped with this reader's
/// name and hands it to the hub (a blocking hand-off: with no running
/// dispatch loop the reader waits). Fetch errors are logged and retried
/// after a fixed, stop-interruptible backoff.
pub struct SourceReader {
    name: String,
    source: Box<dyn EventSource>,
    tx: Mutex<Option<Sender<Event>>>,
    canceller: Canceller,
    token: CancelToken,
    backoff: Duration,
}

impl SourceReader {
    /// Wrap `source` under the given registration name.
    #[must_use]
    pub fn new(name: impl Into<String>, source: Box<dyn EventSource>) -> Self {
        Self::with_backoff(name, source, DEFAULT_SOURCE_BACKOFF)
    }

    /// [`SourceReader::new`] with a custom retry backoff.
    #[must_use]
    pub fn with_backoff(
        name: impl Into<String>,
        source: Box<dyn EventSource>,
        backoff: Duration,
    ) -> Self {
        let (canceller, token) = cancel_pair();
        Self {
            name: name.into(),
            source,
            tx: Mutex::new(None),
            canceller,
            token,
            backoff,
        }
    }

    fn sender(&self) -> Option<Sender<Event>> {
        self.tx.lock().ok().and_then(|guard| guard.clone())
    }
}

impl Reader for SourceReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_channel(&self, tx: Sender<Event>) {
        if let Ok(mut guard) = self.tx.lock() {
            *guard = Some(tx);
        }
    }

    fn start(&self) {
        let Some(tx) = self.sender() else {
            error!("connector {} started without a bound channel", self.name);
            return;
        };

        info!("started connector: {}", self.name);
        let cancelled = self.token.channel().clone();
        loop {
            if self.token.is_cancelled() {
                break;
            }

            let payload = match self.source.fetch() {
                Ok(payload) => payload,
                Err(err) => {
                    error!("{} reader error: {err}", self.name);
                    if self.token.wait_timeout(self.backoff) {
                        break;
                    }
                    continue;
                }
            };

            let event = Event::new(self.name.clone(), payload);
            select! {
                send(tx, event) -> res => {
                    if res.is_err() {
                        warn!("{} ingestion channel closed", self.name);
                        break;
                    }
                }
                recv(cancelled) -> _ => break,
            }
        }
        warn!("stopped connector: {}", self.name);
    }

    fn stop(&self) {
        self.canceller.cancel();
    }
}
