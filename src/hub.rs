//! Process-wide broker coordinator.
//!
//! The hub owns the client set, the reader set, the topic registry, and
//! the single ingestion stream. One dispatch loop drains ingestion and
//! fans every event out to the clients; each client absorbs it through
//! its own bounded queue, so a slow consumer is isolated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use log::{info, warn};
use uuid::Uuid;

use crate::cancel::{cancel_pair, CancelToken, Canceller};
use crate::client::Client;
use crate::error::{HubError, HubResult};
use crate::event::Event;
use crate::reader::Reader;
use crate::topic::{HandlerFactory, TopicRegistry};
use crate::transport::{FrameReader, FrameWriter};

/// Broker timing and capacity configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Time allowed without an inbound liveness response before the read
    /// side fails.
    pub pong_wait: Duration,
    /// Outbound liveness probe period. Must be shorter than `pong_wait`.
    pub ping_period: Duration,
    /// Coalescing queue flush period.
    pub flush_interval: Duration,
    /// Per-client bounded capacity of the handler-to-wire message stream.
    pub message_queue_capacity: usize,
    /// Per-client bounded capacity of the ingested-event dispatch queue.
    /// Overflow rejects the event for that client.
    pub event_queue_capacity: usize,
    /// How often the dispatch loop logs the connected-client count.
    pub client_log_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            flush_interval: Duration::from_secs(1),
            message_queue_capacity: 64,
            event_queue_capacity: 256,
            client_log_interval: Duration::from_secs(10),
        }
    }
}

/// The broker coordinator. Cheap to clone; all clones share one hub.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<Inner>,
}

struct Inner {
    cfg: HubConfig,
    clients: RwLock<HashMap<Uuid, Client>>,
    readers: RwLock<HashMap<String, Arc<dyn Reader>>>,
    ingest_tx: Sender<Event>,
    registry: TopicRegistry,
    canceller: Canceller,
    token: CancelToken,
    shutdown: AtomicBool,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    /// Start a hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Start a hub and its dispatch loop.
    #[must_use]
    pub fn with_config(cfg: HubConfig) -> Self {
        // Rendezvous hand-off: ingest blocks the producer until the
        // dispatch loop takes the event.
        let (ingest_tx, ingest_rx) = bounded::<Event>(0);
        let (canceller, token) = cancel_pair();

        let hub = Self {
            inner: Arc::new(Inner {
                cfg,
                clients: RwLock::new(HashMap::new()),
                readers: RwLock::new(HashMap::new()),
                ingest_tx,
                registry: TopicRegistry::new(),
                canceller,
                token,
                shutdown: AtomicBool::new(false),
            }),
        };

        let dispatch = hub.clone();
        thread::Builder::new()
            .name("hubcast-hub".to_string())
            .spawn(move || dispatch.dispatch_loop(ingest_rx))
            .expect("failed to spawn hub dispatch loop");
        hub
    }

    /// The broker configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.inner.cfg
    }

    /// The topic registry this hub resolves subscriptions against.
    #[must_use]
    pub fn topics(&self) -> &TopicRegistry {
        &self.inner.registry
    }

    /// Register a topic handler factory (see [`TopicRegistry::register`]).
    pub fn register_topic(&self, factory: impl HandlerFactory + 'static) {
        self.inner.registry.register(factory);
    }

    /// Wrap an upgraded connection as a registered client.
    ///
    /// The caller attaches an identity and invokes [`Client::run`].
    #[must_use]
    pub fn connect(
        &self,
        reader: Box<dyn FrameReader>,
        writer: Box<dyn FrameWriter>,
    ) -> Client {
        Client::new(self.clone(), reader, writer)
    }

    /// Add a client to the membership set. Idempotent.
    ///
    /// The guard reads the shutdown flag, which [`Hub::shutdown`] raises
    /// before draining the client map, so a client racing shutdown is
    /// rejected and closed rather than stranded in the drained map.
    pub fn register_client(&self, client: Client) {
        if self.inner.shutdown.load(Ordering::Acquire) {
            warn!("hub is shut down, rejecting client {}", client.id());
            client.close();
            return;
        }
        if let Ok(mut clients) = self.inner.clients.write() {
            clients.entry(client.id()).or_insert(client);
        }
    }

    /// Tear a client down and drop it from the membership set. Idempotent.
    pub fn unregister_client(&self, client: &Client) {
        let Ok(mut clients) = self.inner.clients.write() else {
            return;
        };
        if clients.remove(&client.id()).is_some() {
            client.close();
        }
    }

    /// Currently connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.inner.clients.read().map_or(0, |clients| clients.len())
    }

    /// Register an external reader and start its ingestion loop.
    ///
    /// Idempotent by reader name: a second registration under a running
    /// reader's name is a no-op and the existing instance keeps running.
    pub fn register_reader(&self, reader: Arc<dyn Reader>) {
        let name = reader.name().to_string();
        {
            let Ok(mut readers) = self.inner.readers.write() else {
                return;
            };
            if readers.contains_key(&name) {
                return;
            }
            reader.set_channel(self.inner.ingest_tx.clone());
            readers.insert(name.clone(), Arc::clone(&reader));
        }

        thread::Builder::new()
            .name(format!("hubcast-reader-{name}"))
            .spawn(move || reader.start())
            .expect("failed to spawn reader loop");
    }

    /// Fetch a registered reader, e.g. to stop one source.
    #[must_use]
    pub fn get_reader(&self, name: &str) -> Option<Arc<dyn Reader>> {
        self.inner
            .readers
            .read()
            .ok()
            .and_then(|readers| readers.get(name).cloned())
    }

    /// A sender bound to the ingestion stream, for collaborators that push
    /// events themselves.
    #[must_use]
    pub fn sender(&self) -> Sender<Event> {
        self.inner.ingest_tx.clone()
    }

    /// Push one event onto the ingestion stream.
    ///
    /// Blocks until the dispatch loop accepts it (unbuffered hand-off): a
    /// producer with no running hub consumer stalls here. This is the
    /// broker's single back-pressure point, not a defect.
    pub fn ingest(&self, event: Event) -> HubResult<()> {
        self.inner
            .ingest_tx
            .send(event)
            .map_err(|_| HubError::ShutDown)
    }

    /// Deliver one event to every connected client.
    ///
    /// Each client absorbs the event through its own bounded queue, so one
    /// slow or failing client never blocks delivery to the others.
    pub fn broadcast(&self, event: Event) {
        let clients: Vec<Client> = match self.inner.clients.read() {
            Ok(clients) => clients.values().cloned().collect(),
            Err(_) => return,
        };
        let event = Arc::new(event);
        for client in clients {
            client.handle_event(Arc::clone(&event));
        }
    }

    /// Stop the broker: stop all readers, close all clients, cancel the
    /// dispatch loop. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("shutting down hub");

        if let Ok(mut readers) = self.inner.readers.write() {
            for reader in readers.values() {
                reader.stop();
            }
            readers.clear();
        }

        let clients: Vec<Client> = self
            .inner
            .clients
            .write()
            .map(|mut clients| clients.drain().map(|(_, c)| c).collect())
            .unwrap_or_default();
        for client in clients {
            client.close();
        }

        self.inner.canceller.cancel();
    }

    /// Sole consumer of the ingestion stream.
    fn dispatch_loop(&self, ingest_rx: Receiver<Event>) {
        info!("starting hub");
        let census = tick(self.inner.cfg.client_log_interval);
        let cancelled = self.inner.token.channel().clone();
        loop {
            select! {
                recv(ingest_rx) -> event => match event {
                    Ok(event) => self.broadcast(event),
                    Err(_) => break,
                },
                recv(census) -> _ => {
                    let count = self.client_count();
                    if count > 0 {
                        info!("current number of client connections: {count}");
                    }
                }
                recv(cancelled) -> _ => break,
            }
        }
        info!("hub dispatch loop stopped");
    }
}
