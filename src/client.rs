//! Per-connection client actor.
//!
//! Each accepted connection gets one `Client` running three named threads:
//! a read loop (inbound commands and liveness), a write loop (heartbeats,
//! coalesced flushes, first-load bypass), and a dispatch loop draining the
//! client's bounded event queue through its subscribed handlers. Teardown
//! is idempotent and scoped to the one connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::cancel::{cancel_pair, CancelToken, Canceller};
use crate::error::{ProtocolError, TransportError};
use crate::event::Event;
use crate::hub::{Hub, HubConfig};
use crate::message::Message;
use crate::topic::TopicHandler;
use crate::transport::{Frame, FrameReader, FrameWriter};
use crate::user::User;

/// Inbound client command.
#[derive(Debug, Deserialize)]
struct ClientRequest {
    method: String,
    topics: Vec<String>,
}

/// Handle to one connected client. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

struct Shared {
    id: Uuid,
    hub: Hub,
    cfg: HubConfig,
    reader: Mutex<Option<Box<dyn FrameReader>>>,
    writer: Mutex<Box<dyn FrameWriter>>,
    /// Subscription set: lowercased topic -> handler instance.
    topics: Mutex<HashMap<String, Box<dyn TopicHandler>>>,
    /// Coalescing queue: lowercased topic -> latest pending message.
    /// Flush nulls slots instead of removing them; only unsubscribe
    /// removes a key.
    queue: Mutex<HashMap<String, Option<Message>>>,
    msg_rx: Receiver<Message>,
    event_tx: Sender<Arc<Event>>,
    event_rx: Receiver<Arc<Event>>,
    user: Arc<User>,
    canceller: Canceller,
    token: CancelToken,
    running: AtomicBool,
    closed: AtomicBool,
    dropped_events: AtomicU64,
}

impl Client {
    /// Wrap an upgraded connection and register it with the hub.
    pub(crate) fn new(
        hub: Hub,
        reader: Box<dyn FrameReader>,
        writer: Box<dyn FrameWriter>,
    ) -> Self {
        let cfg = hub.config().clone();
        let (msg_tx, msg_rx) = bounded(cfg.message_queue_capacity.max(1));
        let (event_tx, event_rx) = bounded(cfg.event_queue_capacity.max(1));
        let (canceller, token) = cancel_pair();
        // The user keeps the sole sender; the channel stays open for the
        // connection's lifetime because the user lives in `Shared`.
        let user = Arc::new(User::new(msg_tx));

        let client = Self {
            shared: Arc::new(Shared {
                id: Uuid::new_v4(),
                hub,
                cfg,
                reader: Mutex::new(Some(reader)),
                writer: Mutex::new(writer),
                topics: Mutex::new(HashMap::new()),
                queue: Mutex::new(HashMap::new()),
                msg_rx,
                event_tx,
                event_rx,
                user,
                canceller,
                token,
                running: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                dropped_events: AtomicU64::new(0),
            }),
        };
        client.shared.hub.register_client(client.clone());
        client
    }

    /// This connection's id (the hub's membership key).
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// The delivery sink shared by this connection's handlers.
    #[must_use]
    pub fn user(&self) -> Arc<User> {
        Arc::clone(&self.shared.user)
    }

    /// Cancellation token scoped to this connection.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.shared.token.clone()
    }

    /// Events rejected because this client's inbound queue was full.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.shared.dropped_events.load(Ordering::Relaxed)
    }

    /// Start the read, write, and dispatch loops. Second calls are a no-op.
    pub fn run(&self) {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let reader = self.clone();
        thread::Builder::new()
            .name(format!("hubcast-read-{}", self.shared.id))
            .spawn(move || reader.read_loop())
            .expect("failed to spawn client read loop");

        let writer = self.clone();
        thread::Builder::new()
            .name(format!("hubcast-write-{}", self.shared.id))
            .spawn(move || writer.write_loop())
            .expect("failed to spawn client write loop");

        let dispatcher = self.clone();
        thread::Builder::new()
            .name(format!("hubcast-dispatch-{}", self.shared.id))
            .spawn(move || dispatcher.dispatch_loop())
            .expect("failed to spawn client dispatch loop");

        info!("client {} connected", self.shared.id);
    }

    /// Tear the connection down: cancel the loops, close the delivery sink
    /// and the transport. Idempotent.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.canceller.cancel();
        self.shared.user.close();
        if let Ok(mut writer) = self.shared.writer.lock() {
            writer.close();
        }
        info!("client {} disconnected", self.shared.id);
    }

    /// Offer one ingested event to this client's dispatch queue.
    ///
    /// Called by the hub for every broadcast. Never blocks: when the queue
    /// is full the event is rejected for this client and counted.
    pub fn handle_event(&self, event: Arc<Event>) {
        match self.shared.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                let dropped = self.shared.dropped_events.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "client {} event queue full, rejected event ({dropped} dropped)",
                    self.shared.id
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Read side
    // ------------------------------------------------------------------

    fn read_loop(&self) {
        let taken = self.shared.reader.lock().ok().and_then(|mut guard| guard.take());
        if let Some(mut reader) = taken {
            reader.set_deadline(self.shared.cfg.pong_wait);
            loop {
                match reader.read() {
                    Ok(Frame::Text(text)) => self.handle_command(&text),
                    Ok(Frame::Ping) => {
                        debug!("client {} liveness ping", self.shared.id);
                        if let Err(err) = self.write_frame(&Frame::Pong) {
                            error!("client {} pong failed: {err}", self.shared.id);
                        }
                    }
                    Ok(Frame::Pong) => {
                        debug!("client {} liveness pong", self.shared.id);
                        reader.set_deadline(self.shared.cfg.pong_wait);
                    }
                    Ok(Frame::Close) => break,
                    Err(err) => {
                        debug!("client {} read failed: {err}", self.shared.id);
                        break;
                    }
                }
            }
        }
        // Any read-side exit tears the whole client down.
        self.shared.hub.unregister_client(self);
    }

    fn handle_command(&self, text: &str) {
        let request: ClientRequest = match serde_json::from_str(text) {
            Ok(request) => request,
            Err(err) => {
                let reason = ProtocolError::MalformedCommand {
                    reason: err.to_string(),
                };
                self.send_message(&Message::method_error("register", reason.to_string()));
                return;
            }
        };

        if request.topics.is_empty() {
            self.send_message(&Message::method_error(
                "register",
                ProtocolError::EmptyTopics.to_string(),
            ));
            return;
        }

        match request.method.to_lowercase().as_str() {
            "subscribe" => {
                for topic in &request.topics {
                    self.subscribe(topic);
                }
            }
            "unsubscribe" => self.unsubscribe(&request.topics),
            _ => {
                let reason = ProtocolError::UnknownMethod {
                    method: request.method.clone(),
                };
                self.send_message(&Message::method_error(request.method, reason.to_string()));
            }
        }
    }

    /// Install a fresh handler for `topic` and deliver its first-load
    /// snapshot. Re-subscribing replaces the previous handler.
    fn subscribe(&self, topic: &str) {
        let Some(factory) = self.shared.hub.topics().lookup(topic) else {
            let reason = ProtocolError::TopicNotFound {
                topic: topic.to_string(),
            };
            self.send_message(&Message::method_error("subscribe", reason.to_string()));
            return;
        };

        let mut handler = factory.create();
        if handler.name() != factory.name() {
            let reason = ProtocolError::HandlerIntegrity {
                topic: topic.to_string(),
            };
            self.send_message(&Message::method_error("subscribe", reason.to_string()));
            return;
        }
        handler.set_cancel(self.shared.token.clone());

        let name = handler.name().to_string();
        let key = name.to_lowercase();
        {
            // Subscription set and coalescing queue keep identical key sets.
            let Ok(mut topics) = self.shared.topics.lock() else {
                return;
            };
            let Ok(mut queue) = self.shared.queue.lock() else {
                return;
            };
            topics.insert(key.clone(), handler);
            queue.entry(key.clone()).or_insert(None);
        }

        self.send_message(&Message::method(
            "register",
            json!(format!("topic {name} subscribe success")),
        ));

        // Initial snapshot: one synchronous call with the first flag up.
        self.shared.user.set_first(true);
        if let Ok(mut topics) = self.shared.topics.lock() {
            if let Some(handler) = topics.get_mut(&key) {
                handler.handle(None, &self.shared.user);
            }
        }
        self.shared.user.set_first(false);
    }

    /// Remove subscriptions and their pending messages. Unknown topics get
    /// an error acknowledgment and do not stop the batch.
    fn unsubscribe(&self, topics: &[String]) {
        for topic in topics {
            let key = topic.to_lowercase();
            let removed = {
                let Ok(mut subs) = self.shared.topics.lock() else {
                    return;
                };
                let Ok(mut queue) = self.shared.queue.lock() else {
                    return;
                };
                if subs.remove(&key).is_some() {
                    queue.remove(&key);
                    true
                } else {
                    false
                }
            };

            if removed {
                self.send_message(&Message::method(
                    "unsubscribe",
                    json!(format!("topic {topic} unsubscribe success")),
                ));
            } else {
                self.send_message(&Message::method_error(
                    "unsubscribe",
                    format!("{topic} topic not found"),
                ));
            }
        }
    }

    // ------------------------------------------------------------------
    // Write side
    // ------------------------------------------------------------------

    fn write_loop(&self) {
        let heartbeat = tick(self.shared.cfg.ping_period);
        let flush = tick(self.shared.cfg.flush_interval);
        let messages = self.shared.msg_rx.clone();
        let cancelled = self.shared.token.channel().clone();
        loop {
            select! {
                recv(heartbeat) -> _ => self.heartbeat(),
                recv(flush) -> _ => self.flush(),
                recv(messages) -> msg => match msg {
                    Ok(msg) => self.store(msg),
                    Err(_) => break,
                },
                recv(cancelled) -> _ => break,
            }
            // Drain one already-due flush tick so a burst of first-load
            // sends cannot starve the periodic flush.
            if flush.try_recv().is_ok() {
                self.flush();
            }
        }
    }

    /// Route one delivery: first-load messages go straight to the wire,
    /// everything else overwrites the pending slot for its topic.
    ///
    /// Only subscribe creates a slot and only unsubscribe removes one, so
    /// a message whose topic has no slot was unsubscribed while it was in
    /// flight and is dropped here.
    fn store(&self, msg: Message) {
        if msg.first() {
            self.send_message(&msg);
            return;
        }
        let key = msg.name().to_lowercase();
        if let Ok(mut queue) = self.shared.queue.lock() {
            if let Some(slot) = queue.get_mut(&key) {
                *slot = Some(msg);
            }
        }
    }

    /// Send every pending message and null its slot (last-value-wins per
    /// flush interval; overwritten messages are never delivered).
    fn flush(&self) {
        let Ok(mut queue) = self.shared.queue.lock() else {
            return;
        };
        for slot in queue.values_mut() {
            if let Some(msg) = slot.take() {
                self.send_message(&msg);
            }
        }
    }

    fn heartbeat(&self) {
        if let Err(err) = self.write_frame(&Frame::Ping) {
            error!("client {} send ping error: {err}", self.shared.id);
        }
    }

    fn send_message(&self, msg: &Message) {
        if let Err(err) = self.write_frame(&Frame::Text(msg.marshal())) {
            // Write failures drop the message but leave the connection to
            // the read side's error handling.
            error!("{} send message error: {err}", msg.name());
        }
    }

    fn write_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        let Ok(mut writer) = self.shared.writer.lock() else {
            return Err(TransportError::Closed);
        };
        writer.write(frame)
    }

    // ------------------------------------------------------------------
    // Event dispatch
    // ------------------------------------------------------------------

    fn dispatch_loop(&self) {
        let events = self.shared.event_rx.clone();
        let cancelled = self.shared.token.channel().clone();
        loop {
            select! {
                recv(events) -> event => match event {
                    Ok(event) => self.dispatch_event(&event),
                    Err(_) => break,
                },
                recv(cancelled) -> _ => break,
            }
        }
    }

    fn dispatch_event(&self, event: &Event) {
        if let Ok(mut topics) = self.shared.topics.lock() {
            for handler in topics.values_mut() {
                handler.handle(Some(event), &self.shared.user);
            }
        }
    }
}
