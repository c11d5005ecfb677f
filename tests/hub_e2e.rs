use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use serde_json::{json, Value};

use hubcast::topic::Prototype;
use hubcast::transport::{
    pipe, Frame, FrameReader, FrameWriter, PipeReader, PipeWriter, DEFAULT_MAX_FRAME_BYTES,
};
use hubcast::{
    Client, Event, EventSource, Hub, HubConfig, Message, Reader, SourceError, SourceReader,
    TopicHandler, User,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fast_config() -> HubConfig {
    HubConfig {
        pong_wait: Duration::from_secs(5),
        ping_period: Duration::from_secs(4),
        flush_interval: Duration::from_millis(400),
        message_queue_capacity: 64,
        event_queue_capacity: 64,
        client_log_interval: Duration::from_secs(30),
    }
}

#[derive(Clone)]
struct Echo {
    name: &'static str,
}

impl TopicHandler for Echo {
    fn name(&self) -> &str {
        self.name
    }

    fn handle(&mut self, event: Option<&Event>, user: &User) {
        let Some(event) = event else {
            user.write(Message::data(self.name, json!("first-load"), user.first()));
            return;
        };
        user.write(Message::data(self.name, event.payload().clone(), user.first()));
    }
}

/// Forwards payloads like [`Echo`] but stalls on every event, simulating a
/// slow consumer.
#[derive(Clone)]
struct SlowEcho {
    delay: Duration,
}

impl TopicHandler for SlowEcho {
    fn name(&self) -> &str {
        "Sloths"
    }

    fn handle(&mut self, event: Option<&Event>, user: &User) {
        let Some(event) = event else {
            user.write(Message::data(self.name(), json!("first-load"), user.first()));
            return;
        };
        thread::sleep(self.delay);
        user.write(Message::data(self.name(), event.payload().clone(), user.first()));
    }
}

/// Replays a fixed script of fetch results, then fails every call.
struct ScriptedSource {
    items: Mutex<VecDeque<Result<Value, SourceError>>>,
    fetches: AtomicU64,
}

impl ScriptedSource {
    fn new(items: Vec<Result<Value, SourceError>>) -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(items.into()),
            fetches: AtomicU64::new(0),
        })
    }

    fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

/// Local wrapper so the shared script can be boxed as an [`EventSource`]
/// without an orphan impl on `Arc`.
struct SharedSource(Arc<ScriptedSource>);

impl EventSource for SharedSource {
    fn fetch(&self) -> Result<Value, SourceError> {
        self.0.fetches.fetch_add(1, Ordering::SeqCst);
        self.0
            .items
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or(Err(SourceError::Read {
                message: "script drained".to_string(),
            }))
    }
}

fn read_error(message: &str) -> Result<Value, SourceError> {
    Err(SourceError::Read {
        message: message.to_string(),
    })
}

fn connect(hub: &Hub) -> (Client, PipeReader, PipeWriter) {
    let (local, remote) = pipe(DEFAULT_MAX_FRAME_BYTES, Duration::from_millis(200));
    let client = hub.connect(Box::new(local.0), Box::new(local.1));
    client.run();
    (client, remote.0, remote.1)
}

fn subscribe(reader: &mut PipeReader, writer: &mut PipeWriter, topic: &str) {
    writer
        .write(&Frame::Text(
            json!({"method": "subscribe", "topics": [topic]}).to_string(),
        ))
        .expect("subscribe write");
    // Consume the ack and the first-load envelope.
    next_data(reader, Duration::from_secs(2)).expect("first load");
}

fn next_data(reader: &mut PipeReader, timeout: Duration) -> Option<Value> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        reader.set_deadline(remaining);
        match reader.read() {
            Ok(Frame::Text(text)) => {
                let envelope: Value = serde_json::from_str(&text).expect("envelope json");
                if envelope["type"] == "data" {
                    return Some(envelope);
                }
            }
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

#[test]
fn broadcast_reaches_every_subscribed_client() {
    init_logging();
    let hub = Hub::with_config(fast_config());
    hub.register_topic(Prototype::new(Echo { name: "Widgets" }));

    let mut peers = Vec::new();
    for _ in 0..3 {
        let (_client, mut rx, mut tx) = connect(&hub);
        subscribe(&mut rx, &mut tx, "widgets");
        peers.push((rx, tx));
    }

    hub.broadcast(Event::new("test", json!({"seq": 7})));

    for (rx, _tx) in &mut peers {
        let data = next_data(rx, Duration::from_secs(2)).expect("delivery");
        assert_eq!(data["body"], json!({"seq": 7}));
    }

    hub.shutdown();
}

#[test]
fn a_slow_client_does_not_delay_the_others() {
    init_logging();
    let hub = Hub::with_config(fast_config());
    hub.register_topic(Prototype::new(Echo { name: "Widgets" }));
    hub.register_topic(Prototype::new(SlowEcho {
        delay: Duration::from_secs(3),
    }));

    let (_slow_client, mut slow_rx, mut slow_tx) = connect(&hub);
    subscribe(&mut slow_rx, &mut slow_tx, "sloths");

    let (_fast_client, mut fast_rx, mut fast_tx) = connect(&hub);
    subscribe(&mut fast_rx, &mut fast_tx, "widgets");

    let start = Instant::now();
    hub.ingest(Event::new("test", json!({"seq": 1}))).unwrap();

    let data = next_data(&mut fast_rx, Duration::from_secs(2)).expect("fast delivery");
    assert_eq!(data["body"], json!({"seq": 1}));
    // Well under the slow handler's stall.
    assert!(start.elapsed() < Duration::from_secs(2));

    hub.shutdown();
}

#[test]
fn ingested_events_reach_the_wire_within_a_flush_interval() {
    init_logging();
    let hub = Hub::with_config(fast_config());
    hub.register_topic(Prototype::new(Echo { name: "Widgets" }));

    let (_client, mut rx, mut tx) = connect(&hub);
    subscribe(&mut rx, &mut tx, "widgets");

    hub.ingest(Event::new("ticker", json!({"price": 9}))).unwrap();

    let data = next_data(&mut rx, Duration::from_secs(2)).expect("delivery");
    assert_eq!(data["name"], "Widgets");
    assert_eq!(data["body"], json!({"price": 9}));

    hub.shutdown();
}

#[test]
fn full_event_queue_rejects_new_events_for_that_client_only() {
    init_logging();
    let mut cfg = fast_config();
    cfg.event_queue_capacity = 1;
    let hub = Hub::with_config(cfg);
    hub.register_topic(Prototype::new(SlowEcho {
        delay: Duration::from_millis(800),
    }));

    let (client, mut rx, mut tx) = connect(&hub);
    subscribe(&mut rx, &mut tx, "sloths");

    // First event occupies the dispatch thread, second fills the queue,
    // the rest are rejected.
    hub.broadcast(Event::new("test", json!(1)));
    thread::sleep(Duration::from_millis(100));
    hub.broadcast(Event::new("test", json!(2)));
    hub.broadcast(Event::new("test", json!(3)));
    hub.broadcast(Event::new("test", json!(4)));

    assert!(client.dropped_events() >= 1);

    hub.shutdown();
}

#[test]
fn reader_retries_after_errors_until_stopped() {
    init_logging();
    let source = ScriptedSource::new(vec![
        Ok(json!({"n": 1})),
        read_error("broker hiccup"),
        Ok(json!({"n": 2})),
    ]);
    let reader = Arc::new(SourceReader::with_backoff(
        "scripted",
        Box::new(SharedSource(Arc::clone(&source))),
        Duration::from_millis(50),
    ));

    let (tx, rx) = bounded(16);
    reader.set_channel(tx);
    let runner = Arc::clone(&reader);
    let handle = thread::spawn(move || runner.start());

    let first = rx.recv_timeout(Duration::from_secs(1)).expect("first event");
    assert_eq!(first.payload(), &json!({"n": 1}));
    assert_eq!(first.metadata().source(), "scripted");

    // The error between the two events forces one backoff period.
    let resumed_at = Instant::now();
    let second = rx.recv_timeout(Duration::from_secs(1)).expect("second event");
    assert_eq!(second.payload(), &json!({"n": 2}));
    assert!(resumed_at.elapsed() >= Duration::from_millis(40));

    // The drained script now fails every fetch; stop() must end the loop.
    reader.stop();
    handle.join().expect("reader loop exits");

    let settled = source.fetches();
    thread::sleep(Duration::from_millis(150));
    assert_eq!(source.fetches(), settled);
}

#[test]
fn reader_registration_is_idempotent_by_name() {
    init_logging();
    let hub = Hub::with_config(fast_config());

    let first_source = ScriptedSource::new(vec![]);
    let first: Arc<dyn Reader> = Arc::new(SourceReader::new(
        "kafka",
        Box::new(SharedSource(Arc::clone(&first_source))),
    ));
    hub.register_reader(Arc::clone(&first));

    let second_source = ScriptedSource::new(vec![]);
    let second: Arc<dyn Reader> = Arc::new(SourceReader::new(
        "kafka",
        Box::new(SharedSource(Arc::clone(&second_source))),
    ));
    hub.register_reader(second);

    let registered = hub.get_reader("kafka").expect("registered reader");
    assert!(Arc::ptr_eq(&registered, &first));

    // Only the first instance runs.
    thread::sleep(Duration::from_millis(100));
    assert!(first_source.fetches() >= 1);
    assert_eq!(second_source.fetches(), 0);

    hub.shutdown();
}

#[test]
fn clients_connecting_after_shutdown_are_rejected_and_closed() {
    init_logging();
    let hub = Hub::with_config(fast_config());
    hub.shutdown();

    let (client, _rx, _tx) = connect(&hub);

    assert_eq!(hub.client_count(), 0);
    assert!(client.user().is_closed());
}

#[test]
fn shutdown_stops_readers_closes_clients_and_ends_dispatch() {
    init_logging();
    let hub = Hub::with_config(fast_config());
    hub.register_topic(Prototype::new(Echo { name: "Widgets" }));

    let source = ScriptedSource::new(vec![]);
    let reader: Arc<dyn Reader> = Arc::new(SourceReader::new("kafka", Box::new(SharedSource(source))));
    hub.register_reader(reader);

    let (client, mut rx, mut tx) = connect(&hub);
    subscribe(&mut rx, &mut tx, "widgets");
    assert_eq!(hub.client_count(), 1);

    hub.shutdown();
    hub.shutdown();

    assert_eq!(hub.client_count(), 0);
    assert!(client.user().is_closed());
    assert!(hub.get_reader("kafka").is_none());

    // The dispatch loop drops the ingestion receiver once it exits.
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let result = hub
            .sender()
            .send_timeout(Event::new("test", json!(1)), Duration::from_millis(50));
        if result.is_err() && !matches!(
            result,
            Err(crossbeam_channel::SendTimeoutError::Timeout(_))
        ) {
            break;
        }
        assert!(Instant::now() < deadline, "dispatch loop still consuming");
    }
}
