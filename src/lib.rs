//! # hubcast - real-time topic publish/subscribe broker
//!
//! External event sources feed typed events into a central [`Hub`];
//! connected clients subscribe to named topics, and per-subscription
//! topic handlers transform and deliver events to each subscriber over a
//! persistent bidirectional connection.
//!
//! ## Core concepts
//!
//! - **Hub**: process-wide coordinator owning the client set, the reader
//!   set, and the single ingestion stream
//! - **Client**: one actor per connection, with read/write loops, a
//!   per-topic coalescing queue, and heartbeat-based liveness
//! - **TopicHandler**: per-subscription unit of topic logic, created fresh
//!   by a registered [`topic::HandlerFactory`] so each subscriber gets
//!   isolated mutable state
//! - **Reader**: adapter pulling events from an external source into the
//!   hub's ingestion stream
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hubcast::{Hub, Message, TopicHandler};
//! use hubcast::topic::Prototype;
//!
//! let hub = Hub::new();
//! hub.register_topic(Prototype::new(Widgets::default()));
//!
//! // After the HTTP upgrade produced a frame pair:
//! let client = hub.connect(reader, writer);
//! client.run();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cancel;
pub mod client;
pub mod error;
pub mod event;
pub mod hub;
pub mod message;
pub mod reader;
pub mod topic;
pub mod transport;
pub mod user;

// Re-export primary types at crate root for convenience
pub use cancel::{cancel_pair, CancelToken, Canceller};
pub use client::Client;
pub use error::{HubError, HubResult, ProtocolError, SourceError, TransportError};
pub use event::{Event, EventId, Metadata};
pub use hub::{Hub, HubConfig};
pub use message::{Message, MessageKind};
pub use reader::{EventSource, Reader, SourceReader};
pub use topic::{HandlerFactory, TopicHandler, TopicRegistry};
pub use transport::{pipe, Frame, FrameReader, FrameWriter};
pub use user::User;
