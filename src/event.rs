//! Ingested event types.
//!
//! An [`Event`] is one raw item pulled from an external source. The payload
//! is opaque to the broker; handlers decide what (if anything) to forward
//! to their subscriber.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier for an ingested event.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Create a new random event id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// Provenance attached to every ingested event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    source: String,
}

impl Metadata {
    /// The name of the reader that produced the event.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// One raw event ingested from an external source.
///
/// Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: EventId,
    payload: Value,
    metadata: Metadata,
}

impl Event {
    /// Wrap a raw payload produced by the named source.
    #[must_use]
    pub fn new(source: impl Into<String>, payload: Value) -> Self {
        Self {
            id: EventId::new(),
            payload,
            metadata: Metadata {
                source: source.into(),
            },
        }
    }

    /// The event's generated id.
    #[must_use]
    pub const fn id(&self) -> EventId {
        self.id
    }

    /// The opaque payload.
    #[must_use]
    pub const fn payload(&self) -> &Value {
        &self.payload
    }

    /// Provenance metadata.
    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}
