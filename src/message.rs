//! Outbound wire envelope.
//!
//! Every frame the broker writes, data deliveries and method
//! acknowledgments alike, shares one envelope shape:
//!
//! ```json
//! { "code": 0|1, "type": "data"|"method", "name": "<topic-or-method>",
//!   "body": <any|null>, "error": "<omitted when ok>", "timestamp": 1693800000 }
//! ```
//!
//! Body and error are mutually exclusive; the constructors enforce it. The
//! `first` flag is not serialized: it routes the message past the client's
//! coalescing queue.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status code carried by every envelope: `1` ok, `0` error.
pub const CODE_OK: u8 = 1;
/// See [`CODE_OK`].
pub const CODE_ERROR: u8 = 0;

/// Envelope class: handler-produced data or a method acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Topic data produced by a handler.
    Data,
    /// Acknowledgment of a client command.
    Method,
}

/// An immutable outbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    code: u8,
    #[serde(rename = "type")]
    kind: MessageKind,
    name: String,
    body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    timestamp: i64,
    #[serde(skip)]
    first: bool,
}

impl Message {
    fn new(
        kind: MessageKind,
        name: impl Into<String>,
        result: Result<Value, String>,
        first: bool,
    ) -> Self {
        let (code, body, error) = match result {
            Ok(body) => (CODE_OK, Some(body), None),
            Err(err) => (CODE_ERROR, None, Some(err)),
        };
        Self {
            code,
            kind,
            name: name.into(),
            body,
            error,
            timestamp: Utc::now().timestamp(),
            first,
        }
    }

    /// A data envelope for `topic` carrying a handler-produced payload.
    #[must_use]
    pub fn data(topic: impl Into<String>, body: Value, first: bool) -> Self {
        Self::new(MessageKind::Data, topic, Ok(body), first)
    }

    /// A data envelope for `topic` carrying a handler-supplied error.
    #[must_use]
    pub fn data_error(topic: impl Into<String>, error: impl Into<String>, first: bool) -> Self {
        Self::new(MessageKind::Data, topic, Err(error.into()), first)
    }

    /// A successful acknowledgment for `name` (a method or topic).
    ///
    /// Acknowledgments always bypass the coalescing queue.
    #[must_use]
    pub fn method(name: impl Into<String>, body: Value) -> Self {
        Self::new(MessageKind::Method, name, Ok(body), true)
    }

    /// An error acknowledgment for `name`.
    #[must_use]
    pub fn method_error(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(MessageKind::Method, name, Err(error.into()), true)
    }

    /// The topic (data) or method (acknowledgment) name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this message must be delivered immediately, bypassing the
    /// coalescing queue.
    #[must_use]
    pub const fn first(&self) -> bool {
        self.first
    }

    /// Whether the envelope carries an error instead of a body.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.code == CODE_ERROR
    }

    /// The envelope class.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.kind
    }

    /// The payload, if the envelope is ok.
    #[must_use]
    pub const fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// The error text, if the envelope is an error.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Serialize to the wire text representation.
    ///
    /// The envelope contains only JSON-representable fields, so
    /// serialization cannot fail.
    #[must_use]
    pub fn marshal(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
