//! Topic handlers and the handler registry.
//!
//! A topic handler transforms ingested events into outbound messages for
//! one subscriber. The registry stores handler *factories*; one fresh
//! handler is created per (client, topic) subscription so each subscriber
//! gets isolated mutable state. Topic names are matched case-insensitively
//! everywhere.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::cancel::CancelToken;
use crate::event::Event;
use crate::user::User;

/// A per-subscription unit of topic logic.
///
/// `handle` is called with `None` exactly once at subscribe time (the
/// first-load snapshot, with `user.first()` true for the duration of that
/// call) and with `Some(event)` for every event ingested afterwards.
/// Handlers forward whatever they produce through [`User::write`].
pub trait TopicHandler: Send {
    /// The topic this handler serves. Must match the factory it came from.
    fn name(&self) -> &str;

    /// Process one event (or produce the first-load snapshot on `None`).
    fn handle(&mut self, event: Option<&Event>, user: &User);

    /// Bind the subscription's cancellation scope.
    ///
    /// Called once when the subscription is installed. The default does
    /// nothing; handlers holding background resources can observe it.
    fn set_cancel(&mut self, token: CancelToken) {
        let _ = token;
    }
}

/// Produces a fresh, independent handler per subscription.
pub trait HandlerFactory: Send + Sync {
    /// The topic the produced handlers serve.
    fn name(&self) -> &str;

    /// Create a new handler with its own state.
    fn create(&self) -> Box<dyn TopicHandler>;
}

/// Adapter turning any `Clone` handler value into a factory.
///
/// The wrapped value is the prototype; every subscription receives a clone
/// of it. This is the common way to register a handler:
///
/// ```
/// use hubcast::topic::{Prototype, TopicHandler, TopicRegistry};
/// use hubcast::{Event, Message, User};
///
/// #[derive(Clone, Default)]
/// struct Widgets {
///     seen: u64,
/// }
///
/// impl TopicHandler for Widgets {
///     fn name(&self) -> &str {
///         "Widgets"
///     }
///
///     fn handle(&mut self, event: Option<&Event>, user: &User) {
///         let Some(event) = event else {
///             user.write(Message::data(self.name(), "snapshot".into(), user.first()));
///             return;
///         };
///         self.seen += 1;
///         user.write(Message::data(self.name(), event.payload().clone(), user.first()));
///     }
/// }
///
/// let registry = TopicRegistry::new();
/// registry.register(Prototype::new(Widgets::default()));
/// assert!(registry.lookup("wIDGETS").is_some());
/// ```
pub struct Prototype<H> {
    prototype: H,
    name: String,
}

impl<H: TopicHandler + Clone + Sync + 'static> Prototype<H> {
    /// Wrap a prototype handler.
    pub fn new(prototype: H) -> Self {
        let name = prototype.name().to_string();
        Self { prototype, name }
    }
}

impl<H: TopicHandler + Clone + Sync + 'static> HandlerFactory for Prototype<H> {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self) -> Box<dyn TopicHandler> {
        Box::new(self.prototype.clone())
    }
}

/// Case-insensitive topic name → handler factory mapping.
///
/// Constructed once at startup (the hub owns one) and handed by reference
/// to handler-registering collaborators; read continuously thereafter.
#[derive(Clone, Default)]
pub struct TopicRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn HandlerFactory>>>>,
}

impl TopicRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a factory under its lowercased name.
    ///
    /// Registering a second factory for the same name silently replaces the
    /// first (last writer wins).
    pub fn register(&self, factory: impl HandlerFactory + 'static) {
        self.register_arc(Arc::new(factory));
    }

    /// [`TopicRegistry::register`] for an already-shared factory.
    pub fn register_arc(&self, factory: Arc<dyn HandlerFactory>) {
        let key = factory.name().to_lowercase();
        if let Ok(mut map) = self.inner.write() {
            map.insert(key, factory);
        }
    }

    /// Remove the factory registered under `name`. Absent names are a no-op.
    pub fn unregister(&self, name: &str) {
        if let Ok(mut map) = self.inner.write() {
            map.remove(&name.to_lowercase());
        }
    }

    /// Fetch the factory registered under `name`, matched case-insensitively.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn HandlerFactory>> {
        self.inner
            .read()
            .ok()
            .and_then(|map| map.get(&name.to_lowercase()).cloned())
    }
}
