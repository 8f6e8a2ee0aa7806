use crate::error::TransportError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Static handshake headers passed to a [`TransportFactory`].
pub type Headers = BTreeMap<String, String>;

/// Events a transport reports back to the logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Close,
    Error,
    Message,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Open,
        EventKind::Close,
        EventKind::Error,
        EventKind::Message,
    ];
}

/// Payload delivered to a [`Listener`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Close { code: Option<u16>, reason: String },
    Error(String),
    /// An inbound frame. When the value is an object with a `data` member,
    /// that member is the payload handed to `on_message`.
    Message(Value),
}

impl TransportEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TransportEvent::Open => EventKind::Open,
            TransportEvent::Close { .. } => EventKind::Close,
            TransportEvent::Error(_) => EventKind::Error,
            TransportEvent::Message(_) => EventKind::Message,
        }
    }
}

impl fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::Open => f.write_str("open"),
            TransportEvent::Close { code: Some(code), reason } => write!(f, "close {code} {reason}"),
            TransportEvent::Close { code: None, reason } => write!(f, "close {reason}"),
            TransportEvent::Error(detail) => f.write_str(detail),
            TransportEvent::Message(v) => write!(f, "message {v}"),
        }
    }
}

/// Callback registered on a transport for one [`EventKind`].
pub type Listener = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

/// Handle returned by a registration, used to remove that listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Registration style with a paired add/remove.
pub trait EventTarget: Send + Sync {
    fn add_event_listener(&self, kind: EventKind, listener: Listener) -> ListenerId;

    fn remove_event_listener(&self, kind: EventKind, id: ListenerId) -> Result<(), TransportError>;
}

/// Registration style with `on` and an optional `off` / `remove_listener`.
///
/// The removal methods return `None` when the emitter does not provide
/// them; the default implementations do exactly that.
pub trait EventEmitter: Send + Sync {
    fn on(&self, kind: EventKind, listener: Listener) -> ListenerId;

    fn off(&self, _kind: EventKind, _id: ListenerId) -> Option<Result<(), TransportError>> {
        None
    }

    fn remove_listener(
        &self,
        _kind: EventKind,
        _id: ListenerId,
    ) -> Option<Result<(), TransportError>> {
        None
    }
}

/// Bidirectional text channel to the remote collector.
///
/// Implementations must deliver events asynchronously with respect to
/// listener registration: a listener may run on any thread, but never from
/// inside `add_event_listener` / `on`. Emitting from within `send` or
/// `close` on the calling thread is allowed.
///
/// A transport that exposes neither registration style still works for
/// sending, but the logger never learns that it opened, so it stays in
/// `connecting` and buffers.
pub trait Transport: Send + Sync {
    /// Queue one text frame. Fire-and-forget: `Ok` does not imply delivery.
    fn send(&self, text: &str) -> Result<(), TransportError>;

    /// Begin closing the underlying socket.
    fn close(&self) -> Result<(), TransportError>;

    fn as_event_target(&self) -> Option<&dyn EventTarget> {
        None
    }

    fn as_emitter(&self) -> Option<&dyn EventEmitter> {
        None
    }
}

/// Constructs a transport for a target url and optional headers.
pub type TransportFactory =
    Arc<dyn Fn(&str, Option<&Headers>) -> Result<Arc<dyn Transport>, TransportError> + Send + Sync>;
