//! Uniform subscribe/unsubscribe over the two listener registration styles.

use crate::error::TransportError;
use crate::transport::{EventKind, Listener, Transport};
use std::sync::Arc;

/// Which registration style a transport exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerStyle {
    EventTarget,
    Emitter,
    Unsupported,
}

/// Event target wins when a transport offers both.
pub fn probe(transport: &dyn Transport) -> ListenerStyle {
    if transport.as_event_target().is_some() {
        ListenerStyle::EventTarget
    } else if transport.as_emitter().is_some() {
        ListenerStyle::Emitter
    } else {
        ListenerStyle::Unsupported
    }
}

type Unsubscribe = Box<dyn FnOnce() -> Result<(), TransportError> + Send>;

/// One registered listener. Removing it consumes the subscription, so the
/// removal path runs at most once.
pub struct Subscription {
    kind: EventKind,
    unsubscribe: Unsubscribe,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn unsubscribe(self) -> Result<(), TransportError> {
        (self.unsubscribe)()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("kind", &self.kind).finish()
    }
}

/// Register `listener` for `kind` using whichever style the transport has.
pub fn attach_listener(
    transport: &Arc<dyn Transport>,
    kind: EventKind,
    listener: Listener,
) -> Subscription {
    let unsubscribe: Unsubscribe = match probe(transport.as_ref()) {
        ListenerStyle::EventTarget => {
            let id = transport
                .as_event_target()
                .map(|target| target.add_event_listener(kind, listener));
            let transport = Arc::clone(transport);
            Box::new(move || match (transport.as_event_target(), id) {
                (Some(target), Some(id)) => target.remove_event_listener(kind, id),
                _ => Ok(()),
            })
        }
        ListenerStyle::Emitter => {
            let id = transport
                .as_emitter()
                .map(|emitter| emitter.on(kind, listener));
            let transport = Arc::clone(transport);
            Box::new(move || {
                let (Some(emitter), Some(id)) = (transport.as_emitter(), id) else {
                    return Ok(());
                };
                emitter
                    .off(kind, id)
                    .or_else(|| emitter.remove_listener(kind, id))
                    .unwrap_or(Ok(()))
            })
        }
        ListenerStyle::Unsupported => Box::new(|| Ok(())),
    };
    Subscription { kind, unsubscribe }
}

/// Subscriptions of one transport, released together.
#[derive(Debug, Default)]
pub struct Subscriptions(Vec<Subscription>);

impl Subscriptions {
    pub fn push(&mut self, sub: Subscription) {
        self.0.push(sub);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Remove every listener. Removal failures are ignored.
    pub fn release(self) {
        for sub in self.0 {
            let _ = sub.unsubscribe();
        }
    }
}
