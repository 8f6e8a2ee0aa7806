//! In-memory transports used by the unit tests.

use crate::error::TransportError;
use crate::transport::{
    EventEmitter, EventKind, EventTarget, Headers, Listener, ListenerId, Transport,
    TransportEvent, TransportFactory,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct ListenerTable {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, EventKind, Listener)>>,
}

impl ListenerTable {
    fn add(&self, kind: EventKind, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push((id, kind, listener));
        id
    }

    fn remove(&self, id: ListenerId) {
        self.entries.lock().retain(|(lid, _, _)| *lid != id);
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn emit(&self, event: &TransportEvent) {
        let targets: Vec<Listener> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, kind, _)| *kind == event.kind())
            .map(|(_, _, l)| Arc::clone(l))
            .collect();
        for listener in targets {
            listener(event);
        }
    }
}

/// Event-target transport whose events are fired by the test.
#[derive(Default)]
pub struct ScriptedTransport {
    listeners: ListenerTable,
    sent: Mutex<Vec<String>>,
    close_calls: AtomicUsize,
    fail_send: AtomicBool,
    fail_unsubscribe: AtomicBool,
    unsubscribe_attempts: AtomicUsize,
    close_after_sends: Mutex<Option<usize>>,
    send_delay: Mutex<Option<Duration>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn emit(&self, event: TransportEvent) {
        self.listeners.emit(&event);
    }

    pub fn open(&self) {
        self.emit(TransportEvent::Open);
    }

    pub fn close_event(&self) {
        self.emit(TransportEvent::Close {
            code: Some(1006),
            reason: "abnormal".into(),
        });
    }

    pub fn error_event(&self, detail: &str) {
        self.emit(TransportEvent::Error(detail.into()));
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .map(|s| serde_json::from_str(s).expect("frames are json"))
            .collect()
    }

    /// Messages of every log frame sent so far, in order.
    pub fn sent_messages(&self) -> Vec<String> {
        self.sent_json()
            .iter()
            .filter_map(|f| f["value"]["message"].as_str().map(str::to_string))
            .collect()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    pub fn fail_unsubscribe(&self, fail: bool) {
        self.fail_unsubscribe.store(fail, Ordering::SeqCst);
    }

    pub fn unsubscribe_attempts(&self) -> usize {
        self.unsubscribe_attempts.load(Ordering::SeqCst)
    }

    /// Block the calling thread for `delay` after recording each frame.
    pub fn slow_send(&self, delay: Duration) {
        *self.send_delay.lock() = Some(delay);
    }

    /// Fire a close event from inside `send` once `n` frames were sent.
    pub fn close_after_sends(&self, n: usize) {
        *self.close_after_sends.lock() = Some(n);
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, text: &str) -> Result<(), TransportError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(TransportError::Send("scripted failure".into()));
        }
        let count = {
            let mut sent = self.sent.lock();
            sent.push(text.to_string());
            sent.len()
        };
        let delay = *self.send_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let trigger = *self.close_after_sends.lock();
        if trigger == Some(count) {
            self.close_event();
        }
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn as_event_target(&self) -> Option<&dyn EventTarget> {
        Some(self)
    }
}

impl EventTarget for ScriptedTransport {
    fn add_event_listener(&self, kind: EventKind, listener: Listener) -> ListenerId {
        self.listeners.add(kind, listener)
    }

    fn remove_event_listener(&self, _kind: EventKind, id: ListenerId) -> Result<(), TransportError> {
        self.unsubscribe_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_unsubscribe.load(Ordering::SeqCst) {
            return Err(TransportError::Unsubscribe("scripted failure".into()));
        }
        self.listeners.remove(id);
        Ok(())
    }
}

/// Emitter-style transport with configurable removal methods.
pub struct EmitterTransport {
    listeners: ListenerTable,
    has_off: bool,
    has_remove_listener: bool,
    sent: Mutex<Vec<String>>,
}

impl EmitterTransport {
    pub fn new(has_off: bool, has_remove_listener: bool) -> Arc<Self> {
        Arc::new(EmitterTransport {
            listeners: ListenerTable::default(),
            has_off,
            has_remove_listener,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn emit(&self, event: TransportEvent) {
        self.listeners.emit(&event);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn sent_json(&self) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .map(|s| serde_json::from_str(s).expect("frames are json"))
            .collect()
    }

    /// Factory handing out emitter transports, each recorded in `created`.
    pub fn factory(
        has_off: bool,
        has_remove_listener: bool,
        created: Arc<Mutex<Vec<Arc<EmitterTransport>>>>,
    ) -> TransportFactory {
        Arc::new(move |_url: &str, _headers: Option<&Headers>| {
            let transport = EmitterTransport::new(has_off, has_remove_listener);
            created.lock().push(Arc::clone(&transport));
            Ok(transport as Arc<dyn Transport>)
        })
    }
}

impl Transport for EmitterTransport {
    fn send(&self, text: &str) -> Result<(), TransportError> {
        self.sent.lock().push(text.to_string());
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn as_emitter(&self) -> Option<&dyn EventEmitter> {
        Some(self)
    }
}

impl EventEmitter for EmitterTransport {
    fn on(&self, kind: EventKind, listener: Listener) -> ListenerId {
        self.listeners.add(kind, listener)
    }

    fn off(&self, _kind: EventKind, id: ListenerId) -> Option<Result<(), TransportError>> {
        self.has_off.then(|| {
            self.listeners.remove(id);
            Ok(())
        })
    }

    fn remove_listener(&self, _kind: EventKind, id: ListenerId) -> Option<Result<(), TransportError>> {
        self.has_remove_listener.then(|| {
            self.listeners.remove(id);
            Ok(())
        })
    }
}

/// Factory handing out [`ScriptedTransport`]s and recording every call.
#[derive(Default)]
pub struct ScriptedFactory {
    created: Mutex<Vec<Arc<ScriptedTransport>>>,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
    last_headers: Mutex<Option<Headers>>,
}

impl ScriptedFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn factory(self: &Arc<Self>) -> TransportFactory {
        let this = Arc::clone(self);
        Arc::new(move |_url: &str, headers: Option<&Headers>| {
            this.calls.fetch_add(1, Ordering::SeqCst);
            *this.last_headers.lock() = headers.cloned();
            let failing = this
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(TransportError::Construct("scripted failure".into()));
            }
            let transport = ScriptedTransport::new();
            this.created.lock().push(Arc::clone(&transport));
            Ok(transport as Arc<dyn Transport>)
        })
    }

    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_headers(&self) -> Option<Headers> {
        self.last_headers.lock().clone()
    }

    pub fn last(&self) -> Arc<ScriptedTransport> {
        self.created
            .lock()
            .last()
            .cloned()
            .expect("factory created a transport")
    }

    pub fn created(&self) -> Vec<Arc<ScriptedTransport>> {
        self.created.lock().clone()
    }
}
