//! Connection lifecycle and store-and-forward dispatch.
//!
//! [`Core`] owns at most one transport at a time and drives it through
//! `connecting → connected → disconnected`, scheduling a reconnect after a
//! failure. It also decides for every record whether to send it now, queue
//! it in the [`MessageBuffer`], or drop it.
//!
//! All state lives behind one re-entrant lock. The inner `RefCell` is never
//! borrowed across a call into a transport or an observer, so a transport
//! that emits events from inside `send`/`close`, or an observer that calls
//! back into the logger, re-enters on the same thread without deadlocking.

use crate::adapter::{attach_listener, Subscriptions};
use crate::buffer::MessageBuffer;
use crate::config::LoggerConfig;
use crate::error::LoggerError;
use crate::record::{LogFrame, LogLevel, LogRecord, SubscribeFrame};
use crate::transport::{EventKind, Listener, Transport, TransportEvent};
use crate::value::{data_payload, format_message, Arg};
use chrono::Utc;
use parking_lot::ReentrantMutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// `tracing` target of the logger's own diagnostics.
pub const INTERNAL_TARGET: &str = "ws_log_sink::internal";
/// `tracing` target used when mirroring log calls to the console.
pub const CONSOLE_TARGET: &str = "ws_log_sink::console";
/// `tracing` target of the default transport's diagnostics.
pub const TRANSPORT_TARGET: &str = "ws_log_sink::websocket";
/// `tracing` target of registry bookkeeping.
pub const REGISTRY_TARGET: &str = "ws_log_sink::registry";

/// Every target the crate emits on. Events on these are never forwarded
/// back into a logger.
pub(crate) const OWN_TARGETS: [&str; 4] = [
    INTERNAL_TARGET,
    CONSOLE_TARGET,
    TRANSPORT_TARGET,
    REGISTRY_TARGET,
];

/// Connection state reported to `on_connection_change`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        })
    }
}

macro_rules! emit {
    ($target:expr, $level:expr, $($arg:tt)+) => {
        match $level {
            LogLevel::Error => tracing::error!(target: $target, $($arg)+),
            LogLevel::Warn => tracing::warn!(target: $target, $($arg)+),
            LogLevel::Info | LogLevel::Log => tracing::info!(target: $target, $($arg)+),
            LogLevel::Debug => tracing::debug!(target: $target, $($arg)+),
        }
    };
}

struct ActiveTransport {
    handle: Arc<dyn Transport>,
    subscriptions: Subscriptions,
    generation: u64,
}

struct ReconnectTimer {
    id: u64,
    task: JoinHandle<()>,
}

pub(crate) struct CoreState {
    state: ConnectionState,
    manual_close: bool,
    transport: Option<ActiveTransport>,
    generation: u64,
    reconnect: Option<ReconnectTimer>,
    next_timer_id: u64,
    pub(crate) buffer: MessageBuffer,
    pub(crate) request_id: Option<String>,
    pub(crate) context: Map<String, Value>,
}

impl CoreState {
    fn is_current(&self, generation: u64) -> bool {
        self.transport
            .as_ref()
            .is_some_and(|t| t.generation == generation)
    }

    fn live_transport(&self) -> Option<Arc<dyn Transport>> {
        if self.state != ConnectionState::Connected {
            return None;
        }
        self.transport.as_ref().map(|t| Arc::clone(&t.handle))
    }
}

pub(crate) struct Core {
    pub(crate) config: LoggerConfig,
    runtime: Handle,
    state: ReentrantMutex<RefCell<CoreState>>,
}

impl Core {
    /// Build the core and make the first connection attempt.
    pub(crate) fn start(
        config: LoggerConfig,
        context: Map<String, Value>,
    ) -> Result<Arc<Core>, LoggerError> {
        let runtime = Handle::try_current().map_err(|_| LoggerError::NoRuntime)?;
        let core = Arc::new(Core {
            state: ReentrantMutex::new(RefCell::new(CoreState {
                state: ConnectionState::Disconnected,
                manual_close: false,
                transport: None,
                generation: 0,
                reconnect: None,
                next_timer_id: 0,
                buffer: MessageBuffer::new(config.max_buffer_size),
                request_id: None,
                context,
            })),
            config,
            runtime,
        });
        core.connect();
        Ok(core)
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut CoreState) -> R) -> R {
        let guard = self.state.lock();
        let mut st = guard.borrow_mut();
        f(&mut st)
    }

    pub(crate) fn connection_state(&self) -> ConnectionState {
        self.with_state(|st| st.state)
    }

    pub(crate) fn buffered(&self) -> usize {
        self.with_state(|st| st.buffer.len())
    }

    pub(crate) fn reconnect_pending(&self) -> bool {
        self.with_state(|st| st.reconnect.is_some())
    }

    fn connect(self: &Arc<Self>) {
        let guard = self.state.lock();
        {
            let mut st = guard.borrow_mut();
            st.manual_close = false;
            st.state = ConnectionState::Connecting;
        }
        self.notify(ConnectionState::Connecting);

        match (self.config.transport_factory)(&self.config.ws_url, self.config.headers.as_ref()) {
            Ok(handle) => {
                let generation = {
                    let mut st = guard.borrow_mut();
                    st.generation += 1;
                    st.generation
                };
                let mut subscriptions = Subscriptions::default();
                for kind in EventKind::ALL {
                    subscriptions.push(attach_listener(&handle, kind, self.listener(generation)));
                }
                let previous = guard.borrow_mut().transport.replace(ActiveTransport {
                    handle,
                    subscriptions,
                    generation,
                });
                if let Some(previous) = previous {
                    release(previous, true);
                }
            }
            Err(err) => {
                self.log_internal(
                    LogLevel::Error,
                    format_args!("failed to create websocket connection: {err}"),
                );
                guard.borrow_mut().state = ConnectionState::Disconnected;
                self.notify(ConnectionState::Disconnected);
                self.schedule_reconnect();
            }
        }
    }

    fn listener(self: &Arc<Self>, generation: u64) -> Listener {
        let core: Weak<Core> = Arc::downgrade(self);
        Arc::new(move |event: &TransportEvent| {
            if let Some(core) = core.upgrade() {
                core.handle_event(generation, event);
            }
        })
    }

    fn handle_event(self: &Arc<Self>, generation: u64, event: &TransportEvent) {
        let guard = self.state.lock();
        if !guard.borrow().is_current(generation) {
            return;
        }
        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Close { .. } => self.on_disconnect(LogLevel::Warn, None),
            TransportEvent::Error(detail) => self.on_disconnect(LogLevel::Error, Some(detail)),
            TransportEvent::Message(raw) => self.on_message(raw, event),
        }
    }

    fn on_open(&self) {
        let guard = self.state.lock();
        guard.borrow_mut().state = ConnectionState::Connected;
        self.log_internal(LogLevel::Info, format_args!("websocket logger connected"));

        if let Some(transport) = self.live_transport() {
            let frame = SubscribeFrame::new(&self.config.source, &self.config.subscription_topic);
            self.send_frame(transport.as_ref(), &frame);
        }
        self.flush_buffer();

        // The flush may have observed a close from inside `send`.
        if guard.borrow().state == ConnectionState::Connected {
            self.clear_reconnect_timer();
            self.notify(ConnectionState::Connected);
        }
    }

    fn on_disconnect(self: &Arc<Self>, level: LogLevel, detail: Option<&str>) {
        let guard = self.state.lock();
        let released = {
            let mut st = guard.borrow_mut();
            st.state = ConnectionState::Disconnected;
            st.transport.take()
        };
        if let Some(released) = released {
            release(released, false);
        }
        match detail {
            Some(detail) => {
                self.log_internal(level, format_args!("websocket logger error: {detail}"))
            }
            None => self.log_internal(level, format_args!("websocket logger disconnected")),
        }
        self.notify(ConnectionState::Disconnected);
        self.schedule_reconnect();
    }

    fn on_message(&self, raw: &Value, event: &TransportEvent) {
        let Some(callback) = &self.config.on_message else {
            return;
        };
        let payload = match raw {
            Value::Object(map) if map.contains_key("data") => &map["data"],
            other => other,
        };
        callback(payload, event);
    }

    fn notify(&self, state: ConnectionState) {
        if let Some(callback) = &self.config.on_connection_change {
            callback(state);
        }
    }

    fn log_internal(&self, level: LogLevel, message: fmt::Arguments<'_>) {
        if self.config.enable_console {
            emit!(INTERNAL_TARGET, level, url = %self.config.ws_url, "{}", message);
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        if !self.config.auto_reconnect() {
            return;
        }
        let guard = self.state.lock();
        let mut st = guard.borrow_mut();
        if st.manual_close || st.reconnect.is_some() {
            return;
        }
        st.next_timer_id += 1;
        let id = st.next_timer_id;
        let core = Arc::downgrade(self);
        let delay = self.config.reconnect_interval;
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(core) = core.upgrade() {
                core.fire_reconnect(id);
            }
        });
        st.reconnect = Some(ReconnectTimer { id, task });
    }

    fn fire_reconnect(self: &Arc<Self>, id: u64) {
        let guard = self.state.lock();
        {
            let mut st = guard.borrow_mut();
            if st.reconnect.as_ref().map(|t| t.id) != Some(id) {
                return;
            }
            st.reconnect = None;
            if st.manual_close {
                return;
            }
        }
        self.connect();
    }

    fn clear_reconnect_timer(&self) {
        let timer = self.with_state(|st| st.reconnect.take());
        if let Some(timer) = timer {
            timer.task.abort();
        }
    }

    fn live_transport(&self) -> Option<Arc<dyn Transport>> {
        self.with_state(|st| st.live_transport())
    }

    fn send_frame<T: Serialize>(&self, transport: &dyn Transport, frame: &T) {
        let result = serde_json::to_string(frame)
            .map_err(|e| e.to_string())
            .and_then(|text| transport.send(&text).map_err(|e| e.to_string()));
        if let Err(err) = result {
            self.log_internal(
                LogLevel::Error,
                format_args!("failed to send websocket message: {err}"),
            );
        }
    }

    fn send_record(&self, transport: &dyn Transport, record: &LogRecord) {
        let frame = LogFrame {
            topic: &self.config.topic,
            value: record,
            client_id: &self.config.source,
        };
        self.send_frame(transport, &frame);
    }

    /// Drain the buffer in order while the connection stays up. The lock is
    /// held for the whole drain, so writers on other threads queue behind it.
    fn flush_buffer(&self) {
        let guard = self.state.lock();
        loop {
            let Some(transport) = self.live_transport() else {
                break;
            };
            let Some(record) = guard.borrow_mut().buffer.pop_front() else {
                break;
            };
            self.send_record(transport.as_ref(), &record);
        }
    }

    /// Send, buffer or drop one record, then mirror it to the console.
    pub(crate) fn write(&self, level: LogLevel, args: &[Arg]) {
        let message = format_message(args);
        let data = data_payload(args);

        let guard = self.state.lock();
        let record = {
            let st = guard.borrow();
            LogRecord {
                timestamp: Utc::now(),
                level,
                message: message.clone(),
                data,
                source: self.config.source.clone(),
                request_id: st.request_id.clone(),
                context: (!st.context.is_empty()).then(|| st.context.clone()),
            }
        };

        if let Some(transport) = self.live_transport() {
            self.send_record(transport.as_ref(), &record);
        } else if self.config.buffer_messages {
            guard.borrow_mut().buffer.push(record);
        }
        drop(guard);

        if self.config.enable_console {
            emit!(CONSOLE_TARGET, level, "{}", message);
        }
    }

    /// Stop reconnecting and tear the transport down.
    pub(crate) fn close(&self) {
        let guard = self.state.lock();
        let (timer, transport) = {
            let mut st = guard.borrow_mut();
            st.manual_close = true;
            (st.reconnect.take(), st.transport.take())
        };
        if let Some(timer) = timer {
            timer.task.abort();
        }
        if let Some(transport) = transport {
            release(transport, true);
        }
        guard.borrow_mut().state = ConnectionState::Disconnected;
        self.notify(ConnectionState::Disconnected);
    }

    /// Drop any current transport and start a fresh connection attempt.
    pub(crate) fn reconnect(self: &Arc<Self>) {
        let guard = self.state.lock();
        guard.borrow_mut().manual_close = false;
        self.clear_reconnect_timer();
        let transport = guard.borrow_mut().transport.take();
        if let Some(transport) = transport {
            release(transport, true);
        }
        self.connect();
    }
}

/// Detach every listener; `force` also closes the socket. Errors from
/// either step are ignored.
fn release(transport: ActiveTransport, force: bool) {
    if force {
        let _ = transport.handle.close();
    }
    transport.subscriptions.release();
}

impl Drop for Core {
    fn drop(&mut self) {
        let st = self.state.get_mut().get_mut();
        if let Some(timer) = st.reconnect.take() {
            timer.task.abort();
        }
        if let Some(transport) = st.transport.take() {
            release(transport, true);
        }
    }
}
