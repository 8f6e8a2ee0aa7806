use crate::config::{LoggerConfig, LoggerOptions};
use crate::connection::{ConnectionState, Core};
use crate::error::LoggerError;
use crate::record::LogLevel;
use crate::value::Arg;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Handle to one log shipper instance.
///
/// Cloning is cheap and every clone drives the same connection. Dropping
/// the last clone cancels any pending reconnect and closes the transport.
///
/// Log calls never fail and never block on the network: a record is sent
/// right away when connected, otherwise buffered (or dropped when
/// buffering is off).
///
/// ```no_run
/// use ws_log_sink::{args, logger::WsLogger, config::LoggerOptions};
///
/// # async fn run() -> Result<(), ws_log_sink::error::LoggerError> {
/// let logger = WsLogger::new(LoggerOptions::new("ws://127.0.0.1:9000/logs"))?;
/// logger.set_request_id("req-42");
/// logger.info(args!["payment accepted", serde_json::json!({"amount": 1200})]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WsLogger {
    core: Arc<Core>,
}

impl WsLogger {
    /// Normalize `options` and start connecting. Must be called from within
    /// a tokio runtime.
    pub fn new(options: LoggerOptions) -> Result<Self, LoggerError> {
        let context = options.initial_context.clone().unwrap_or_default();
        let config = options.normalize()?;
        let core = Core::start(config, context)?;
        Ok(WsLogger { core })
    }

    /// Build a record from `args` and dispatch it.
    pub fn write(&self, level: LogLevel, args: impl IntoIterator<Item = Arg>) {
        let args: Vec<Arg> = args.into_iter().collect();
        self.core.write(level, &args);
    }

    pub fn log(&self, args: impl IntoIterator<Item = Arg>) {
        self.write(LogLevel::Log, args);
    }

    pub fn info(&self, args: impl IntoIterator<Item = Arg>) {
        self.write(LogLevel::Info, args);
    }

    pub fn warn(&self, args: impl IntoIterator<Item = Arg>) {
        self.write(LogLevel::Warn, args);
    }

    pub fn error(&self, args: impl IntoIterator<Item = Arg>) {
        self.write(LogLevel::Error, args);
    }

    pub fn debug(&self, args: impl IntoIterator<Item = Arg>) {
        self.write(LogLevel::Debug, args);
    }

    pub fn set_request_id(&self, request_id: impl Into<String>) {
        let request_id = request_id.into();
        self.core.with_state(|st| st.request_id = Some(request_id));
    }

    pub fn clear_request_id(&self) {
        self.core.with_state(|st| st.request_id = None);
    }

    pub fn request_id(&self) -> Option<String> {
        self.core.with_state(|st| st.request_id.clone())
    }

    /// Replace the whole context.
    pub fn set_context(&self, context: Map<String, Value>) {
        self.core.with_state(|st| st.context = context);
    }

    /// Merge `context` over the current one; later keys win.
    pub fn update_context(&self, context: Map<String, Value>) {
        self.core.with_state(|st| st.context.extend(context));
    }

    /// Remove every context entry. The next record carries no context.
    pub fn clear_context(&self) {
        self.core.with_state(|st| st.context.clear());
    }

    /// Remove only the listed context keys.
    pub fn clear_context_keys<I, K>(&self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        self.core.with_state(|st| {
            for key in keys {
                st.context.remove(key.as_ref());
            }
        });
    }

    pub fn context(&self) -> Map<String, Value> {
        self.core.with_state(|st| st.context.clone())
    }

    /// Clear a manual close and connect again from scratch.
    pub fn reconnect(&self) {
        self.core.reconnect();
    }

    /// Close the transport and suppress automatic reconnection until
    /// [`reconnect`](Self::reconnect) is called.
    pub fn close(&self) {
        self.core.close();
    }

    pub fn is_connected(&self) -> bool {
        self.core.connection_state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.core.connection_state()
    }

    pub fn buffered_message_count(&self) -> usize {
        self.core.buffered()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.core.reconnect_pending()
    }

    /// Effective configuration after normalization.
    pub fn options(&self) -> &LoggerConfig {
        &self.core.config
    }

    pub(crate) fn same_instance(&self, other: &WsLogger) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl std::fmt::Debug for WsLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsLogger")
            .field("source", &self.core.config.source)
            .field("state", &self.state())
            .field("buffered", &self.buffered_message_count())
            .finish()
    }
}

#[cfg(test)]
#[path = "logger_tests.rs"]
mod tests;
