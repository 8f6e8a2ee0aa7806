use crate::connection::ConnectionState;
use crate::error::LoggerError;
use crate::transport::{Headers, TransportEvent, TransportFactory};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default publish topic.
pub const DEFAULT_TOPIC: &str = "logs";
/// Default buffer capacity while disconnected.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 100;
/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(5000);
/// Handshake header carrying `api_key`.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Observer for connection state transitions.
pub type ConnectionCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Observer for inbound frames: the extracted payload, then the raw event.
pub type MessageCallback = Arc<dyn Fn(&Value, &TransportEvent) + Send + Sync>;

/// User-facing logger options. Everything but the url is optional.
///
/// Options are normalized into a [`LoggerConfig`] once, when the logger is
/// constructed.
#[derive(Clone, Default)]
pub struct LoggerOptions {
    pub ws_url: String,
    pub source: Option<String>,
    pub topic: Option<String>,
    pub subscription_topic: Option<String>,
    pub enable_console: Option<bool>,
    pub buffer_messages: Option<bool>,
    pub max_buffer_size: Option<usize>,
    /// Zero disables automatic reconnection.
    pub reconnect_interval: Option<Duration>,
    pub on_connection_change: Option<ConnectionCallback>,
    pub on_message: Option<MessageCallback>,
    pub transport_factory: Option<TransportFactory>,
    pub initial_context: Option<Map<String, Value>>,
    pub api_key: Option<String>,
    pub headers: Option<Headers>,
}

impl LoggerOptions {
    pub fn new(ws_url: impl Into<String>) -> Self {
        LoggerOptions {
            ws_url: ws_url.into(),
            ..Default::default()
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_subscription_topic(mut self, topic: impl Into<String>) -> Self {
        self.subscription_topic = Some(topic.into());
        self
    }

    pub fn with_console(mut self, enable: bool) -> Self {
        self.enable_console = Some(enable);
        self
    }

    pub fn with_buffering(mut self, enable: bool) -> Self {
        self.buffer_messages = Some(enable);
        self
    }

    pub fn with_max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = Some(size);
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = Some(interval);
        self
    }

    pub fn on_connection_change<F>(mut self, f: F) -> Self
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.on_connection_change = Some(Arc::new(f));
        self
    }

    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value, &TransportEvent) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(f));
        self
    }

    pub fn with_transport_factory(mut self, factory: TransportFactory) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    pub fn with_initial_context(mut self, context: Map<String, Value>) -> Self {
        self.initial_context = Some(context);
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(Headers::new)
            .insert(name.into(), value.into());
        self
    }

    /// Fill in defaults and merge the api key into the header set.
    pub fn normalize(self) -> Result<LoggerConfig, LoggerError> {
        if self.ws_url.trim().is_empty() {
            return Err(LoggerError::MissingUrl);
        }

        let source = self.source.unwrap_or_else(default_source);

        let mut headers = self.headers;
        if let Some(key) = self.api_key.filter(|k| !k.is_empty()) {
            headers
                .get_or_insert_with(Headers::new)
                .insert(API_KEY_HEADER.to_string(), key);
        }

        Ok(LoggerConfig {
            ws_url: self.ws_url,
            topic: self.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            subscription_topic: self.subscription_topic.unwrap_or_else(|| source.clone()),
            source,
            enable_console: self.enable_console.unwrap_or(true),
            buffer_messages: self.buffer_messages.unwrap_or(true),
            max_buffer_size: self.max_buffer_size.unwrap_or(DEFAULT_MAX_BUFFER_SIZE),
            reconnect_interval: self.reconnect_interval.unwrap_or(DEFAULT_RECONNECT_INTERVAL),
            on_connection_change: self.on_connection_change,
            on_message: self.on_message,
            transport_factory: self.transport_factory.unwrap_or_else(default_transport_factory),
            headers,
        })
    }
}

impl fmt::Debug for LoggerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggerOptions")
            .field("ws_url", &self.ws_url)
            .field("source", &self.source)
            .field("topic", &self.topic)
            .field("subscription_topic", &self.subscription_topic)
            .field("enable_console", &self.enable_console)
            .field("buffer_messages", &self.buffer_messages)
            .field("max_buffer_size", &self.max_buffer_size)
            .field("reconnect_interval", &self.reconnect_interval)
            .field("custom_transport", &self.transport_factory.is_some())
            .finish_non_exhaustive()
    }
}

/// Normalized, immutable configuration of one logger.
#[derive(Clone)]
pub struct LoggerConfig {
    pub ws_url: String,
    pub source: String,
    pub topic: String,
    pub subscription_topic: String,
    pub enable_console: bool,
    pub buffer_messages: bool,
    pub max_buffer_size: usize,
    pub reconnect_interval: Duration,
    pub on_connection_change: Option<ConnectionCallback>,
    pub on_message: Option<MessageCallback>,
    pub transport_factory: TransportFactory,
    pub headers: Option<Headers>,
}

impl LoggerConfig {
    pub fn auto_reconnect(&self) -> bool {
        !self.reconnect_interval.is_zero()
    }
}

impl fmt::Debug for LoggerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Header values may carry credentials, so only names are shown.
        let header_names: Option<Vec<&String>> = self.headers.as_ref().map(|h| h.keys().collect());
        f.debug_struct("LoggerConfig")
            .field("ws_url", &self.ws_url)
            .field("source", &self.source)
            .field("topic", &self.topic)
            .field("subscription_topic", &self.subscription_topic)
            .field("enable_console", &self.enable_console)
            .field("buffer_messages", &self.buffer_messages)
            .field("max_buffer_size", &self.max_buffer_size)
            .field("reconnect_interval", &self.reconnect_interval)
            .field("headers", &header_names)
            .finish_non_exhaustive()
    }
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// `<hostname>-<suffix>`, or `rust-<pid>-<suffix>` when the hostname is
/// unavailable or not valid UTF-8.
pub fn default_source() -> String {
    match hostname::get().ok().and_then(|h| h.into_string().ok()) {
        Some(host) if !host.is_empty() => format!("{host}-{}", random_suffix()),
        _ => format!("rust-{}-{}", std::process::id(), random_suffix()),
    }
}

#[cfg(feature = "websocket")]
fn default_transport_factory() -> TransportFactory {
    Arc::new(crate::websocket::WebSocketTransport::factory)
}

#[cfg(not(feature = "websocket"))]
fn default_transport_factory() -> TransportFactory {
    Arc::new(|_url: &str, _headers: Option<&Headers>| {
        Err(crate::error::TransportError::Construct(
            "no default transport; enable the `websocket` feature or set transport_factory".into(),
        ))
    })
}
