/// Failures reported by a [`Transport`](crate::transport::Transport) or by
/// the factory that constructs one.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("unknown or unsupported url scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid handshake header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("no tokio runtime available to drive the transport")]
    NoRuntime,

    #[error("transport is closed")]
    Closed,

    #[error("failed to construct transport: {0}")]
    Construct(String),

    #[error("failed to send frame: {0}")]
    Send(String),

    #[error("failed to remove listener: {0}")]
    Unsubscribe(String),
}

/// Error type returned when constructing a [`WsLogger`](crate::logger::WsLogger).
#[derive(thiserror::Error, Debug)]
pub enum LoggerError {
    #[error("target url must not be empty")]
    MissingUrl,

    #[error("a tokio runtime must be running to construct a logger")]
    NoRuntime,

    #[error("invalid value {value:?} for {key}")]
    InvalidEnv { key: &'static str, value: String },
}

/// Error type returned by [`LoggerRegistry`](crate::registry::LoggerRegistry)
/// operations that need a logger to act on.
#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("no logger available to patch the console; initialize one or pass it explicitly")]
    NoLogger,

    #[error(transparent)]
    Logger(#[from] LoggerError),
}
