//! Client-side log shipper that streams structured records to a collector
//! over a reconnecting WebSocket.
//!
//! Records are sent immediately while connected and held in a bounded,
//! drop-oldest buffer otherwise. The buffer is flushed in order after every
//! (re)connect.

pub mod error;
pub mod record;
pub mod value;
pub mod transport;
pub mod adapter;
pub mod buffer;
pub mod config;
pub mod env;
pub mod connection;
pub mod logger;
pub mod console;
pub mod registry;
pub mod init;
pub mod noop_transport;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(test)]
mod test_support;

pub use config::LoggerOptions;
pub use connection::ConnectionState;
pub use error::{LoggerError, RegistryError, TransportError};
pub use logger::WsLogger;
pub use record::{LogLevel, LogRecord};
pub use registry::{InitializeOptions, LoggerRegistry, PatchOptions};
pub use transport::{Transport, TransportEvent, TransportFactory};
pub use value::{Arg, SharedValue};
