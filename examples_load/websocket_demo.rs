//! Ships a few records to the collector named by `WS_LOG_URL`.
//!
//! ```text
//! WS_LOG_URL=ws://127.0.0.1:9000 WS_LOG_TOPIC=demo cargo run --example websocket_demo
//! ```

use serde_json::{json, Map};
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use ws_log_sink::args;
use ws_log_sink::init::init_tracing;
use ws_log_sink::{ConnectionState, InitializeOptions, LoggerOptions, LoggerRegistry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let registry = LoggerRegistry::new();
    init_tracing(&registry)?;

    let options = LoggerOptions::from_env()?
        .on_connection_change(|state: ConnectionState| println!("connection: {state}"))
        .on_message(|payload, _raw| println!("server says: {payload}"));
    let logger = registry.initialize(
        InitializeOptions::new(options)
            .patch_console(None)
            .with_console_passthrough(true),
    )?;

    let mut context = Map::new();
    context.insert("service".into(), json!("websocket-demo"));
    registry.set_context(context);
    registry.set_request_id(Some("demo-1"));

    registry.info(args!["demo started", json!({ "pid": std::process::id() })]);
    info!(step = 1, "forwarded from tracing");
    warn!("this one too");

    sleep(Duration::from_secs(3)).await;
    println!("connected: {}, buffered: {}", logger.is_connected(), logger.buffered_message_count());

    registry.shutdown();
    Ok(())
}
