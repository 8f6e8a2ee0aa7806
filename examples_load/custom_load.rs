use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::error;

use ws_log_sink::init::{init_tracing_with_config, LayerConfig};
use ws_log_sink::noop_transport::NoopTransport;
use ws_log_sink::{InitializeOptions, LogLevel, LoggerOptions, LoggerRegistry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let registry = LoggerRegistry::new();

    let layer_config = LayerConfig {
        enable_stdout: false,
        forward_console: true,
    };
    init_tracing_with_config(&registry, layer_config)?;

    let options = LoggerOptions::new("ws://load.invalid")
        .with_max_buffer_size(50_000)
        .with_reconnect_interval(Duration::ZERO)
        .with_transport_factory(Arc::new(NoopTransport::factory));
    let logger = registry.initialize(
        InitializeOptions::new(options).patch_console(Some(vec![LogLevel::Error, LogLevel::Warn])),
    )?;

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "custom load test error");
    }

    let elapsed = start.elapsed();
    println!("custom config: forwarded {} events in {:?} (~{:.0} ev/s), {} buffered",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64(),
        logger.buffered_message_count()
    );

    registry.shutdown();
    Ok(())
}
