use std::sync::Arc;
use std::time::Instant;

use ws_log_sink::args;
use ws_log_sink::noop_transport::NoopTransport;
use ws_log_sink::{LoggerOptions, WsLogger};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The noop transport never opens, so every record goes through the
    // buffer and the oldest ones are evicted.
    let logger = WsLogger::new(
        LoggerOptions::new("ws://load.invalid")
            .with_console(false)
            .with_transport_factory(Arc::new(NoopTransport::factory)),
    )?;

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        logger.error(args!["default load test error", i]);
    }

    let elapsed = start.elapsed();
    println!("default config: wrote {} records in {:?} (~{:.0} rec/s), {} buffered",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64(),
        logger.buffered_message_count()
    );

    logger.close();
    Ok(())
}
