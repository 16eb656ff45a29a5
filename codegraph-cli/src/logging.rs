//! Logging initialization: logs go only to file (or are dropped), never to
//! stdout — stdout is the JSON-RPC wire (spec §6), so a stray log line there
//! would corrupt the protocol stream.
//!
//! Reads `RUST_LOG` (level filter) and `CODEGRAPH_LOG_FILE` (path) from env.
//! When `CODEGRAPH_LOG_FILE` is set, logs are appended to that file;
//! otherwise logs are dropped.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Initializes tracing so logs never reach stdout.
///
/// - **RUST_LOG**: level filter, e.g. `info`, `debug`, `codegraph_core=debug`.
///   Default: `info`.
/// - **CODEGRAPH_LOG_FILE**: when set, logs are appended to this file (plain
///   text, no ANSI). When unset, logs are dropped.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if let Ok(path) = std::env::var("CODEGRAPH_LOG_FILE") {
        let file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
        let file_layer = tracing_subscriber::fmt::layer()
            .event_format(crate::log_format::TextWithSpanIds::new())
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .with_filter(filter);
        tracing_subscriber::registry().with(file_layer).init();
        tracing::info!(path = %path, "codegraph logging to file");
    } else {
        let sink_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::sink)
            .with_filter(filter);
        tracing_subscriber::registry().with(sink_layer).init();
    }
    Ok(())
}
