//! Diagnostic logging to stderr via tracing.
//!
//! Operator-facing events go through [`crate::logger::EventSink`]; this is
//! only the developer trace stream.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Level name for a `-v` count (0=warn, 1=info, 2=debug, 3+=trace).
pub fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `verbosity`.
pub fn init_logging(verbosity: u8) -> Result<()> {
    let level = level_for(verbosity);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("foldershare={level},foldershared={level}")));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbosity >= 2)
                .with_file(verbosity >= 3)
                .with_line_number(verbosity >= 3),
        )
        .try_init()
        .map_err(|e| anyhow!("init logging: {e}"))
}
