use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize structured logging with tracing.
///
/// Both binaries (agent and main server) call this at startup. The level
/// can be controlled via the RUST_LOG env var; default is "info".
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}
