//! Tracing bootstrap for binaries and demos.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a formatted `tracing` subscriber honoring `RUST_LOG`.
///
/// Defaults to `info` for this crate and `warn` elsewhere when the
/// environment sets nothing. Safe to call more than once; later calls are
/// no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("warn,chatflow=info"))
        .expect("static filter directive parses");

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_file(false)
        .with_line_number(false);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
