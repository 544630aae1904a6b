//! Tracing setup for embedding binaries.
//!
//! The library itself never calls into this module from `Engine::open` — a
//! library must not assume ownership of global subscriber state. Binaries
//! that embed the engine (the admin CLI, or a caller's own server process)
//! call `init()` once at startup.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes a stderr-bound `fmt` subscriber filtered by `RUST_LOG`
/// (defaulting to `info`) if no filter is set.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}
