//! Tracing setup
//!
//! `RUST_LOG` takes precedence over the configured level.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Install the global fmt subscriber
///
/// # Arguments
/// * `level` - Default `EnvFilter` directive, e.g. `"info"` or `"block_engine=debug"`
///
/// # Returns
/// `false` if a global subscriber was already installed (the call is then a no-op)
pub fn init(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .is_ok()
}
