//! Log output for front-ends built on this crate.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter};

/// Install a global subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence; without it the level is `info`, or `debug`
/// when `verbose` is set. Fails if a subscriber is already installed.
pub fn init(verbose: bool) -> Result<(), TryInitError> {
    let filter = if verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init()
}
