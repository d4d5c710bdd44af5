//! Subscriber setup for the `gauntlet` binary.

use tracing_subscriber::EnvFilter;

/// Install a compact stderr subscriber.
///
/// `RUST_LOG` wins when set; otherwise the level is `warn`, or `debug`
/// for this crate when `verbose` is on.
pub fn init(verbose: bool) {
    let default = if verbose { "warn,gauntlet=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // A second init (tests, embedding) keeps the existing subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}
