//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins over the configured level. Records emitted through the
//! `log` facade (the serial layer uses it) are forwarded into the same
//! subscriber.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// # Errors
///
/// Fails if the level is not a valid filter directive or a subscriber is
/// already installed.
pub fn init(level: &str, json: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
}
