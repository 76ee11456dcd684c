//! Tracing initialization.
//!
//! Controlled by environment variables:
//! - `RUST_LOG` — standard env-filter directives (default `info`)
//! - `NTS_LOG_FORMAT=json` — JSON events to stderr instead of the compact
//!   human format
//!
//! The core only emits `tracing` events; a host embedding the library can
//! skip [`init`] entirely and install its own subscriber.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Install the stderr subscriber. Safe to call more than once; later calls
/// are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("NTS_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    // Err means a subscriber is already installed, which is fine.
    drop(result);
}
