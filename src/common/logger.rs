//! Logging setup and redaction utilities for the relay server.
//!
//! A blind relay must stay blind in its logs too: ciphertext, media chunks,
//! capability tokens, and anything else a client typed must never reach the
//! log stream. Call sites that would otherwise interpolate client material
//! wrap it in [`Redacted`], which prints only the byte length.

use std::fmt;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Display wrapper that hides the content of a client-supplied string.
///
/// The length still goes out, which is what operators need for debugging
/// malformed or oversized frames; the bytes themselves never do.
pub struct Redacted<'a>(pub &'a str);

impl fmt::Display for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} bytes redacted]", self.0.len())
    }
}

impl fmt::Debug for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Initialize the tracing subscriber with the specified default log level.
///
/// The level applies to this crate and the binary; every dependency is held
/// at `warn` so transport internals cannot accidentally echo frame contents
/// at debug level. `RUST_LOG` overrides the whole filter.
///
/// # Arguments
///
/// * `binary_name` - The name of the binary (e.g., "server")
/// * `default_level` - The default log level (e.g., "debug", "info", "warn")
pub fn setup_logger(binary_name: &str, default_log_level: &str) {
    let baseline = format!(
        "warn,{}={},{}={}",
        env!("CARGO_PKG_NAME").replace("-", "_"),
        default_log_level,
        binary_name,
        default_log_level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| baseline.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
