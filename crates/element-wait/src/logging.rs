//! Subscriber setup for wait progress logs.
//!
//! The engine only emits `tracing` events; nothing is printed unless the
//! host installs a subscriber, either its own or the one below.

use tracing_subscriber::EnvFilter;

/// Output format for [`init_tracing`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

fn filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Install a global fmt subscriber.
///
/// `RUST_LOG` overrides `default_filter` (e.g. `"element_wait=debug"`).
/// Returns false when a subscriber was already installed, so harnesses can
/// call this from every test.
pub fn init_tracing(default_filter: &str, format: LogFormat) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(default_filter))
        .with_target(true);
    match format {
        LogFormat::Pretty => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    }
}
