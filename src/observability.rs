//! Process-wide logging setup.
//!
//! Library code only emits `tracing` events; installing a subscriber is the
//! binary's job. The filter comes from `RUST_LOG` and falls back to `info`.
//!
//! Contact values (emails, phone numbers) are never recorded in events.
//! Spans and events carry contact ids and field-presence flags only.

use std::sync::Once;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub use crate::config::LogFormat;

static INIT: Once = Once::new();

/// Installs the global subscriber. Calls after the first are no-ops.
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}
