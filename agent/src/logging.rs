//! Log and trace output for the agent.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable selecting `json` output instead of plain text.
pub const ENV_LOG_FORMAT: &str = "GITVAULT_LOG_FORMAT";

/// Routes `log` records into `tracing` and installs the global subscriber.
///
/// `RUST_LOG` sets the filter; the default is `info`.
pub fn init_logging() {
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to route log records into tracing: {}", e);
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(ENV_LOG_FORMAT)
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_current_span(true)),
        )
    } else {
        tracing::subscriber::set_global_default(registry.with(fmt::layer().with_target(false)))
    };

    if let Err(e) = result {
        eprintln!("Failed to install tracing subscriber: {}", e);
    }
}
