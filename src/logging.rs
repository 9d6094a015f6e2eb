//! Structured logging setup for the daemon and for library embedders.

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initialize tracing with an env-filter. The default level depends on
/// the build profile; `RUST_LOG` overrides it.
pub fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("ringfs=debug")
        } else {
            EnvFilter::new("ringfs=info")
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)?;

    info!(target: "ringfs", "logging initialized");
    Ok(())
}

/// Initialize logging, tolerating an already-installed subscriber.
pub fn init_logging_safe() {
    if init_logging().is_err() {
        // Another subscriber is active (embedding application, tests);
        // keep it.
    }
}
