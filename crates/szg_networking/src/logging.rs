//! Log output for binaries. Libraries only emit `tracing` events.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingSettings;
use crate::error::{NetError, NetResult};

/// Installs a global subscriber. `RUST_LOG` overrides `settings.level`.
///
/// Fails if a subscriber is already installed or the level does not parse.
pub fn init_logging(settings: &LoggingSettings) -> NetResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.level)
            .map_err(|e| NetError::Config(format!("logging.level '{}': {e}", settings.level)))?,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_ansi(settings.ansi)
                .with_target(true)
                .with_thread_names(settings.thread_names),
        )
        .try_init()
        .map_err(|e| NetError::Config(format!("logging: {e}")))?;
    tracing::info!(target: "szg::logging", "logging initialized at '{}'", settings.level);
    Ok(())
}
