use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, LoggingSection};

/// `RUST_LOG` wins over the configured filter.
fn env_filter(config: &LoggingSection) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter))
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_tracing(config: &LoggingSection, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("cla_assistant=debug,tower_http=debug")
    } else {
        env_filter(config)
    };

    let registry = tracing_subscriber::registry().with(filter);
    let _ = match config.format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).try_init(),
    };
}
