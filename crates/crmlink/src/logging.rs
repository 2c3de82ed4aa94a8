//! Process-wide logging setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

const FALLBACK_FILTER: &str = "info";

/// Picks the filter: `RUST_LOG` first, then the configured directive, then
/// plain `info` when neither parses.
fn build_filter(env: Option<&str>, configured: &str) -> EnvFilter {
    env.and_then(|directive| EnvFilter::try_new(directive).ok())
        .or_else(|| EnvFilter::try_new(configured).ok())
        .unwrap_or_else(|| EnvFilter::new(FALLBACK_FILTER))
}

/// Installs the global `tracing` subscriber and routes `log` records into it.
///
/// Returns `false` when a subscriber was already installed.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(env.as_deref(), &config.filter);
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        tracing::subscriber::set_global_default(registry.with(fmt::layer().json())).is_ok()
    } else {
        tracing::subscriber::set_global_default(registry.with(fmt::layer())).is_ok()
    };

    if installed {
        if let Err(e) = tracing_log::LogTracer::init() {
            tracing::warn!("log bridge not installed: {}", e);
        }
    }
    installed
}
