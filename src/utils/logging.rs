//! Logging initialization
//!
//! RUST_LOG always takes precedence; otherwise the configured filter is used,
//! falling back to "info".
//!
//! ```rust,no_run
//! use bllvm_resolver::utils::init_logging;
//!
//! init_logging(Some("bllvm_resolver=debug"));
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

const DEFAULT_FILTER: &str = "info";

/// Pick the filter directive: RUST_LOG, then config, then the default
fn filter_directive(rust_log: Option<String>, configured: Option<&str>) -> String {
    rust_log
        .filter(|s| !s.trim().is_empty())
        .or_else(|| configured.map(str::to_string))
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

fn env_filter(configured: Option<&str>) -> EnvFilter {
    EnvFilter::new(filter_directive(std::env::var("RUST_LOG").ok(), configured))
}

/// Human-readable logs on stderr; honours NO_COLOR
///
/// Does nothing if a global subscriber is already installed.
pub fn init_logging(filter: Option<&str>) {
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(std::env::var("NO_COLOR").is_err()),
        )
        .with(env_filter(filter))
        .try_init();
}

/// JSON lines for log aggregation
#[cfg(feature = "json-logging")]
pub fn init_json_logging(filter: Option<&str>) {
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(env_filter(filter))
        .try_init();
}

/// Initialize logging from the `logging` section of the resolver config
pub fn init_logging_from_config(config: Option<&LoggingConfig>) {
    let filter = config.and_then(|c| c.filter.as_deref());

    if config.map(|c| c.json_format).unwrap_or(false) {
        #[cfg(feature = "json-logging")]
        {
            init_json_logging(filter);
        }
        #[cfg(not(feature = "json-logging"))]
        {
            init_logging(filter);
        }
    } else {
        init_logging(filter);
    }
}
