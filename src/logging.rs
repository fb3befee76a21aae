//! Tracing setup for hosts that do not install their own subscriber.

use tracing_subscriber::EnvFilter;

pub const LOG_ENV_VAR: &str = "IDE_SESSION_LOG";
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Installs a stderr fmt subscriber.
///
/// The session never calls this itself; a host without its own subscriber
/// calls it once at startup, usually with `SessionConfig::log_filter`.
///
/// `directives` wins over `IDE_SESSION_LOG`; invalid or missing filters fall
/// back to `warn`. Returns false when a global subscriber is already set.
pub fn init_tracing(directives: Option<&str>) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(directives))
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .is_ok()
}

fn build_filter(directives: Option<&str>) -> EnvFilter {
    match directives {
        Some(directives) => EnvFilter::try_new(directives)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        None => EnvFilter::try_from_env(LOG_ENV_VAR)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    }
}
