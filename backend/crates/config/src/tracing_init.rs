use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the tracing subscriber with env-based filtering.
///
/// `RUST_LOG` wins, then `LOG_LEVEL`, then `default_level` (normally the
/// CLI's `--log-level`). Calling this twice is harmless.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_env("RUST_LOG")
        .or_else(|_| EnvFilter::try_from_env("LOG_LEVEL"))
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_lowercase()));

    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}
