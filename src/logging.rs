use tracing_subscriber::EnvFilter;

/// Initializes a `tracing_subscriber` using `SCANWATCH_LOG` first, then
/// `RUST_LOG`, then `info`. Logs go to stderr so table output stays clean.
///
/// Field names used across the crate: `feed`, `op`, `status`, `took_ms`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("SCANWATCH_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
