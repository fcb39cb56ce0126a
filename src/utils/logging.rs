//! Tracing setup shared by the `cmdq` binary and tests.

use tracing::Level;

/// Environment variable that overrides the configured log level.
pub const LOG_LEVEL_ENV: &str = "CMDQ_LOG";

/// Map a textual level to a `tracing::Level`. Unknown values fall back to INFO.
pub fn parse_level(level: &str) -> Level {
    match level.trim().to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" | "warning" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Install a fmt subscriber at `default_level`, unless `CMDQ_LOG` names another level.
///
/// Uses `try_init` so calling this more than once (tests, embedding
/// applications with their own subscriber) is harmless.
pub fn init(default_level: &str) {
    let level = std::env::var(LOG_LEVEL_ENV)
        .map(|v| parse_level(&v))
        .unwrap_or_else(|_| parse_level(default_level));

    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}
