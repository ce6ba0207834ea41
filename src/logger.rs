//! Logging initialisation via tracing-subscriber.
//!
//! Output always goes to stderr: stdout belongs to the stdio transport.
//! A bare level (`"debug"`) applies to this crate only; dependencies such as
//! hyper and axum stay at `warn` unless a full directive is given.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

const CRATE_TARGET: &str = "sofa_mcp";

/// Initialise the global tracing subscriber. Call once.
///
/// If `prefer_level` is `true` (a CLI `-v` flag), `level` wins over `RUST_LOG`.
/// Otherwise `RUST_LOG` wins and `level` is the fallback.
pub fn init(level: &str, prefer_level: bool) -> Result<(), AppError> {
    let filter = build_filter(level, prefer_level, std::env::var("RUST_LOG").ok().as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))?;

    Ok(())
}

/// Expand a bare level into a crate-scoped directive; pass directives through.
pub fn directive(level: &str) -> String {
    let bare = level.trim().to_ascii_lowercase();
    match parse_level(&bare) {
        Ok(l) if l > LevelFilter::WARN => format!("warn,{CRATE_TARGET}={bare}"),
        Ok(_) => bare,
        Err(_) => level.to_string(),
    }
}

fn build_filter(level: &str, prefer_level: bool, rust_log: Option<&str>) -> Result<EnvFilter, AppError> {
    let configured = EnvFilter::try_new(directive(level));
    let from_env = rust_log.filter(|s| !s.trim().is_empty()).map(EnvFilter::try_new);

    match (prefer_level, configured, from_env) {
        (true, Ok(f), _) => Ok(f),
        (false, _, Some(Ok(f))) => Ok(f),
        (false, Ok(f), _) => Ok(f),
        (true, Err(_), Some(Ok(f))) => Ok(f),
        (_, Err(e), Some(Err(env_err))) => Err(AppError::Logger(format!(
            "invalid log level '{level}': {e}; RUST_LOG parse failed: {env_err}"
        ))),
        (_, Err(e), None) => Err(AppError::Logger(format!("invalid log level '{level}': {e}"))),
    }
}

/// Parse a bare level string into a [`LevelFilter`].
pub fn parse_level(level: &str) -> Result<LevelFilter, AppError> {
    if level.is_empty() {
        return Err(AppError::Logger("log level must not be empty".into()));
    }
    level
        .parse::<LevelFilter>()
        .map_err(|_| AppError::Logger(format!("unrecognised log level: '{level}'")))
}
