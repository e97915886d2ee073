//! Logging setup.
//!
//! oorm only emits `tracing` events and spans; installing a subscriber is up
//! to the application. [`init`] is a convenience for binaries and tests that
//! have no subscriber of their own.

use tracing_subscriber::EnvFilter;

/// Variable read before `RUST_LOG`.
pub const ENV_VAR: &str = "OORM_LOG";

/// Coarse log levels.
///
/// `Info` shows migrations and relation loads, `Trace` adds every statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Silent,
    Error,
    Info,
    Trace,
}

impl LogLevel {
    /// Filter directive for this level.
    pub fn directive(self) -> &'static str {
        match self {
            LogLevel::Silent => "off",
            LogLevel::Error => "oorm=error",
            LogLevel::Info => "oorm=info",
            LogLevel::Trace => "oorm=trace",
        }
    }
}

/// Build a filter: `filter` if given, else `OORM_LOG`, else `RUST_LOG`,
/// else errors only.
pub fn env_filter(filter: Option<&str>) -> EnvFilter {
    let from_env = || {
        std::env::var(ENV_VAR)
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| std::env::var("RUST_LOG").ok())
    };
    match filter.map(str::to_owned).or_else(from_env) {
        Some(directives) => EnvFilter::try_new(&directives)
            .unwrap_or_else(|_| EnvFilter::new(LogLevel::Error.directive())),
        None => EnvFilter::new(LogLevel::Error.directive()),
    }
}

/// Install a global fmt subscriber writing to stderr.
///
/// Does nothing if a global subscriber is already set.
pub fn init(filter: Option<&str>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(filter))
        .with_writer(std::io::stderr)
        .try_init();
}

/// [`init`] with a fixed level.
pub fn init_level(level: LogLevel) {
    init(Some(level.directive()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered() {
        assert!(LogLevel::Silent < LogLevel::Error);
        assert!(LogLevel::Info < LogLevel::Trace);
        assert_eq!(LogLevel::Silent.directive(), "off");
    }

    #[test]
    fn test_explicit_filter_wins() {
        let filter = env_filter(Some("oorm=debug"));
        assert_eq!(filter.to_string(), "oorm=debug");
    }

    #[test]
    fn test_invalid_filter_falls_back_to_errors() {
        let filter = env_filter(Some("oorm=[bad"));
        assert_eq!(filter.to_string(), "oorm=error");
    }
}
