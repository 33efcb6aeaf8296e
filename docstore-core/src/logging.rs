// docstore-core/src/logging.rs
// Log level control on top of the `log` facade.
// The crate only emits records; installing a logger is up to the embedding application.

use serde::{Deserialize, Serialize};

/// Verbosity threshold, least to most verbose
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Nothing is emitted
    Off,
    /// Errors - operations that were rejected
    Error,
    /// Warnings - ignored input, e.g. a request for the implicit `_id` index
    Warn,
    /// Info - collection lifecycle (create, drop, index changes)
    Info,
    /// Debug - query plans and mutation counts
    Debug,
    /// Trace - per-document decisions
    Trace,
}

impl LogLevel {
    pub const ALL: [LogLevel; 6] = [
        LogLevel::Off,
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    /// Level named `name`, ignoring ASCII case (`"warn"`, `"Debug"`)
    pub fn parse(name: &str) -> Option<LogLevel> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(name))
    }

    /// Lowercase name, as used in configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    fn to_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }

    fn from_filter(filter: log::LevelFilter) -> Self {
        match filter {
            log::LevelFilter::Off => LogLevel::Off,
            log::LevelFilter::Error => LogLevel::Error,
            log::LevelFilter::Warn => LogLevel::Warn,
            log::LevelFilter::Info => LogLevel::Info,
            log::LevelFilter::Debug => LogLevel::Debug,
            log::LevelFilter::Trace => LogLevel::Trace,
        }
    }
}

/// Set the global maximum log level.
///
/// This is process-wide state owned by the `log` crate, so it also affects
/// records emitted by other crates.
pub fn set_log_level(level: LogLevel) {
    log::set_max_level(level.to_filter());
}

/// Current global maximum log level
pub fn get_log_level() -> LogLevel {
    LogLevel::from_filter(log::max_level())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_ordered_by_verbosity() {
        let mut sorted = LogLevel::ALL;
        sorted.sort();
        assert_eq!(sorted, LogLevel::ALL);
        assert!(LogLevel::Off < LogLevel::Trace);
    }

    #[test]
    fn test_parse_ignores_case() {
        assert_eq!(LogLevel::parse("warn"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("TRACE"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::parse("Info"), Some(LogLevel::Info));
        assert_eq!(LogLevel::parse("verbose"), None);
        for level in LogLevel::ALL {
            assert_eq!(LogLevel::parse(level.as_str()), Some(level));
        }
    }

    #[test]
    fn test_names_match_config_format() {
        for level in LogLevel::ALL {
            let encoded = serde_json::to_value(level).unwrap();
            assert_eq!(encoded, serde_json::json!(level.as_str()));
        }
    }

    #[test]
    fn test_level_applies_to_log_facade() {
        set_log_level(LogLevel::Warn);
        assert_eq!(log::max_level(), log::LevelFilter::Warn);
        assert_eq!(get_log_level(), LogLevel::Warn);

        set_log_level(LogLevel::Trace);
        assert_eq!(get_log_level(), LogLevel::Trace);
    }
}
