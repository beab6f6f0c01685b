//! Utility functions

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Version information for the binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Linear backoff between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffOptions {
    pub step: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffOptions {
    fn default() -> Self {
        Self {
            step: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Delay before retry number `retry` (1-based): `min(retry * step, max_delay)`
pub fn calc_linear_backoff(options: &BackoffOptions, retry: u32) -> Duration {
    options.step.saturating_mul(retry).min(options.max_delay)
}

/// Quote a string for safe use as a single `sh` word
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | '@' | '+' | ','))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Truncate text to at most `max` bytes on a char boundary
pub fn truncate(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_backoff() {
        let options = BackoffOptions::default();

        assert_eq!(calc_linear_backoff(&options, 1), Duration::from_secs(5));
        assert_eq!(calc_linear_backoff(&options, 2), Duration::from_secs(10));
        assert_eq!(calc_linear_backoff(&options, 6), Duration::from_secs(30));
        assert_eq!(calc_linear_backoff(&options, 9), Duration::from_secs(30)); // Capped at max
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("main"), "main");
        assert_eq!(shell_quote("feature/login"), "feature/login");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("x; rm -rf /"), "'x; rm -rf /'");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
