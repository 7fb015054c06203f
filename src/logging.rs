/// Logging setup
///
/// Logs go to stderr so they never mix with command output. The default
/// level is `warn`, which keeps shell hooks quiet.

use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_ENV_VAR: &str = "TERMTRAIL_LOG";

/// `TERMTRAIL_LOG` wins over the configured level
pub fn filter(config_level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_new(config_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Install the global subscriber
///
/// Safe to call more than once, later calls are ignored.
pub fn init(config_level: &str) {
    let _ = fmt()
        .with_env_filter(filter(config_level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_level_falls_back() {
        // must not panic on garbage
        let _ = filter("=== not a directive ===");
        init("debug");
        init("warn");
    }
}
