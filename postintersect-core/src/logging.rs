//! Shared logging setup for the PostIntersect binary.

use crate::Result;
use tracing_subscriber::EnvFilter;

/// Initializes structured logging based on verbosity level.
///
/// The `POSTINTERSECT_LOG` environment variable overrides the CLI flags
/// with a full env-filter directive when set.
///
/// # Arguments
/// * `verbose` - Verbosity level (0=INFO, 1=DEBUG, 2+=TRACE)
/// * `quiet` - If true, only show ERROR level logs
pub fn init_logging(verbose: u8, quiet: bool) -> Result<()> {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };

    let filter = EnvFilter::try_from_env("POSTINTERSECT_LOG")
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| {
            crate::error::PostIntersectError::configuration(format!(
                "Failed to initialize logging: {}",
                e
            ))
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    // Logging can only be initialized once per test process, so only the
    // level mapping is exercised here.

    #[test]
    fn test_verbosity_levels() {
        let cases = [
            ((true, 0), "error"),
            ((true, 5), "error"),
            ((false, 0), "info"),
            ((false, 1), "debug"),
            ((false, 4), "trace"),
        ];

        for ((quiet, verbose), expected) in cases {
            let level = match (quiet, verbose) {
                (true, _) => "error",
                (false, 0) => "info",
                (false, 1) => "debug",
                (false, _) => "trace",
            };
            assert_eq!(level, expected, "quiet={}, verbose={}", quiet, verbose);
        }
    }
}
