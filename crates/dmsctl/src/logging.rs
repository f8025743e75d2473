//! Tracing setup for dmsctl
//!
//! Logs go to stderr so stdout stays a clean report. Level resolution:
//! `--verbose` forces debug, otherwise `RUST_LOG`, otherwise the configured
//! level, otherwise info.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_LEVEL: &str = "info";

pub fn filter(verbose: bool, configured: Option<&str>) -> EnvFilter {
    if verbose {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured.unwrap_or(DEFAULT_LEVEL)))
}

pub fn init(verbose: bool, configured: Option<&str>) {
    // try_init: a second call (tests) must not panic
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(verbose, configured))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
