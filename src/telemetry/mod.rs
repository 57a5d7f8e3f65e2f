//! Structured logging setup, grounded on `main.rs`'s inline
//! `tracing_subscriber::fmt` + `EnvFilter` initialization, pulled into its
//! own module so both `relay serve` and `bridge run` share one verbosity
//! mapping.

use tracing_subscriber::EnvFilter;

/// Maps `-v` repeat count to a filter directive, `claude_watch_relay=`-scoped
/// at the lower verbosities so third-party crate noise stays quiet until
/// asked for.
#[must_use]
pub fn filter_for_verbosity(verbose: u8) -> &'static str {
    match verbose {
        0 => "info,claude_watch_relay=info",
        1 => "info,claude_watch_relay=debug",
        2 => "debug",
        _ => "trace",
    }
}

/// Initialize the global `tracing` subscriber. Call once, at process start.
pub fn init(verbose: u8) {
    let filter = filter_for_verbosity(verbose);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_escalates_filter_directive() {
        assert_eq!(filter_for_verbosity(0), "info,claude_watch_relay=info");
        assert_eq!(filter_for_verbosity(3), "trace");
    }
}
