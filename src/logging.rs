//! Tracing subscriber setup for the `phaseflow` binary.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "phaseflow=debug"
    } else {
        "phaseflow=warn"
    }
}

/// Install a compact stderr subscriber. `RUST_LOG` wins over `verbose`.
/// Calling it twice is harmless.
pub fn init_tracing(verbose: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(verbose).into());
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_raises_default_filter() {
        assert_eq!(default_filter(true), "phaseflow=debug");
        assert_eq!(default_filter(false), "phaseflow=warn");
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        init_tracing(false);
        init_tracing(true);
    }
}
