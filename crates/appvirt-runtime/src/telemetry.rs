//! Log output.

use tracing_subscriber::EnvFilter;

/// Install the process-wide fmt subscriber.  `RUST_LOG` overrides
/// `default_level`.
///
/// Returns `false` if a subscriber was already installed, in which case
/// the existing one is left alone.
pub fn init_tracing(default_level: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_refused() {
        init_tracing("debug");
        assert!(!init_tracing("info"));
    }
}
